//! Knowledge base lifecycle.
//!
//! Exactly one [`KnowledgeBase`] is active at a time. It is either the bundled
//! default fact set or a custom overlay persisted in a [`CustomFactStore`];
//! the rule set is shared by both. Each mutation builds a complete new
//! generation (facts, id index, reasoning engine) before persisting and
//! swapping it in, so readers only ever see whole generations.

pub mod rules;
pub mod seed;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{KbError, KbResult};
use crate::fact::{Fact, FactId};
use crate::reason::{EngineFactory, ReasoningEngine};
use crate::store::{CustomFactStore, StoreState};

pub use rules::{Rule, RuleSet};
pub use seed::KbSources;

/// Version marker of the active fact/rule universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(u64);

impl Generation {
    pub const INITIAL: Generation = Generation(0);

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the active fact set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Default,
    Custom,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Origin::Default => "default",
            Origin::Custom => "custom",
        })
    }
}

/// One immutable generation of facts plus the shared rules.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    generation: Generation,
    origin: Origin,
    facts: Vec<Fact>,
    index: HashMap<FactId, usize>,
    rules: Arc<RuleSet>,
}

impl KnowledgeBase {
    /// Assemble a generation; fact ids must be unique within it.
    pub fn new(
        generation: Generation,
        origin: Origin,
        facts: Vec<Fact>,
        rules: Arc<RuleSet>,
    ) -> KbResult<Self> {
        let mut index = HashMap::with_capacity(facts.len());
        for (i, fact) in facts.iter().enumerate() {
            if index.insert(fact.id.clone(), i).is_some() {
                return Err(KbError::DuplicateFactId {
                    id: fact.id.to_string(),
                    generation: generation.value(),
                });
            }
        }
        Ok(Self {
            generation,
            origin,
            facts,
            index,
            rules,
        })
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Facts in insertion order.
    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn fact(&self, id: &FactId) -> Option<&Fact> {
        self.index.get(id).map(|&i| &self.facts[i])
    }

    pub fn contains_id(&self, id: &FactId) -> bool {
        self.index.contains_key(id)
    }
}

/// A generation together with the engine built for exactly that generation.
#[derive(Clone)]
pub struct Snapshot {
    kb: Arc<KnowledgeBase>,
    engine: Arc<dyn ReasoningEngine>,
}

impl Snapshot {
    pub fn kb(&self) -> &Arc<KnowledgeBase> {
        &self.kb
    }

    pub fn engine(&self) -> &dyn ReasoningEngine {
        self.engine.as_ref()
    }

    pub fn generation(&self) -> Generation {
        self.kb.generation
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("generation", &self.kb.generation)
            .field("origin", &self.kb.origin)
            .field("facts", &self.kb.facts.len())
            .field("engine", &self.engine.name())
            .finish()
    }
}

/// Result of [`KnowledgeBaseManager::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// The custom set (holding `removed` facts) was deleted and the default base loaded.
    Cleared { removed: usize },
    /// No custom set existed; nothing changed.
    NothingToClear,
}

/// Owns the active knowledge base and serializes every rebuild.
pub struct KnowledgeBaseManager {
    active: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    store: Box<dyn CustomFactStore>,
    factory: Box<dyn EngineFactory>,
    sources: KbSources,
}

impl KnowledgeBaseManager {
    /// Build generation 0.
    ///
    /// A populated custom store is restored as the active base; otherwise the
    /// default facts are loaded.
    pub fn open(
        sources: KbSources,
        store: Box<dyn CustomFactStore>,
        factory: Box<dyn EngineFactory>,
    ) -> KbResult<Self> {
        let (origin, facts) = match store.state()? {
            StoreState::Populated(_) => (Origin::Custom, store.load()?.unwrap_or_default()),
            StoreState::Absent | StoreState::Empty => {
                (Origin::Default, sources.default_facts.as_ref().clone())
            }
        };
        let snapshot = build_snapshot(
            factory.as_ref(),
            Generation::INITIAL,
            origin,
            facts,
            &sources.rules,
        )?;
        tracing::info!(
            generation = snapshot.generation().value(),
            origin = %origin,
            facts = snapshot.kb.facts.len(),
            rules = sources.rules.len(),
            engine = snapshot.engine.name(),
            "knowledge base opened"
        );
        Ok(Self {
            active: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            store,
            factory,
            sources,
        })
    }

    /// The active knowledge base.
    pub fn active(&self) -> Arc<KnowledgeBase> {
        Arc::clone(&self.snapshot().kb)
    }

    /// The active generation together with its engine.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.active.read().expect("knowledge base lock poisoned"))
    }

    /// The immutable inputs (default facts, rules) generations are built from.
    pub fn sources(&self) -> &KbSources {
        &self.sources
    }

    /// Load the bundled default facts as a new generation.
    ///
    /// The custom store is left as it is.
    pub fn load_default(&self) -> KbResult<Arc<KnowledgeBase>> {
        let _guard = self.writer.lock().expect("knowledge base writer lock poisoned");
        let snapshot = self.build_next(Origin::Default, self.sources.default_facts.as_ref().clone())?;
        Ok(self.swap(snapshot))
    }

    /// Make `facts` the sole custom set and activate it.
    pub fn replace_custom(&self, facts: Vec<Fact>) -> KbResult<Arc<KnowledgeBase>> {
        let _guard = self.writer.lock().expect("knowledge base writer lock poisoned");
        self.replace_locked(facts)
    }

    /// Append `facts` to the persisted custom set and activate the result.
    ///
    /// With no custom set, or an empty one, this is [`Self::replace_custom`].
    pub fn append_custom(&self, facts: Vec<Fact>) -> KbResult<Arc<KnowledgeBase>> {
        let _guard = self.writer.lock().expect("knowledge base writer lock poisoned");
        let existing = match self.store.state()? {
            StoreState::Populated(_) => self.store.load()?.unwrap_or_default(),
            StoreState::Absent | StoreState::Empty => return self.replace_locked(facts),
        };
        let mut combined = existing;
        combined.extend(facts.iter().cloned());
        let snapshot = self.build_next(Origin::Custom, combined)?;
        self.store.append(&facts).inspect_err(|e| {
            tracing::error!(error = %e, "failed to persist appended facts");
        })?;
        Ok(self.swap(snapshot))
    }

    /// Delete the custom set and return to the default facts.
    ///
    /// Idempotent: without a custom set nothing changes, not even the generation.
    pub fn clear(&self) -> KbResult<ClearOutcome> {
        let _guard = self.writer.lock().expect("knowledge base writer lock poisoned");
        let state = self.store.state()?;
        if !state.is_present() {
            tracing::info!("no custom facts to clear");
            return Ok(ClearOutcome::NothingToClear);
        }
        let removed = match state {
            StoreState::Populated(n) => n,
            StoreState::Absent | StoreState::Empty => 0,
        };
        let snapshot = self.build_next(Origin::Default, self.sources.default_facts.as_ref().clone())?;
        self.store.remove().inspect_err(|e| {
            tracing::error!(error = %e, "failed to remove custom facts");
        })?;
        self.swap(snapshot);
        Ok(ClearOutcome::Cleared { removed })
    }

    fn replace_locked(&self, facts: Vec<Fact>) -> KbResult<Arc<KnowledgeBase>> {
        let snapshot = self.build_next(Origin::Custom, facts)?;
        self.store.replace(snapshot.kb.facts()).inspect_err(|e| {
            tracing::error!(error = %e, "failed to persist custom facts");
        })?;
        Ok(self.swap(snapshot))
    }

    fn build_next(&self, origin: Origin, facts: Vec<Fact>) -> KbResult<Snapshot> {
        let generation = self.snapshot().generation().next();
        build_snapshot(
            self.factory.as_ref(),
            generation,
            origin,
            facts,
            &self.sources.rules,
        )
        .inspect_err(|e| {
            tracing::warn!(
                generation = generation.value(),
                origin = %origin,
                error = %e,
                "knowledge base rebuild failed; previous generation stays active"
            );
        })
    }

    fn swap(&self, snapshot: Snapshot) -> Arc<KnowledgeBase> {
        let kb = Arc::clone(&snapshot.kb);
        *self.active.write().expect("knowledge base lock poisoned") = Arc::new(snapshot);
        tracing::info!(
            generation = kb.generation().value(),
            origin = %kb.origin(),
            facts = kb.facts().len(),
            "knowledge base swapped"
        );
        kb
    }
}

impl fmt::Debug for KnowledgeBaseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeBaseManager")
            .field("active", &self.snapshot())
            .finish_non_exhaustive()
    }
}

fn build_snapshot(
    factory: &dyn EngineFactory,
    generation: Generation,
    origin: Origin,
    facts: Vec<Fact>,
    rules: &Arc<RuleSet>,
) -> KbResult<Snapshot> {
    let kb = KnowledgeBase::new(generation, origin, facts, Arc::clone(rules))?;
    let engine = factory.build(&kb).map_err(KbError::EngineBuild)?;
    Ok(Snapshot {
        kb: Arc::new(kb),
        engine,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ReasoningError, StoreError, StoreResult};
    use crate::fact::Category;
    use crate::reason::chaining::ChainingEngineFactory;
    use crate::store::MemFactStore;

    fn symptom(id: &str, value: &str) -> Fact {
        Fact::new(FactId::from_raw(id), Category::Symptom, "patient1", None, value).unwrap()
    }

    fn manager_with(store: Box<dyn CustomFactStore>) -> KnowledgeBaseManager {
        KnowledgeBaseManager::open(
            KbSources::bundled().unwrap(),
            store,
            Box::new(ChainingEngineFactory),
        )
        .unwrap()
    }

    fn manager() -> KnowledgeBaseManager {
        manager_with(Box::new(MemFactStore::new()))
    }

    #[test]
    fn opens_on_default_generation_zero() {
        let kb = manager().active();
        assert_eq!(kb.generation(), Generation::INITIAL);
        assert_eq!(kb.origin(), Origin::Default);
        assert!(!kb.facts().is_empty());
    }

    #[test]
    fn opens_on_custom_when_store_is_populated() {
        let store = MemFactStore::with_facts(vec![symptom("SYMPTOMaa", "fever")]);
        let kb = manager_with(Box::new(store)).active();
        assert_eq!(kb.origin(), Origin::Custom);
        assert_eq!(kb.facts().len(), 1);
    }

    #[test]
    fn empty_store_opens_on_default() {
        let kb = manager_with(Box::new(MemFactStore::with_facts(Vec::new()))).active();
        assert_eq!(kb.origin(), Origin::Default);
    }

    #[test]
    fn replace_then_append_concatenates() {
        let m = manager();
        let f1 = vec![symptom("SYMPTOMa1", "fever")];
        let f2 = vec![symptom("SYMPTOMb2", "fatigue")];
        let kb = m.replace_custom(f1.clone()).unwrap();
        assert_eq!(kb.facts(), f1.as_slice());
        assert_eq!(kb.origin(), Origin::Custom);
        assert_eq!(kb.generation().value(), 1);

        let kb = m.append_custom(f2.clone()).unwrap();
        let expected: Vec<_> = f1.iter().chain(&f2).cloned().collect();
        assert_eq!(kb.facts(), expected.as_slice());
        assert_eq!(kb.generation().value(), 2);
    }

    #[test]
    fn append_on_absent_store_is_replace() {
        let m = manager();
        let f1 = vec![symptom("SYMPTOMa1", "fever")];
        let kb = m.append_custom(f1.clone()).unwrap();
        assert_eq!(kb.facts(), f1.as_slice());
        assert_eq!(kb.origin(), Origin::Custom);
    }

    #[test]
    fn clear_is_idempotent() {
        let m = manager();
        assert_eq!(m.clear().unwrap(), ClearOutcome::NothingToClear);
        assert_eq!(m.active().generation(), Generation::INITIAL);

        m.replace_custom(vec![symptom("SYMPTOMa1", "fever")]).unwrap();
        assert_eq!(m.clear().unwrap(), ClearOutcome::Cleared { removed: 1 });
        let kb = m.active();
        assert_eq!(kb.origin(), Origin::Default);
        assert_eq!(kb.generation().value(), 2);

        assert_eq!(m.clear().unwrap(), ClearOutcome::NothingToClear);
        assert_eq!(m.active().generation().value(), 2);
    }

    #[test]
    fn clear_removes_empty_custom_set() {
        let m = manager_with(Box::new(MemFactStore::with_facts(Vec::new())));
        assert_eq!(m.clear().unwrap(), ClearOutcome::Cleared { removed: 0 });
        assert_eq!(m.active().generation().value(), 1);
    }

    #[test]
    fn duplicate_ids_leave_previous_generation_active() {
        let m = manager();
        let err = m
            .replace_custom(vec![symptom("SYMPTOMx", "fever"), symptom("SYMPTOMx", "fatigue")])
            .unwrap_err();
        assert!(matches!(err, KbError::DuplicateFactId { .. }));
        let kb = m.active();
        assert_eq!(kb.generation(), Generation::INITIAL);
        assert_eq!(kb.origin(), Origin::Default);
    }

    #[derive(Debug, Default)]
    struct FailingStore;

    impl CustomFactStore for FailingStore {
        fn state(&self) -> StoreResult<StoreState> {
            Ok(StoreState::Absent)
        }
        fn load(&self) -> StoreResult<Option<Vec<Fact>>> {
            Ok(None)
        }
        fn replace(&self, _facts: &[Fact]) -> StoreResult<()> {
            Err(StoreError::Redb {
                message: "disk full".into(),
            })
        }
        fn append(&self, facts: &[Fact]) -> StoreResult<()> {
            self.replace(facts)
        }
        fn remove(&self) -> StoreResult<bool> {
            Ok(false)
        }
    }

    #[test]
    fn store_failure_leaves_previous_generation_active() {
        let m = manager_with(Box::new(FailingStore));
        let err = m.replace_custom(vec![symptom("SYMPTOMa1", "fever")]).unwrap_err();
        assert!(matches!(err, KbError::Store(_)));
        assert_eq!(m.active().generation(), Generation::INITIAL);
        assert_eq!(m.active().origin(), Origin::Default);
    }

    #[test]
    fn engine_build_failure_is_fatal_at_open() {
        let store = Arc::new(MemFactStore::new());
        let factory = |_: &KnowledgeBase| -> crate::error::ReasoningResult<Arc<dyn ReasoningEngine>> {
            Err(ReasoningError::EngineFailed {
                engine: "broken".into(),
                message: "cannot build".into(),
            })
        };
        let result = KnowledgeBaseManager::open(
            KbSources::bundled().unwrap(),
            Box::new(Arc::clone(&store)),
            Box::new(factory),
        );
        assert!(matches!(result, Err(KbError::EngineBuild(_))));
        assert_eq!(store.state().unwrap(), StoreState::Absent);
    }

    #[test]
    fn append_rejects_ids_already_in_the_store() {
        let store = Arc::new(MemFactStore::new());
        let m = manager_with(Box::new(Arc::clone(&store)));
        m.replace_custom(vec![symptom("SYMPTOMa1", "fever")]).unwrap();
        // Written behind the manager's back, so the active base never saw it.
        store.append(&[symptom("SYMPTOMb2", "fatigue")]).unwrap();

        let err = m
            .append_custom(vec![symptom("SYMPTOMb2", "dyspnea")])
            .unwrap_err();
        assert!(matches!(err, KbError::DuplicateFactId { .. }));
        assert_eq!(store.state().unwrap(), StoreState::Populated(2));
        assert_eq!(m.active().generation().value(), 1);
        assert_eq!(m.active().facts().len(), 1);
    }

    #[test]
    fn snapshot_outlives_swap() {
        let m = manager();
        let before = m.snapshot();
        m.replace_custom(vec![symptom("SYMPTOMa1", "fever")]).unwrap();
        assert_eq!(before.generation(), Generation::INITIAL);
        assert_eq!(before.kb().origin(), Origin::Default);
        assert_eq!(m.snapshot().generation().value(), 1);
    }
}
