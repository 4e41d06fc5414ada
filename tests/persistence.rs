//! Persistence and recovery tests for the custom fact overlay.
//!
//! These tests verify that the custom fact set written through the knowledge
//! base manager survives a restart (close + reopen of the data directory).

use std::path::Path;
use std::sync::Arc;

use pulmo_nesy::config::{PulmoConfig, StoreConfig};
use pulmo_nesy::fact::{Category, Fact, FactId};
use pulmo_nesy::kb::{ClearOutcome, Generation, KbSources, KnowledgeBaseManager, Origin};
use pulmo_nesy::reason::chaining::ChainingEngineFactory;
use pulmo_nesy::reason::ReasoningOrchestrator;
use pulmo_nesy::store::{CustomFactStore, DurableFactStore, StoreState};
use pulmo_nesy::translate::{QueryDescriptor, ReasoningMode, Subject};

fn durable_manager(dir: &Path) -> KnowledgeBaseManager {
    KnowledgeBaseManager::open(
        KbSources::bundled().unwrap(),
        Box::new(DurableFactStore::open(dir).unwrap()),
        Box::new(ChainingEngineFactory),
    )
    .unwrap()
}

fn symptom(id: &str, subject: &str, value: &str) -> Fact {
    Fact::new(FactId::from_raw(id), Category::Symptom, subject, None, value).unwrap()
}

/// Patient2's default facts, which support pneumothorax and nothing about copd.
fn pneumothorax_facts(manager: &KnowledgeBaseManager) -> Vec<Fact> {
    manager
        .sources()
        .default_facts
        .iter()
        .filter(|f| f.subject == "patient2")
        .cloned()
        .collect()
}

fn proves(manager: &KnowledgeBaseManager, object: &str) -> bool {
    let descriptor =
        QueryDescriptor::for_object(object, Subject::Unbound, ReasoningMode::ProveSpecific)
            .unwrap();
    !ReasoningOrchestrator::new()
        .run(&descriptor, &manager.snapshot())
        .unwrap()
        .is_empty()
}

#[test]
fn fresh_directory_starts_on_defaults() {
    let dir = tempfile::TempDir::new().unwrap();
    let manager = durable_manager(dir.path());
    let kb = manager.active();
    assert_eq!(kb.origin(), Origin::Default);
    assert_eq!(kb.generation(), Generation::INITIAL);
    assert_eq!(kb.facts().len(), manager.sources().default_facts.len());
    assert!(proves(&manager, "copd"));
}

#[test]
fn custom_facts_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    // First session: replace the base with patient2's facts.
    let expected = {
        let manager = durable_manager(dir.path());
        let facts = pneumothorax_facts(&manager);
        assert!(!facts.is_empty());
        let kb = manager.replace_custom(facts.clone()).unwrap();
        assert_eq!(kb.origin(), Origin::Custom);
        assert!(proves(&manager, "pneumothorax"));
        assert!(!proves(&manager, "copd"));
        facts
    };

    // Second session: the custom set is restored as generation 0.
    let manager = durable_manager(dir.path());
    let kb = manager.active();
    assert_eq!(kb.origin(), Origin::Custom);
    assert_eq!(kb.generation(), Generation::INITIAL);
    assert_eq!(kb.facts(), expected.as_slice());
    assert!(proves(&manager, "pneumothorax"));
    assert!(!proves(&manager, "copd"));
}

#[test]
fn appended_facts_keep_order_across_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    {
        let manager = durable_manager(dir.path());
        manager
            .append_custom(vec![symptom("SYMPTOMa1", "patient9", "fever")])
            .unwrap();
        manager
            .append_custom(vec![
                symptom("SYMPTOMa2", "patient9", "dyspnea"),
                symptom("SYMPTOMa3", "patient9", "wheezing"),
            ])
            .unwrap();
        assert_eq!(manager.active().generation().value(), 2);
    }

    let manager = durable_manager(dir.path());
    let ids: Vec<_> = manager
        .active()
        .facts()
        .iter()
        .map(|f| f.id.as_str().to_string())
        .collect();
    assert_eq!(ids, vec!["SYMPTOMa1", "SYMPTOMa2", "SYMPTOMa3"]);
}

#[test]
fn clear_is_persisted() {
    let dir = tempfile::TempDir::new().unwrap();
    {
        let manager = durable_manager(dir.path());
        manager
            .replace_custom(vec![symptom("SYMPTOMc1", "patient9", "fever")])
            .unwrap();
        assert_eq!(manager.clear().unwrap(), ClearOutcome::Cleared { removed: 1 });
        assert_eq!(manager.clear().unwrap(), ClearOutcome::NothingToClear);
    }

    let manager = durable_manager(dir.path());
    assert_eq!(manager.active().origin(), Origin::Default);
    assert_eq!(manager.clear().unwrap(), ClearOutcome::NothingToClear);
    assert_eq!(manager.active().generation(), Generation::INITIAL);
}

#[test]
fn load_default_leaves_the_store_alone() {
    let dir = tempfile::TempDir::new().unwrap();
    {
        let manager = durable_manager(dir.path());
        manager
            .replace_custom(vec![symptom("SYMPTOMd1", "patient9", "fever")])
            .unwrap();
        let kb = manager.load_default().unwrap();
        assert_eq!(kb.origin(), Origin::Default);
        assert_eq!(kb.generation().value(), 2);
    }

    // The custom set was never removed, so it comes back on restart.
    let manager = durable_manager(dir.path());
    assert_eq!(manager.active().origin(), Origin::Custom);
    assert_eq!(manager.active().facts().len(), 1);
}

#[test]
fn empty_custom_set_starts_on_defaults() {
    let dir = tempfile::TempDir::new().unwrap();
    {
        let store = DurableFactStore::open(dir.path()).unwrap();
        store.replace(&[]).unwrap();
        assert_eq!(store.state().unwrap(), StoreState::Empty);
    }
    let manager = durable_manager(dir.path());
    assert_eq!(manager.active().origin(), Origin::Default);
    // An empty set still exists, so clearing removes it.
    assert_eq!(manager.clear().unwrap(), ClearOutcome::Cleared { removed: 0 });
}

#[test]
fn store_shared_with_manager_sees_its_writes() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(DurableFactStore::open(dir.path()).unwrap());
    let manager = KnowledgeBaseManager::open(
        KbSources::bundled().unwrap(),
        Box::new(Arc::clone(&store)),
        Box::new(ChainingEngineFactory),
    )
    .unwrap();
    manager
        .replace_custom(vec![symptom("SYMPTOMs1", "patient9", "fever")])
        .unwrap();
    assert_eq!(store.state().unwrap(), StoreState::Populated(1));
    manager.clear().unwrap();
    assert_eq!(store.state().unwrap(), StoreState::Absent);
}

#[test]
fn configured_data_dir_restores_on_startup() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = PulmoConfig {
        store: StoreConfig {
            data_dir: Some(dir.path().join("state")),
        },
        ..PulmoConfig::default()
    };

    {
        let manager = config.open_knowledge_base().unwrap();
        assert_eq!(manager.active().origin(), Origin::Default);
        manager
            .replace_custom(vec![symptom("SYMPTOMk1", "patient9", "fever")])
            .unwrap();
    }

    let manager = config.open_knowledge_base().unwrap();
    let kb = manager.active();
    assert_eq!(kb.origin(), Origin::Custom);
    assert_eq!(kb.facts()[0].value, "fever");
}
