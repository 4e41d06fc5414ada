//! End-to-end routing tests with a scripted oracle.
//!
//! The oracle answers by recognizing which stage a prompt belongs to, so the
//! whole pipeline (commands, classification, translation, reasoning,
//! interpretation) runs deterministically against the bundled knowledge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use pulmo_nesy::error::{ReasoningError, ReasoningResult};
use pulmo_nesy::fact::{Category, FactPredicate};
use pulmo_nesy::kb::{Generation, KbSources, KnowledgeBase, KnowledgeBaseManager, Origin};
use pulmo_nesy::oracle::{last_input, OracleResult, TextOracle};
use pulmo_nesy::reason::chaining::ChainingEngine;
use pulmo_nesy::reason::{ProofTrace, ReasoningEngine, ReasoningOrchestrator};
use pulmo_nesy::router::{Router, RouterError, Source};
use pulmo_nesy::store::MemFactStore;
use pulmo_nesy::translate::{QueryDescriptor, ReasoningMode, Subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Classify,
    Ingest,
    Translate,
    Interpret,
    Describe,
}

#[derive(Default)]
struct ScriptedOracle {
    labels: HashMap<&'static str, &'static str>,
    translations: HashMap<&'static str, &'static str>,
    facts: HashMap<&'static str, &'static str>,
    calls: Mutex<Vec<Stage>>,
}

impl ScriptedOracle {
    fn symbolic(mut self, query: &'static str, translation: &'static str) -> Self {
        self.labels.insert(query, "symbolic");
        self.translations.insert(query, translation);
        self
    }

    fn label(mut self, query: &'static str, label: &'static str) -> Self {
        self.labels.insert(query, label);
        self
    }

    /// `record` uses `{token}` where the generated identifier goes.
    fn fact(mut self, statement: &'static str, record: &'static str) -> Self {
        self.facts.insert(statement, record);
        self
    }

    fn calls(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().clone()
    }
}

impl TextOracle for ScriptedOracle {
    fn complete(&self, prompt: &str) -> OracleResult<String> {
        let (stage, answer) = if prompt.contains("Respond only with 'symbolic' or 'sub-symbolic'") {
            let query = last_input(prompt, "Query:").unwrap_or_default();
            let label = self.labels.get(query).copied().unwrap_or("sub-symbolic");
            (Stage::Classify, label.to_string())
        } else if prompt.contains("clinical statement") {
            let statement = last_input(prompt, "Input:").unwrap_or_default();
            let token = last_input(prompt, "Identifier:").unwrap_or_default();
            let answer = match self.facts.get(statement) {
                Some(record) => record.replace("{token}", token),
                None => "I am not sure what that means.".to_string(),
            };
            (Stage::Ingest, answer)
        } else if prompt.contains("explanation interpreter") {
            (Stage::Interpret, "Summary from oracle.".to_string())
        } else if prompt.contains("Illness not supported.") {
            let query = last_input(prompt, "Input:").unwrap_or_default();
            let answer = self
                .translations
                .get(query)
                .copied()
                .unwrap_or("Illness not supported.");
            (Stage::Translate, answer.to_string())
        } else {
            (Stage::Describe, "Descriptive answer.".to_string())
        };
        self.calls.lock().unwrap().push(stage);
        Ok(answer)
    }
}

/// Counts engine calls made through any engine it builds.
struct CountingEngine {
    inner: ChainingEngine,
    calls: Arc<AtomicUsize>,
}

impl ReasoningEngine for CountingEngine {
    fn name(&self) -> &str {
        "counting"
    }

    fn prove_specific(&self, query: &str, depth: usize) -> ReasoningResult<Vec<ProofTrace>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.prove_specific(query, depth)
    }

    fn derive_all(&self, query: &str, depth: usize) -> ReasoningResult<Vec<ProofTrace>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.derive_all(query, depth)
    }
}

fn manager_counting(calls: Arc<AtomicUsize>) -> KnowledgeBaseManager {
    let factory = move |kb: &KnowledgeBase| -> ReasoningResult<Arc<dyn ReasoningEngine>> {
        Ok(Arc::new(CountingEngine {
            inner: ChainingEngine::new(kb),
            calls: Arc::clone(&calls),
        }))
    };
    KnowledgeBaseManager::open(
        KbSources::bundled().unwrap(),
        Box::new(MemFactStore::new()),
        Box::new(factory),
    )
    .unwrap()
}

fn router(oracle: ScriptedOracle) -> (Router, Arc<ScriptedOracle>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let oracle = Arc::new(oracle);
    let router = Router::new(
        Arc::new(manager_counting(Arc::clone(&calls))),
        Arc::clone(&oracle) as Arc<dyn TextOracle>,
    );
    (router, oracle, calls)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn asthma_query_reports_no_derivation() {
    let query = "Is the patient diagnosed with asthma?";
    let (router, oracle, engine_calls) =
        router(ScriptedOracle::default().symbolic(query, "(bc (DiagnosedWith $patient asthma))"));

    let response = router.handle(query).unwrap();
    assert_eq!(response.source, Source::Symbolic);
    assert!(response.text.contains("No derivation was found"), "{}", response.text);
    assert!(response.text.contains("(DiagnosedWith $patient asthma)"));
    assert_eq!(engine_calls.load(Ordering::SeqCst), 1);
    // Nothing to interpret, so the oracle is not asked to summarize.
    assert_eq!(oracle.calls(), vec![Stage::Classify, Stage::Translate]);
}

#[test]
fn add_facts_creates_custom_base() {
    let statement = "The patient1 has a persistent cough.";
    let (router, _, _) = router(
        ScriptedOracle::default().fact(statement, "(: SYMPTOM{token} (Presents patient1 persistent_cough))"),
    );

    let response = router.handle(&format!("add facts > {statement}")).unwrap();
    assert_eq!(response.source, Source::System);
    assert!(response.text.starts_with("Facts added:\n(: SYMPTOM"), "{}", response.text);

    let kb = router.knowledge_base().active();
    assert_eq!(kb.origin(), Origin::Custom);
    assert_eq!(kb.generation(), Generation::INITIAL.next());
    assert_eq!(kb.facts().len(), 1);
    let fact = &kb.facts()[0];
    assert_eq!(fact.category, Category::Symptom);
    assert_eq!(fact.predicate, FactPredicate::Presents);
    assert_eq!(fact.subject, "patient1");
    assert_eq!(fact.value, "persistent_cough");
    assert!(response.text.contains(&fact.to_record()));
}

#[test]
fn clear_without_custom_facts_changes_nothing() {
    let (router, _, _) = router(ScriptedOracle::default());
    let response = router.handle("clear facts").unwrap();
    assert_eq!(response.source, Source::System);
    assert_eq!(
        response.text,
        "No custom facts to clear. Default knowledge base is already loaded."
    );
    let kb = router.knowledge_base().active();
    assert_eq!(kb.origin(), Origin::Default);
    assert_eq!(kb.generation(), Generation::INITIAL);
}

#[test]
fn replace_then_clear_returns_to_default() {
    let (router, _, _) = router(
        ScriptedOracle::default()
            .fact("fever", "(: SYMPTOM{token} (Presents patient1 fever))")
            .fact("rales", "(: FINDING{token} (HasPhysicalFinding patient1 rales))"),
    );
    let response = router.handle("add new facts > fever > rales").unwrap();
    assert!(response.text.starts_with("Facts replaced:\n"));
    assert_eq!(router.knowledge_base().active().facts().len(), 2);

    let response = router.handle("Clear Facts").unwrap();
    assert_eq!(
        response.text,
        "All custom facts cleared. Default knowledge base loaded."
    );
    let kb = router.knowledge_base().active();
    assert_eq!(kb.origin(), Origin::Default);
    assert_eq!(kb.generation().value(), 2);
}

#[test]
fn append_after_replace_concatenates() {
    let (router, _, _) = router(
        ScriptedOracle::default()
            .fact("fever", "(: SYMPTOM{token} (Presents patient1 fever))")
            .fact("smoker", "(: RISK{token} (HasRiskFactor patient1 tobacco_use_disorder))"),
    );
    router.handle("add new facts > fever").unwrap();
    router.handle("add facts > smoker").unwrap();
    let kb = router.knowledge_base().active();
    let values: Vec<_> = kb.facts().iter().map(|f| f.value.as_str()).collect();
    assert_eq!(values, vec!["fever", "tobacco_use_disorder"]);
    assert_eq!(kb.generation().value(), 2);
}

// ---------------------------------------------------------------------------
// Ingestion failures
// ---------------------------------------------------------------------------

#[test]
fn batch_with_no_accepted_statement_leaves_base_untouched() {
    let (router, _, _) = router(ScriptedOracle::default());
    let response = router.handle("add facts > gibberish").unwrap();
    assert_eq!(response.text, "No facts added.\nCould not interpret:\n- gibberish");
    let kb = router.knowledge_base().active();
    assert_eq!(kb.generation(), Generation::INITIAL);
    assert_eq!(kb.origin(), Origin::Default);
}

#[test]
fn partial_batch_names_rejected_statements() {
    let (router, _, _) = router(
        ScriptedOracle::default()
            .fact("fever", "(: SYMPTOM{token} (Presents patient1 fever))")
            .fact("wrong predicate", "(: TEST{token} (Presents patient1 fever))"),
    );
    let response = router
        .handle("add facts > fever > wrong predicate > nonsense")
        .unwrap();
    assert!(response.text.starts_with("Facts added:\n(: SYMPTOM"));
    assert!(response
        .text
        .ends_with("Could not interpret:\n- wrong predicate\n- nonsense"));
    assert_eq!(router.knowledge_base().active().facts().len(), 1);
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[test]
fn unsupported_object_never_reaches_the_engine() {
    let unsupported = "Who is sick with diabetes?";
    let supported = "Who is diagnosed with copd?";
    let (router, oracle, engine_calls) = router(
        ScriptedOracle::default()
            .symbolic(unsupported, "(bc (DiagnosedWith $patient diabetes))")
            .symbolic(supported, "(bc (DiagnosedWith $patient copd))"),
    );

    let response = router.handle(unsupported).unwrap();
    assert_eq!(response.text, "Illness not supported.");
    assert_eq!(response.source, Source::Symbolic);
    assert_eq!(engine_calls.load(Ordering::SeqCst), 0);

    let response = router.handle(supported).unwrap();
    assert_eq!(engine_calls.load(Ordering::SeqCst), 1);
    assert!(response.text.contains("Summary from oracle."));
    assert!(response.text.contains("SYMPTOM1"));
    assert!(response.text.contains("- copd_diagnosis_rule"));
    assert_eq!(oracle.calls().last(), Some(&Stage::Interpret));
}

#[test]
fn oracle_declared_unsupported_short_circuits() {
    let query = "Does patient1 have diabetes?";
    let (router, _, engine_calls) =
        router(ScriptedOracle::default().symbolic(query, "Illness not supported."));
    assert_eq!(router.handle(query).unwrap().text, "Illness not supported.");
    assert_eq!(engine_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn forward_derivation_lists_consequences() {
    let query = "What can be inferred if patient1 has asthma?";
    let (router, _, _) =
        router(ScriptedOracle::default().symbolic(query, "(fcc (DiagnosedWith patient1 asthma))"));
    let response = router.handle(query).unwrap();
    assert!(response.text.starts_with("**Inference Summary**"), "{}", response.text);
    assert!(response.text.contains("(ContraindicatedFor patient1 beta_blockers)"));
    assert!(response.text.contains("(IndicatedFor patient1 beta2_agonist_bronchodilators)"));
}

#[test]
fn descriptive_queries_go_to_the_responder() {
    let (router, oracle, engine_calls) =
        router(ScriptedOracle::default().label("What is asthma?", "sub-symbolic"));
    let response = router.handle("What is asthma?").unwrap();
    assert_eq!(response.source, Source::SubSymbolic);
    assert_eq!(response.text, "Descriptive answer.");
    assert_eq!(oracle.calls(), vec![Stage::Classify, Stage::Describe]);
    assert_eq!(engine_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn ambiguous_label_is_descriptive() {
    let (router, _, _) = router(ScriptedOracle::default().label("Tell me", "probably symbolic"));
    assert_eq!(router.handle("Tell me").unwrap().source, Source::SubSymbolic);
}

#[test]
fn empty_query_is_rejected() {
    let (router, oracle, _) = router(ScriptedOracle::default());
    assert!(matches!(router.handle("   "), Err(RouterError::EmptyQuery)));
    assert!(oracle.calls().is_empty());
}

/// An engine whose every invocation fails.
struct BrokenEngine;

impl ReasoningEngine for BrokenEngine {
    fn name(&self) -> &str {
        "broken"
    }

    fn prove_specific(&self, _query: &str, _depth: usize) -> ReasoningResult<Vec<ProofTrace>> {
        Err(ReasoningError::EngineFailed {
            engine: "broken".into(),
            message: "solver crashed".into(),
        })
    }

    fn derive_all(&self, query: &str, depth: usize) -> ReasoningResult<Vec<ProofTrace>> {
        self.prove_specific(query, depth)
    }
}

#[test]
fn engine_failure_is_a_request_error() {
    let factory = |_: &KnowledgeBase| -> ReasoningResult<Arc<dyn ReasoningEngine>> {
        Ok(Arc::new(BrokenEngine))
    };
    let manager = KnowledgeBaseManager::open(
        KbSources::bundled().unwrap(),
        Box::new(MemFactStore::new()),
        Box::new(factory),
    )
    .unwrap();
    let oracle = |prompt: &str| -> OracleResult<String> {
        if prompt.contains("Respond only with 'symbolic' or 'sub-symbolic'") {
            Ok("symbolic".to_string())
        } else {
            Ok("(bc (DiagnosedWith $patient copd))".to_string())
        }
    };
    let router = Router::new(Arc::new(manager), Arc::new(oracle));

    let err = router.handle("Who has copd?").unwrap_err();
    assert!(matches!(
        err,
        RouterError::Reasoning(ReasoningError::EngineFailed { .. })
    ));
    assert_eq!(err.user_message(), "Sorry, I couldn't reason about that query.");
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn readers_finish_on_their_snapshot_while_writer_swaps() {
    let manager = Arc::new(manager_counting(Arc::new(AtomicUsize::new(0))));
    let descriptor = QueryDescriptor::for_object("copd", Subject::Unbound, ReasoningMode::ProveSpecific)
        .unwrap();
    let readers = 4;
    let barrier = Arc::new(Barrier::new(readers + 1));

    let handles: Vec<_> = (0..readers)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            let descriptor = descriptor.clone();
            std::thread::spawn(move || {
                let snapshot = manager.snapshot();
                barrier.wait();
                // Give the writer a chance to swap first.
                std::thread::yield_now();
                let traces = ReasoningOrchestrator::new()
                    .run(&descriptor, &snapshot)
                    .unwrap();
                (snapshot.generation(), traces.len())
            })
        })
        .collect();

    barrier.wait();
    let custom = manager
        .sources()
        .default_facts
        .iter()
        .filter(|f| f.subject == "patient3")
        .cloned()
        .collect();
    manager.replace_custom(custom).unwrap();

    for handle in handles {
        let (generation, traces) = handle.join().unwrap();
        assert_eq!(generation, Generation::INITIAL);
        assert_eq!(traces, 1);
    }

    // The new generation no longer supports copd.
    let traces = ReasoningOrchestrator::new()
        .run(&descriptor, &manager.snapshot())
        .unwrap();
    assert!(traces.is_empty());
    assert_eq!(manager.active().generation().value(), 1);
}
