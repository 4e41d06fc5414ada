//! Query routing: commands, symbolic reasoning, descriptive answers.
//!
//! ```text
//! query ─┬─ command? ── clear / replace / append ──────────────────► system
//!        └─ classify ─┬─ symbolic ── translate ── run ── interpret ─► symbolic
//!                     └─ sub-symbolic ── describe ─────────────────► sub-symbolic
//! ```

use std::fmt;
use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::QueryClassifier;
use crate::config::PulmoConfig;
use crate::describe::DescriptiveResponder;
use crate::error::{KbError, PulmoResult, ReasoningError};
use crate::fact::Fact;
use crate::ingest::{BatchReport, Command, FactIngestor};
use crate::interpret::ProofInterpreter;
use crate::kb::{ClearOutcome, KnowledgeBase, KnowledgeBaseManager};
use crate::oracle::{OllamaOracle, TextOracle};
use crate::reason::ReasoningOrchestrator;
use crate::translate::{QueryTranslator, Translation, NOT_SUPPORTED};

const CLEARED: &str = "All custom facts cleared. Default knowledge base loaded.";
const NOTHING_TO_CLEAR: &str = "No custom facts to clear. Default knowledge base is already loaded.";
const NO_FACTS_ADDED: &str = "No facts added.";

/// Errors that end a request without an answer.
#[derive(Debug, Error, Diagnostic)]
pub enum RouterError {
    #[error("empty query")]
    #[diagnostic(
        code(pulmo::router::empty_query),
        help("Ask a question, or use `add facts > ...`, `add new facts > ...` or `clear facts`.")
    )]
    EmptyQuery,

    #[error("knowledge base update failed")]
    #[diagnostic(
        code(pulmo::router::kb),
        help("The previous knowledge base generation is still active.")
    )]
    Kb(#[source] KbError),

    #[error("reasoning failed")]
    #[diagnostic(
        code(pulmo::router::reasoning),
        help("The query was translated but the reasoning engine could not run it.")
    )]
    Reasoning(#[source] ReasoningError),
}

impl RouterError {
    /// Fixed text for the user; internal detail stays in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            RouterError::EmptyQuery => "Please enter a query.",
            RouterError::Kb(_) => "Sorry, the knowledge base could not be updated.",
            RouterError::Reasoning(_) => "Sorry, I couldn't reason about that query.",
        }
    }
}

/// Result type for routing.
pub type RouterResult<T> = std::result::Result<T, RouterError>;

/// Which branch produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    System,
    Symbolic,
    SubSymbolic,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::System => "system",
            Source::Symbolic => "symbolic",
            Source::SubSymbolic => "sub-symbolic",
        })
    }
}

/// The answer to one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "response")]
    pub text: String,
    pub source: Source,
}

impl Response {
    fn new(text: impl Into<String>, source: Source) -> Self {
        Self {
            text: text.into(),
            source,
        }
    }
}

/// Entry point for every query.
pub struct Router {
    kb: Arc<KnowledgeBaseManager>,
    classifier: QueryClassifier,
    translator: QueryTranslator,
    ingestor: FactIngestor,
    orchestrator: ReasoningOrchestrator,
    interpreter: ProofInterpreter,
    responder: DescriptiveResponder,
}

impl Router {
    /// Wire every oracle-backed stage to the same oracle.
    pub fn new(kb: Arc<KnowledgeBaseManager>, oracle: Arc<dyn TextOracle>) -> Self {
        Self {
            kb,
            classifier: QueryClassifier::new(Arc::clone(&oracle)),
            translator: QueryTranslator::new(Arc::clone(&oracle)),
            ingestor: FactIngestor::new(Arc::clone(&oracle)),
            orchestrator: ReasoningOrchestrator::new(),
            interpreter: ProofInterpreter::new(Arc::clone(&oracle)),
            responder: DescriptiveResponder::new(oracle),
        }
    }

    /// Open the configured knowledge base and talk to the configured Ollama server.
    pub fn from_config(config: &PulmoConfig) -> PulmoResult<Self> {
        let kb = config.open_knowledge_base()?;
        let oracle = OllamaOracle::new(config.oracle.clone());
        if !oracle.probe() {
            tracing::warn!(
                url = oracle.base_url(),
                model = oracle.model(),
                "oracle not reachable or model missing; answers will degrade"
            );
        }
        Ok(Self::new(Arc::new(kb), Arc::new(oracle)))
    }

    pub fn knowledge_base(&self) -> &Arc<KnowledgeBaseManager> {
        &self.kb
    }

    pub fn handle(&self, query: &str) -> RouterResult<Response> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RouterError::EmptyQuery);
        }
        tracing::info!(query, "received query");

        if let Some(command) = Command::parse(query) {
            return self.run_command(command);
        }

        let classification = self.classifier.classify(query);
        if classification.is_symbolic {
            tracing::info!(query, confidence = classification.confidence, "routing to symbolic reasoning");
            self.answer_symbolic(query)
        } else {
            tracing::info!(query, confidence = classification.confidence, "routing to descriptive answer");
            Ok(Response::new(self.responder.answer(query), Source::SubSymbolic))
        }
    }

    fn run_command(&self, command: Command) -> RouterResult<Response> {
        let text = match command {
            Command::ClearFacts => match self.kb.clear().map_err(RouterError::Kb)? {
                ClearOutcome::Cleared { removed } => {
                    tracing::info!(removed, "custom facts cleared");
                    CLEARED.to_string()
                }
                ClearOutcome::NothingToClear => NOTHING_TO_CLEAR.to_string(),
            },
            Command::ReplaceFacts(statements) => {
                let report = self.ingestor.ingest_batch(&statements, &self.kb.active());
                self.commit(report, "Facts replaced", |kb, facts| kb.replace_custom(facts))?
            }
            Command::AppendFacts(statements) => {
                let report = self.ingestor.ingest_batch(&statements, &self.kb.active());
                self.commit(report, "Facts added", |kb, facts| kb.append_custom(facts))?
            }
        };
        Ok(Response::new(text, Source::System))
    }

    /// Apply the accepted part of a batch. Nothing is written when no statement was accepted.
    fn commit(
        &self,
        report: BatchReport,
        heading: &str,
        apply: impl FnOnce(&KnowledgeBaseManager, Vec<Fact>) -> Result<Arc<KnowledgeBase>, KbError>,
    ) -> RouterResult<String> {
        let mut text = if report.accepted.is_empty() {
            tracing::warn!(rejected = report.rejected.len(), "no statement accepted, knowledge base unchanged");
            NO_FACTS_ADDED.to_string()
        } else {
            let records: Vec<String> = report.accepted.iter().map(|f| f.to_record()).collect();
            let kb = apply(&self.kb, report.accepted).map_err(RouterError::Kb)?;
            tracing::info!(
                generation = kb.generation().value(),
                origin = %kb.origin(),
                facts = kb.facts().len(),
                "{heading}"
            );
            format!("{heading}:\n{}", records.join("\n"))
        };
        if !report.rejected.is_empty() {
            text.push_str("\nCould not interpret:");
            for rejected in &report.rejected {
                text.push_str("\n- ");
                text.push_str(&rejected.statement);
            }
        }
        Ok(text)
    }

    fn answer_symbolic(&self, query: &str) -> RouterResult<Response> {
        let descriptor = match self.translator.translate(query) {
            Translation::Query(descriptor) => descriptor,
            Translation::Unsupported(reason) => {
                tracing::info!(query, ?reason, "query not supported");
                return Ok(Response::new(NOT_SUPPORTED, Source::Symbolic));
            }
        };
        let snapshot = self.kb.snapshot();
        let traces = self
            .orchestrator
            .run(&descriptor, &snapshot)
            .map_err(RouterError::Reasoning)?;
        let explanation =
            self.interpreter
                .interpret(descriptor.mode, &descriptor.goal(), &traces, snapshot.kb());
        tracing::info!(
            query,
            generation = snapshot.generation().value(),
            derivation = explanation.is_derivation(),
            facts = explanation.fact_ids().count(),
            rules = explanation.rules.len(),
            "symbolic query answered"
        );
        Ok(Response::new(explanation.render(), Source::Symbolic))
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("kb", &self.kb)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_serializes_like_the_http_body() {
        let json = serde_json::to_value(Response::new("hi", Source::SubSymbolic)).unwrap();
        assert_eq!(json, serde_json::json!({"response": "hi", "source": "sub-symbolic"}));
        assert_eq!(Source::System.to_string(), "system");
    }

    #[test]
    fn user_messages_hide_detail() {
        let err = RouterError::Reasoning(ReasoningError::ZeroDepth);
        assert!(!err.user_message().contains("depth"));
    }
}
