//! Fact ingestion: free-text clinical statements to typed facts.
//!
//! Each statement is translated by the oracle into one formal record, then
//! validated against the closed vocabulary. The fact id is generated here;
//! only the category tag of whatever id the oracle wrote is kept.

use std::collections::HashSet;
use std::sync::Arc;

use miette::Diagnostic;
use rand::RngCore;
use thiserror::Error;

use crate::error::FactError;
use crate::fact::{Fact, FactId, FactRecord};
use crate::kb::KnowledgeBase;
use crate::oracle::{OracleError, TextOracle};

/// Attempts at drawing an unused id before giving up.
const MAX_REROLLS: usize = 16;

const INGEST_TEMPLATE: &str = "\
You are an expert in symbolic AI for medical expert systems.
Convert the clinical statement below into one formal fact for a respiratory disease diagnosis system.
Always use the format: (: <TAG><identifier> (<Predicate> <patient> <argument>))
The tag and predicate must match:
- SYMPTOM with Presents
- TEST with Shows, which takes the test name before the patient
- RISK with HasRiskFactor
- HISTORY with HasMedicalHistory
- FINDING with HasPhysicalFinding
Use only these predicates. Use snake_case for arguments. If no patient is named, use patient1.
Output only the fact, no explanations or markdown.

Input: The patient1 has a persistent cough.
Identifier: 0ee6b214
Output: (: SYMPTOM0ee6b214 (Presents patient1 persistent_cough))

Input: The patient1 has chest tightness.
Identifier: 5a7c0e91
Output: (: SYMPTOM5a7c0e91 (Presents patient1 chest_tightness))

Input: The patient1's chest x-ray shows infiltrates.
Identifier: fe6e4ab1
Output: (: TESTfe6e4ab1 (Shows chest_xray patient1 infiltrates))

Input: The patient1's spirometry shows an obstructive pattern.
Identifier: 3b9d22c4
Output: (: TEST3b9d22c4 (Shows spirometry patient1 obstructive_pattern))

Input: The patient1's peak flow is reduced.
Identifier: 77a1f0d2
Output: (: TEST77a1f0d2 (Shows peak_flow patient1 reduced_values))

Input: The patient1 has the risk factor of tobacco use disorder.
Identifier: 024feb3b
Output: (: RISK024feb3b (HasRiskFactor patient1 tobacco_use_disorder))

Input: The patient1 has a history of childhood asthma.
Identifier: c1d2e3f4
Output: (: HISTORYc1d2e3f4 (HasMedicalHistory patient1 childhood_asthma))

Input: The patient1 has decreased breath sounds.
Identifier: 9f8e7d6c
Output: (: FINDING9f8e7d6c (HasPhysicalFinding patient1 decreased_breath_sounds))

Input: {statement}
Identifier: {token}
Output:";

/// Errors from ingesting a single statement.
#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] FactError),

    #[error("could not draw an unused fact id after {attempts} attempts")]
    #[diagnostic(
        code(pulmo::ingest::id_exhausted),
        help("This indicates a broken random source. Retry the statement.")
    )]
    IdExhausted { attempts: usize },
}

/// Result type for ingestion.
pub type IngestResult<T> = std::result::Result<T, IngestError>;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A fact-management command recognized in the query stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `clear facts`
    ClearFacts,
    /// `add new facts > s1 > s2`
    ReplaceFacts(Vec<String>),
    /// `add facts > s1 > s2`
    AppendFacts(Vec<String>),
}

impl Command {
    /// Recognize a command; `None` means the input is an ordinary query.
    ///
    /// Matching ignores case and surrounding whitespace. The command word is
    /// everything before the first `>`; statements follow, one per `>`.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let (head, rest) = match trimmed.split_once('>') {
            Some((head, rest)) => (head, Some(rest)),
            None => (trimmed, None),
        };
        let statements = || -> Vec<String> {
            rest.map(|r| {
                r.split('>')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
        };
        match head.trim().to_lowercase().as_str() {
            "clear facts" if rest.is_none() => Some(Command::ClearFacts),
            "add new facts" => Some(Command::ReplaceFacts(statements())),
            "add facts" => Some(Command::AppendFacts(statements())),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// A statement that did not become a fact.
#[derive(Debug, Clone)]
pub struct RejectedStatement {
    pub statement: String,
    pub reason: String,
}

/// Per-statement outcome of a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub accepted: Vec<Fact>,
    pub rejected: Vec<RejectedStatement>,
}

/// Draw a fresh 8-hex-digit token.
pub fn fresh_token() -> String {
    format!("{:08x}", rand::thread_rng().next_u32())
}

/// The prompt sent for one statement.
pub fn ingestion_prompt(statement: &str, token: &str) -> String {
    INGEST_TEMPLATE
        .replace("{token}", token)
        .replace("{statement}", statement)
}

/// Turns clinical statements into facts through the oracle.
pub struct FactIngestor {
    oracle: Arc<dyn TextOracle>,
}

impl FactIngestor {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self { oracle }
    }

    /// Ingest one statement with no ids reserved.
    pub fn ingest(&self, statement: &str) -> IngestResult<Fact> {
        self.ingest_avoiding(statement, |_| false)
    }

    /// Ingest one statement, re-rolling the id while `taken` reports a collision.
    pub fn ingest_avoiding(
        &self,
        statement: &str,
        taken: impl Fn(&FactId) -> bool,
    ) -> IngestResult<Fact> {
        let token = fresh_token();
        let raw = self.oracle.complete(&ingestion_prompt(statement, &token))?;
        let record = FactRecord::parse(&raw)?;
        let mut fact = Fact::from_translation(&record, &token)?;
        let mut attempts = 1;
        while taken(&fact.id) {
            if attempts >= MAX_REROLLS {
                return Err(IngestError::IdExhausted { attempts });
            }
            fact.id = FactId::generated(fact.category, &fresh_token());
            attempts += 1;
        }
        Ok(fact)
    }

    /// Ingest every statement independently.
    ///
    /// Ids already in `kb` or accepted earlier in the batch are never reused.
    pub fn ingest_batch(&self, statements: &[String], kb: &KnowledgeBase) -> BatchReport {
        let mut report = BatchReport::default();
        let mut batch_ids: HashSet<FactId> = HashSet::new();
        for statement in statements {
            let result =
                self.ingest_avoiding(statement, |id| kb.contains_id(id) || batch_ids.contains(id));
            match result {
                Ok(fact) => {
                    tracing::info!(statement = %statement, fact = %fact, "statement ingested");
                    batch_ids.insert(fact.id.clone());
                    report.accepted.push(fact);
                }
                Err(e) => {
                    tracing::warn!(statement = %statement, error = %e, "statement rejected");
                    report.rejected.push(RejectedStatement {
                        statement: statement.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for FactIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactIngestor").finish_non_exhaustive()
    }
}
