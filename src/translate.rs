//! Natural-language question to formal query descriptor.
//!
//! The oracle proposes a formal query; everything after that is decided here.
//! The supported-target table fixes predicate and depth for each object, and
//! the reasoning mode follows a deterministic policy that only consults the
//! oracle's advice when a patient is named.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::formal::{strip_markup, Atom, Sexp, Term};
use crate::oracle::TextOracle;

/// What the user is told when a query cannot be translated.
pub const NOT_SUPPORTED: &str = "Illness not supported.";

/// Placeholder for an unbound patient.
pub const UNBOUND_SUBJECT: &str = "$patient";

/// Words that ask for consequences rather than a specific proof.
const CAUSAL_CUES: &[&str] = &[
    "infer",
    "inferred",
    "what can",
    "determine",
    "consequence",
    "implication",
    "what follows",
];

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// How the engine is asked to reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasoningMode {
    /// Backward proof search for the target atom (`bc`).
    ProveSpecific,
    /// Forward derivation of everything that follows from the target atom (`fcc`).
    DeriveAll,
}

impl ReasoningMode {
    pub fn parse_token(token: &str) -> Option<Self> {
        match token {
            "bc" => Some(Self::ProveSpecific),
            "fcc" => Some(Self::DeriveAll),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Self::ProveSpecific => "bc",
            Self::DeriveAll => "fcc",
        }
    }
}

impl fmt::Display for ReasoningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProveSpecific => "prove-specific",
            Self::DeriveAll => "derive-all",
        })
    }
}

/// Predicates a query may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TargetPredicate {
    DiagnosedWith,
    IndicatedFor,
}

impl TargetPredicate {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DiagnosedWith => "DiagnosedWith",
            Self::IndicatedFor => "IndicatedFor",
        }
    }
}

impl fmt::Display for TargetPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The patient a query is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Subject {
    Bound(String),
    Unbound,
}

impl Subject {
    pub fn is_bound(&self) -> bool {
        matches!(self, Subject::Bound(_))
    }

    fn term(&self) -> Term {
        match self {
            Subject::Bound(s) => Term::Const(s.clone()),
            Subject::Unbound => Term::Var("patient".into()),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Bound(s) => f.write_str(s),
            Subject::Unbound => f.write_str(UNBOUND_SUBJECT),
        }
    }
}

/// The formal shape of a symbolic query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryDescriptor {
    pub mode: ReasoningMode,
    pub target: TargetPredicate,
    pub subject: Subject,
    pub object: String,
    pub depth: usize,
}

impl QueryDescriptor {
    /// Build a descriptor for a supported object with the table's predicate and depth.
    pub fn for_object(object: &str, subject: Subject, mode: ReasoningMode) -> Option<Self> {
        let entry = lookup(object)?;
        Some(Self {
            mode,
            target: entry.predicate,
            subject,
            object: entry.object.to_string(),
            depth: entry.depth,
        })
    }

    /// The goal atom, e.g. `(DiagnosedWith $patient asthma)`.
    pub fn goal(&self) -> Atom {
        Atom::new(
            self.target.as_str(),
            vec![self.subject.term(), Term::Const(self.object.clone())],
        )
    }

    /// The formal query string handed to the engine.
    pub fn to_formal(&self) -> String {
        self.goal().to_string()
    }
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {})", self.mode.token(), self.goal())
    }
}

// ---------------------------------------------------------------------------
// Supported targets
// ---------------------------------------------------------------------------

/// One row of the supported-target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedTarget {
    pub object: &'static str,
    pub predicate: TargetPredicate,
    pub depth: usize,
}

const fn diagnosis(object: &'static str, depth: usize) -> SupportedTarget {
    SupportedTarget {
        object,
        predicate: TargetPredicate::DiagnosedWith,
        depth,
    }
}

const fn treatment(object: &'static str) -> SupportedTarget {
    SupportedTarget {
        object,
        predicate: TargetPredicate::IndicatedFor,
        depth: 7,
    }
}

/// Every object a query may ask about.
pub const SUPPORTED_TARGETS: &[SupportedTarget] = &[
    diagnosis("asthma", 6),
    diagnosis("copd", 6),
    diagnosis("pulmonary_tuberculosis", 6),
    diagnosis("lung_cancer", 7),
    diagnosis("pulmonary_embolism", 6),
    diagnosis("acute_bronchitis", 5),
    diagnosis("pleural_effusion", 5),
    diagnosis("allergic_asthma", 5),
    diagnosis("pneumoconiosis", 5),
    diagnosis("acute_respiratory_distress_syndrome", 6),
    diagnosis("congestive_heart_failure_with_pulmonary_edema", 6),
    diagnosis("laryngitis", 3),
    diagnosis("pneumothorax", 4),
    diagnosis("pneumonia", 6),
    treatment("beta2_agonist_bronchodilators"),
    treatment("long_acting_bronchodilators"),
    treatment("broad_spectrum_antibiotics"),
    treatment("anti_tuberculosis_therapy"),
    treatment("anticoagulation_therapy"),
];

/// Find the table row for an object token.
pub fn lookup(object: &str) -> Option<&'static SupportedTarget> {
    SUPPORTED_TARGETS.iter().find(|t| t.object == object)
}

// ---------------------------------------------------------------------------
// Mode policy
// ---------------------------------------------------------------------------

/// Whether the query text asks for consequences.
pub fn has_causal_cue(query: &str) -> bool {
    let lower = query.to_lowercase();
    CAUSAL_CUES.iter().any(|cue| {
        lower.match_indices(cue).any(|(i, _)| {
            let before = lower[..i].chars().next_back();
            let after = lower[i + cue.len()..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
    })
}

/// Choose the reasoning mode.
///
/// Unbound subject: always proof search. Bound subject: the oracle's advice
/// if it gave one, else forward derivation when the query carries a causal cue.
pub fn select_mode(subject: &Subject, advised: Option<ReasoningMode>, query: &str) -> ReasoningMode {
    match (subject, advised) {
        (Subject::Unbound, _) => ReasoningMode::ProveSpecific,
        (Subject::Bound(_), Some(mode)) => mode,
        (Subject::Bound(_), None) if has_causal_cue(query) => ReasoningMode::DeriveAll,
        (Subject::Bound(_), None) => ReasoningMode::ProveSpecific,
    }
}

// ---------------------------------------------------------------------------
// Oracle answers
// ---------------------------------------------------------------------------

/// Why a query did not become a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnsupportedReason {
    /// The object is not in the supported table, or the oracle said so.
    OutsideVocabulary { object: Option<String> },
    /// The oracle's answer could not be read as a query.
    Malformed { raw: String },
    /// The oracle call failed.
    OracleFailed { message: String },
}

/// Result of translating one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translation {
    Query(QueryDescriptor),
    Unsupported(UnsupportedReason),
}

/// A formal query as the oracle wrote it, before table lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleQuery {
    pub advised: Option<ReasoningMode>,
    pub predicate: String,
    pub subject: Subject,
    pub object: String,
}

/// Read an oracle answer.
///
/// Accepts `(bc (Pred subject object))`, `(fcc ...)`, the long form
/// `!(bc &medical_kb (fromNumber N) (: $prf (Pred subject object)))` and a
/// bare atom. `Ok(None)` means the oracle declared the query unsupported.
pub fn parse_oracle_answer(raw: &str) -> Result<Option<OracleQuery>, UnsupportedReason> {
    let text = strip_markup(raw);
    let malformed = || UnsupportedReason::Malformed {
        raw: raw.trim().to_string(),
    };
    if text
        .to_lowercase()
        .contains(&NOT_SUPPORTED.trim_end_matches('.').to_lowercase())
    {
        return Ok(None);
    }

    let expr = Sexp::parse(&text)
        .ok()
        .or_else(|| text.lines().find_map(|line| Sexp::parse(line).ok()))
        .ok_or_else(malformed)?;

    let advised = expr.head().and_then(ReasoningMode::parse_token);
    let mut candidates = Vec::new();
    collect_query_atoms(&expr, &mut candidates);
    let items = candidates.pop().ok_or_else(malformed)?;

    let symbol = |i: usize| items[i].as_symbol().ok_or_else(malformed);
    let predicate = symbol(0)?.to_string();
    let subject = match Term::from_symbol(symbol(1)?) {
        Term::Var(_) => Subject::Unbound,
        Term::Const(c) => Subject::Bound(c),
    };
    let object = symbol(2)?.trim().to_lowercase().replace('-', "_");
    Ok(Some(OracleQuery {
        advised,
        predicate,
        subject,
        object,
    }))
}

/// Collect three-symbol lists that look like `(Pred subject object)`.
fn collect_query_atoms<'a>(expr: &'a Sexp, out: &mut Vec<&'a [Sexp]>) {
    let Some(items) = expr.as_list() else {
        return;
    };
    let all_symbols = items.iter().all(|i| i.as_symbol().is_some());
    let head = expr.head().unwrap_or_default();
    if items.len() == 3
        && all_symbols
        && head != ":"
        && ReasoningMode::parse_token(head).is_none()
        && head.chars().next().is_some_and(char::is_alphabetic)
    {
        out.push(items);
    }
    for item in items {
        collect_query_atoms(item, out);
    }
}

// ---------------------------------------------------------------------------
// Translator
// ---------------------------------------------------------------------------

const TRANSLATE_TEMPLATE: &str = "\
You are an expert assistant for a symbolic AI medical diagnosis system. Your task is to convert \
natural language queries about respiratory illnesses into formal queries for reasoning.

Supported reasoning modes:
- Use backward chaining (bc) for queries about proving, checking, asking if someone is diagnosed, \
or who has an illness (e.g. \"Who is sick with X?\", \"Prove that patient1 has X\").
- Use forward chaining (fcc) for causal inference requests about a named patient \
(e.g. \"Infer what follows if patient1 has X\"). Prefer bc if no patient is named.

Variable usage:
- If no specific patient is mentioned, use $patient.
- If a patient is mentioned, use the given patient id directly (e.g. patient1).

Supported illnesses (DiagnosedWith) and treatments (IndicatedFor):
{table}

If the illness or treatment is not in the supported list, output only:
Illness not supported.

Output the formal query only. No extra text.

Examples:

Input: Who is sick with asthma?
Output: (bc (DiagnosedWith $patient asthma))

Input: Who is recommended for beta2_agonist_bronchodilators?
Output: (bc (IndicatedFor $patient beta2_agonist_bronchodilators))

Input: Prove that patient1 has copd.
Output: (bc (DiagnosedWith patient1 copd))

Input: Infer what follows if patient1 has pulmonary embolism.
Output: (fcc (DiagnosedWith patient1 pulmonary_embolism))

Input: Is there any patient with pneumothorax?
Output: (bc (DiagnosedWith $patient pneumothorax))

Input: What is the diagnosis for patient1?
Output: Illness not supported.

Input: Who is sick with diabetes?
Output: Illness not supported.

Input: {query}
Output:";

/// The prompt sent for `query`.
pub fn translation_prompt(query: &str) -> String {
    let table = SUPPORTED_TARGETS
        .iter()
        .map(|t| format!("- {} ({})", t.object, t.predicate))
        .collect::<Vec<_>>()
        .join("\n");
    TRANSLATE_TEMPLATE
        .replace("{table}", &table)
        .replace("{query}", query)
}

/// Maps natural-language questions to query descriptors.
pub struct QueryTranslator {
    oracle: Arc<dyn TextOracle>,
}

impl QueryTranslator {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self { oracle }
    }

    pub fn translate(&self, query: &str) -> Translation {
        let raw = match self.oracle.complete(&translation_prompt(query)) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(query, error = %e, "query translation failed");
                return Translation::Unsupported(UnsupportedReason::OracleFailed {
                    message: e.to_string(),
                });
            }
        };
        let parsed = match parse_oracle_answer(&raw) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => {
                tracing::info!(query, "oracle reports the query as unsupported");
                return Translation::Unsupported(UnsupportedReason::OutsideVocabulary {
                    object: None,
                });
            }
            Err(reason) => {
                tracing::warn!(query, raw = %raw.trim(), "unreadable query translation");
                return Translation::Unsupported(reason);
            }
        };
        resolve(parsed, query)
    }
}

impl std::fmt::Debug for QueryTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryTranslator").finish_non_exhaustive()
    }
}

/// Apply the table and the mode policy to a parsed oracle answer.
pub fn resolve(parsed: OracleQuery, query: &str) -> Translation {
    let Some(entry) = lookup(&parsed.object) else {
        tracing::info!(query, object = %parsed.object, "object outside supported vocabulary");
        return Translation::Unsupported(UnsupportedReason::OutsideVocabulary {
            object: Some(parsed.object),
        });
    };
    if parsed.predicate != entry.predicate.as_str() {
        tracing::warn!(
            query,
            object = entry.object,
            oracle_predicate = %parsed.predicate,
            predicate = %entry.predicate,
            "overriding oracle predicate from the supported table"
        );
    }
    let mode = select_mode(&parsed.subject, parsed.advised, query);
    let descriptor = QueryDescriptor {
        mode,
        target: entry.predicate,
        subject: parsed.subject,
        object: entry.object.to_string(),
        depth: entry.depth,
    };
    tracing::info!(query, descriptor = %descriptor, depth = descriptor.depth, "query translated");
    Translation::Query(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{OracleError, OracleResult};

    fn translate_with(answer: &'static str, query: &str) -> Translation {
        QueryTranslator::new(Arc::new(move |_: &str| -> OracleResult<String> {
            Ok(answer.to_string())
        }))
        .translate(query)
    }

    fn descriptor(t: Translation) -> QueryDescriptor {
        match t {
            Translation::Query(d) => d,
            other => panic!("expected a query, got {other:?}"),
        }
    }

    #[test]
    fn short_form_with_unbound_subject() {
        let d = descriptor(translate_with(
            "(bc (DiagnosedWith $patient asthma))",
            "Is the patient diagnosed with asthma?",
        ));
        assert_eq!(d.mode, ReasoningMode::ProveSpecific);
        assert_eq!(d.target, TargetPredicate::DiagnosedWith);
        assert_eq!(d.subject, Subject::Unbound);
        assert_eq!(d.object, "asthma");
        assert_eq!(d.depth, 6);
        assert_eq!(d.to_formal(), "(DiagnosedWith $patient asthma)");
    }

    #[test]
    fn long_form_is_accepted() {
        let d = descriptor(translate_with(
            "!(fcc &medical_kb (fromNumber 8) (: $prf (IndicatedFor patient1 broad_spectrum_antibiotics)))",
            "What can be inferred if patient1 takes broad spectrum antibiotics?",
        ));
        assert_eq!(d.mode, ReasoningMode::DeriveAll);
        assert_eq!(d.target, TargetPredicate::IndicatedFor);
        assert_eq!(d.subject, Subject::Bound("patient1".into()));
        // The table decides depth, not the oracle.
        assert_eq!(d.depth, 7);
    }

    #[test]
    fn unbound_subject_forces_proof_search() {
        let d = descriptor(translate_with(
            "(fcc (DiagnosedWith $patient copd))",
            "What can we infer about copd?",
        ));
        assert_eq!(d.mode, ReasoningMode::ProveSpecific);
    }

    #[test]
    fn bound_subject_without_advice_uses_cues() {
        let d = descriptor(translate_with(
            "(DiagnosedWith patient1 asthma)",
            "What can be inferred if patient1 has asthma?",
        ));
        assert_eq!(d.mode, ReasoningMode::DeriveAll);
        let d = descriptor(translate_with(
            "(DiagnosedWith patient1 asthma)",
            "Does patient1 have asthma?",
        ));
        assert_eq!(d.mode, ReasoningMode::ProveSpecific);
    }

    #[test]
    fn predicate_mismatch_is_overridden() {
        let d = descriptor(translate_with(
            "(bc (DiagnosedWith $patient anticoagulation_therapy))",
            "Who needs anticoagulation?",
        ));
        assert_eq!(d.target, TargetPredicate::IndicatedFor);
    }

    #[test]
    fn outside_vocabulary_is_unsupported() {
        assert_eq!(
            translate_with("(bc (DiagnosedWith $patient diabetes))", "Who has diabetes?"),
            Translation::Unsupported(UnsupportedReason::OutsideVocabulary {
                object: Some("diabetes".into())
            })
        );
        assert_eq!(
            translate_with("Illness not supported.", "Who has diabetes?"),
            Translation::Unsupported(UnsupportedReason::OutsideVocabulary { object: None })
        );
    }

    #[test]
    fn unreadable_answer_is_malformed() {
        assert!(matches!(
            translate_with("I am not sure what you mean", "???"),
            Translation::Unsupported(UnsupportedReason::Malformed { .. })
        ));
        assert!(matches!(
            translate_with("(bc (DiagnosedWith $patient", "???"),
            Translation::Unsupported(UnsupportedReason::Malformed { .. })
        ));
    }

    #[test]
    fn oracle_failure_is_unsupported() {
        let t = QueryTranslator::new(Arc::new(|_: &str| -> OracleResult<String> {
            Err(OracleError::RequestFailed {
                message: "boom".into(),
            })
        }))
        .translate("Who has asthma?");
        assert!(matches!(
            t,
            Translation::Unsupported(UnsupportedReason::OracleFailed { .. })
        ));
    }

    #[test]
    fn fenced_answer_is_accepted() {
        let d = descriptor(translate_with(
            "```\n(bc (DiagnosedWith patient2 pneumothorax))\n```",
            "Prove that patient2 has pneumothorax.",
        ));
        assert_eq!(d.depth, 4);
        assert_eq!(d.subject, Subject::Bound("patient2".into()));
    }

    #[test]
    fn causal_cues_match_whole_words() {
        assert!(has_causal_cue("Infer if patient1 has copd"));
        assert!(has_causal_cue("What can follow for patient1?"));
        assert!(!has_causal_cue("Is patient1 infected with pneumonia?"));
    }

    #[test]
    fn table_matches_known_depths() {
        assert_eq!(lookup("lung_cancer").map(|t| t.depth), Some(7));
        assert_eq!(lookup("laryngitis").map(|t| t.depth), Some(3));
        assert_eq!(lookup("pleural_effusion").map(|t| t.depth), Some(5));
        assert_eq!(SUPPORTED_TARGETS.len(), 19);
    }

    #[test]
    fn prompt_lists_table_and_ends_with_query() {
        let prompt = translation_prompt("Who has copd?");
        assert!(prompt.contains("- lung_cancer (DiagnosedWith)"));
        assert!(prompt.contains(NOT_SUPPORTED));
        assert!(prompt.ends_with("Input: Who has copd?\nOutput:"));
    }
}
