//! Symbolic vs. sub-symbolic routing decision.
//!
//! The oracle is shown a fixed set of worked examples and must answer with a
//! single label. Anything but an exact label degrades to the descriptive path.

use std::sync::Arc;

use serde::Serialize;

use crate::oracle::TextOracle;

/// Confidence reported for an exact label.
pub const LABELED_CONFIDENCE: f32 = 0.9;
/// Confidence reported when the oracle answered something else.
pub const AMBIGUOUS_CONFIDENCE: f32 = 0.5;
/// Confidence reported when the oracle call failed.
pub const FAILED_CONFIDENCE: f32 = 0.0;

const CLASSIFY_TEMPLATE: &str = "\
You are a classifier for a respiratory disease diagnosis expert system. Your task is to \
classify a user query as either 'symbolic' (requiring logical reasoning, deduction, or \
inference using medical rules and facts, such as diagnosis, treatment indication, or severity \
classification) or 'sub-symbolic' (general, descriptive, or ambiguous questions about \
respiratory diseases, such as definitions, explanations, or broad overviews). Respond only \
with 'symbolic' or 'sub-symbolic'.

Examples:
- Query: \"Is the patient diagnosed with asthma?\" -> symbolic
- Query: \"what can we infer if someone has asthma?\" -> symbolic
- Query: \"What respiratory disease is the patient diagnosed with?\" -> symbolic
- Query: \"What symptoms does the patient present with?\" -> symbolic
- Query: \"What treatment is indicated for the patient?\" -> symbolic
- Query: \"Does the patient have risk factors for tuberculosis?\" -> symbolic
- Query: \"Does the chest x-ray show infiltrates?\" -> symbolic
- Query: \"Is there evidence of pulmonary embolism based on the CT pulmonary angiogram?\" -> symbolic
- Query: \"Does the patient have a history of childhood asthma?\" -> symbolic
- Query: \"What physical findings are present in the patient?\" -> symbolic
- Query: \"Is the patient at risk due to tobacco use disorder?\" -> symbolic
- Query: \"What is asthma?\" -> sub-symbolic
- Query: \"Explain the difference between asthma and COPD.\" -> sub-symbolic
- Query: \"What are the risk factors for pneumonia?\" -> sub-symbolic
- Query: \"Describe the symptoms of tuberculosis.\" -> sub-symbolic
- Query: \"What is a chest x-ray?\" -> sub-symbolic
- Query: \"How does spirometry work?\" -> sub-symbolic
- Query: \"What is the significance of hypoxemia?\" -> sub-symbolic
- Query: \"What are common respiratory diseases?\" -> sub-symbolic

Query: {query}
";

/// How the label was obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationOutcome {
    /// The oracle answered exactly one of the two labels.
    Classified,
    /// The oracle answered something else.
    Ambiguous { raw: String },
    /// The oracle call failed.
    Failed { message: String },
}

/// Routing decision for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub confidence: f32,
    pub is_symbolic: bool,
    pub outcome: ClassificationOutcome,
}

impl Classification {
    fn failed(message: String) -> Self {
        Self {
            confidence: FAILED_CONFIDENCE,
            is_symbolic: false,
            outcome: ClassificationOutcome::Failed { message },
        }
    }
}

/// Map raw oracle output to a classification.
///
/// The text is trimmed and lower-cased; only `symbolic` and `sub-symbolic`
/// count as labels.
pub fn parse_label(raw: &str) -> Classification {
    let label = raw.trim().to_lowercase();
    match label.as_str() {
        "symbolic" => Classification {
            confidence: LABELED_CONFIDENCE,
            is_symbolic: true,
            outcome: ClassificationOutcome::Classified,
        },
        "sub-symbolic" => Classification {
            confidence: LABELED_CONFIDENCE,
            is_symbolic: false,
            outcome: ClassificationOutcome::Classified,
        },
        _ => Classification {
            confidence: AMBIGUOUS_CONFIDENCE,
            is_symbolic: false,
            outcome: ClassificationOutcome::Ambiguous { raw: label },
        },
    }
}

/// The prompt sent for `query`.
pub fn classification_prompt(query: &str) -> String {
    CLASSIFY_TEMPLATE.replace("{query}", query)
}

/// Decides which branch handles a query.
pub struct QueryClassifier {
    oracle: Arc<dyn TextOracle>,
}

impl QueryClassifier {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self { oracle }
    }

    /// Classify one query. Never fails; oracle problems degrade to sub-symbolic.
    pub fn classify(&self, query: &str) -> Classification {
        let raw = match self.oracle.complete(&classification_prompt(query)) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(query, error = %e, "classification failed, defaulting to sub-symbolic");
                return Classification::failed(e.to_string());
            }
        };
        let classification = parse_label(&raw);
        match &classification.outcome {
            ClassificationOutcome::Ambiguous { raw } => {
                tracing::warn!(query, label = %raw, "invalid classification label, defaulting to sub-symbolic");
            }
            _ => {
                tracing::info!(query, symbolic = classification.is_symbolic, "query classified");
            }
        }
        classification
    }
}

impl std::fmt::Debug for QueryClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClassifier").finish_non_exhaustive()
    }
}
