//! Proof traces to explanations.
//!
//! Evidence, rules and conclusions are collected and deduplicated here; the
//! oracle only writes the prose summary, and it only ever sees the
//! deduplicated structure, never the raw traces.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use crate::fact::{Category, Fact};
use crate::formal::Atom;
use crate::kb::KnowledgeBase;
use crate::oracle::TextOracle;
use crate::reason::ProofTrace;
use crate::translate::ReasoningMode;

/// Shown when the summary could not be produced.
pub const INTERPRETATION_APOLOGY: &str = "Sorry, I couldn't interpret the response.";

const INTERPRET_TEMPLATE: &str = "\
You are a medical explanation interpreter for a symbolic respiratory diagnosis system. \
You are given the deduplicated evidence behind a reasoning result: the conclusions reached, \
the facts cited (grouped by category) and the rules applied. Write a short summary for a \
medical user. Use only the information given and do not repeat the evidence lists.

{instruction}

Example:

Mode: bc
Goal: (DiagnosedWith patient1 copd)
Conclusions:
- (DiagnosedWith patient1 copd)
Evidence:
- Symptoms: SYMPTOM1 (Presents patient1 persistent_cough), SYMPTOM11 (Presents patient1 wheezing)
- Test Results: TEST3 (Shows spirometry patient1 obstructive_pattern)
Rules: copd_diagnosis_rule
Output: Patient1 is diagnosed with COPD, based on persistent cough, wheezing and an obstructive spirometry pattern.

Mode: {mode}
Goal: {goal}
Conclusions:
{conclusions}
Evidence:
{evidence}
Rules: {rules}
Output:";

/// Facts of one category, in first-citation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceGroup {
    pub category: Category,
    pub facts: Vec<Fact>,
}

/// Where the prose summary came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Summary {
    Oracle(String),
    /// No trace was found; nothing is asserted.
    NoDerivation,
    /// The oracle failed to summarize.
    Unavailable,
}

/// A structured explanation of one reasoning result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub mode: ReasoningMode,
    pub goal: Atom,
    pub conclusions: Vec<Atom>,
    pub evidence: Vec<EvidenceGroup>,
    pub rules: Vec<String>,
    pub summary: Summary,
}

impl Explanation {
    pub fn is_derivation(&self) -> bool {
        !self.conclusions.is_empty()
    }

    /// Every cited fact id, each exactly once.
    pub fn fact_ids(&self) -> impl Iterator<Item = &str> {
        self.evidence
            .iter()
            .flat_map(|g| g.facts.iter().map(|f| f.id.as_str()))
    }

    /// Markdown shown to the user.
    pub fn render(&self) -> String {
        match &self.summary {
            Summary::NoDerivation => no_derivation_text(&self.goal),
            Summary::Unavailable => INTERPRETATION_APOLOGY.to_string(),
            Summary::Oracle(text) => {
                let mut out = String::new();
                let heading = match self.mode {
                    ReasoningMode::ProveSpecific => "Diagnosis Summary",
                    ReasoningMode::DeriveAll => "Inference Summary",
                };
                let _ = writeln!(out, "**{heading}**\n{}\n", text.trim());
                if self.mode == ReasoningMode::DeriveAll {
                    let _ = writeln!(out, "**Conclusions**");
                    for c in &self.conclusions {
                        let _ = writeln!(out, "- {c}");
                    }
                    out.push('\n');
                }
                if !self.evidence.is_empty() {
                    let _ = writeln!(out, "**Evidence Used**");
                    for group in &self.evidence {
                        let _ = writeln!(out, "- **{}**:", group.category.heading());
                        for fact in &group.facts {
                            let _ = writeln!(out, "  - {}: {}", fact.id, fact.to_atom());
                        }
                    }
                    out.push('\n');
                }
                let _ = writeln!(out, "**Rules Applied**");
                for rule in &self.rules {
                    let _ = writeln!(out, "- {rule}");
                }
                out.trim_end().to_string()
            }
        }
    }
}

fn no_derivation_text(goal: &Atom) -> String {
    format!("No derivation was found for {goal} in the active knowledge base.")
}

/// Deduplicated contents of a trace set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedEvidence {
    pub conclusions: Vec<Atom>,
    pub evidence: Vec<EvidenceGroup>,
    pub rules: Vec<String>,
}

/// Collect conclusions, cited facts and rules across `traces`.
///
/// Each fact appears once, in the group of its category, in first-citation
/// order across all traces. Ids the knowledge base does not know are dropped.
pub fn collect_evidence(traces: &[ProofTrace], kb: &KnowledgeBase) -> CollectedEvidence {
    let mut conclusions = Vec::new();
    let mut seen_conclusions = HashSet::new();
    let mut facts: Vec<&Fact> = Vec::new();
    let mut seen_facts = HashSet::new();
    let mut rules = Vec::new();
    let mut seen_rules = HashSet::new();

    for trace in traces {
        if seen_conclusions.insert(&trace.conclusion) {
            conclusions.push(trace.conclusion.clone());
        }
        for id in trace.fact_ids() {
            if !seen_facts.insert(id) {
                continue;
            }
            match kb.fact(id) {
                Some(fact) => facts.push(fact),
                None => tracing::warn!(
                    id = %id,
                    generation = kb.generation().value(),
                    "trace cites a fact missing from the knowledge base"
                ),
            }
        }
        for rule in trace.rule_names() {
            if seen_rules.insert(rule) {
                rules.push(rule.to_string());
            }
        }
    }

    let evidence = Category::ALL
        .into_iter()
        .filter_map(|category| {
            let group: Vec<Fact> = facts
                .iter()
                .filter(|f| f.category == category)
                .map(|f| (*f).clone())
                .collect();
            (!group.is_empty()).then_some(EvidenceGroup {
                category,
                facts: group,
            })
        })
        .collect();

    CollectedEvidence {
        conclusions,
        evidence,
        rules,
    }
}

/// The prompt sent for a collected result.
pub fn interpretation_prompt(mode: ReasoningMode, goal: &Atom, collected: &CollectedEvidence) -> String {
    let instruction = match mode {
        ReasoningMode::ProveSpecific => {
            "State the single conclusion and the patient it concerns in one or two sentences."
        }
        ReasoningMode::DeriveAll => {
            "Enumerate every distinct conclusion reached and how it follows from the assumed goal."
        }
    };
    let conclusions = collected
        .conclusions
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    let evidence = if collected.evidence.is_empty() {
        "- none".to_string()
    } else {
        collected
            .evidence
            .iter()
            .map(|g| {
                let facts = g
                    .facts
                    .iter()
                    .map(|f| format!("{} {}", f.id, f.to_atom()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("- {}: {facts}", g.category.heading())
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    INTERPRET_TEMPLATE
        .replace("{instruction}", instruction)
        .replace("{mode}", mode.token())
        .replace("{goal}", &goal.to_string())
        .replace("{conclusions}", &conclusions)
        .replace("{evidence}", &evidence)
        .replace("{rules}", &collected.rules.join(", "))
}

/// Turns proof traces into explanations.
pub struct ProofInterpreter {
    oracle: Arc<dyn TextOracle>,
}

impl ProofInterpreter {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self { oracle }
    }

    /// Explain `traces` for `goal`. Never fails; a missing summary degrades to
    /// [`Summary::Unavailable`].
    pub fn interpret(
        &self,
        mode: ReasoningMode,
        goal: &Atom,
        traces: &[ProofTrace],
        kb: &KnowledgeBase,
    ) -> Explanation {
        let collected = collect_evidence(traces, kb);
        let summary = if traces.is_empty() {
            tracing::info!(goal = %goal, mode = %mode, "no derivation to interpret");
            Summary::NoDerivation
        } else {
            match self
                .oracle
                .complete(&interpretation_prompt(mode, goal, &collected))
            {
                Ok(text) if !text.trim().is_empty() => Summary::Oracle(text.trim().to_string()),
                Ok(_) => {
                    tracing::warn!(goal = %goal, "empty interpretation from oracle");
                    Summary::Unavailable
                }
                Err(e) => {
                    tracing::error!(goal = %goal, error = %e, "interpretation failed");
                    Summary::Unavailable
                }
            }
        };
        Explanation {
            mode,
            goal: goal.clone(),
            conclusions: collected.conclusions,
            evidence: collected.evidence,
            rules: collected.rules,
            summary,
        }
    }
}

impl std::fmt::Debug for ProofInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofInterpreter").finish_non_exhaustive()
    }
}
