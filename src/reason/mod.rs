//! Reasoning over the active knowledge base.
//!
//! The engine is a narrow capability: it is built once per knowledge base
//! generation by an [`EngineFactory`] and answers formal query strings in
//! either proof-search or forward-derivation mode. [`ReasoningOrchestrator`]
//! turns a [`QueryDescriptor`] into one such call against a fixed
//! [`Snapshot`].
//!
//! - [`ReasoningEngine`] trait: `prove_specific(query, depth)`, `derive_all(query, depth)`
//! - [`EngineFactory`] trait: `build(&KnowledgeBase) -> Arc<dyn ReasoningEngine>`
//! - Built-in implementation: [`chaining::ChainingEngine`]

pub mod chaining;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{ReasoningError, ReasoningResult};
use crate::fact::FactId;
use crate::formal::Atom;
use crate::kb::{KnowledgeBase, Snapshot};
use crate::translate::{QueryDescriptor, ReasoningMode};

// ---------------------------------------------------------------------------
// Proofs
// ---------------------------------------------------------------------------

/// A proof term: nested rule applications over fact ids and the assumed hypothesis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProofTerm {
    /// A fact of the knowledge base, cited by id.
    Fact(FactId),
    /// The hypothesis assumed in forward derivation.
    Assumed,
    /// A rule fired on the proofs of its premises, in premise order.
    Rule {
        name: String,
        premises: Vec<ProofTerm>,
        conclusion: Atom,
    },
}

impl ProofTerm {
    /// Whether any leaf of this proof is the assumed hypothesis.
    pub fn depends_on_assumption(&self) -> bool {
        match self {
            ProofTerm::Fact(_) => false,
            ProofTerm::Assumed => true,
            ProofTerm::Rule { premises, .. } => premises.iter().any(Self::depends_on_assumption),
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a ProofTerm)) {
        f(self);
        if let ProofTerm::Rule { premises, .. } = self {
            for p in premises {
                p.visit(f);
            }
        }
    }
}

impl fmt::Display for ProofTerm {
    /// Curried application form: `((rule SYMPTOM1) TEST3)`; the hypothesis prints as `$prf`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofTerm::Fact(id) => write!(f, "{id}"),
            ProofTerm::Assumed => f.write_str("$prf"),
            ProofTerm::Rule { name, premises, .. } => {
                let mut acc = name.clone();
                for p in premises {
                    acc = format!("({acc} {p})");
                }
                f.write_str(&acc)
            }
        }
    }
}

/// One rule firing inside a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleApplication<'a> {
    pub rule: &'a str,
    /// Fact ids consumed directly by this firing.
    pub cited_facts: Vec<&'a FactId>,
    pub conclusion: &'a Atom,
}

/// One derivation returned by an engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProofTrace {
    pub proof: ProofTerm,
    pub conclusion: Atom,
}

impl ProofTrace {
    pub fn new(proof: ProofTerm, conclusion: Atom) -> Self {
        Self { proof, conclusion }
    }

    /// Cited fact ids, deduplicated, in first-citation order.
    pub fn fact_ids(&self) -> Vec<&FactId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.proof.visit(&mut |t| {
            if let ProofTerm::Fact(id) = t {
                if seen.insert(id) {
                    out.push(id);
                }
            }
        });
        out
    }

    /// Names of the rules applied, deduplicated, outermost first.
    pub fn rule_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.proof.visit(&mut |t| {
            if let ProofTerm::Rule { name, .. } = t {
                if seen.insert(name.as_str()) {
                    out.push(name.as_str());
                }
            }
        });
        out
    }

    /// The rule-application chain in derivation order (innermost first).
    pub fn steps(&self) -> Vec<RuleApplication<'_>> {
        fn walk<'a>(term: &'a ProofTerm, out: &mut Vec<RuleApplication<'a>>) {
            if let ProofTerm::Rule {
                name,
                premises,
                conclusion,
            } = term
            {
                for p in premises {
                    walk(p, out);
                }
                out.push(RuleApplication {
                    rule: name,
                    cited_facts: premises
                        .iter()
                        .filter_map(|p| match p {
                            ProofTerm::Fact(id) => Some(id),
                            _ => None,
                        })
                        .collect(),
                    conclusion,
                });
            }
        }
        let mut out = Vec::new();
        walk(&self.proof, &mut out);
        out
    }

    /// Whether the trace rests on the assumed hypothesis.
    pub fn is_hypothetical(&self) -> bool {
        self.proof.depends_on_assumption()
    }
}

impl fmt::Display for ProofTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(: {} {})", self.proof, self.conclusion)
    }
}

/// Remove repeated traces, keeping first occurrences.
pub fn dedup_traces(traces: Vec<ProofTrace>) -> Vec<ProofTrace> {
    let mut seen = HashSet::new();
    traces
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Engine capability
// ---------------------------------------------------------------------------

/// A reasoning engine bound to one knowledge base generation.
///
/// Engines are immutable after construction; concurrent calls are allowed.
pub trait ReasoningEngine: Send + Sync {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &str;

    /// Search for proofs of the query atom, resolving at most `depth` levels deep.
    fn prove_specific(&self, query: &str, depth: usize) -> ReasoningResult<Vec<ProofTrace>>;

    /// Assume the query atom and derive its consequences in at most `depth` rounds.
    fn derive_all(&self, query: &str, depth: usize) -> ReasoningResult<Vec<ProofTrace>>;
}

/// Builds an engine for a knowledge base generation.
pub trait EngineFactory: Send + Sync {
    fn build(&self, kb: &KnowledgeBase) -> ReasoningResult<Arc<dyn ReasoningEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn(&KnowledgeBase) -> ReasoningResult<Arc<dyn ReasoningEngine>> + Send + Sync,
{
    fn build(&self, kb: &KnowledgeBase) -> ReasoningResult<Arc<dyn ReasoningEngine>> {
        self(kb)
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Executes query descriptors against a snapshot's engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReasoningOrchestrator;

impl ReasoningOrchestrator {
    pub fn new() -> Self {
        Self
    }

    /// Run one query. Zero traces means no derivation was found.
    pub fn run(
        &self,
        descriptor: &QueryDescriptor,
        snapshot: &Snapshot,
    ) -> ReasoningResult<Vec<ProofTrace>> {
        if descriptor.depth == 0 {
            return Err(ReasoningError::ZeroDepth);
        }
        let query = descriptor.to_formal();
        let engine = snapshot.engine();
        let traces = match descriptor.mode {
            ReasoningMode::ProveSpecific => engine.prove_specific(&query, descriptor.depth),
            ReasoningMode::DeriveAll => engine.derive_all(&query, descriptor.depth),
        }
        .inspect_err(|e| {
            tracing::error!(
                engine = engine.name(),
                generation = snapshot.generation().value(),
                query = %query,
                error = %e,
                "reasoning engine failed"
            );
        })?;
        tracing::info!(
            engine = engine.name(),
            generation = snapshot.generation().value(),
            mode = %descriptor.mode,
            query = %query,
            traces = traces.len(),
            "reasoning finished"
        );
        Ok(traces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(id: &str) -> ProofTerm {
        ProofTerm::Fact(FactId::from_raw(id))
    }

    fn copd_trace() -> ProofTrace {
        let diagnosis = ProofTerm::Rule {
            name: "copd_diagnosis_rule".into(),
            premises: vec![fact("SYMPTOM1"), fact("SYMPTOM11"), fact("TEST3")],
            conclusion: Atom::ground("DiagnosedWith", &["patient1", "copd"]),
        };
        ProofTrace::new(
            ProofTerm::Rule {
                name: "copd_indication_rule".into(),
                premises: vec![diagnosis],
                conclusion: Atom::ground("IndicatedFor", &["patient1", "long_acting_bronchodilators"]),
            },
            Atom::ground("IndicatedFor", &["patient1", "long_acting_bronchodilators"]),
        )
    }

    #[test]
    fn trace_renders_curried_proof() {
        let trace = copd_trace();
        assert_eq!(
            trace.to_string(),
            "(: (copd_indication_rule (((copd_diagnosis_rule SYMPTOM1) SYMPTOM11) TEST3)) \
             (IndicatedFor patient1 long_acting_bronchodilators))"
        );
    }

    #[test]
    fn steps_are_innermost_first() {
        let trace = copd_trace();
        let steps = trace.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].rule, "copd_diagnosis_rule");
        assert_eq!(steps[0].cited_facts.len(), 3);
        assert_eq!(steps[1].rule, "copd_indication_rule");
        assert!(steps[1].cited_facts.is_empty());
        assert_eq!(trace.rule_names(), vec!["copd_indication_rule", "copd_diagnosis_rule"]);
    }

    #[test]
    fn fact_ids_are_deduplicated() {
        let trace = ProofTrace::new(
            ProofTerm::Rule {
                name: "r".into(),
                premises: vec![fact("SYMPTOM1"), fact("SYMPTOM1"), fact("TEST1")],
                conclusion: Atom::ground("DiagnosedWith", &["patient1", "x"]),
            },
            Atom::ground("DiagnosedWith", &["patient1", "x"]),
        );
        let ids: Vec<_> = trace.fact_ids().into_iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["SYMPTOM1", "TEST1"]);
    }

    #[test]
    fn hypothesis_renders_as_prf() {
        let trace = ProofTrace::new(
            ProofTerm::Rule {
                name: "beta_blocker_contraindication_rule".into(),
                premises: vec![ProofTerm::Assumed],
                conclusion: Atom::ground("ContraindicatedFor", &["patient1", "beta_blockers"]),
            },
            Atom::ground("ContraindicatedFor", &["patient1", "beta_blockers"]),
        );
        assert!(trace.is_hypothetical());
        assert!(!copd_trace().is_hypothetical());
        assert_eq!(
            trace.to_string(),
            "(: (beta_blocker_contraindication_rule $prf) (ContraindicatedFor patient1 beta_blockers))"
        );
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let traces = dedup_traces(vec![copd_trace(), copd_trace()]);
        assert_eq!(traces.len(), 1);
    }
}
