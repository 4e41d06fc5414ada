//! Built-in chaining engine over facts and Horn rules.
//!
//! Backward mode is depth-first SLD resolution: a goal resolves against facts
//! at any remaining depth and against rule conclusions while depth remains for
//! their premises. Forward mode assumes the query atom, fires rules in rounds,
//! and keeps only conclusions whose proof rests on the assumption.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{ReasoningError, ReasoningResult};
use crate::formal::{Atom, Term};
use crate::kb::{KnowledgeBase, Rule};
use crate::reason::{dedup_traces, EngineFactory, ProofTerm, ProofTrace, ReasoningEngine};

type Bindings = HashMap<String, Term>;

/// Engine name reported in logs.
pub const ENGINE_NAME: &str = "chaining";

/// Forward and backward chaining over one knowledge base generation.
#[derive(Debug)]
pub struct ChainingEngine {
    facts: KnownAtoms,
    /// Facts plus everything the rules derive from them alone.
    closure: KnownAtoms,
    rules: Vec<Rule>,
    subjects: BTreeSet<String>,
}

impl ChainingEngine {
    pub fn new(kb: &KnowledgeBase) -> Self {
        let mut facts = KnownAtoms::default();
        let mut subjects = BTreeSet::new();
        for fact in kb.facts() {
            facts.insert(fact.to_atom(), ProofTerm::Fact(fact.id.clone()));
            subjects.insert(fact.subject.clone());
        }
        let rules: Vec<Rule> = kb.rules().iter().cloned().collect();
        let mut closure = facts.clone();
        saturate(&rules, &mut closure, usize::MAX);
        Self {
            facts,
            closure,
            rules,
            subjects,
        }
    }

    fn parse_query(query: &str) -> ReasoningResult<Atom> {
        Atom::parse(query).map_err(|e| ReasoningError::MalformedQuery {
            query: query.to_string(),
            message: e.to_string(),
        })
    }

    // ── Backward ────────────────────────────────────────────────────────

    fn solve(
        &self,
        goal: &Atom,
        depth: usize,
        bindings: &Bindings,
        fresh: &mut usize,
    ) -> Vec<(Bindings, ProofTerm)> {
        if depth == 0 {
            return Vec::new();
        }
        let goal = substitute(goal, bindings);
        let mut out = Vec::new();

        for (atom, proof) in self.facts.candidates(&goal.functor) {
            let mut b = bindings.clone();
            if unify(&goal, atom, &mut b) {
                out.push((b, proof.clone()));
            }
        }

        if depth < 2 {
            return out;
        }
        for rule in self.rules.iter().filter(|r| r.conclusion.functor == goal.functor) {
            *fresh += 1;
            let rule = rename(rule, *fresh);
            let mut head = bindings.clone();
            if !unify(&goal, &rule.conclusion, &mut head) {
                continue;
            }
            let mut partial = vec![(head, Vec::with_capacity(rule.premises.len()))];
            for premise in &rule.premises {
                let mut next = Vec::new();
                for (b, proofs) in &partial {
                    for (b2, p) in self.solve(premise, depth - 1, b, fresh) {
                        let mut proofs = proofs.clone();
                        proofs.push(p);
                        next.push((b2, proofs));
                    }
                }
                partial = next;
                if partial.is_empty() {
                    break;
                }
            }
            for (b, premises) in partial {
                let conclusion = substitute(&rule.conclusion, &b);
                out.push((
                    b,
                    ProofTerm::Rule {
                        name: rule.name.clone(),
                        premises,
                        conclusion,
                    },
                ));
            }
        }
        out
    }

    // ── Forward ─────────────────────────────────────────────────────────

    fn derive_from(&self, hypothesis: Atom, depth: usize) -> Vec<ProofTrace> {
        // Atoms already in the closure keep their unconditional proofs, so
        // only atoms first reached through the hypothesis count as derived.
        let mut known = self.closure.clone();
        let baseline = known.len();
        known.insert(hypothesis.clone(), ProofTerm::Assumed);
        saturate(&self.rules, &mut known, depth);

        let mut traces = vec![ProofTrace::new(ProofTerm::Assumed, hypothesis)];
        traces.extend(
            known
                .entries
                .into_iter()
                .skip(baseline)
                .filter(|(_, proof)| matches!(proof, ProofTerm::Rule { .. }))
                .filter(|(_, proof)| proof.depends_on_assumption())
                .map(|(atom, proof)| ProofTrace::new(proof, atom)),
        );
        traces
    }
}

/// Fire `rules` over `known` for at most `rounds` rounds, stopping at a fixpoint.
fn saturate(rules: &[Rule], known: &mut KnownAtoms, rounds: usize) {
    for round in 0..rounds {
        let mut fresh = Vec::new();
        for rule in rules {
            let mut matches = Vec::new();
            known.match_premises(&rule.premises, Bindings::new(), Vec::new(), &mut matches);
            for (b, premises) in matches {
                let conclusion = substitute(&rule.conclusion, &b);
                if !conclusion.is_ground() || known.contains(&conclusion) {
                    continue;
                }
                let proof = ProofTerm::Rule {
                    name: rule.name.clone(),
                    premises,
                    conclusion: conclusion.clone(),
                };
                fresh.push((conclusion, proof));
            }
        }
        let before = known.len();
        for (atom, proof) in fresh {
            known.insert(atom, proof);
        }
        if known.len() == before {
            tracing::trace!(round, "forward chaining reached a fixpoint");
            break;
        }
    }
}

impl ReasoningEngine for ChainingEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn prove_specific(&self, query: &str, depth: usize) -> ReasoningResult<Vec<ProofTrace>> {
        if depth == 0 {
            return Err(ReasoningError::ZeroDepth);
        }
        let goal = Self::parse_query(query)?;
        let mut fresh = 0;
        let traces = self
            .solve(&goal, depth, &Bindings::new(), &mut fresh)
            .into_iter()
            .map(|(b, proof)| ProofTrace::new(proof, substitute(&goal, &b)))
            .collect();
        Ok(dedup_traces(traces))
    }

    fn derive_all(&self, query: &str, depth: usize) -> ReasoningResult<Vec<ProofTrace>> {
        if depth == 0 {
            return Err(ReasoningError::ZeroDepth);
        }
        let target = Self::parse_query(query)?;
        let hypotheses: Vec<Atom> = if target.is_ground() {
            vec![target]
        } else {
            // Every variable takes the same subject; target atoms carry one patient.
            self.subjects
                .iter()
                .map(|subject| {
                    let b: Bindings = target
                        .vars()
                        .into_iter()
                        .map(|v| (v.to_string(), Term::Const(subject.clone())))
                        .collect();
                    substitute(&target, &b)
                })
                .collect()
        };
        let traces = hypotheses
            .into_iter()
            .flat_map(|h| self.derive_from(h, depth))
            .collect();
        Ok(dedup_traces(traces))
    }
}

/// Builds a [`ChainingEngine`] for each generation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChainingEngineFactory;

impl EngineFactory for ChainingEngineFactory {
    fn build(&self, kb: &KnowledgeBase) -> ReasoningResult<Arc<dyn ReasoningEngine>> {
        Ok(Arc::new(ChainingEngine::new(kb)))
    }
}

// ---------------------------------------------------------------------------
// Forward-chaining working set
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct KnownAtoms {
    entries: Vec<(Atom, ProofTerm)>,
    by_functor: HashMap<String, Vec<usize>>,
    seen: HashSet<Atom>,
}

impl KnownAtoms {
    fn insert(&mut self, atom: Atom, proof: ProofTerm) {
        if !self.seen.insert(atom.clone()) {
            return;
        }
        self.by_functor
            .entry(atom.functor.clone())
            .or_default()
            .push(self.entries.len());
        self.entries.push((atom, proof));
    }

    fn candidates<'a>(&'a self, functor: &str) -> impl Iterator<Item = &'a (Atom, ProofTerm)> + 'a {
        self.by_functor
            .get(functor)
            .into_iter()
            .flatten()
            .map(|&i| &self.entries[i])
    }

    fn contains(&self, atom: &Atom) -> bool {
        self.seen.contains(atom)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn match_premises(
        &self,
        premises: &[Atom],
        bindings: Bindings,
        proofs: Vec<ProofTerm>,
        out: &mut Vec<(Bindings, Vec<ProofTerm>)>,
    ) {
        let Some((first, rest)) = premises.split_first() else {
            out.push((bindings, proofs));
            return;
        };
        for (atom, proof) in self.candidates(&first.functor) {
            let mut b = bindings.clone();
            if unify(first, atom, &mut b) {
                let mut p = proofs.clone();
                p.push(proof.clone());
                self.match_premises(rest, b, p, out);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unification
// ---------------------------------------------------------------------------

fn walk(term: &Term, bindings: &Bindings) -> Term {
    let mut current = term.clone();
    while let Term::Var(v) = &current {
        match bindings.get(v) {
            Some(next) => current = next.clone(),
            None => break,
        }
    }
    current
}

fn unify_terms(a: &Term, b: &Term, bindings: &mut Bindings) -> bool {
    match (walk(a, bindings), walk(b, bindings)) {
        (Term::Const(x), Term::Const(y)) => x == y,
        (Term::Var(x), Term::Var(y)) if x == y => true,
        (Term::Var(x), other) | (other, Term::Var(x)) => {
            bindings.insert(x, other);
            true
        }
    }
}

fn unify(a: &Atom, b: &Atom, bindings: &mut Bindings) -> bool {
    a.functor == b.functor
        && a.args.len() == b.args.len()
        && a.args
            .iter()
            .zip(&b.args)
            .all(|(x, y)| unify_terms(x, y, bindings))
}

fn substitute(atom: &Atom, bindings: &Bindings) -> Atom {
    Atom::new(
        atom.functor.clone(),
        atom.args.iter().map(|t| walk(t, bindings)).collect(),
    )
}

/// Give a rule's variables names no goal can contain.
fn rename(rule: &Rule, suffix: usize) -> Rule {
    let rename_atom = |atom: &Atom| {
        Atom::new(
            atom.functor.clone(),
            atom.args
                .iter()
                .map(|t| match t {
                    Term::Var(v) => Term::Var(format!("{v}#{suffix}")),
                    c => c.clone(),
                })
                .collect(),
        )
    };
    Rule {
        name: rule.name.clone(),
        premises: rule.premises.iter().map(rename_atom).collect(),
        conclusion: rename_atom(&rule.conclusion),
    }
}
