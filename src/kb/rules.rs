//! Horn rules over formal atoms.

use std::collections::HashSet;
use std::fmt;

use crate::error::{KbError, KbResult};
use crate::formal::Atom;

/// `premises => conclusion`, with variables shared across atoms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub premises: Vec<Atom>,
    pub conclusion: Atom,
}

impl Rule {
    /// Build a rule, rejecting empty premise lists and conclusion variables
    /// that no premise binds.
    pub fn new(name: impl Into<String>, premises: Vec<Atom>, conclusion: Atom) -> KbResult<Self> {
        let name = name.into();
        let invalid = |message: String| KbError::InvalidRule {
            rule: name.clone(),
            message,
        };
        if name.trim().is_empty() {
            return Err(invalid("rule name is empty".into()));
        }
        if premises.is_empty() {
            return Err(invalid("rule has no premises".into()));
        }
        let bound: HashSet<&str> = premises.iter().flat_map(|p| p.vars()).collect();
        if let Some(unbound) = conclusion.vars().into_iter().find(|v| !bound.contains(v)) {
            return Err(invalid(format!(
                "conclusion variable ${unbound} does not occur in any premise"
            )));
        }
        Ok(Self {
            name,
            premises,
            conclusion,
        })
    }

    /// Parse premises and conclusion from their textual atom forms.
    pub fn parse(name: &str, premises: &[String], conclusion: &str) -> KbResult<Self> {
        let parse = |text: &str| {
            Atom::parse(text).map_err(|e| KbError::InvalidRule {
                rule: name.to_string(),
                message: format!("{text}: {e}"),
            })
        };
        let premises = premises
            .iter()
            .map(|p| parse(p))
            .collect::<KbResult<Vec<_>>>()?;
        Self::new(name, premises, parse(conclusion)?)
    }
}

impl fmt::Display for Rule {
    /// `(: name (-> p1 p2 ... conclusion))`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(: {} (->", self.name)?;
        for p in &self.premises {
            write!(f, " {p}")?;
        }
        write!(f, " {}))", self.conclusion)
    }
}

/// The static rule set, identical across every generation.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Build a rule set; rule names must be unique.
    pub fn new(rules: Vec<Rule>) -> KbResult<Self> {
        let mut names = HashSet::new();
        for rule in &rules {
            if !names.insert(rule.name.as_str()) {
                return Err(KbError::InvalidRule {
                    rule: rule.name.clone(),
                    message: "duplicate rule name".into(),
                });
            }
        }
        Ok(Self { rules })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
