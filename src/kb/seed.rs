//! Bundled knowledge: the default fact set and the static rule set.
//!
//! Both are TOML files compiled into the binary with `include_str!` and parsed
//! once at startup. A parse failure here is fatal.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{KbError, KbResult};
use crate::fact::{Fact, FactRecord};
use crate::kb::rules::{Rule, RuleSet};

const DEFAULT_FACTS_TOML: &str = include_str!("../../data/kb/default_facts.toml");
const RULES_TOML: &str = include_str!("../../data/kb/rules.toml");

// ── TOML deserialization helpers ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct PackMeta {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct FactsToml {
    #[allow(dead_code)]
    kb: PackMeta,
    #[serde(default)]
    facts: Vec<FactEntry>,
}

#[derive(Debug, Deserialize)]
struct FactEntry {
    record: String,
}

#[derive(Debug, Deserialize)]
struct RulesToml {
    #[allow(dead_code)]
    kb: PackMeta,
    #[serde(default)]
    rules: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    name: String,
    premises: Vec<String>,
    conclusion: String,
}

// ── Sources ─────────────────────────────────────────────────────────────

/// The immutable inputs every knowledge base generation is built from.
#[derive(Debug, Clone)]
pub struct KbSources {
    pub default_facts: Arc<Vec<Fact>>,
    pub rules: Arc<RuleSet>,
}

impl KbSources {
    /// Parse the knowledge compiled into the binary.
    pub fn bundled() -> KbResult<Self> {
        Self::from_toml(DEFAULT_FACTS_TOML, RULES_TOML)
    }

    /// Parse a fact pack and a rule pack from TOML text.
    pub fn from_toml(facts_toml: &str, rules_toml: &str) -> KbResult<Self> {
        Self::new(parse_facts(facts_toml)?, parse_rules(rules_toml)?)
    }

    /// Combine an already-built fact set and rule set; fact ids must be unique.
    pub fn new(default_facts: Vec<Fact>, rules: RuleSet) -> KbResult<Self> {
        let mut ids = HashSet::new();
        for fact in &default_facts {
            if !ids.insert(fact.id.as_str()) {
                return Err(KbError::Bundled {
                    what: "default facts".into(),
                    message: format!("duplicate fact id {}", fact.id),
                });
            }
        }
        Ok(Self {
            default_facts: Arc::new(default_facts),
            rules: Arc::new(rules),
        })
    }
}

/// Parse a `[[facts]]` pack into validated facts.
pub fn parse_facts(toml_str: &str) -> KbResult<Vec<Fact>> {
    let parsed: FactsToml = toml::from_str(toml_str).map_err(|e| KbError::Bundled {
        what: "default facts".into(),
        message: e.to_string(),
    })?;
    parsed
        .facts
        .iter()
        .map(|entry| {
            FactRecord::parse(&entry.record)
                .and_then(|record| Fact::from_record(&record))
                .map_err(|e| KbError::Bundled {
                    what: "default facts".into(),
                    message: format!("{}: {e}", entry.record),
                })
        })
        .collect()
}

/// Parse a `[[rules]]` pack into a rule set.
pub fn parse_rules(toml_str: &str) -> KbResult<RuleSet> {
    let parsed: RulesToml = toml::from_str(toml_str).map_err(|e| KbError::Bundled {
        what: "rules".into(),
        message: e.to_string(),
    })?;
    let rules = parsed
        .rules
        .iter()
        .map(|r| Rule::parse(&r.name, &r.premises, &r.conclusion))
        .collect::<KbResult<Vec<_>>>()?;
    RuleSet::new(rules)
}
