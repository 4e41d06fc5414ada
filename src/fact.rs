//! Typed clinical facts.
//!
//! A fact is one assertion about a patient, drawn from a closed vocabulary of
//! five categories, each bound to exactly one predicate. Facts arrive either
//! from the bundled default pack, from the custom fact store, or from the
//! oracle translating a free-text statement; all three paths go through the
//! same validation.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FactError, FactResult};
use crate::formal::{strip_markup, Atom, Sexp, Term};

/// Subject used when a statement does not name a patient.
pub const DEFAULT_SUBJECT: &str = "patient1";

static RE_SNAKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:_[a-z0-9]+)*$").unwrap());

static RE_SUBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap());

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

/// The kind of clinical evidence a fact records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Symptom,
    TestResult,
    RiskFactor,
    MedicalHistory,
    PhysicalFinding,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Symptom,
        Category::TestResult,
        Category::RiskFactor,
        Category::MedicalHistory,
        Category::PhysicalFinding,
    ];

    /// The only predicate facts of this category may use.
    pub fn predicate(self) -> FactPredicate {
        match self {
            Category::Symptom => FactPredicate::Presents,
            Category::TestResult => FactPredicate::Shows,
            Category::RiskFactor => FactPredicate::HasRiskFactor,
            Category::MedicalHistory => FactPredicate::HasMedicalHistory,
            Category::PhysicalFinding => FactPredicate::HasPhysicalFinding,
        }
    }

    /// Prefix of fact ids in this category.
    pub fn tag(self) -> &'static str {
        match self {
            Category::Symptom => "SYMPTOM",
            Category::TestResult => "TEST",
            Category::RiskFactor => "RISK",
            Category::MedicalHistory => "HISTORY",
            Category::PhysicalFinding => "FINDING",
        }
    }

    /// Plural heading used when grouping evidence.
    pub fn heading(self) -> &'static str {
        match self {
            Category::Symptom => "Symptoms",
            Category::TestResult => "Test Results",
            Category::RiskFactor => "Risk Factors",
            Category::MedicalHistory => "Medical History",
            Category::PhysicalFinding => "Physical Findings",
        }
    }

    /// Recognize the category from the tag an id starts with.
    pub fn from_id(id: &str) -> Option<Self> {
        let upper = id.to_ascii_uppercase();
        Self::ALL.into_iter().find(|c| upper.starts_with(c.tag()))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Symptom => "Symptom",
            Category::TestResult => "TestResult",
            Category::RiskFactor => "RiskFactor",
            Category::MedicalHistory => "MedicalHistory",
            Category::PhysicalFinding => "PhysicalFinding",
        };
        f.write_str(name)
    }
}

/// The closed set of predicates a fact may assert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactPredicate {
    Presents,
    Shows,
    HasRiskFactor,
    HasMedicalHistory,
    HasPhysicalFinding,
}

impl FactPredicate {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Presents" => Some(Self::Presents),
            "Shows" => Some(Self::Shows),
            "HasRiskFactor" => Some(Self::HasRiskFactor),
            "HasMedicalHistory" => Some(Self::HasMedicalHistory),
            "HasPhysicalFinding" => Some(Self::HasPhysicalFinding),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Presents => "Presents",
            Self::Shows => "Shows",
            Self::HasRiskFactor => "HasRiskFactor",
            Self::HasMedicalHistory => "HasMedicalHistory",
            Self::HasPhysicalFinding => "HasPhysicalFinding",
        }
    }

    /// Whether this predicate carries a source qualifier (`Shows chest_xray ...`).
    pub fn is_qualified(self) -> bool {
        matches!(self, Self::Shows)
    }
}

impl fmt::Display for FactPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Fact
// ---------------------------------------------------------------------------

/// Unique identifier of a fact within a knowledge base generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactId(String);

impl FactId {
    /// Compose an id from a category tag and a freshly generated token.
    pub fn generated(category: Category, token: &str) -> Self {
        Self(format!("{}{token}", category.tag()))
    }

    /// Wrap an id read from a trusted source (bundled pack or fact store).
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single typed assertion about a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub category: Category,
    pub predicate: FactPredicate,
    pub subject: String,
    pub qualifier: Option<String>,
    pub value: String,
}

impl Fact {
    /// Build a fact, enforcing the category/predicate table and token shapes.
    pub fn new(
        id: FactId,
        category: Category,
        subject: &str,
        qualifier: Option<&str>,
        value: &str,
    ) -> FactResult<Self> {
        let predicate = category.predicate();
        let qualifier = match (predicate.is_qualified(), qualifier) {
            (true, Some(q)) => Some(normalize_token("qualifier", q)?),
            (false, None) => None,
            (true, None) => {
                return Err(FactError::Arity {
                    predicate: predicate.to_string(),
                    expected: "3".into(),
                    actual: 2,
                })
            }
            (false, Some(_)) => {
                return Err(FactError::Arity {
                    predicate: predicate.to_string(),
                    expected: "2".into(),
                    actual: 3,
                })
            }
        };
        if !RE_SUBJECT.is_match(subject) {
            return Err(FactError::InvalidToken {
                field: "subject".into(),
                token: subject.to_string(),
            });
        }
        Ok(Self {
            id,
            category,
            predicate,
            subject: subject.to_string(),
            qualifier,
            value: normalize_token("value", value)?,
        })
    }

    /// Accept a record whose label is the fact id itself (bundled or stored facts).
    pub fn from_record(record: &FactRecord) -> FactResult<Self> {
        let category = Category::from_id(&record.label).ok_or_else(|| FactError::UnknownCategory {
            id: record.label.clone(),
        })?;
        Self::from_atom(FactId::from_raw(record.label.clone()), category, &record.atom)
    }

    /// Accept an oracle-translated record, assigning the id from `token`.
    ///
    /// The category comes from the tag the oracle wrote; whatever follows the
    /// tag is discarded in favour of the generated token.
    pub fn from_translation(record: &FactRecord, token: &str) -> FactResult<Self> {
        let category = Category::from_id(&record.label).ok_or_else(|| FactError::UnknownCategory {
            id: record.label.clone(),
        })?;
        Self::from_atom(FactId::generated(category, token), category, &record.atom)
    }

    fn from_atom(id: FactId, category: Category, atom: &Atom) -> FactResult<Self> {
        let predicate =
            FactPredicate::parse(&atom.functor).ok_or_else(|| FactError::UnknownPredicate {
                predicate: atom.functor.clone(),
            })?;
        if predicate != category.predicate() {
            return Err(FactError::Inconsistent {
                category: category.to_string(),
                predicate: predicate.to_string(),
            });
        }

        let mut args = Vec::with_capacity(atom.args.len());
        for arg in &atom.args {
            match arg {
                Term::Const(c) => args.push(c.as_str()),
                Term::Var(v) => {
                    return Err(FactError::InvalidToken {
                        field: "argument".into(),
                        token: format!("${v}"),
                    })
                }
            }
        }

        match (predicate.is_qualified(), args.as_slice()) {
            (true, [qualifier, subject, value]) => {
                Self::new(id, category, subject, Some(qualifier), value)
            }
            (true, [qualifier, value]) => {
                Self::new(id, category, DEFAULT_SUBJECT, Some(qualifier), value)
            }
            (false, [subject, value]) => Self::new(id, category, subject, None, value),
            (false, [value]) => Self::new(id, category, DEFAULT_SUBJECT, None, value),
            (qualified, other) => Err(FactError::Arity {
                predicate: predicate.to_string(),
                expected: if qualified { "2 or 3" } else { "1 or 2" }.into(),
                actual: other.len(),
            }),
        }
    }

    /// The ground atom this fact contributes to the reasoning universe.
    pub fn to_atom(&self) -> Atom {
        let mut args = Vec::with_capacity(3);
        if let Some(q) = &self.qualifier {
            args.push(Term::Const(q.clone()));
        }
        args.push(Term::Const(self.subject.clone()));
        args.push(Term::Const(self.value.clone()));
        Atom::new(self.predicate.as_str(), args)
    }

    /// The formal record form: `(: <ID> (<Predicate> <args>))`.
    pub fn to_record(&self) -> String {
        format!("(: {} {})", self.id, self.to_atom())
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_record())
    }
}

fn normalize_token(field: &str, raw: &str) -> FactResult<String> {
    let token = raw.trim().to_lowercase().replace('-', "_");
    if RE_SNAKE.is_match(&token) {
        Ok(token)
    } else {
        Err(FactError::InvalidToken {
            field: field.to_string(),
            token: raw.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Formal records
// ---------------------------------------------------------------------------

/// An unvalidated `(: <label> <atom>)` record as written by the oracle or a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactRecord {
    pub label: String,
    pub atom: Atom,
}

impl FactRecord {
    /// Parse a record, unwrapping an `(add-atom <space> <record>)` envelope if present.
    pub fn parse(raw: &str) -> FactResult<Self> {
        let text = strip_markup(raw);
        let malformed = || FactError::Malformed {
            record: raw.trim().to_string(),
        };
        let expr = Sexp::parse(&text).map_err(|_| malformed())?;
        let expr = match expr.head() {
            Some("add-atom") => expr.as_list().and_then(|items| items.last()).cloned(),
            _ => Some(expr),
        }
        .ok_or_else(malformed)?;

        let items = expr.as_list().ok_or_else(malformed)?;
        match items {
            [colon, label, body] if colon.as_symbol() == Some(":") => {
                let label = label.as_symbol().ok_or_else(malformed)?.to_string();
                let atom = Atom::from_sexp(body).map_err(|_| malformed())?;
                Ok(Self { label, atom })
            }
            _ => Err(malformed()),
        }
    }
}
