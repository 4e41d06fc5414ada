//! Rich diagnostic error types for pulmo-nesy.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains. Oracle-facing subsystems
//! (classification, translation, interpretation) never surface these to the user
//! directly; they convert them into typed outcomes at their boundary.

use miette::Diagnostic;
use thiserror::Error;

use crate::config::ConfigError;
use crate::ingest::IngestError;
use crate::oracle::OracleError;
use crate::paths::PathError;
use crate::router::RouterError;

/// Top-level error type for pulmo-nesy.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum PulmoError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Formal(#[from] FormalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fact(#[from] FactError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Kb(#[from] KbError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reasoning(#[from] ReasoningError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Router(#[from] RouterError),
}

// ---------------------------------------------------------------------------
// Formal syntax errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum FormalError {
    #[error("unbalanced parentheses at byte {offset}")]
    #[diagnostic(
        code(pulmo::formal::unbalanced),
        help("Every `(` must be closed by a matching `)`. Check the expression for truncation.")
    )]
    Unbalanced { offset: usize },

    #[error("empty expression")]
    #[diagnostic(
        code(pulmo::formal::empty),
        help("Expected an s-expression such as `(Presents patient1 fever)`.")
    )]
    Empty,

    #[error("trailing input after expression: \"{rest}\"")]
    #[diagnostic(
        code(pulmo::formal::trailing),
        help("Only a single s-expression is expected here.")
    )]
    Trailing { rest: String },

    #[error("not an atom: {expr}")]
    #[diagnostic(
        code(pulmo::formal::not_an_atom),
        help("An atom is a list whose head is a symbol followed by symbol or variable arguments.")
    )]
    NotAnAtom { expr: String },
}

/// Result type for formal syntax operations.
pub type FormalResult<T> = std::result::Result<T, FormalError>;

// ---------------------------------------------------------------------------
// Fact errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum FactError {
    #[error("malformed fact record: {record}")]
    #[diagnostic(
        code(pulmo::fact::malformed),
        help("A fact record has the shape `(: <ID> (<Predicate> <args>))`.")
    )]
    Malformed { record: String },

    #[error("unknown predicate \"{predicate}\"")]
    #[diagnostic(
        code(pulmo::fact::unknown_predicate),
        help(
            "Facts may only use Presents, Shows, HasRiskFactor, HasMedicalHistory \
             or HasPhysicalFinding."
        )
    )]
    UnknownPredicate { predicate: String },

    #[error("unknown category tag in fact id \"{id}\"")]
    #[diagnostic(
        code(pulmo::fact::unknown_category),
        help("Fact ids start with SYMPTOM, TEST, RISK, HISTORY or FINDING.")
    )]
    UnknownCategory { id: String },

    #[error("category {category} is inconsistent with predicate {predicate}")]
    #[diagnostic(
        code(pulmo::fact::inconsistent),
        help(
            "Symptom facts use Presents, TestResult facts use Shows, RiskFactor facts use \
             HasRiskFactor, MedicalHistory facts use HasMedicalHistory and PhysicalFinding \
             facts use HasPhysicalFinding."
        )
    )]
    Inconsistent { category: String, predicate: String },

    #[error("predicate {predicate} takes {expected} argument(s), got {actual}")]
    #[diagnostic(
        code(pulmo::fact::arity),
        help("Shows takes `source subject value`; every other predicate takes `subject value`.")
    )]
    Arity {
        predicate: String,
        expected: String,
        actual: usize,
    },

    #[error("invalid {field} token \"{token}\"")]
    #[diagnostic(
        code(pulmo::fact::invalid_token),
        help("Arguments must be snake_case tokens; subjects must be identifiers such as `patient1`.")
    )]
    InvalidToken { field: String, token: String },
}

/// Result type for fact operations.
pub type FactResult<T> = std::result::Result<T, FactError>;

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(pulmo::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(pulmo::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             Try running with a fresh data directory."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(pulmo::store::serde),
        help(
            "Failed to serialize or deserialize a stored fact. \
             The stored format may have changed between versions; clear the custom facts."
        )
    )]
    Serialization { message: String },
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Knowledge base errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum KbError {
    #[error("failed to parse bundled {what}: {message}")]
    #[diagnostic(
        code(pulmo::kb::bundled),
        help("The built-in knowledge definitions are broken. This is a build defect, not a runtime condition.")
    )]
    Bundled { what: String, message: String },

    #[error("invalid rule \"{rule}\": {message}")]
    #[diagnostic(
        code(pulmo::kb::invalid_rule),
        help("Rules need a name, at least one premise and a conclusion whose variables all occur in a premise.")
    )]
    InvalidRule { rule: String, message: String },

    #[error("duplicate fact id {id} in generation {generation}")]
    #[diagnostic(
        code(pulmo::kb::duplicate_id),
        help("Fact ids must be unique within a knowledge base generation. Re-ingest the statement.")
    )]
    DuplicateFactId { id: String, generation: u64 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("reasoning engine could not be built: {0}")]
    #[diagnostic(
        code(pulmo::kb::engine_build),
        help("The previous knowledge base generation remains active.")
    )]
    EngineBuild(#[source] ReasoningError),
}

/// Result type for knowledge base operations.
pub type KbResult<T> = std::result::Result<T, KbError>;

// ---------------------------------------------------------------------------
// Reasoning errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ReasoningError {
    #[error("malformed formal query \"{query}\": {message}")]
    #[diagnostic(
        code(pulmo::reason::malformed_query),
        help("Queries are atoms such as `(DiagnosedWith $patient asthma)`.")
    )]
    MalformedQuery { query: String, message: String },

    #[error("depth budget must be at least 1")]
    #[diagnostic(
        code(pulmo::reason::zero_depth),
        help("Every target predicate has a fixed positive depth budget.")
    )]
    ZeroDepth,

    #[error("reasoning engine '{engine}' failed: {message}")]
    #[diagnostic(
        code(pulmo::reason::engine_failed),
        help("The engine invocation failed. This is distinct from finding no proof.")
    )]
    EngineFailed { engine: String, message: String },
}

/// Result type for reasoning operations.
pub type ReasoningResult<T> = std::result::Result<T, ReasoningError>;

/// Convenience alias for functions returning pulmo-nesy results.
pub type PulmoResult<T> = std::result::Result<T, PulmoError>;
