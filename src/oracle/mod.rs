//! Text oracle: the black-box language model behind classification,
//! ingestion, translation and interpretation.
//!
//! Everything the rest of the crate decides from oracle output is
//! deterministic code; the oracle itself only turns one prompt into one
//! completion. Any `Fn(&str) -> Result<String, OracleError>` closure is an
//! oracle, which is how tests supply canned answers.

pub mod ollama;

pub use ollama::{OllamaConfig, OllamaOracle};

use miette::Diagnostic;
use thiserror::Error;

/// Errors from the oracle subsystem.
#[derive(Debug, Error, Diagnostic)]
pub enum OracleError {
    #[error("oracle is not available at {url}")]
    #[diagnostic(
        code(pulmo::oracle::unavailable),
        help("Start Ollama with `ollama serve`, or point --ollama-url at a running instance.")
    )]
    Unavailable { url: String },

    #[error("oracle request failed: {message}")]
    #[diagnostic(
        code(pulmo::oracle::request_failed),
        help("Check that Ollama is running and the model is pulled (`ollama pull <model>`).")
    )]
    RequestFailed { message: String },

    #[error("failed to parse oracle response: {message}")]
    #[diagnostic(
        code(pulmo::oracle::parse_error),
        help("The model server returned an unexpected response format.")
    )]
    ParseError { message: String },

    #[error("oracle request timed out after {timeout_secs}s")]
    #[diagnostic(
        code(pulmo::oracle::timeout),
        help("Increase `timeout_secs` in the [oracle] config section or use a smaller model.")
    )]
    Timeout { timeout_secs: u64 },
}

/// Result type for oracle calls.
pub type OracleResult<T> = std::result::Result<T, OracleError>;

/// One prompt in, one completion out. Blocking and not retried.
pub trait TextOracle: Send + Sync {
    fn complete(&self, prompt: &str) -> OracleResult<String>;
}

impl<F> TextOracle for F
where
    F: Fn(&str) -> OracleResult<String> + Send + Sync,
{
    fn complete(&self, prompt: &str) -> OracleResult<String> {
        self(prompt)
    }
}

/// The text following the last occurrence of `marker` in a prompt, up to the
/// end of that line. Templates put the per-call input there.
pub fn last_input<'a>(prompt: &'a str, marker: &str) -> Option<&'a str> {
    let start = prompt.rfind(marker)? + marker.len();
    let rest = &prompt[start..];
    Some(rest.lines().next().unwrap_or("").trim())
}
