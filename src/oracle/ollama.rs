//! Ollama client for the `/api/generate` endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::oracle::{OracleError, OracleResult, TextOracle};

/// Configuration for the Ollama client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    pub base_url: String,
    /// Model name to use.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            timeout_secs: 120,
        }
    }
}

/// Text oracle backed by a local Ollama server.
pub struct OllamaOracle {
    config: OllamaConfig,
    agent: ureq::Agent,
}

impl OllamaOracle {
    pub fn new(config: OllamaConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self { config, agent }
    }

    /// Check that the server answers and has the configured model.
    ///
    /// Sends a lightweight request to `/api/tags`.
    pub fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();
        let Ok(resp) = agent.get(&url).call() else {
            return false;
        };
        let Ok(json) = resp.into_json::<serde_json::Value>() else {
            return false;
        };
        let target = &self.config.model;
        json["models"]
            .as_array()
            .map(|models| {
                models.iter().filter_map(|m| m["name"].as_str()).any(|name| {
                    name == target || name.split(':').next() == Some(target.as_str())
                })
            })
            .unwrap_or(false)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn map_transport(&self, e: ureq::Error) -> OracleError {
        match e {
            ureq::Error::Status(code, _) => OracleError::RequestFailed {
                message: format!("server returned status {code}"),
            },
            ureq::Error::Transport(t) => match t.kind() {
                ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Dns => {
                    OracleError::Unavailable {
                        url: self.config.base_url.clone(),
                    }
                }
                _ if t.to_string().contains("timed out") => OracleError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                },
                _ => OracleError::RequestFailed {
                    message: t.to_string(),
                },
            },
        }
    }
}

impl TextOracle for OllamaOracle {
    fn complete(&self, prompt: &str) -> OracleResult<String> {
        let url = format!("{}/api/generate", self.config.base_url);
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
        });

        let resp = self
            .agent
            .post(&url)
            .send_json(body)
            .map_err(|e| self.map_transport(e))?;

        let json: serde_json::Value = resp.into_json().map_err(|e| OracleError::ParseError {
            message: e.to_string(),
        })?;

        let text = json["response"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| OracleError::ParseError {
                message: "missing 'response' field".into(),
            })?;
        tracing::debug!(model = %self.config.model, chars = text.len(), "oracle completion");
        Ok(text)
    }
}

impl std::fmt::Debug for OllamaOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaOracle")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}
