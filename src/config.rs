//! Runtime configuration, persisted as TOML.
//!
//! ```toml
//! [oracle]
//! base_url = "http://localhost:11434"
//! model = "llama3.2"
//! timeout_secs = 120
//!
//! [store]
//! data_dir = "/var/lib/pulmo-nesy"   # omit for a memory-only custom fact set
//! ```

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::PulmoResult;
use crate::kb::{KbSources, KnowledgeBaseManager};
use crate::oracle::OllamaConfig;
use crate::paths::ensure_dir;
use crate::reason::chaining::ChainingEngineFactory;
use crate::store::{CustomFactStore, DurableFactStore, MemFactStore};

/// Errors from loading configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(pulmo::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(pulmo::config::parse),
        help("Check the TOML syntax. Known sections are [oracle] and [store].")
    )]
    Parse { path: String, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Where the custom fact set lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the redb database; `None` keeps custom facts in memory.
    pub data_dir: Option<PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PulmoConfig {
    pub oracle: OllamaConfig,
    pub store: StoreConfig,
}

impl PulmoConfig {
    /// Parse TOML text; `origin` names the source in errors.
    pub fn from_toml(text: &str, origin: &str) -> ConfigResult<Self> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Load a file that must exist.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content, &path.display().to_string())
    }

    /// Load a file if present, defaults otherwise. A present but malformed file is an error.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Open the custom fact store this configuration selects.
    pub fn open_store(&self) -> PulmoResult<Box<dyn CustomFactStore>> {
        match &self.store.data_dir {
            Some(dir) => {
                ensure_dir(dir)?;
                tracing::info!(data_dir = %dir.display(), "using durable custom fact store");
                Ok(Box::new(DurableFactStore::open(dir)?))
            }
            None => {
                tracing::info!("using memory-only custom fact store");
                Ok(Box::new(MemFactStore::new()))
            }
        }
    }

    /// Open the knowledge base over the bundled sources, this configuration's
    /// store and the built-in chaining engine.
    pub fn open_knowledge_base(&self) -> PulmoResult<KnowledgeBaseManager> {
        Ok(KnowledgeBaseManager::open(
            KbSources::bundled()?,
            self.open_store()?,
            Box::new(ChainingEngineFactory),
        )?)
    }
}
