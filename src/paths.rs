//! XDG-compliant path resolution for pulmo-nesy.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

const APP_DIR: &str = "pulmo-nesy";

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(pulmo::paths::no_home),
        help("Set the HOME environment variable or pass --config and --data-dir explicitly.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(pulmo::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global XDG directories for pulmo-nesy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulmoPaths {
    /// `$XDG_CONFIG_HOME/pulmo-nesy/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/pulmo-nesy/`
    pub data_dir: PathBuf,
}

impl PulmoPaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| PathError::NoHome)?;
        Ok(Self::from_env(
            &home,
            std::env::var("XDG_CONFIG_HOME").ok(),
            std::env::var("XDG_DATA_HOME").ok(),
        ))
    }

    fn from_env(home: &Path, config_home: Option<String>, data_home: Option<String>) -> Self {
        let config_dir = config_home
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".config"))
            .join(APP_DIR);
        let data_dir = data_home
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".local/share"))
            .join(APP_DIR);
        Self {
            config_dir,
            data_dir,
        }
    }

    /// Path to the global config file.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}

/// Create `dir` and its parents. Idempotent.
pub fn ensure_dir(dir: &Path) -> PathResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
        path: dir.display().to_string(),
        source: e,
    })
}
