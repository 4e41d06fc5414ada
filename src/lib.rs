// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # pulmo-nesy
//!
//! A neuro-symbolic query router for respiratory medicine. Natural-language
//! questions are classified, and deductive ones are translated into formal
//! queries, proved by a chaining engine over clinical facts and rules, and
//! explained from the resulting proof traces.
//!
//! ## Architecture
//!
//! - **Facts** (`fact`, `formal`): typed clinical facts in a closed vocabulary
//! - **Knowledge base** (`kb`, `store`): default facts plus a persisted custom overlay,
//!   rebuilt copy-on-write per generation
//! - **Reasoning** (`reason`): engine capability trait and the built-in chaining engine
//! - **Oracle stages** (`classify`, `ingest`, `translate`, `interpret`, `describe`):
//!   deterministic code around a pluggable text oracle
//! - **Routing** (`router`): commands, symbolic and descriptive branches
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pulmo_nesy::kb::{KbSources, KnowledgeBaseManager};
//! use pulmo_nesy::oracle::{OllamaConfig, OllamaOracle};
//! use pulmo_nesy::reason::chaining::ChainingEngineFactory;
//! use pulmo_nesy::router::Router;
//! use pulmo_nesy::store::MemFactStore;
//!
//! let kb = KnowledgeBaseManager::open(
//!     KbSources::bundled().unwrap(),
//!     Box::new(MemFactStore::new()),
//!     Box::new(ChainingEngineFactory),
//! )
//! .unwrap();
//! let oracle = Arc::new(OllamaOracle::new(OllamaConfig::default()));
//! let router = Router::new(Arc::new(kb), oracle);
//! let response = router.handle("Who is diagnosed with copd?").unwrap();
//! println!("[{}] {}", response.source, response.text);
//! ```

pub mod classify;
pub mod config;
pub mod describe;
pub mod error;
pub mod fact;
pub mod formal;
pub mod ingest;
pub mod interpret;
pub mod kb;
pub mod oracle;
pub mod paths;
pub mod reason;
pub mod router;
pub mod store;
pub mod translate;
