//! In-memory custom fact store.
//!
//! All data is lost on process exit.

use std::sync::RwLock;

use crate::error::StoreResult;
use crate::fact::Fact;
use crate::store::{CustomFactStore, StoreState};

/// Custom fact set held behind a lock.
#[derive(Debug, Default)]
pub struct MemFactStore {
    facts: RwLock<Option<Vec<Fact>>>,
}

impl MemFactStore {
    /// Create an empty (absent) store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `facts`, as if persisted by an earlier run.
    pub fn with_facts(facts: Vec<Fact>) -> Self {
        Self {
            facts: RwLock::new(Some(facts)),
        }
    }
}

impl CustomFactStore for MemFactStore {
    fn state(&self) -> StoreResult<StoreState> {
        let guard = self.facts.read().expect("fact store lock poisoned");
        Ok(match guard.as_ref() {
            None => StoreState::Absent,
            Some(f) if f.is_empty() => StoreState::Empty,
            Some(f) => StoreState::Populated(f.len()),
        })
    }

    fn load(&self) -> StoreResult<Option<Vec<Fact>>> {
        Ok(self.facts.read().expect("fact store lock poisoned").clone())
    }

    fn replace(&self, facts: &[Fact]) -> StoreResult<()> {
        *self.facts.write().expect("fact store lock poisoned") = Some(facts.to_vec());
        Ok(())
    }

    fn append(&self, facts: &[Fact]) -> StoreResult<()> {
        self.facts
            .write()
            .expect("fact store lock poisoned")
            .get_or_insert_with(Vec::new)
            .extend_from_slice(facts);
        Ok(())
    }

    fn remove(&self) -> StoreResult<bool> {
        Ok(self
            .facts
            .write()
            .expect("fact store lock poisoned")
            .take()
            .is_some())
    }
}
