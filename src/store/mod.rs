//! Persistence for the custom fact overlay.
//!
//! Two backends implement [`CustomFactStore`]:
//!
//! - [`MemFactStore`] keeps the overlay in process memory (tests, memory-only runs)
//! - [`DurableFactStore`] keeps it in a redb database so it survives restarts
//!
//! Rules and the default fact set are never persisted; they are compiled in.

pub mod durable;
pub mod mem;

pub use durable::DurableFactStore;
pub use mem::MemFactStore;

use crate::error::StoreResult;
use crate::fact::Fact;

/// What the store currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// No custom set has ever been written, or it was removed.
    Absent,
    /// A custom set exists but holds no facts.
    Empty,
    /// A custom set with this many facts.
    Populated(usize),
}

impl StoreState {
    /// Whether a custom set exists at all (empty or not).
    pub fn is_present(self) -> bool {
        !matches!(self, StoreState::Absent)
    }
}

/// Storage for the single custom fact set.
///
/// Implementations must make each mutating call atomic: after an error the
/// stored set is the one that existed before the call.
pub trait CustomFactStore: Send + Sync {
    fn state(&self) -> StoreResult<StoreState>;

    /// The persisted facts in insertion order, or `None` when absent.
    fn load(&self) -> StoreResult<Option<Vec<Fact>>>;

    /// Make `facts` the sole custom set.
    fn replace(&self, facts: &[Fact]) -> StoreResult<()>;

    /// Append to the custom set, creating it when absent.
    fn append(&self, facts: &[Fact]) -> StoreResult<()>;

    /// Delete the custom set. Returns whether one existed.
    fn remove(&self) -> StoreResult<bool>;
}

impl<T: CustomFactStore + ?Sized> CustomFactStore for std::sync::Arc<T> {
    fn state(&self) -> StoreResult<StoreState> {
        (**self).state()
    }

    fn load(&self) -> StoreResult<Option<Vec<Fact>>> {
        (**self).load()
    }

    fn replace(&self, facts: &[Fact]) -> StoreResult<()> {
        (**self).replace(facts)
    }

    fn append(&self, facts: &[Fact]) -> StoreResult<()> {
        (**self).append(facts)
    }

    fn remove(&self) -> StoreResult<bool> {
        (**self).remove()
    }
}
