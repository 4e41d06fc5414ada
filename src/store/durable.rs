//! ACID-durable custom fact store backed by redb.
//!
//! The custom set lives in a single table keyed by a `u64` insertion sequence,
//! each value a bincode-encoded [`Fact`]. A missing table means no custom set
//! exists; an existing table with no rows is an empty custom set.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition, TableError};

use crate::error::{StoreError, StoreResult};
use crate::fact::Fact;
use crate::store::{CustomFactStore, StoreState};

/// Custom facts by insertion sequence.
const FACTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("custom_facts");

/// File name of the database inside the data directory.
pub const DB_FILE: &str = "pulmo-nesy.redb";

fn redb_err(op: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Redb {
        message: format!("{op} failed: {e}"),
    }
}

/// Custom fact store using redb.
///
/// Every mutation is one write transaction; reads use MVCC snapshots.
pub struct DurableFactStore {
    db: Arc<Database>,
}

impl DurableFactStore {
    /// Open or create the store in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join(DB_FILE);
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;
        tracing::debug!(path = %db_path.display(), "opened custom fact store");
        Ok(Self { db: Arc::new(db) })
    }

    fn read_all(&self) -> StoreResult<Option<Vec<Fact>>> {
        let txn = self.db.begin_read().map_err(|e| redb_err("begin_read", e))?;
        let table = match txn.open_table(FACTS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(redb_err("open_table", e)),
        };
        let mut facts = Vec::new();
        for entry in table.iter().map_err(|e| redb_err("iter", e))? {
            let (_, value) = entry.map_err(|e| redb_err("iter", e))?;
            let fact: Fact =
                bincode::deserialize(value.value()).map_err(|e| StoreError::Serialization {
                    message: format!("failed to decode stored fact: {e}"),
                })?;
            facts.push(fact);
        }
        Ok(Some(facts))
    }

    fn write(&self, facts: &[Fact], truncate: bool) -> StoreResult<()> {
        let encoded = facts
            .iter()
            .map(|f| {
                bincode::serialize(f).map_err(|e| StoreError::Serialization {
                    message: format!("failed to encode fact {}: {e}", f.id),
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let txn = self.db.begin_write().map_err(|e| redb_err("begin_write", e))?;
        if truncate {
            txn.delete_table(FACTS_TABLE)
                .map_err(|e| redb_err("delete_table", e))?;
        }
        {
            let mut table = txn
                .open_table(FACTS_TABLE)
                .map_err(|e| redb_err("open_table", e))?;
            let mut next = match table.last().map_err(|e| redb_err("last", e))? {
                Some((key, _)) => key.value() + 1,
                None => 0,
            };
            for bytes in &encoded {
                table
                    .insert(next, bytes.as_slice())
                    .map_err(|e| redb_err("insert", e))?;
                next += 1;
            }
        }
        txn.commit().map_err(|e| redb_err("commit", e))?;
        Ok(())
    }
}

impl CustomFactStore for DurableFactStore {
    fn state(&self) -> StoreResult<StoreState> {
        Ok(match self.read_all()? {
            None => StoreState::Absent,
            Some(f) if f.is_empty() => StoreState::Empty,
            Some(f) => StoreState::Populated(f.len()),
        })
    }

    fn load(&self) -> StoreResult<Option<Vec<Fact>>> {
        self.read_all()
    }

    fn replace(&self, facts: &[Fact]) -> StoreResult<()> {
        self.write(facts, true)
    }

    fn append(&self, facts: &[Fact]) -> StoreResult<()> {
        self.write(facts, false)
    }

    fn remove(&self) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(|e| redb_err("begin_write", e))?;
        let existed = txn
            .delete_table(FACTS_TABLE)
            .map_err(|e| redb_err("delete_table", e))?;
        txn.commit().map_err(|e| redb_err("commit", e))?;
        Ok(existed)
    }
}

impl std::fmt::Debug for DurableFactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableFactStore").finish()
    }
}
