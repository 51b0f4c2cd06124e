//! Shared registry of open databases.
//!
//! Opening a database maps its slab into memory, so callers that touch many
//! databases (a collector daemon, a graphing frontend) should not open and
//! close them per operation. A [`DbPool`] keeps up to `capacity` databases
//! open and hands out reference-counted handles:
//!
//! - [`DbPool::acquire`] opens the database on first use and returns a
//!   [`PooledDb`]; further acquires of the same path share the open instance.
//! - [`DbPool::release`] gives a handle back. When the last holder releases,
//!   the database is flushed to disk and kept cached for the next acquire.
//! - A full pool evicts one cached idle database to make room; when every
//!   entry is still held, acquire fails with
//!   [`PoolError::CapacityExceeded`](crate::error::PoolError).
//!
//! The library core does no locking of its own; all cross-thread policy
//! lives here. Handles expose the database through a [`RwLock`], so fetches
//! can run concurrently while updates take the lock exclusively.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use gyre::DbPool;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = DbPool::new(64);
//!
//! let handle = pool.acquire("/var/lib/metrics/router1")?;
//! let now = 1_700_000_000;
//! if let Ok(mut db) = handle.database().write() {
//!     db.update("octets_in", now, 918_273.0)?;
//! }
//! pool.release(&handle)?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::db::Database;
use crate::error::{PoolError, Result};

/// One open database plus the number of handles currently out.
struct PoolEntry {
    db: Arc<RwLock<Database>>,
    holders: usize,
}

/// Handle to a pooled database.
///
/// The handle keeps the database marked busy until it is given back with
/// [`DbPool::release`]. Dropping a handle without releasing it leaves the
/// entry busy forever, which eventually starves the pool.
#[derive(Debug)]
pub struct PooledDb {
    key: String,
    db: Arc<RwLock<Database>>,
}

impl PooledDb {
    /// The shared database behind this handle.
    ///
    /// Take the lock for reading to fetch and for writing to update.
    pub fn database(&self) -> &Arc<RwLock<Database>> {
        &self.db
    }

    /// The path this handle was acquired under.
    pub fn path(&self) -> &str {
        &self.key
    }
}

/// Bounded registry of open databases keyed by path.
///
/// # Thread Safety
///
/// The pool itself is `Send + Sync`; share it behind an `Arc` and call
/// [`DbPool::acquire`] from any thread. Each database is wrapped in its own
/// [`RwLock`], so operations on different databases never contend.
pub struct DbPool {
    capacity: usize,
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl DbPool {
    /// Creates a pool that keeps at most `capacity` databases open.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Opens or reuses the database at `path` and returns a handle to it.
    ///
    /// An already-pooled path shares its open instance. A new path opens the
    /// database, evicting one cached idle entry if the pool is full.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::CapacityExceeded`](crate::error::PoolError) when
    /// the pool is full and every entry is still held, or the underlying
    /// [`Database::open`] error for the first acquire of a path.
    pub fn acquire<P: AsRef<Path>>(&self, path: P) -> Result<PooledDb> {
        let key = path.as_ref().display().to_string();
        let mut entries = self.registry();

        if let Some(entry) = entries.get_mut(&key) {
            entry.holders += 1;
            return Ok(PooledDb {
                key,
                db: Arc::clone(&entry.db),
            });
        }

        if entries.len() >= self.capacity {
            // Idle entries were flushed at their last release, so dropping
            // one here loses nothing
            let idle = entries
                .iter()
                .find(|(_, entry)| entry.holders == 0)
                .map(|(key, _)| key.clone());
            match idle {
                Some(idle) => {
                    entries.remove(&idle);
                }
                None => {
                    return Err(PoolError::CapacityExceeded {
                        capacity: self.capacity,
                    }
                    .into());
                }
            }
        }

        let db = Arc::new(RwLock::new(Database::open(path)?));
        entries.insert(
            key.clone(),
            PoolEntry {
                db: Arc::clone(&db),
                holders: 1,
            },
        );
        Ok(PooledDb { key, db })
    }

    /// Gives a handle back to the pool.
    ///
    /// When the last holder of a database releases it, the database is
    /// flushed to disk and stays cached for the next acquire.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotPooled`](crate::error::PoolError) when the
    /// handle does not belong to this pool, or the flush error when the
    /// final release fails to sync.
    pub fn release(&self, handle: &PooledDb) -> Result<()> {
        let mut entries = self.registry();
        let Some(entry) = entries.get_mut(&handle.key) else {
            return Err(PoolError::NotPooled {
                path: handle.key.clone(),
            }
            .into());
        };

        entry.holders = entry.holders.saturating_sub(1);
        if entry.holders == 0 {
            // A poisoned database saw a holder panic mid-write; skip the
            // flush and let the mapping flush when the entry drops
            if let Ok(db) = entry.db.read() {
                db.sync()?;
            }
        }
        Ok(())
    }

    /// Number of databases currently open in the pool, busy or idle.
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    /// Whether the pool holds no open databases.
    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    /// The configured maximum number of open databases.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Locks the registry, recovering it when a previous holder panicked.
    ///
    /// The map is only ever mutated in short sections that cannot leave it
    /// inconsistent, so a poisoned lock is still safe to reuse.
    fn registry(&self) -> MutexGuard<'_, HashMap<String, PoolEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
