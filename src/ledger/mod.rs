//! Durable tracking of submitted job batches.
//!
//! One suite submission produces several dispatcher job IDs; the first one is
//! the batch's primary ID and the lookup key for everything that follows. Two
//! interchangeable backends implement the same contract: an append-only flat
//! file per machine and a SQLite store. The ledger is a convenience cache of
//! dispatcher-assigned state, not a source of truth: every read failure
//! degrades to a safe fallback instead of aborting the command.

pub mod file;
pub mod sqlite;

use anyhow::Result;

use crate::config::{Config, LedgerBackend};

pub trait JobLedger {
    /// Record one batch for a machine. The first ID is the primary ID; an
    /// empty batch is a logged no-op.
    fn record_batch(&self, machine: &str, jobs: &[i64], metadata: Option<&str>) -> Result<()>;

    /// Expand a primary ID into its batch.
    ///
    /// With `batch` false this always returns `[primary]`, whatever the
    /// ledger holds. With `batch` true it returns the most recently recorded
    /// batch for `(machine, primary)`, or `[primary]` when nothing is found
    /// or the ledger cannot be read.
    fn expand_batch(&self, machine: &str, primary: i64, batch: bool) -> Vec<i64>;

    /// Every primary ID recorded for the machine, in creation order. Empty
    /// when nothing is recorded or the ledger cannot be read.
    fn list_primary_ids(&self, machine: &str) -> Vec<i64>;
}

/// Open the backend selected in the tool configuration.
pub fn open(config: &Config) -> Box<dyn JobLedger> {
    match config.system.ledger {
        LedgerBackend::File => Box::new(file::FileLedger::new(&config.system.jobfiles_path)),
        LedgerBackend::Sqlite => Box::new(sqlite::SqliteLedger::new(&config.system.database_path)),
    }
}
