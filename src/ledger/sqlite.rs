//! SQLite ledger backend.
//!
//! Two tables: `batches` holds one row per submission (externally visible
//! primary job ID, machine, creation timestamp, optional metadata) and
//! `batch_jobs` holds the ordered member IDs. Connections are opened per
//! operation and writes run in a transaction that rolls back on failure.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use log::{debug, error};
use rusqlite::{Connection, params};

use super::JobLedger;

pub struct SqliteLedger {
    path: PathBuf,
}

impl SqliteLedger {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let conn = Connection::open(&self.path)
            .with_context(|| format!("cannot open database {}", self.path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS batches (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 primary_job_id INTEGER NOT NULL,
                 machine TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 metadata TEXT
             );
             CREATE TABLE IF NOT EXISTS batch_jobs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 batch_id INTEGER NOT NULL,
                 job_id INTEGER NOT NULL,
                 FOREIGN KEY (batch_id) REFERENCES batches(id)
             );
             CREATE INDEX IF NOT EXISTS idx_batches_machine ON batches(machine);
             CREATE INDEX IF NOT EXISTS idx_batches_primary ON batches(primary_job_id);",
        )
        .context("cannot initialize ledger schema")?;
        Ok(conn)
    }

    fn expand_inner(&self, machine: &str, primary: i64) -> Result<Option<Vec<i64>>> {
        let conn = self.connect()?;

        let batch_pk: Option<i64> = conn
            .query_row(
                "SELECT id FROM batches
                 WHERE machine = ?1 AND primary_job_id = ?2
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
                params![machine, primary],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some(batch_pk) = batch_pk else {
            debug!("no batch found for machine {machine} with primary id {primary}");
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT job_id FROM batch_jobs WHERE batch_id = ?1 ORDER BY id")?;
        let jobs: Vec<i64> = stmt
            .query_map(params![batch_pk], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        Ok(if jobs.is_empty() { None } else { Some(jobs) })
    }

    fn list_inner(&self, machine: &str) -> Result<Vec<i64>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT primary_job_id FROM batches WHERE machine = ?1 ORDER BY created_at, id",
        )?;
        let ids: Vec<i64> = stmt
            .query_map(params![machine], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }
}

impl JobLedger for SqliteLedger {
    fn record_batch(&self, machine: &str, jobs: &[i64], metadata: Option<&str>) -> Result<()> {
        if jobs.is_empty() {
            debug!("no jobs to record for {machine}");
            return Ok(());
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction().context("cannot begin transaction")?;

        tx.execute(
            "INSERT INTO batches (primary_job_id, machine, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4)",
            params![jobs[0], machine, chrono::Utc::now().to_rfc3339(), metadata],
        )?;
        let batch_pk = tx.last_insert_rowid();

        for job_id in jobs {
            tx.execute(
                "INSERT INTO batch_jobs (batch_id, job_id) VALUES (?1, ?2)",
                params![batch_pk, job_id],
            )?;
        }

        tx.commit().context("cannot commit batch record")?;
        debug!(
            "recorded batch {} with {} jobs for {machine}",
            jobs[0],
            jobs.len()
        );
        Ok(())
    }

    fn expand_batch(&self, machine: &str, primary: i64, batch: bool) -> Vec<i64> {
        if !batch {
            return vec![primary];
        }
        if !self.path.exists() {
            debug!("ledger database not found at {}", self.path.display());
            return vec![primary];
        }

        match self.expand_inner(machine, primary) {
            Ok(Some(jobs)) => jobs,
            Ok(None) => vec![primary],
            Err(err) => {
                error!("error reading batch from database: {err:#}");
                vec![primary]
            }
        }
    }

    fn list_primary_ids(&self, machine: &str) -> Vec<i64> {
        if !self.path.exists() {
            debug!("ledger database not found at {}", self.path.display());
            return Vec::new();
        }

        match self.list_inner(machine) {
            Ok(ids) => ids,
            Err(err) => {
                error!("error reading job list from database: {err:#}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (tempfile::TempDir, SqliteLedger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SqliteLedger::new(&dir.path().join("jobs.db"));
        (dir, ledger)
    }

    #[test]
    fn records_and_expands_a_batch() {
        let (_dir, ledger) = ledger();

        ledger.record_batch("bbb", &[10, 11, 12], None).unwrap();
        assert_eq!(ledger.expand_batch("bbb", 10, true), vec![10, 11, 12]);
    }

    #[test]
    fn non_batch_mode_ignores_ledger_contents() {
        let (_dir, ledger) = ledger();

        ledger.record_batch("bbb", &[10, 11, 12], None).unwrap();
        assert_eq!(ledger.expand_batch("bbb", 10, false), vec![10]);
    }

    #[test]
    fn unknown_primary_falls_back_to_requested_id() {
        let (_dir, ledger) = ledger();

        ledger.record_batch("bbb", &[10, 11], None).unwrap();
        assert_eq!(ledger.expand_batch("bbb", 77, true), vec![77]);
        // Same primary, different machine.
        assert_eq!(ledger.expand_batch("other", 10, true), vec![10]);
    }

    #[test]
    fn missing_database_degrades_to_fallbacks() {
        let (_dir, ledger) = ledger();

        assert_eq!(ledger.expand_batch("bbb", 42, true), vec![42]);
        assert!(ledger.list_primary_ids("bbb").is_empty());
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let (_dir, ledger) = ledger();

        ledger.record_batch("bbb", &[], None).unwrap();
        assert!(ledger.list_primary_ids("bbb").is_empty());
    }

    #[test]
    fn most_recent_batch_wins_for_reused_primaries() {
        let (_dir, ledger) = ledger();

        ledger.record_batch("bbb", &[10, 11], None).unwrap();
        ledger.record_batch("bbb", &[10, 20, 21], None).unwrap();
        assert_eq!(ledger.expand_batch("bbb", 10, true), vec![10, 20, 21]);
    }

    #[test]
    fn lists_primaries_in_creation_order() {
        let (_dir, ledger) = ledger();

        ledger.record_batch("bbb", &[10, 11], Some("v6.1-rt")).unwrap();
        ledger.record_batch("bbb", &[30], None).unwrap();
        ledger.record_batch("other", &[50], None).unwrap();

        assert_eq!(ledger.list_primary_ids("bbb"), vec![10, 30]);
        assert_eq!(ledger.list_primary_ids("other"), vec![50]);
    }
}
