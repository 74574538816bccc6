//! Flat-file ledger backend.
//!
//! One file per machine under the jobfiles directory, one line per batch:
//!
//! ```text
//! <primaryId>: <jobId> <jobId> ...
//! ```
//!
//! The format stays append-friendly and human-greppable; the file is opened
//! and closed per operation and never locked, so concurrent writers from
//! separate processes may interleave (an accepted limitation).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use log::{debug, error};

use super::JobLedger;

pub struct FileLedger {
    dir: PathBuf,
}

impl FileLedger {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn ledger_path(&self, machine: &str) -> PathBuf {
        self.dir.join(format!("{machine}.jobs"))
    }

    /// Parse one ledger line into (primary, batch). Malformed lines yield
    /// `None` and are skipped by the callers.
    fn parse_line(line: &str) -> Option<(i64, Vec<i64>)> {
        let (primary, rest) = line.split_once(':')?;
        let primary: i64 = primary.trim().parse().ok()?;
        let jobs: Vec<i64> = rest
            .split_whitespace()
            .filter_map(|id| id.parse().ok())
            .collect();
        Some((primary, jobs))
    }
}

impl JobLedger for FileLedger {
    fn record_batch(&self, machine: &str, jobs: &[i64], _metadata: Option<&str>) -> Result<()> {
        if jobs.is_empty() {
            debug!("no jobs to record for {machine}");
            return Ok(());
        }

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create {}", self.dir.display()))?;
        let path = self.ledger_path(machine);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("cannot open ledger {}", path.display()))?;

        let ids: Vec<String> = jobs.iter().map(i64::to_string).collect();
        writeln!(file, "{}: {}", jobs[0], ids.join(" "))
            .with_context(|| format!("cannot append to ledger {}", path.display()))?;

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

        let path = self.ledger_path(machine);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                error!("error reading ledger {}: {err}", path.display());
                return vec![primary];
            }
        };

        // Primary IDs may recur across long time spans; the last recorded
        // batch wins.
        let mut found = None;
        for line in content.lines() {
            match Self::parse_line(line) {
                Some((id, jobs)) if id == primary && !jobs.is_empty() => found = Some(jobs),
                Some(_) => {}
                None => debug!("skipping malformed ledger line: {line}"),
            }
        }

        found.unwrap_or_else(|| vec![primary])
    }

    fn list_primary_ids(&self, machine: &str) -> Vec<i64> {
        let path = self.ledger_path(machine);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                error!("error reading ledger {}: {err}", path.display());
                return Vec::new();
            }
        };

        content
            .lines()
            .filter_map(Self::parse_line)
            .map(|(primary, _)| primary)
            .collect()
    }
}
