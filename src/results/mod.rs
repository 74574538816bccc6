//! Result fetching, classification and comparison.
//!
//! The dispatcher's raw result payload is a YAML sequence of test records.
//! Parsing is deliberately tolerant: a record missing a field yields defaults
//! instead of aborting the whole listing, because a single malformed record
//! must not hide an otherwise readable report. Classification applies the
//! per-suite policy from the board context; records are never persisted.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use log::{debug, error};
use serde_yaml::Value;

use crate::config::SuitesConfig;
use crate::template::JobContext;

const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const RESET: &str = "\x1b[0m";

/// One parsed test record from a dispatcher result listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub job: i64,
    pub suite: String,
    pub name: String,
    /// Raw pass/fail flag as reported by the dispatcher.
    pub passed: bool,
    pub measurement: f64,
    /// Download URL carried by structured attachment records.
    pub attachment: Option<String>,
}

/// Comparison output row, ordered by the first listing's record order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareRow {
    pub suite: String,
    pub name: String,
    pub a: f64,
    pub b: f64,
    /// Percentage delta `(a - b) / b * 100`; exactly `0.0` when `b` is zero.
    pub delta: f64,
}

fn text(entry: &Value, key: &str) -> String {
    entry
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn measurement(entry: &Value) -> f64 {
    match entry.get("measurement") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_else(|err| {
            debug!("could not parse measurement `{s}`: {err}");
            0.0
        }),
        _ => 0.0,
    }
}

/// Parse one job's raw result payload. A payload that is not a YAML sequence
/// yields an empty listing with an error log.
pub fn parse_records(job: i64, raw: &str) -> Vec<ResultRecord> {
    let entries: Vec<Value> = match serde_yaml::from_str(raw) {
        Ok(entries) => entries,
        Err(err) => {
            error!("YAML error in job result for job {job}: {err}");
            return Vec::new();
        }
    };

    entries
        .iter()
        .map(|entry| {
            let name = text(entry, "name");
            let attachment = if name == "test-attachment" {
                entry
                    .get("metadata")
                    .and_then(|m| m.get("reference"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            } else {
                None
            };
            ResultRecord {
                job,
                suite: text(entry, "suite"),
                name,
                passed: text(entry, "result") == "pass",
                measurement: measurement(entry),
                attachment,
            }
        })
        .collect()
}

/// Classify a record for display: `Some(passed)` to show it, `None` to hide.
///
/// Latency-sensitive suites are checked against the board's maximum-latency
/// threshold: a `*max-latency` record measuring at or above the threshold is
/// forced to fail even when the dispatcher reported a pass (a missing
/// threshold reads as `-1`, so such records always fail until one is
/// configured). Standard suites trust the raw flag. Records from unknown
/// suites surface only when they failed, so nothing silently disappears.
pub fn classify(record: &ResultRecord, ctx: &JobContext, suites: &SuitesConfig) -> Option<bool> {
    if suites.rt.contains(&record.suite) {
        let threshold = ctx.max_latency(&record.suite);
        let mut passed = record.passed;
        if record.name.ends_with("max-latency") && record.measurement >= threshold as f64 {
            passed = false;
        }
        Some(passed)
    } else if suites.standard.contains(&record.suite) {
        Some(record.passed)
    } else if !record.passed {
        Some(false)
    } else {
        None
    }
}

fn colored(passed: bool) -> String {
    if passed {
        format!("{GREEN}pass{RESET}")
    } else {
        format!("{RED}fail{RESET}")
    }
}

/// Print a result listing, applying the classification policy per record.
pub fn print_records(records: &[ResultRecord], ctx: &JobContext, suites: &SuitesConfig) {
    if records.is_empty() {
        return;
    }
    for record in records {
        let Some(passed) = classify(record, ctx, suites) else {
            continue;
        };
        println!(
            "  {:5} {:20} {:20}: {} {:>10.2}",
            record.job,
            record.suite,
            record.name,
            colored(passed),
            record.measurement
        );
    }
}

/// Keep only records from suites the classification policy knows about.
pub fn known_records(records: Vec<ResultRecord>, suites: &SuitesConfig) -> Vec<ResultRecord> {
    records
        .into_iter()
        .filter(|r| suites.rt.contains(&r.suite) || suites.standard.contains(&r.suite))
        .collect()
}

/// Compare two result listings by (suite, test name).
///
/// Rows follow `a`'s order; a record with no counterpart in `b` is skipped;
/// duplicates in `b` resolve to the first match.
pub fn compare(a: &[ResultRecord], b: &[ResultRecord]) -> Vec<CompareRow> {
    a.iter()
        .filter_map(|rec| {
            let other = b
                .iter()
                .find(|o| o.suite == rec.suite && o.name == rec.name)?;
            let delta = if other.measurement == 0.0 {
                0.0
            } else {
                (rec.measurement - other.measurement) / other.measurement * 100.0
            };
            Some(CompareRow {
                suite: rec.suite.clone(),
                name: rec.name.clone(),
                a: rec.measurement,
                b: other.measurement,
                delta,
            })
        })
        .collect()
}

pub fn print_comparison(rows: &[CompareRow]) {
    for row in rows {
        println!(
            "  {:20} {:20}: {:>10.2} {:>10.2} {:>+9.2}%",
            row.suite, row.name, row.a, row.b, row.delta
        );
    }
}

/// Archive path for a downloaded attachment: the suite directory drops the
/// ordering prefix (`1_rt-tests` becomes `rt-tests`).
fn attachment_path(result_path: &Path, host: &str, release: &str, record: &ResultRecord) -> PathBuf {
    let suite = record.suite.get(2..).unwrap_or(&record.suite);
    result_path
        .join(host)
        .join(release)
        .join(suite)
        .join(record.job.to_string())
        .join(format!("{suite}.json"))
}

/// Download one attachment into the result archive, namespaced by host and
/// the kernel release reported inside the attachment itself.
pub async fn download_attachment(
    record: &ResultRecord,
    host: &str,
    result_path: &Path,
) -> Result<PathBuf> {
    let url = record
        .attachment
        .as_deref()
        .context("record carries no attachment reference")?;

    let body = reqwest::get(url)
        .await
        .and_then(reqwest::Response::error_for_status)
        .with_context(|| format!("cannot fetch attachment {url}"))?
        .text()
        .await
        .with_context(|| format!("cannot read attachment {url}"))?;

    let data: serde_json::Value =
        serde_json::from_str(&body).with_context(|| format!("attachment {url} is not JSON"))?;
    let release = data["sysinfo"]["release"]
        .as_str()
        .context("attachment carries no sysinfo.release")?;

    let path = attachment_path(result_path, host, release, record);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    std::fs::write(&path, &body).with_context(|| format!("cannot write {}", path.display()))?;
    Ok(path)
}
