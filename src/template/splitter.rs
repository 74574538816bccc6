//! Splitting one rendered job description into per-test job files.
//!
//! A suite template renders into a single job with several test definitions.
//! The dispatcher schedules whole jobs, so each definition is materialized as
//! its own job file with a timeout derived from the test's duration, and the
//! job-level timeouts are raised so the dispatcher never cuts a test short.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use log::debug;
use regex::Regex;
use serde_yaml::{Mapping, Value};

/// Extra seconds granted on top of a test's duration for boot and teardown.
const DURATION_SLACK_SECS: u64 = 120;

/// Extra minutes granted when raising the job-level timeouts.
const TIMEOUT_SLACK_MINS: u64 = 5;

/// Convert a duration string (`"30"`, `"5m"`, `"2h"`, `"1d"`) to seconds.
///
/// The leading digit run is the value; a `d`/`h`/`m` suffix scales it and any
/// other suffix means seconds.
pub fn parse_duration(string: &str) -> Result<u64> {
    let digits = Regex::new(r"^\d+").context("invalid duration pattern")?;
    let Some(value) = digits.find(string) else {
        bail!("duration `{string}` does not start with a number");
    };
    let seconds: u64 = value
        .as_str()
        .parse()
        .with_context(|| format!("duration `{string}` out of range"))?;

    Ok(match &string[value.end()..] {
        "d" => seconds * 24 * 60 * 60,
        "h" => seconds * 60 * 60,
        "m" => seconds * 60,
        _ => seconds,
    })
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

fn seconds_timeout(seconds: u64) -> Value {
    let mut map = Mapping::new();
    map.insert(key("seconds"), Value::Number(seconds.into()));
    Value::Mapping(map)
}

/// Index of the first action carrying a `test` block, falling back to 0.
fn find_test_index(job: &Value) -> usize {
    if let Some(actions) = job.get("actions").and_then(Value::as_sequence) {
        for (idx, action) in actions.iter().enumerate() {
            if action.get("test").is_some() {
                return idx;
            }
        }
    }
    0
}

/// Initial timeout before any test definition is examined.
///
/// Precedence: the job's own `timeouts.action` if present, else the test
/// block's declared `timeout`, else none. An external duration override
/// supersedes both (handled by the caller).
fn initial_timeout(job: &Value, idx: usize) -> Option<Value> {
    if let Some(action_to) = job.get("timeouts").and_then(|t| t.get("action")) {
        return Some(action_to.clone());
    }
    job.get("actions")
        .and_then(Value::as_sequence)
        .and_then(|actions| actions.get(idx))
        .and_then(|action| action.get("test"))
        .and_then(|test| test.get("timeout"))
        .cloned()
}

/// Raise `timeouts.{action,job,connection}` so each minute budget covers
/// `duration` seconds. Tolerant of a malformed timeouts tree: entries that do
/// not look like `{minutes: N}` are skipped silently.
fn bump_job_timeouts(job: &mut Value, duration: Option<u64>) {
    let Some(duration) = duration else { return };
    let mins = duration / 60 + TIMEOUT_SLACK_MINS;

    let Some(timeouts) = job.get_mut("timeouts").and_then(Value::as_mapping_mut) else {
        return;
    };

    for name in ["action", "job", "connection"] {
        let Some(entry) = timeouts.get_mut(name).and_then(Value::as_mapping_mut) else {
            continue;
        };
        let Some(minutes) = entry.get("minutes").and_then(Value::as_u64) else {
            continue;
        };
        if minutes * 60 < duration {
            entry.insert(key("minutes"), Value::Number(mins.into()));
        }
    }
}

/// Current duration and per-test timeout for one definition.
///
/// With an active external override the definition's `DURATION` parameter is
/// overwritten to `<override>s`; otherwise a declared `DURATION` is parsed
/// and becomes the new sticky duration. Either way the test's timeout is
/// `duration + 120` seconds. Definitions without a `DURATION` leave both
/// untouched.
fn apply_duration(
    test: &mut Value,
    sticky: Option<u64>,
    override_secs: Option<u64>,
) -> (Option<u64>, Option<Value>) {
    let has_duration = test
        .get("parameters")
        .and_then(|p| p.get("DURATION"))
        .is_some();
    if !has_duration {
        return (sticky, None);
    }

    let duration = if let Some(overridden) = override_secs {
        if let Some(params) = test
            .get_mut("parameters")
            .and_then(Value::as_mapping_mut)
        {
            params.insert(key("DURATION"), Value::String(format!("{overridden}s")));
        }
        overridden
    } else {
        let declared = test
            .get("parameters")
            .and_then(|p| p.get("DURATION"))
            .and_then(Value::as_str)
            .map(parse_duration);
        match declared {
            Some(Ok(secs)) => secs,
            _ => return (sticky, None),
        }
    };

    (Some(duration), Some(seconds_timeout(duration + DURATION_SLACK_SECS)))
}

/// Split a rendered job into one file per test definition.
///
/// Files are written to `out_dir` as `test-<name>-<device>.yaml`, each a
/// clone of the parent job with the test action narrowed to a single
/// definition and the derived timeout attached. A job with zero definitions
/// produces zero files.
pub fn split_job(
    rendered: &str,
    device: &str,
    duration_override: Option<u64>,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut job: Value =
        serde_yaml::from_str(rendered).context("rendered job is not valid YAML")?;

    let idx = find_test_index(&job);
    let tests: Vec<Value> = job
        .get("actions")
        .and_then(Value::as_sequence)
        .and_then(|actions| actions.get(idx))
        .and_then(|action| action.get("test"))
        .and_then(|test| test.get("definitions"))
        .and_then(Value::as_sequence)
        .cloned()
        .unwrap_or_default();

    let mut timeout = match duration_override {
        Some(secs) => Some(seconds_timeout(secs + DURATION_SLACK_SECS)),
        None => initial_timeout(&job, idx),
    };
    let mut duration = duration_override;

    let mut split_files = Vec::with_capacity(tests.len());
    for mut test in tests {
        let (new_duration, test_timeout) = apply_duration(&mut test, duration, duration_override);
        duration = new_duration;
        if let Some(test_timeout) = test_timeout {
            timeout = Some(test_timeout);
        }
        bump_job_timeouts(&mut job, duration);

        let name = test
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(name) = name else {
            bail!("test definition has no name");
        };

        let mut block = Mapping::new();
        block.insert(key("definitions"), Value::Sequence(vec![test]));
        if let Some(timeout) = &timeout {
            block.insert(key("timeout"), timeout.clone());
        }
        let mut action = Mapping::new();
        action.insert(key("test"), Value::Mapping(block));

        if let Some(actions) = job.get_mut("actions").and_then(Value::as_sequence_mut) {
            if let Some(slot) = actions.get_mut(idx) {
                *slot = Value::Mapping(action);
            }
        }

        let filename = out_dir.join(format!("test-{name}-{device}.yaml"));
        let text = serde_yaml::to_string(&job)
            .with_context(|| format!("cannot serialize split job `{name}`"))?;
        std::fs::write(&filename, text)
            .with_context(|| format!("cannot write {}", filename.display()))?;
        debug!("wrote split job {}", filename.display());
        split_files.push(filename);
    }

    Ok(split_files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = r#"
job_name: smoke
timeouts:
  action:
    minutes: 10
  job:
    minutes: 15
  connection:
    minutes: 5
actions:
  - deploy:
      to: tftp
  - test:
      definitions:
        - name: cyclictest
          parameters:
            DURATION: 5m
        - name: hackbench
        - name: signaltest
          parameters:
            DURATION: 2h
"#;

    fn load(path: &Path) -> Value {
        serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn test_block(job: &Value) -> &Value {
        job.get("actions").unwrap().get(1).unwrap().get("test").unwrap()
    }

    #[test]
    fn duration_units_round_trip() {
        assert_eq!(parse_duration("30").unwrap(), 30);
        assert_eq!(parse_duration("5m").unwrap(), 300);
        assert_eq!(parse_duration("2h").unwrap(), 7200);
        assert_eq!(parse_duration("1d").unwrap(), 86400);
        assert_eq!(parse_duration("7x").unwrap(), 7);
        assert!(parse_duration("m5").is_err());
    }

    #[test]
    fn splits_one_file_per_definition() {
        let dir = tempfile::tempdir().unwrap();
        let files = split_job(JOB, "bbb", None, dir.path()).unwrap();
        assert_eq!(files.len(), 3);

        let names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "test-cyclictest-bbb.yaml",
                "test-hackbench-bbb.yaml",
                "test-signaltest-bbb.yaml"
            ]
        );

        for file in &files {
            let job = load(file);
            let defs = test_block(&job).get("definitions").unwrap();
            assert_eq!(defs.as_sequence().unwrap().len(), 1);
        }
    }

    #[test]
    fn override_fixes_every_timeout_to_duration_plus_slack() {
        let dir = tempfile::tempdir().unwrap();
        let files = split_job(JOB, "bbb", Some(600), dir.path()).unwrap();
        assert_eq!(files.len(), 3);

        for file in &files {
            let job = load(file);
            let timeout = test_block(&job).get("timeout").unwrap();
            assert_eq!(timeout.get("seconds").unwrap().as_u64(), Some(720));
        }

        // DURATION parameters are rewritten to the override value.
        let cyclictest = load(&files[0]);
        let def = &test_block(&cyclictest).get("definitions").unwrap()[0];
        assert_eq!(
            def.get("parameters").unwrap().get("DURATION").unwrap(),
            &Value::String("600s".into())
        );
    }

    #[test]
    fn declared_duration_is_sticky_and_sets_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let files = split_job(JOB, "bbb", None, dir.path()).unwrap();

        // cyclictest declares 5m: timeout 300 + 120.
        let cyclictest = load(&files[0]);
        let timeout = test_block(&cyclictest).get("timeout").unwrap();
        assert_eq!(timeout.get("seconds").unwrap().as_u64(), Some(420));

        // hackbench has no DURATION: it keeps cyclictest's timeout.
        let hackbench = load(&files[1]);
        let timeout = test_block(&hackbench).get("timeout").unwrap();
        assert_eq!(timeout.get("seconds").unwrap().as_u64(), Some(420));

        // signaltest declares 2h and the job timeouts are raised to cover it.
        let signaltest = load(&files[2]);
        let timeout = test_block(&signaltest).get("timeout").unwrap();
        assert_eq!(timeout.get("seconds").unwrap().as_u64(), Some(7320));
        let timeouts = signaltest.get("timeouts").unwrap();
        for name in ["action", "job", "connection"] {
            let minutes = timeouts.get(name).unwrap().get("minutes").unwrap();
            assert_eq!(minutes.as_u64(), Some(7200 / 60 + 5));
        }
    }

    #[test]
    fn short_durations_leave_sufficient_timeouts_alone() {
        let dir = tempfile::tempdir().unwrap();
        let files = split_job(JOB, "bbb", None, dir.path()).unwrap();

        // 5m fits within every configured minute budget.
        let cyclictest = load(&files[0]);
        let timeouts = cyclictest.get("timeouts").unwrap();
        assert_eq!(
            timeouts.get("action").unwrap().get("minutes").unwrap().as_u64(),
            Some(10)
        );
    }

    #[test]
    fn zero_definitions_produce_zero_files() {
        let dir = tempfile::tempdir().unwrap();
        let job = "job_name: empty\nactions:\n  - test:\n      definitions: []\n";
        let files = split_job(job, "bbb", None, dir.path()).unwrap();
        assert!(files.is_empty());

        let no_test = "job_name: empty\nactions:\n  - deploy:\n      to: tftp\n";
        let files = split_job(no_test, "bbb", None, dir.path()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn malformed_timeouts_tree_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let job = r#"
job_name: odd
timeouts: strange
actions:
  - test:
      definitions:
        - name: cyclictest
          parameters:
            DURATION: 1h
"#;
        let files = split_job(job, "bbb", None, dir.path()).unwrap();
        assert_eq!(files.len(), 1);
    }
}
