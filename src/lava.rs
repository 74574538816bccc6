//! Thin wrapper around the `lavacli` dispatcher client.
//!
//! Every interaction with the LAVA server goes through the external `lavacli`
//! binary, driven by the shared [`Runner`]. This module owns the argv
//! construction and the parsing of lavacli's output; it never interprets
//! results beyond that.

use std::path::Path;

use anyhow::{Context as _, Result, bail};
use log::debug;
use serde_yaml::Value;

use crate::runner::Runner;

/// Identity of a job as reported by `lavacli jobs show`.
#[derive(Debug, Clone)]
pub struct JobInfo {
    /// Short host name derived from the assigned device.
    pub host: String,
    pub description: String,
}

pub struct Lava<'a> {
    runner: &'a Runner,
}

impl<'a> Lava<'a> {
    pub fn new(runner: &'a Runner) -> Self {
        Self { runner }
    }

    /// Verify that `lavacli` is installed before any submission starts.
    ///
    /// Checked up front so a missing client aborts before templates are
    /// rendered, not halfway through a batch.
    pub fn ensure_available() -> Result<()> {
        let path = std::env::var_os("PATH").unwrap_or_default();
        let found = std::env::split_paths(&path).any(|dir| dir.join("lavacli").is_file());
        if !found {
            bail!(
                "lavacli not found in PATH; install it (e.g. `pip install lavacli`) \
                 and configure it with `lavacli identities add`"
            );
        }
        Ok(())
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = vec!["lavacli".to_string()];
        cmd.extend(args.iter().map(|s| s.to_string()));
        debug!("running {}", cmd.join(" "));

        let (code, stdout) = self.runner.run(&cmd, None).await?;
        if code != 0 {
            bail!("`{}` exited with status {code}", cmd.join(" "));
        }
        Ok(stdout)
    }

    /// Submit a job file; returns the dispatcher-assigned job ID.
    pub async fn submit(&self, job_file: &Path) -> Result<i64> {
        let path = job_file.to_str().context("job file path is not UTF-8")?;
        let stdout = self.run(&["jobs", "submit", path]).await?;
        stdout
            .trim()
            .parse()
            .with_context(|| format!("unexpected submit output: {}", stdout.trim()))
    }

    /// Query a job's device assignment and description.
    ///
    /// A job that has not been scheduled onto a device yet is an error; its
    /// results would not be attributable to a board.
    pub async fn show(&self, id: i64) -> Result<JobInfo> {
        let id_text = id.to_string();
        let stdout = self.run(&["jobs", "show", &id_text, "--yaml"]).await?;
        let info: Value =
            serde_yaml::from_str(&stdout).with_context(|| format!("cannot parse job {id} info"))?;

        let device = info.get("device").and_then(Value::as_str);
        let Some(device) = device else {
            let state = info
                .get("state")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            bail!("job {id} has not been assigned to a device yet (state: {state})");
        };

        // Device names follow `<host>-NN`; the leading token is the host.
        let host = device.split('-').next().unwrap_or(device).to_string();
        let description = info
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(JobInfo { host, description })
    }

    /// Fetch the raw YAML result listing for a job.
    pub async fn results(&self, id: i64) -> Result<String> {
        self.run(&["results", &id.to_string(), "--yaml"]).await
    }

    pub async fn cancel(&self, id: i64) -> Result<()> {
        self.run(&["jobs", "cancel", &id.to_string()]).await?;
        Ok(())
    }

    pub async fn logs(&self, id: i64) -> Result<String> {
        self.run(&["jobs", "logs", &id.to_string()]).await
    }
}
