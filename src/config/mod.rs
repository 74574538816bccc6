//! Tool configuration.
//!
//! The configuration is one explicit [`Config`] value constructed at startup
//! from `config.toml` (current directory, then `~/.config/lavarun/`) and
//! passed by reference into every component; there is no ambient global
//! state. Machine entries are explicit structs; a field that was never
//! configured is reported as such instead of silently reading as empty.

pub mod cli_args;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use serde::Deserialize;

/// Which ledger backend tracks submitted batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Base directory of the job template tree (`<job_path>/<flavor>/<suite>`
    /// plus `<job_path>/boards/<hostname>.yaml`).
    pub job_path: PathBuf,
    /// Cache directory for generated job files and the flat-file ledger.
    pub jobfiles_path: PathBuf,
    /// Archive directory for downloaded result attachments.
    pub result_path: PathBuf,
    /// SQLite ledger location.
    pub database_path: PathBuf,
    pub ledger: LedgerBackend,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let cache = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lavarun");
        Self {
            job_path: PathBuf::from("jobs"),
            jobfiles_path: cache.join("jobs"),
            result_path: cache.join("results"),
            database_path: cache.join("jobs.db"),
            ledger: LedgerBackend::default(),
        }
    }
}

/// One target machine entry.
///
/// The explicit fields cover the recognized configuration; `vars` is the one
/// open mapping, merged into the template context before rendering.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    /// Device hostname, also the board-descriptor key and the device tag.
    pub hostname: String,
    /// Kernel image file name produced by the (external) build step.
    pub image: Option<String>,
    pub arch: Option<String>,
    pub cross_compile: Option<String>,
    pub cc: Option<String>,
    pub build_path: Option<PathBuf>,
    /// Extra template variables for this machine.
    #[serde(default)]
    pub vars: BTreeMap<String, toml::Value>,
}

/// The two disjoint known-suite sets used by result classification.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SuitesConfig {
    /// Latency-sensitive suites, subject to the max-latency threshold rule.
    pub rt: Vec<String>,
    /// Standard suites whose raw pass/fail flag is trusted.
    pub standard: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub system: SystemConfig,
    pub machines: BTreeMap<String, MachineConfig>,
    pub suites: SuitesConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("cannot parse config {}", path.display()))?;
        Ok(config)
    }

    /// Load from an explicit path, or search the conventional locations.
    /// No config file at all yields the built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let mut candidates = vec![PathBuf::from("config.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("lavarun").join("config.toml"));
        }
        for candidate in candidates {
            if candidate.exists() {
                return Self::from_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    /// Look up a machine entry, with an actionable error when absent.
    pub fn machine(&self, name: &str) -> Result<&MachineConfig> {
        match self.machines.get(name) {
            Some(machine) => Ok(machine),
            None => bail!(
                "machine `{name}` is not configured; add a [machines.{name}] entry to config.toml"
            ),
        }
    }

    /// Board descriptor path for a machine, by convention under the job tree.
    pub fn board_file(&self, hostname: &str) -> PathBuf {
        self.system
            .job_path
            .join("boards")
            .join(format!("{hostname}.yaml"))
    }
}
