use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "lavarun",
    version,
    about = "Render, submit and track LAVA test jobs",
    after_help = "EXAMPLES:\n  lavarun submit bbb --suite smoke\n  lavarun submit bbb --flavors rt --test cyclictest --duration 2h\n  lavarun jobs bbb results --batch\n  lavarun jobs bbb compare 1234 1298 --batch\n  lavarun jobs bbb cancel 1234"
)]
pub struct CliArgs {
    /// Enable debug logging
    #[clap(short = 'd', long = "debug", global = true)]
    pub debug: bool,

    /// Suppress non-essential output
    #[clap(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[clap(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render job templates and submit them to the dispatcher
    Submit {
        /// Machine to run on (a [machines.*] entry in config.toml)
        machine: String,

        /// Kernel flavors to submit jobs for
        #[clap(long = "flavors", value_delimiter = ',', default_value = "rt")]
        flavors: Vec<String>,

        /// Test suite directory under the flavor
        #[clap(long = "suite", default_value = "smoke")]
        suite: String,

        /// Submit only the template whose declared test name matches
        #[clap(long = "test")]
        test: Option<String>,

        /// Override every test duration (e.g. 30, 45m, 2h, 1d)
        #[clap(long = "duration")]
        duration: Option<String>,

        /// Suffix appended to the kernel artifact URL
        #[clap(long = "url-suffix")]
        url_suffix: Option<String>,
    },

    /// Render job templates and print them without submitting
    ShowJobs {
        machine: String,

        #[clap(long = "flavors", value_delimiter = ',', default_value = "rt")]
        flavors: Vec<String>,

        #[clap(long = "suite", default_value = "smoke")]
        suite: String,

        #[clap(long = "test")]
        test: Option<String>,

        #[clap(long = "url-suffix")]
        url_suffix: Option<String>,
    },

    /// List the test names available in the job template tree
    ListTests {
        /// Restrict the listing to these flavors
        #[clap(long = "flavors", value_delimiter = ',')]
        flavors: Option<Vec<String>>,

        /// Restrict the listing to this suite
        #[clap(long = "suite")]
        suite: Option<String>,
    },

    /// Inspect and manage submitted jobs
    Jobs {
        /// Machine the jobs were submitted for
        machine: String,

        #[clap(subcommand)]
        command: JobsCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// List recorded primary job IDs
    List,

    /// Fetch and classify job results
    Results {
        /// Primary job ID (defaults to the most recent submission)
        id: Option<i64>,

        /// Expand the ID into its recorded batch
        #[clap(long = "batch")]
        batch: bool,

        /// Print the dispatcher's raw result listing
        #[clap(long = "raw")]
        raw: bool,

        /// Download result attachments into the archive directory
        #[clap(long = "download")]
        download: bool,
    },

    /// Compare measurements between two jobs or batches
    Compare {
        id1: i64,
        id2: i64,

        /// Expand both IDs into their recorded batches
        #[clap(long = "batch")]
        batch: bool,
    },

    /// Print a job's dispatcher log
    Logs {
        /// Job ID (defaults to the most recent submission)
        id: Option<i64>,
    },

    /// Cancel a job (defaults to the most recent submission)
    Cancel {
        id: Option<i64>,

        /// Cancel the whole recorded batch
        #[clap(long = "batch")]
        batch: bool,
    },
}

impl CliArgs {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn get_log_level(&self) -> &str {
        if self.quiet {
            "error"
        } else if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_defaults_apply() {
        let args = CliArgs::parse_from(["lavarun", "submit", "bbb"]);
        match args.command {
            Command::Submit {
                machine,
                flavors,
                suite,
                test,
                duration,
                ..
            } => {
                assert_eq!(machine, "bbb");
                assert_eq!(flavors, vec!["rt"]);
                assert_eq!(suite, "smoke");
                assert!(test.is_none());
                assert!(duration.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn flavors_split_on_commas() {
        let args = CliArgs::parse_from(["lavarun", "submit", "bbb", "--flavors", "rt,standard"]);
        match args.command {
            Command::Submit { flavors, .. } => assert_eq!(flavors, vec!["rt", "standard"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn jobs_results_id_is_optional() {
        let args = CliArgs::parse_from(["lavarun", "jobs", "bbb", "results", "--batch"]);
        match args.command {
            Command::Jobs {
                machine,
                command: JobsCommand::Results { id, batch, raw, .. },
            } => {
                assert_eq!(machine, "bbb");
                assert!(id.is_none());
                assert!(batch);
                assert!(!raw);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn compare_requires_two_ids() {
        assert!(CliArgs::try_parse_from(["lavarun", "jobs", "bbb", "compare", "10"]).is_err());
        let args = CliArgs::parse_from(["lavarun", "jobs", "bbb", "compare", "10", "20"]);
        match args.command {
            Command::Jobs {
                command: JobsCommand::Compare { id1, id2, batch },
                ..
            } => {
                assert_eq!((id1, id2), (10, 20));
                assert!(!batch);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
