//! The submission pipeline: render, split, submit, record.

use std::path::Path;

use anyhow::{Context as _, Result};
use log::{debug, error, info};

use crate::config::Config;
use crate::lava::Lava;
use crate::ledger;
use crate::runner::Runner;
use crate::template::{self, splitter};

pub struct SubmitArgs<'a> {
    pub machine: &'a str,
    pub flavors: &'a [String],
    pub suite: &'a str,
    pub test: Option<&'a str>,
    pub duration: Option<&'a str>,
    pub url_suffix: Option<&'a str>,
}

/// Render every suite template per flavor, split each rendered job into
/// one file per test definition, submit the files in order and record the
/// batch. A template that fails to render or submit is logged and skipped;
/// only an interrupt aborts the whole run.
pub async fn submit(config: &Config, runner: &Runner, args: &SubmitArgs<'_>) -> Result<()> {
    Lava::ensure_available()?;
    let machine = config.machine(args.machine)?;
    let lava = Lava::new(runner);

    let duration = args
        .duration
        .map(splitter::parse_duration)
        .transpose()
        .context("invalid --duration")?;

    let mut jobs: Vec<i64> = Vec::new();

    for flavor in args.flavors {
        let ctx = super::build_context(config, machine, args.url_suffix);
        let suite_path = config.system.job_path.join(flavor).join(args.suite);
        if !suite_path.exists() {
            error!("test suite path does not exist: {}", suite_path.display());
            continue;
        }

        // Split files land in a scratch directory first and are archived
        // under the jobfiles path only after submission.
        let scratch = tempfile::tempdir().context("cannot create scratch directory")?;

        for template_file in super::suite_templates(&suite_path)? {
            let rendered = match template::render(&config.system.job_path, &template_file, &ctx) {
                Ok(rendered) => rendered,
                Err(err) => {
                    error!("cannot render {}: {err:#}", template_file.display());
                    continue;
                }
            };

            if let Some(wanted) = args.test {
                let name = super::rendered_job_name(&rendered, &template_file);
                if name != wanted {
                    debug!("skipping {name} (filtered by --test)");
                    continue;
                }
            }

            let split_files =
                match splitter::split_job(&rendered, &machine.hostname, duration, scratch.path()) {
                    Ok(files) => files,
                    Err(err) => {
                        error!("cannot split {}: {err:#}", template_file.display());
                        continue;
                    }
                };

            for file in &split_files {
                match lava.submit(file).await {
                    Ok(id) => {
                        info!("submitted {} as job {id}", file.display());
                        jobs.push(id);
                    }
                    Err(err) if runner.is_cancelled() => return Err(err),
                    Err(err) => error!("cannot submit {}: {err:#}", file.display()),
                }
            }
        }

        if let Err(err) = archive_job_files(scratch.path(), &config.system.jobfiles_path) {
            error!("cannot archive job files: {err:#}");
        }
    }

    if jobs.is_empty() {
        println!("no jobs");
        return Ok(());
    }

    let ledger = ledger::open(config);
    if let Err(err) = ledger.record_batch(args.machine, &jobs, None) {
        error!("cannot record batch in ledger: {err:#}");
    }
    println!("job id: {}", jobs[0]);
    Ok(())
}

/// Keep a copy of every generated job file for later inspection.
fn archive_job_files(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to).with_context(|| format!("cannot create {}", to.display()))?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let source = entry.path();
        if source.is_file() {
            std::fs::copy(&source, to.join(entry.file_name()))
                .with_context(|| format!("cannot copy {}", source.display()))?;
        }
    }
    Ok(())
}
