//! Inspection and management of previously submitted jobs.

use anyhow::{Context as _, Result, bail};
use log::{debug, error};

use crate::config::Config;
use crate::config::cli_args::JobsCommand;
use crate::lava::Lava;
use crate::ledger::{self, JobLedger};
use crate::results::{self, ResultRecord};
use crate::runner::Runner;
use crate::template::JobContext;

pub async fn run(
    config: &Config,
    runner: &Runner,
    machine: &str,
    command: &JobsCommand,
) -> Result<()> {
    // The machine must be configured even for ledger-only commands, so a
    // typo'd name fails loudly instead of reading an empty ledger.
    config.machine(machine)?;
    let ledger = ledger::open(config);

    match command {
        JobsCommand::List => {
            for id in ledger.list_primary_ids(machine) {
                println!("{id}");
            }
            Ok(())
        }
        JobsCommand::Results {
            id,
            batch,
            raw,
            download,
        } => {
            Lava::ensure_available()?;
            let lava = Lava::new(runner);
            let primary = resolve_id(ledger.as_ref(), machine, *id)?;
            show_results(config, &lava, ledger.as_ref(), machine, primary, *batch, *raw, *download)
                .await
        }
        JobsCommand::Compare { id1, id2, batch } => {
            Lava::ensure_available()?;
            let lava = Lava::new(runner);
            let a = fetch_known(config, &lava, ledger.as_ref(), machine, *id1, *batch).await?;
            let b = fetch_known(config, &lava, ledger.as_ref(), machine, *id2, *batch).await?;

            println!("  {:20} {:20}: {:>10} {:>10} {:>10}", "suite", "test", id1, id2, "delta");
            results::print_comparison(&results::compare(&a, &b));
            Ok(())
        }
        JobsCommand::Logs { id } => {
            Lava::ensure_available()?;
            let lava = Lava::new(runner);
            let job = resolve_id(ledger.as_ref(), machine, *id)?;
            println!("{}", lava.logs(job).await?);
            Ok(())
        }
        JobsCommand::Cancel { id, batch } => {
            Lava::ensure_available()?;
            let lava = Lava::new(runner);
            let primary = resolve_id(ledger.as_ref(), machine, *id)?;
            for job in ledger.expand_batch(machine, primary, *batch) {
                lava.cancel(job).await?;
                println!("cancelled job {job}");
            }
            Ok(())
        }
    }
}

/// An omitted ID means the most recent recorded submission.
fn resolve_id(ledger: &dyn JobLedger, machine: &str, id: Option<i64>) -> Result<i64> {
    if let Some(id) = id {
        return Ok(id);
    }
    match ledger.list_primary_ids(machine).last() {
        Some(latest) => Ok(*latest),
        None => bail!("no recorded jobs for machine `{machine}`; pass a job ID explicitly"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn show_results(
    config: &Config,
    lava: &Lava<'_>,
    ledger: &dyn JobLedger,
    machine: &str,
    primary: i64,
    batch: bool,
    raw: bool,
    download: bool,
) -> Result<()> {
    for job in ledger.expand_batch(machine, primary, batch) {
        let payload = match lava.results(job).await {
            Ok(payload) => payload,
            Err(err) => {
                error!("cannot fetch results for job {job}: {err:#}");
                continue;
            }
        };
        if raw {
            println!("{payload}");
            continue;
        }

        let info = match lava.show(job).await {
            Ok(info) => info,
            Err(err) => {
                error!("cannot get job context for job {job}: {err:#}");
                continue;
            }
        };
        debug!("job {job} on {}: {}", info.host, info.description);
        let ctx = JobContext::load(&config.board_file(&info.host));

        let records = results::parse_records(job, &payload);
        if records.is_empty() {
            println!("  {job:5} no results");
            continue;
        }
        results::print_records(&records, &ctx, &config.suites);

        if download {
            download_attachments(config, &records, &info.host).await;
        }
    }
    Ok(())
}

/// Attachment downloads are best-effort; one failed fetch never hides the
/// rest of the report.
async fn download_attachments(config: &Config, records: &[ResultRecord], host: &str) {
    for record in records.iter().filter(|r| r.attachment.is_some()) {
        match results::download_attachment(record, host, &config.system.result_path).await {
            Ok(path) => println!("  {:5} {}", record.job, path.display()),
            Err(err) => error!("cannot download attachment for job {}: {err:#}", record.job),
        }
    }
}

/// Fetch and parse results for a whole batch, keeping only records from
/// suites the classification policy knows about.
async fn fetch_known(
    config: &Config,
    lava: &Lava<'_>,
    ledger: &dyn JobLedger,
    machine: &str,
    primary: i64,
    batch: bool,
) -> Result<Vec<ResultRecord>> {
    let mut records = Vec::new();
    for job in ledger.expand_batch(machine, primary, batch) {
        let payload = lava
            .results(job)
            .await
            .with_context(|| format!("cannot fetch results for job {job}"))?;
        records.extend(results::parse_records(job, &payload));
    }
    Ok(results::known_records(records, &config.suites))
}
