mod commands;
mod config;
mod lava;
mod ledger;
mod results;
mod runner;
mod template;

use std::process::ExitCode;

use log::error;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::config::cli_args::CliArgs;
use crate::runner::Runner;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse_args();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.get_log_level()),
    )
    .format_timestamp(None)
    .init();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("{err:#}");
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C cancels the token; the runner kills any in-flight child process
    // and the command unwinds through its normal error path.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let runner = Runner::new(cancel.clone());
    match commands::run(&args, &config, &runner).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) if cancel.is_cancelled() => {
            eprintln!("Interrupted.");
            ExitCode::from(130)
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
