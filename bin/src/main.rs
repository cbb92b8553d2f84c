#![allow(clippy::cognitive_complexity)]
use anyhow::Result;

use nanobench_core::{
    WorkloadConfig,
    config::{
        cli::{Cli, Parser},
        trace,
    },
    tokio::{self, runtime::Builder, signal},
    tracing::*,
};
use tokio_util::sync::CancellationToken;

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

static THREAD_NAME: &str = "nanobench-worker";

fn main() -> Result<()> {
    // load .env before parsing so it can supply NANOBENCH_LOG and friends
    let dotenv = dotenv::dotenv();
    // parses from cli or environment var
    let cli = Cli::parse();
    let trace_config = trace::Config::parse(&cli.log, cli.log_format)?;
    debug!(?cli, ?trace_config);
    if let Err(err) = dotenv {
        debug!(?err, ".env file not loaded");
    }

    let output_json = cli.json;
    let threads = cli.threads;
    let config = match WorkloadConfig::try_from(cli.command) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            std::process::exit(2);
        }
    };

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(THREAD_NAME).enable_all();
    // default num threads will be num logical CPUs
    if let Some(num) = threads.filter(|num| *num > 0) {
        builder.worker_threads(num);
    }
    let rt = builder.build()?;

    let result = rt.block_on(async move {
        let token = CancellationToken::new();
        tokio::spawn(shutdown_signal(token.clone()));
        nanobench_core::run(config, token).await
    });

    match result {
        Ok(report) => {
            if output_json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(err) => {
                        eprintln!("failed to serialize report: {err:#}");
                        std::process::exit(2);
                    }
                }
            } else {
                println!("{}", report.human_summary());
            }
            Ok(())
        }
        Err(err) => {
            error!(?err, "benchmark failed");
            eprintln!("run failed: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal(token: CancellationToken) {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("ctrl-c received, stopping");
            token.cancel();
        }
        Err(err) => warn!(?err, "unable to listen for ctrl-c"),
    }
}
