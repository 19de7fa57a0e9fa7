//! SweFix Driver - Main Entry Point
//!
//! Resolves the job configuration, runs generation over one dataset split
//! and maps the outcome to the process exit code.

use clap::Parser;
use std::process::ExitCode;
use swefix_common::JobConfig;
use swefix_driver::{dump_metrics, run_job, Cli, JsonLinesSink};
use swefix_worker::worker_model;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status after an interrupt
const INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return exit_code(e.exit_code());
        }
    };

    if cli.print_config {
        return match config.to_yaml() {
            Ok(yaml) => {
                print!("{}", yaml);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e);
                exit_code(e.exit_code())
            }
        };
    }

    init_logging(&config.observability.log_level);

    info!("Starting SweFix driver");
    info!(
        "Configuration loaded: split={} workers={} destination={}",
        config.dataset.split,
        config.execution.resolved_workers(),
        config.destination().display()
    );

    let job_config = config.clone();
    let job = tokio::task::spawn_blocking(move || {
        let sink = JsonLinesSink::new(job_config.output.rows_per_file);
        run_job(&job_config, worker_model(), &sink)
    });

    let code = tokio::select! {
        _ = signal::ctrl_c() => {
            warn!("Received shutdown signal, abandoning job");
            // The blocking job cannot be cancelled, so leave without waiting on it.
            std::process::exit(INTERRUPTED);
        }
        result = job => match result {
            Ok(Ok(summary)) => {
                info!(
                    "Job complete: {} loaded, {} dropped, {} processed, {} failed in {:.2}s",
                    summary.tasks_loaded,
                    summary.tasks_dropped,
                    summary.rows_processed,
                    summary.rows_failed,
                    summary.elapsed.as_secs_f64()
                );
                0
            }
            Ok(Err(e)) => {
                error!(scope = ?e.scope(), "Job failed: {}", e);
                e.exit_code()
            }
            Err(e) => {
                error!("Job task aborted: {}", e);
                1
            }
        },
    };

    write_metrics(&config);
    exit_code(code)
}

fn init_logging(level: &str) {
    let default_filter = format!(
        "swefix_driver={level},swefix_worker={level},swefix_common={level}",
        level = level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn write_metrics(config: &JobConfig) {
    if let Some(path) = &config.observability.metrics_path {
        match dump_metrics(path) {
            Ok(()) => info!("Metrics written to {}", path.display()),
            Err(e) => warn!("Failed to write metrics: {}", e),
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
