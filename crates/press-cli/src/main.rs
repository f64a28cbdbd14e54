// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `press` binary: one job in, a scorecard and a CI exit code out.
#![deny(unsafe_code)]

mod commands;
mod providers;
mod workers;

use clap::{Parser, Subcommand, ValueEnum};
use press_core::EXIT_INFRA;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "press", version, about = "Document-generation orchestrator with layered PDF quality gating")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (RUST_LOG still takes precedence).
    #[arg(long, global = true)]
    debug: bool,

    /// Path to the orchestrator settings TOML.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Override the output directory for artifacts.
    #[arg(long, global = true)]
    out_dir: Option<PathBuf>,

    /// Override the report directory.
    #[arg(long, global = true)]
    report_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute one job: produce the artifact and grade it.
    Run {
        /// Path to the job configuration JSON.
        job_config: PathBuf,

        /// Override the job's overall gate (rubric scale, 0–150).
        #[arg(long)]
        threshold: Option<f64>,

        /// Reject unknown job-config fields instead of warning.
        #[arg(long)]
        strict: bool,

        /// Machine-readable output: print the scorecard JSON to stdout.
        #[arg(long)]
        ci: bool,

        /// Force every external provider into dry-run.
        #[arg(long)]
        dry_run: bool,
    },

    /// Skip production and run the validation layers on an existing PDF.
    ValidateOnly {
        /// The PDF to grade.
        #[arg(long)]
        pdf: PathBuf,

        /// Path to the job configuration JSON.
        #[arg(long)]
        job_config: PathBuf,

        /// Override the job's overall gate (rubric scale, 0–150).
        #[arg(long)]
        threshold: Option<f64>,

        /// Reject unknown job-config fields instead of warning.
        #[arg(long)]
        strict: bool,

        /// Machine-readable output: print the scorecard JSON to stdout.
        #[arg(long)]
        ci: bool,

        /// Force every external provider into dry-run.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run an experiment job's variants and report the winner.
    Experiment {
        /// Path to the job configuration JSON (mode must be `experiment`).
        job_config: PathBuf,

        /// Reject unknown job-config fields instead of warning.
        #[arg(long)]
        strict: bool,

        /// Machine-readable output: print the summary JSON to stdout.
        #[arg(long)]
        ci: bool,

        /// Force every external provider into dry-run.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print a JSON schema to stdout.
    Schema {
        /// Which schema to print.
        #[arg(value_enum)]
        kind: SchemaKind,
    },
}

/// Schema kind argument for the `schema` subcommand.
#[derive(Debug, Clone, ValueEnum)]
enum SchemaKind {
    /// The job configuration document.
    Job,
    /// The scorecard output document.
    Scorecard,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    let code = runtime.block_on(dispatch(cli));
    std::process::exit(code);
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> i32 {
    let overrides = commands::SettingsOverrides {
        settings_path: cli.settings,
        out_dir: cli.out_dir,
        report_dir: cli.report_dir,
    };
    match cli.command {
        Commands::Run {
            job_config,
            threshold,
            strict,
            ci,
            dry_run,
        } => {
            commands::run(
                &job_config,
                commands::RunOptions {
                    threshold,
                    strict,
                    ci,
                    dry_run,
                },
                overrides,
            )
            .await
        }
        Commands::ValidateOnly {
            pdf,
            job_config,
            threshold,
            strict,
            ci,
            dry_run,
        } => {
            commands::validate_only(
                &pdf,
                &job_config,
                commands::RunOptions {
                    threshold,
                    strict,
                    ci,
                    dry_run,
                },
                overrides,
            )
            .await
        }
        Commands::Experiment {
            job_config,
            strict,
            ci,
            dry_run,
        } => {
            commands::experiment(
                &job_config,
                commands::RunOptions {
                    threshold: None,
                    strict,
                    ci,
                    dry_run,
                },
                overrides,
            )
            .await
        }
        Commands::Schema { kind } => {
            let schema = match kind {
                SchemaKind::Job => schemars::schema_for!(press_core::Job),
                SchemaKind::Scorecard => schemars::schema_for!(press_core::Scorecard),
            };
            match serde_json::to_string_pretty(&schema) {
                Ok(text) => {
                    println!("{text}");
                    0
                }
                Err(e) => {
                    eprintln!("failed to render schema: {e}");
                    EXIT_INFRA
                }
            }
        }
    }
}
