// langfuse-junit: generate reports from Langfuse dataset runs
// Fetches an evaluation run and renders JUnit XML (CI) or a text summary

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use langfuse_junit::{LangfuseClient, ReportFormat, run_report};

#[derive(Parser)]
#[command(name = "langfuse-junit")]
#[command(about = "Generate reports from Langfuse dataset runs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a report for a dataset run
    Report {
        /// Name of the Langfuse dataset containing the evaluation run
        #[arg(long)]
        dataset_name: String,

        /// Name of the run within the dataset to generate a report for
        #[arg(long)]
        run_name: String,

        /// Score that decides whether an item passed (value 1) or failed
        #[arg(long, default_value = "did_item_pass")]
        success_score_name: String,

        /// 'junit' produces JUnit XML for CI, 'text' a human-readable summary
        #[arg(long, value_enum, default_value = "junit")]
        report_type: ReportFormat,

        /// File to save the report to; printed to stdout when omitted
        #[arg(long)]
        output_file: Option<PathBuf>,
    },
}

// Log lines go to stderr so report output on stdout stays clean
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Langfuse credentials usually live in a .env next to the eval suite
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Report {
            dataset_name,
            run_name,
            success_score_name,
            report_type,
            output_file,
        } => {
            let client = LangfuseClient::from_env()?;
            run_report(
                Box::new(client),
                &dataset_name,
                &run_name,
                &success_score_name,
                report_type,
                output_file,
            )
            .await?;
        }
    }

    Ok(())
}
