// Orchestration: fetch the run, render the chosen format, write it out

use std::path::PathBuf;

use anyhow::Result;
use clap::ValueEnum;

use crate::client::LangfuseApi;
use crate::fetch::RunFetcher;
use crate::report;

/// Output format of the generated report.
#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum ReportFormat {
    /// JUnit XML for CI pipelines
    Junit,
    /// Human-readable aggregate summary
    Text,
}

pub async fn run_report(
    api: Box<dyn LangfuseApi>,
    dataset_name: &str,
    run_name: &str,
    success_score_name: &str,
    format: ReportFormat,
    output_file: Option<PathBuf>,
) -> Result<()> {
    let mut fetcher = RunFetcher::new(api);
    let Some(items) = fetcher.run_items(dataset_name, run_name).await? else {
        // Diagnostic already printed; an unusable run is not a process
        // failure, and no output file is created for it
        return Ok(());
    };

    let document = match format {
        ReportFormat::Junit => report::render_junit(&items, success_score_name),
        ReportFormat::Text => report::render_text(&items, run_name, success_score_name),
    };
    report::write_report(&document, output_file.as_deref())
}
