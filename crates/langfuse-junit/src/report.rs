// Report rendering and output: JUnit XML for CI, text summary for humans
// The byte layout of both formats is contractual; CI parsers and downstream
// tooling consume them as-is

use std::path::Path;

use anyhow::{Context, Result};

use crate::model::{EvalItem, fmt_float};

/// JUnit XML document: one testcase per item, in run order.
pub fn render_junit(items: &[EvalItem], success_score_name: &str) -> String {
    let mut doc = format!(
        "<?xml version='1.0' encoding='UTF-8'?>\n<testsuite name='langfuse-eval' tests='{}'>\n",
        items.len()
    );
    for item in items {
        doc.push_str(&item.to_junit(success_score_name));
        doc.push('\n');
    }
    doc.push_str("</testsuite>\n");
    doc
}

/// Aggregate text summary: per-score avg/count/sum.
///
/// The success-score name is accepted for symmetry with [`render_junit`] but
/// the text format carries no pass/fail statistic.
pub fn render_text(items: &[EvalItem], run_name: &str, _success_score_name: &str) -> String {
    // Score names appear in first-seen order; a sorted map would reorder them
    let mut aggregate: Vec<(String, Vec<f64>)> = Vec::new();
    for item in items {
        for score in &item.scores {
            match aggregate.iter_mut().find(|(name, _)| *name == score.name) {
                Some((_, values)) => values.push(score.value),
                None => aggregate.push((score.name.clone(), vec![score.value])),
            }
        }
    }

    let mut doc = format!(
        "# Eval {}\n{} items\n\n# All scores\n\n",
        run_name,
        items.len()
    );
    for (name, values) in &aggregate {
        let sum: f64 = values.iter().sum();
        let avg = if values.is_empty() {
            0.0
        } else {
            sum / values.len() as f64
        };
        doc.push_str(&format!(
            "- {}\n  avg: {}\n  count: {}\n  sum: {}\n",
            name,
            fmt_float(avg),
            values.len(),
            fmt_float(sum)
        ));
    }
    doc
}

/// Write the document to `output_file`, or stdout when none is given.
pub fn write_report(document: &str, output_file: Option<&Path>) -> Result<()> {
    match output_file {
        Some(path) => std::fs::write(path, document)
            .with_context(|| format!("failed to write report to {}", path.display()))?,
        None => print!("{}", document),
    }
    Ok(())
}
