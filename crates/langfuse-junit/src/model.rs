// Normalized run item records shared by both report formats
// One EvalItem per dataset run item, flattened from the item's trace

use anyhow::{Context, Result};

use crate::client::{DatasetRunItem, LangfuseApi};

/// A single name/value score taken from a trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub name: String,
    pub value: f64,
}

/// One dataset run item, reduced to what the reports need.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalItem {
    pub item_id: String,
    pub trace_id: String,
    pub cost: Option<f64>,
    pub duration: Option<f64>,
    /// Trace order, preserved; report output depends on it.
    pub scores: Vec<Score>,
}

impl EvalItem {
    /// True when a score named `success_score_name` exists with value
    /// exactly 1. Anything else, including a missing score, is a failure.
    pub fn is_success(&self, success_score_name: &str) -> bool {
        self.scores
            .iter()
            .any(|score| score.name == success_score_name && score.value == 1.0)
    }

    /// Render this item as one JUnit `<testcase>` block (no trailing newline).
    pub fn to_junit(&self, success_score_name: &str) -> String {
        fn ident(n: usize, message: &str) -> String {
            format!("{}{}", " ".repeat(n), message)
        }

        let mut lines: Vec<String> = vec![
            format!(
                "<testcase classname='langfuse' name='{}' time='{}'>",
                self.item_id,
                fmt_opt(self.duration)
            ),
            ident(4, "<properties>"),
            ident(
                8,
                &format!("<property name='evals.trace_id' value='{}' />", self.trace_id),
            ),
        ];
        if let Some(cost) = self.cost {
            lines.push(ident(
                8,
                &format!("<property name='evals.cost' value='{}' />", fmt_float(cost)),
            ));
        }
        for score in &self.scores {
            // Property names can't carry '.', swap for '_'
            let score_name = score.name.replace('.', "_");
            lines.push(ident(
                8,
                &format!(
                    "<property name='evals.scores.{}.value' value='{}' />",
                    score_name,
                    fmt_float(score.value)
                ),
            ));
        }
        lines.push(ident(4, "</properties>"));
        if !self.is_success(success_score_name) {
            lines.push(ident(
                4,
                &format!(
                    "<failure message='Test case failed. {} is either missing or its value is not 1.0' />",
                    success_score_name
                ),
            ));
        }
        lines.push("</testcase>".to_string());
        lines.join("\n")
    }

    /// Build an item by fetching its trace. A missing trace is an error that
    /// aborts report generation; there is no partial-success mode.
    pub async fn from_run_item(run_item: &DatasetRunItem, api: &dyn LangfuseApi) -> Result<Self> {
        let trace = api
            .fetch_trace(&run_item.trace_id)
            .await
            .with_context(|| format!("failed to fetch trace {}", run_item.trace_id))?
            .with_context(|| format!("Trace {} not found", run_item.trace_id))?;

        Ok(Self {
            item_id: run_item.id.clone(),
            trace_id: run_item.trace_id.clone(),
            cost: trace.total_cost,
            duration: trace.latency,
            // Scores without a numeric value never reach the reports
            scores: trace
                .scores
                .into_iter()
                .filter_map(|s| s.value.map(|value| Score { name: s.name, value }))
                .collect(),
        })
    }
}

// An absent value renders as the literal text 'None'.
fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) => fmt_float(v),
        None => "None".to_string(),
    }
}

// Round-trip float text ('1.0', not '1'). Scientific form carries a signed,
// zero-padded exponent of at least two digits ('2.5e-05', '1e+16').
pub(crate) fn fmt_float(value: f64) -> String {
    let text = format!("{:?}", value);
    let Some((mantissa, exponent)) = text.split_once('e') else {
        return text;
    };
    match exponent.strip_prefix('-') {
        Some(digits) => format!("{}e-{:0>2}", mantissa, digits),
        None => format!("{}e+{:0>2}", mantissa, exponent),
    }
}
