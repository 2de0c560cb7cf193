// Run retrieval: run lookup, per-item trace fetch, in-process memoization
// Run-level failures degrade to a red diagnostic and no result; a missing
// trace while building items aborts the whole report

use std::collections::HashMap;
use std::io::Write;

use anyhow::Result;
use colored::Colorize;
use tracing::debug;

use crate::client::{ApiError, LangfuseApi};
use crate::model::EvalItem;

pub struct RunFetcher {
    api: Box<dyn LangfuseApi>,
    // User-facing progress and diagnostics land here; stderr by default so
    // piped report output stays clean
    console: Box<dyn Write + Send>,
    // One remote lookup per (dataset, run) for the process lifetime. Errors
    // are not cached, so a retried call hits the service again.
    cache: HashMap<(String, String), Option<Vec<EvalItem>>>,
}

impl RunFetcher {
    pub fn new(api: Box<dyn LangfuseApi>) -> Self {
        Self::with_console(api, Box::new(std::io::stderr()))
    }

    /// Route progress lines and diagnostics to `console` instead of stderr.
    pub fn with_console(api: Box<dyn LangfuseApi>, console: Box<dyn Write + Send>) -> Self {
        Self {
            api,
            console,
            cache: HashMap::new(),
        }
    }

    /// Fetch and normalize all items of a run. `None` means the run could
    /// not be used (unknown run, no items, bad credentials); the diagnostic
    /// has already been printed.
    pub async fn run_items(
        &mut self,
        dataset_name: &str,
        run_name: &str,
    ) -> Result<Option<Vec<EvalItem>>> {
        let key = (dataset_name.to_string(), run_name.to_string());
        if let Some(cached) = self.cache.get(&key) {
            debug!(dataset_name, run_name, "run cache hit");
            return Ok(cached.clone());
        }

        let items = self.fetch_run_items(dataset_name, run_name).await?;
        self.cache.insert(key, items.clone());
        Ok(items)
    }

    async fn fetch_run_items(
        &mut self,
        dataset_name: &str,
        run_name: &str,
    ) -> Result<Option<Vec<EvalItem>>> {
        let looked_up = self.api.get_dataset_run(dataset_name, run_name).await;
        let run = match looked_up {
            Ok(run) => run,
            Err(ApiError::NotFound) => {
                self.diagnostic(&format!(
                    "Run {} not found in dataset {}",
                    run_name, dataset_name
                ));
                return Ok(None);
            }
            Err(ApiError::Unauthorized) => {
                self.diagnostic("Could not access Langfuse. Please check your .env file");
                return Ok(None);
            }
            Err(e) => {
                self.diagnostic(&format!("Unknown error fetching items: {}", e));
                return Ok(None);
            }
        };

        let Some(run_items) = run.dataset_run_items else {
            self.diagnostic(&format!("Run {} has no items", run_name));
            return Ok(None);
        };

        let total = run_items.len();
        let mut items = Vec::with_capacity(total);
        for (i, run_item) in run_items.iter().enumerate() {
            let _ = writeln!(
                self.console,
                "[{}/{}] fetching trace {}",
                i + 1,
                total,
                run_item.trace_id
            );
            items.push(EvalItem::from_run_item(run_item, self.api.as_ref()).await?);
        }

        Ok(Some(items))
    }

    fn diagnostic(&mut self, message: &str) {
        let _ = writeln!(self.console, "{}", message.red());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::client::{DatasetRun, DatasetRunItem, Trace, TraceScore};
    use crate::model::Score;

    enum RunReply {
        Run(DatasetRun),
        NotFound,
        Unauthorized,
        ServerError,
    }

    struct FakeApi {
        reply: RunReply,
        trace: Option<Trace>,
        run_calls: Arc<AtomicUsize>,
        trace_calls: Arc<AtomicUsize>,
    }

    impl FakeApi {
        fn new(reply: RunReply, trace: Option<Trace>) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let run_calls = Arc::new(AtomicUsize::new(0));
            let trace_calls = Arc::new(AtomicUsize::new(0));
            let api = Self {
                reply,
                trace,
                run_calls: run_calls.clone(),
                trace_calls: trace_calls.clone(),
            };
            (api, run_calls, trace_calls)
        }
    }

    #[async_trait]
    impl LangfuseApi for FakeApi {
        async fn get_dataset_run(
            &self,
            _dataset_name: &str,
            _run_name: &str,
        ) -> Result<DatasetRun, ApiError> {
            self.run_calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                RunReply::Run(run) => Ok(run.clone()),
                RunReply::NotFound => Err(ApiError::NotFound),
                RunReply::Unauthorized => Err(ApiError::Unauthorized),
                RunReply::ServerError => Err(ApiError::Api {
                    status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Network timeout".into(),
                }),
            }
        }

        async fn fetch_trace(&self, _trace_id: &str) -> Result<Option<Trace>, ApiError> {
            self.trace_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.trace.clone())
        }
    }

    // Captures everything the fetcher would print to stderr
    #[derive(Clone, Default)]
    struct Console(Arc<Mutex<Vec<u8>>>);

    impl Console {
        fn printed(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Console {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn run_with_items(item_ids: &[(&str, &str)]) -> DatasetRun {
        DatasetRun {
            id: "run-id".into(),
            name: "test-run".into(),
            dataset_run_items: Some(
                item_ids
                    .iter()
                    .map(|(id, trace_id)| DatasetRunItem {
                        id: (*id).into(),
                        trace_id: (*trace_id).into(),
                    })
                    .collect(),
            ),
        }
    }

    fn trace_with_score(name: &str, value: f64) -> Trace {
        Trace {
            id: "trace".into(),
            total_cost: Some(0.1),
            latency: Some(1.0),
            scores: vec![TraceScore {
                name: name.into(),
                value: Some(value),
            }],
        }
    }

    #[tokio::test]
    async fn builds_one_item_per_run_item() {
        let (api, _, trace_calls) = FakeApi::new(
            RunReply::Run(run_with_items(&[("i1", "t1"), ("i2", "t2")])),
            Some(trace_with_score("accuracy", 0.8)),
        );
        let console = Console::default();
        let mut fetcher = RunFetcher::with_console(Box::new(api), Box::new(console.clone()));

        let items = fetcher.run_items("ds", "run").await.unwrap().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_id, "i1");
        assert_eq!(items[1].item_id, "i2");
        assert_eq!(
            items[0].scores,
            vec![Score {
                name: "accuracy".into(),
                value: 0.8
            }]
        );
        assert_eq!(trace_calls.load(Ordering::SeqCst), 2);

        let printed = console.printed();
        assert!(printed.contains("[1/2] fetching trace t1"));
        assert!(printed.contains("[2/2] fetching trace t2"));
    }

    #[tokio::test]
    async fn memoizes_per_dataset_and_run() {
        let (api, run_calls, trace_calls) = FakeApi::new(
            RunReply::Run(run_with_items(&[("i1", "t1")])),
            Some(trace_with_score("accuracy", 0.8)),
        );
        let console = Console::default();
        let mut fetcher = RunFetcher::with_console(Box::new(api), Box::new(console.clone()));

        let first = fetcher.run_items("ds", "run").await.unwrap();
        let second = fetcher.run_items("ds", "run").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(run_calls.load(Ordering::SeqCst), 1);
        assert_eq!(trace_calls.load(Ordering::SeqCst), 1);

        // The cached answer produces no second round of progress lines
        assert_eq!(console.printed().matches("fetching trace t1").count(), 1);
    }

    #[tokio::test]
    async fn distinct_runs_fetch_separately() {
        let (api, run_calls, _) = FakeApi::new(
            RunReply::Run(run_with_items(&[])),
            None,
        );
        let mut fetcher = RunFetcher::new(Box::new(api));

        fetcher.run_items("ds", "run-a").await.unwrap();
        fetcher.run_items("ds", "run-b").await.unwrap();
        assert_eq!(run_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_run_yields_no_result() {
        let (api, _, _) = FakeApi::new(RunReply::NotFound, None);
        let console = Console::default();
        let mut fetcher = RunFetcher::with_console(Box::new(api), Box::new(console.clone()));

        let items = fetcher.run_items("ds", "missing-run").await.unwrap();
        assert!(items.is_none());
        assert!(
            console
                .printed()
                .contains("Run missing-run not found in dataset ds")
        );
    }

    #[tokio::test]
    async fn bad_credentials_yield_no_result() {
        let (api, _, _) = FakeApi::new(RunReply::Unauthorized, None);
        let console = Console::default();
        let mut fetcher = RunFetcher::with_console(Box::new(api), Box::new(console.clone()));

        let items = fetcher.run_items("ds", "run").await.unwrap();
        assert!(items.is_none());
        assert!(
            console
                .printed()
                .contains("Could not access Langfuse. Please check your .env file")
        );
    }

    #[tokio::test]
    async fn server_error_yields_no_result() {
        let (api, _, _) = FakeApi::new(RunReply::ServerError, None);
        let console = Console::default();
        let mut fetcher = RunFetcher::with_console(Box::new(api), Box::new(console.clone()));

        let items = fetcher.run_items("ds", "run").await.unwrap();
        assert!(items.is_none());
        assert!(console.printed().contains(
            "Unknown error fetching items: Langfuse API error (500 Internal Server Error): Network timeout"
        ));
    }

    #[tokio::test]
    async fn no_result_is_cached_too() {
        let (api, run_calls, _) = FakeApi::new(RunReply::NotFound, None);
        let console = Console::default();
        let mut fetcher = RunFetcher::with_console(Box::new(api), Box::new(console.clone()));

        assert!(fetcher.run_items("ds", "run").await.unwrap().is_none());
        assert!(fetcher.run_items("ds", "run").await.unwrap().is_none());
        assert_eq!(run_calls.load(Ordering::SeqCst), 1);

        // The second call answers from cache and stays silent
        assert_eq!(
            console.printed().matches("not found in dataset").count(),
            1
        );
    }

    #[tokio::test]
    async fn absent_items_collection_yields_no_result() {
        let run = DatasetRun {
            id: "run-id".into(),
            name: "test-run".into(),
            dataset_run_items: None,
        };
        let (api, _, _) = FakeApi::new(RunReply::Run(run), None);
        let console = Console::default();
        let mut fetcher = RunFetcher::with_console(Box::new(api), Box::new(console.clone()));

        let items = fetcher.run_items("ds", "empty-run").await.unwrap();
        assert!(items.is_none());
        assert!(console.printed().contains("Run empty-run has no items"));
    }

    #[tokio::test]
    async fn empty_items_collection_is_a_valid_empty_run() {
        let (api, _, _) = FakeApi::new(RunReply::Run(run_with_items(&[])), None);
        let mut fetcher = RunFetcher::new(Box::new(api));

        let items = fetcher.run_items("ds", "run").await.unwrap();
        assert_eq!(items, Some(vec![]));
    }

    #[tokio::test]
    async fn missing_trace_aborts_and_is_not_cached() {
        let (api, run_calls, _) = FakeApi::new(
            RunReply::Run(run_with_items(&[("i1", "t1")])),
            None,
        );
        let mut fetcher = RunFetcher::new(Box::new(api));

        let err = fetcher.run_items("ds", "run").await.unwrap_err();
        assert!(err.to_string().contains("Trace t1 not found"));

        // The failure was not memoized; a retry contacts the service again
        let err = fetcher.run_items("ds", "run").await.unwrap_err();
        assert!(err.to_string().contains("Trace t1 not found"));
        assert_eq!(run_calls.load(Ordering::SeqCst), 2);
    }
}
