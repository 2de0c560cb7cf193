// Library surface for the langfuse-junit binary and its integration tests

pub mod client;
pub mod fetch;
pub mod model;
pub mod report;
pub mod runner;

pub use client::{
    ApiError, DatasetRun, DatasetRunItem, LangfuseApi, LangfuseClient, Trace, TraceScore,
};
pub use runner::{ReportFormat, run_report};
