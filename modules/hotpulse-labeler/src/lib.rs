pub mod batch;
pub mod context;
pub mod dedup;
pub mod expand;
pub mod pipeline;
pub mod reconcile;
pub mod retry;
pub mod run_log;
pub mod spot_check;
pub mod summarizer;
pub mod table;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use pipeline::Pipeline;
pub use retry::RetryingClient;
pub use run_log::RunLog;
