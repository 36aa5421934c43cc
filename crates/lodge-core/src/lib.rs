pub mod budget;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod extract;
pub mod models;
pub mod recorder;
pub mod session;
pub mod task_queue;
pub mod throttle;
pub mod traits;
pub mod worker;

#[cfg(test)]
pub mod testutil;

pub use config::CrawlConfig;
pub use error::{AppError, ErrorClass};
pub use models::{Identity, RunReport, RunStats, Task, TaskRecord};
pub use traits::{DirectIdentity, Fetcher, IdentityProvider, NullSink, Sink};
pub use worker::{CrawlEvent, CrawlReporter, Crawler, TracingCrawlReporter};
