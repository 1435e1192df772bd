pub mod batch;
pub mod batch_data;
pub mod config;
pub mod error;
pub mod folder;
pub mod http;
pub mod job;
pub mod progress;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{Batch, BatchRunError};
pub use batch_data::BatchData;
pub use config::ClientConfig;
pub use error::{BatchError, WebError};
pub use folder::delete_old;
pub use http::HttpTransport;
pub use job::{Job, MonitorOutcome};
pub use progress::{ConsoleProgress, LogProgress, NoProgress, ProgressSink};
pub use transport::Transport;
