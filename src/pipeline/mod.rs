//! On-demand embedding generation with streamed progress.

pub mod generator;
pub mod progress;

pub use generator::{process_pending, spawn_processing, ProcessOptions};
pub use progress::{ProgressEvent, ProgressSink, RunSummary};
