//! Runs one extraction job from its committed references to a terminal
//! state.

pub mod config;
pub mod error;
pub mod progress;
pub mod runner;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use progress::{
    JobProgressBroadcaster, JobProgressEvent, NoopProgress, ProgressEvent, ProgressReporter,
};
pub use runner::{ExtractionRunner, RunOutcome, StopReason};
