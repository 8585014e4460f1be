pub mod assembler;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod job;
pub mod ordering;
pub mod pipeline;
pub mod recognition;
pub mod sanitize;
pub mod secrets;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use assembler::{AssemblyError, FragmentAssembler};
pub use config::{load_config, load_config_from_str, ServiceConfig};
pub use error::{ConfigError, IngestError, Result, SchedulerError, SnapscribeError};
pub use ingest::{ChunkReceipt, SessionStore, SessionToken};
pub use job::{ExtractionJob, Fragment, ImageRef, JobSnapshot, JobStatus};
pub use ordering::{ordering_key, sort_by_ordering_key, OrderingKey};
pub use pipeline::{ExtractionRunner, JobProgressBroadcaster, JobProgressEvent, PipelineConfig};
pub use recognition::{MergeError, Merger, RecognitionError, Recognizer};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use service::BatchService;
pub use store::{JobStore, JobStoreError, ObjectStore, ObjectStoreError};
pub use worker::JobScheduler;
