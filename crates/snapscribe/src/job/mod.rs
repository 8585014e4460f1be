//! Extraction job records and the fragments a run produces.

pub mod fragment;
pub mod model;

pub use fragment::{Fragment, FAILURE_MARKER_PREFIX};
pub use model::{ExtractionJob, ImageRef, JobSnapshot, JobStatus};
