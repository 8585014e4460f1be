//! Builders for batches and services used across integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use snapscribe::recognition::{Merger, Recognizer};
use snapscribe::store::{JobStore, ObjectStore};
use snapscribe::BatchService;

use super::harness::TestHarness;

/// `count` numbered screenshot names, `0001_part.png` onwards.
pub fn numbered_names(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{:04}_part.png", i)).collect()
}

pub fn as_strs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}

/// A `BatchService` over the harness' stores and doubles.
pub struct ServiceBuilder<'a> {
    harness: &'a TestHarness,
    workers: usize,
}

impl<'a> ServiceBuilder<'a> {
    pub fn new(harness: &'a TestHarness) -> Self {
        Self {
            harness,
            workers: 2,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn build(self) -> BatchService {
        let harness = self.harness;
        let mut builder = BatchService::builder(
            Arc::clone(&harness.jobs) as Arc<dyn JobStore>,
            Arc::clone(&harness.objects) as Arc<dyn ObjectStore>,
            Arc::clone(&harness.recognizer) as Arc<dyn Recognizer>,
        )
        .pipeline(harness.config.clone())
        .uploads_root("uploads")
        .workers(self.workers)
        .queue_capacity(8);
        if let Some(merger) = &harness.merger {
            builder = builder.merger(Arc::clone(merger) as Arc<dyn Merger>);
        }
        builder.build()
    }
}
