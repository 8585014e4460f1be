use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::ImageRef;

/// Random token handed to the client when a batch upload starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Counts returned after every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub received: usize,
    pub total: usize,
    pub remaining: usize,
}

/// In-memory accumulator for one batch upload.
#[derive(Debug)]
pub struct IngestionSession {
    pub owner_id: String,
    pub label: String,
    pub expected_total: usize,
    /// Where the client should place this batch's files.
    pub storage_prefix: String,
    items: Vec<ImageRef>,
    applied_chunks: BTreeSet<u32>,
    pub created_at: DateTime<Utc>,
    pub touched_at: DateTime<Utc>,
    finalized: bool,
}

impl IngestionSession {
    pub fn new(owner_id: &str, label: &str, expected_total: usize, storage_prefix: String) -> Self {
        let now = Utc::now();
        Self {
            owner_id: owner_id.to_string(),
            label: label.to_string(),
            expected_total,
            storage_prefix,
            items: Vec::new(),
            applied_chunks: BTreeSet::new(),
            created_at: now,
            touched_at: now,
            finalized: false,
        }
    }

    /// Appends a chunk in arrival order. Returns `None` when the chunk index
    /// was already applied (a retransmit), in which case nothing changes.
    pub fn append(&mut self, refs: Vec<ImageRef>, chunk_index: u32) -> Option<ChunkReceipt> {
        self.touched_at = Utc::now();
        if !self.applied_chunks.insert(chunk_index) {
            return None;
        }
        self.items.extend(refs);
        Some(self.receipt())
    }

    pub fn receipt(&self) -> ChunkReceipt {
        ChunkReceipt {
            received: self.items.len(),
            total: self.expected_total,
            remaining: self.expected_total.saturating_sub(self.items.len()),
        }
    }

    pub fn received(&self) -> usize {
        self.items.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Seals the session and hands over its references.
    pub(crate) fn seal(&mut self) -> Vec<ImageRef> {
        self.finalized = true;
        std::mem::take(&mut self.items)
    }
}
