//! Owned registry of in-flight ingestion sessions.
//!
//! Each session sits behind its own mutex, so chunks for different batches
//! never contend. The registry itself is a TTL cache: a session that sees no
//! chunk for `idle_timeout` disappears and its token becomes unknown.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use moka::sync::Cache;

use super::session::{ChunkReceipt, IngestionSession, SessionToken};
use crate::error::IngestError;
use crate::job::ImageRef;

type SharedSession = Arc<Mutex<IngestionSession>>;

/// References handed over by a finalized session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedBatch {
    pub owner_id: String,
    pub label: String,
    /// Arrival order; reading order is applied by the pipeline.
    pub items: Vec<ImageRef>,
}

pub struct SessionStore {
    sessions: Cache<SessionToken, SharedSession>,
    uploads_root: String,
}

impl SessionStore {
    pub fn new(uploads_root: impl Into<String>, idle_timeout: Duration, max_sessions: u64) -> Self {
        let sessions = Cache::builder()
            .max_capacity(max_sessions)
            .time_to_idle(idle_timeout)
            .build();
        Self {
            sessions,
            uploads_root: uploads_root.into().trim_end_matches('/').to_string(),
        }
    }

    /// Starts a new batch with zero items.
    pub fn open(
        &self,
        owner_id: &str,
        label: &str,
        expected_total: usize,
    ) -> Result<SessionToken, IngestError> {
        if owner_id.trim().is_empty() {
            return Err(IngestError::InvalidRequest(
                "owner id must not be empty".to_string(),
            ));
        }

        let token = SessionToken::generate();
        let prefix = format!("{}/{}/{}", self.uploads_root, owner_id, token);
        let session = IngestionSession::new(owner_id, label, expected_total, prefix);
        self.sessions
            .insert(token.clone(), Arc::new(Mutex::new(session)));

        debug!(
            "Opened ingestion session {} for owner {} ({} expected)",
            token, owner_id, expected_total
        );
        Ok(token)
    }

    /// Appends one chunk. Safe to call concurrently with the same token.
    pub fn append(
        &self,
        token: &SessionToken,
        refs: Vec<ImageRef>,
        chunk_index: u32,
    ) -> Result<ChunkReceipt, IngestError> {
        let shared = self.lookup(token)?;
        let mut session = lock(&shared);

        // finalize() removed the entry after we looked it up
        if session.is_finalized() {
            return Err(IngestError::UnknownSession(token.to_string()));
        }

        let count = refs.len();
        match session.append(refs, chunk_index) {
            Some(receipt) => {
                debug!(
                    "Session {} chunk {}: +{} -> {}/{}",
                    token, chunk_index, count, receipt.received, receipt.total
                );
                Ok(receipt)
            }
            None => {
                debug!(
                    "Session {} chunk {} already applied, ignoring retransmit",
                    token, chunk_index
                );
                Ok(session.receipt())
            }
        }
    }

    /// Removes the session and returns its references. A token can be
    /// finalized at most once.
    pub fn finalize(&self, token: &SessionToken) -> Result<FinalizedBatch, IngestError> {
        let shared = self
            .sessions
            .remove(token)
            .ok_or_else(|| IngestError::UnknownSession(token.to_string()))?;
        let mut session = lock(&shared);

        if session.is_finalized() {
            return Err(IngestError::UnknownSession(token.to_string()));
        }

        let items = session.seal();
        if items.is_empty() {
            return Err(IngestError::EmptyBatch(token.to_string()));
        }
        if items.len() != session.expected_total {
            warn!(
                "Session {} finalized with {} items, {} were announced",
                token,
                items.len(),
                session.expected_total
            );
        }

        Ok(FinalizedBatch {
            owner_id: session.owner_id.clone(),
            label: session.label.clone(),
            items,
        })
    }

    /// Directory prefix the client should upload this batch's files under.
    pub fn storage_prefix(&self, token: &SessionToken) -> Result<String, IngestError> {
        let shared = self.lookup(token)?;
        let session = lock(&shared);
        Ok(session.storage_prefix.clone())
    }

    pub fn contains(&self, token: &SessionToken) -> bool {
        self.sessions.contains_key(token)
    }

    /// Number of live sessions (expired ones are purged first).
    pub fn len(&self) -> u64 {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, token: &SessionToken) -> Result<SharedSession, IngestError> {
        self.sessions
            .get(token)
            .ok_or_else(|| IngestError::UnknownSession(token.to_string()))
    }
}

fn lock(session: &SharedSession) -> MutexGuard<'_, IngestionSession> {
    match session.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Ingestion session lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
