//! Chunked batch uploads.
//!
//! A client opens a session, streams image references in as many chunks as
//! it likes, and finalizes once. Finalizing hands the batch over to job
//! creation and forgets the session.

mod session;
mod store;

pub use session::{ChunkReceipt, IngestionSession, SessionToken};
pub use store::{FinalizedBatch, SessionStore};
