//! The backend contract: a partitioned wide-column store offering
//! create-if-absent tables, single-partition batches of at most
//! [`MAX_BATCH_SIZE`] operations with per-row revision compare-and-swap, and
//! paged queries driven by continuation tokens. Everything above this trait
//! is backend-agnostic.

use crate::row::{Row, RowOp};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub use memory::MemoryBackend;

/// Hard batch cap, one below the provider's 100-entity limit for headroom.
pub const MAX_BATCH_SIZE: usize = 99;

/// Largest page the backend will serve per query round-trip.
pub const MAX_PAGE_SIZE: usize = 99;

/// Per-item operation placed into a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Insert,
    Upsert,
    Delete,
}

/// A backend-legal batch: at most [`MAX_BATCH_SIZE`] operations, every one of
/// them under `partition_key`.
#[derive(Debug, Clone)]
pub struct RowBatch {
    pub kind: BatchKind,
    pub partition_key: String,
    pub ops: Vec<RowOp>,
}

/// Continuation token for paged queries. Opaque to the client; only the
/// backend that issued it can interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken(String);

impl PageToken {
    pub fn new(token: impl Into<String>) -> Self {
        PageToken(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One query round-trip worth of rows plus the token for the next page, if
/// the backend has more.
#[derive(Debug, Clone)]
pub struct Page {
    pub rows: Vec<Row>,
    pub next: Option<PageToken>,
}

/// Transport-level knobs applied once per endpoint before traffic starts:
/// a raised concurrent-connection ceiling and the latency-hurting protocol
/// defaults switched off.
#[derive(Debug, Clone)]
pub struct TransportTuning {
    pub connection_limit: usize,
    pub disable_nagle: bool,
    pub disable_expect_continue: bool,
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// A row's revision precondition no longer held (or an insert hit an
    /// existing row). The batch was not applied.
    #[error("revision precondition failed for row `{row_key}`")]
    RevisionMismatch { row_key: String },

    /// The batch violated the backend contract (too large, mixed partitions).
    #[error("batch rejected: {0}")]
    Rejected(String),

    /// Transport, auth or server failure. Never retried by the client.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// A partitioned wide-column store. Implementations must apply each batch
/// atomically: either every operation takes effect or none does, and all
/// revision preconditions are checked before anything is written.
#[async_trait]
pub trait TableBackend: Send + Sync {
    /// Stable identity of the endpoint this backend talks to; keys the
    /// process-wide one-time transport tuning.
    fn endpoint(&self) -> &str;

    /// Applies transport tuning. Idempotent; the client guarantees at most
    /// one call per endpoint but a second call must be harmless.
    fn tune_transport(&self, tuning: &TransportTuning);

    async fn create_table_if_absent(&self, table: &str) -> Result<(), BackendError>;

    async fn submit_batch(&self, table: &str, batch: RowBatch) -> Result<(), BackendError>;

    /// Serves one page of rows, filtered to `partition_key` when given, in a
    /// stable enumeration order. `limit` is a hint the backend may clamp.
    async fn query_page(
        &self,
        table: &str,
        partition_key: Option<&str>,
        token: Option<PageToken>,
        limit: usize,
    ) -> Result<Page, BackendError>;
}
