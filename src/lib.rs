//! rowbit persists plain records into partitioned, schema-less wide-column stores
//! without hand-written serialization code: every public field of a record becomes
//! one stored row (partition key = record id, row key = field name), records are
//! reassembled from row groups, and each row carries its own backend revision so
//! updates conflict at field granularity while the caller only ever handles a
//! single opaque version tag.
//!
//! Writes are batched per partition (the backend accepts at most
//! [`MAX_BATCH_SIZE`] operations per batch, all under one partition key) and
//! submitted concurrently up to a configurable in-flight watermark.

pub mod backend;
pub mod client;
pub mod executor;
pub mod logger;
pub mod mapper;
pub mod record;
pub mod row;
pub mod settings;
pub mod store;

pub use backend::{
    BackendError, BatchKind, MemoryBackend, Page, PageToken, RowBatch, TableBackend,
    TransportTuning, MAX_BATCH_SIZE, MAX_PAGE_SIZE,
};
pub use client::TableClient;
pub use executor::BatchExecutor;
pub use mapper::{compose, decompose, decompose_as};
pub use record::{FieldDef, Record, VersionTag};
pub use row::{
    decode_field, encode_field, FieldValue, Revision, Row, RowOp, ValueKind, MAX_PROPERTY_BYTES,
};
pub use settings::{StoreSettings, TransportSettings};
pub use store::EntityStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no rows found for record `{id}`")]
    NotFound { id: String },

    #[error("revision precondition failed for row `{row_key}`")]
    ConcurrencyConflict { row_key: String },

    #[error("row `{row_key}` with type tag `{tag}` cannot be decoded: {reason}")]
    TypeMismatch {
        row_key: String,
        tag: String,
        reason: String,
    },

    #[error("property `{row_key}` is {size} bytes, the backend caps properties at {limit}")]
    PropertyTooLarge {
        row_key: String,
        size: usize,
        limit: usize,
    },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("partial batch failure: committed [{}], failed [{}]", .committed.join(", "), .failed.join(", "))]
    PartialBatchFailure {
        committed: Vec<String>,
        failed: Vec<String>,
    },
}

impl From<BackendError> for StoreError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::RevisionMismatch { row_key } => StoreError::ConcurrencyConflict { row_key },
            BackendError::Rejected(msg) => StoreError::BackendUnavailable(msg),
            BackendError::Unavailable(msg) => StoreError::BackendUnavailable(msg),
        }
    }
}
