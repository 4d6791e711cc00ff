//! Splits an arbitrary row-op set into backend-legal batches (one partition
//! key each, at most [`MAX_BATCH_SIZE`] operations) and submits them
//! concurrently, keeping at most `tune_speed` batches in flight. Every chunk
//! outcome is collected before `execute` returns; nothing is fire-and-forget
//! and nothing already committed is rolled back.

use crate::backend::{BackendError, BatchKind, RowBatch, TableBackend, MAX_BATCH_SIZE};
use crate::row::RowOp;
use crate::{debug, warn, StoreError};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;

pub struct BatchExecutor {
    backend: Arc<dyn TableBackend>,
    tune_speed: usize,
}

struct ChunkOutcome {
    label: String,
    result: Result<(), BackendError>,
}

impl BatchExecutor {
    /// `tune_speed` caps the number of concurrently in-flight batches.
    pub fn new(backend: Arc<dyn TableBackend>, tune_speed: usize) -> Self {
        BatchExecutor {
            backend,
            tune_speed: tune_speed.max(1),
        }
    }

    /// Applies `kind` to every row op. Submission order across chunks is
    /// unspecified, but all chunks have completed (either way) by the time
    /// this returns. A conflict with nothing committed is a clean
    /// [`StoreError::ConcurrencyConflict`]; a mix of committed and failed
    /// chunks is a [`StoreError::PartialBatchFailure`] naming both sides.
    pub async fn execute(
        &self,
        kind: BatchKind,
        table: &str,
        ops: Vec<RowOp>,
    ) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }

        let batches = Self::plan(kind, ops);
        let total = batches.len();

        let outcomes: Vec<ChunkOutcome> = stream::iter(batches.into_iter().map(|(label, batch)| {
            let backend = Arc::clone(&self.backend);
            let table = table.to_string();
            async move {
                let result = backend.submit_batch(&table, batch).await;
                ChunkOutcome { label, result }
            }
        }))
        .buffer_unordered(self.tune_speed)
        .collect()
        .await;

        let mut committed = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(()) => committed.push(outcome.label),
                Err(e) => failed.push((outcome.label, e)),
            }
        }

        if failed.is_empty() {
            debug!("{} batch(es) committed to {}", total, table);
            return Ok(());
        }

        if committed.is_empty() {
            // nothing applied: surface the cleanest failure we have
            let non_conflict = failed
                .iter()
                .position(|(_, e)| !matches!(e, BackendError::RevisionMismatch { .. }));
            let (_, error) = failed.swap_remove(non_conflict.unwrap_or(0));
            return Err(StoreError::from(error));
        }

        warn!(
            "partial batch failure on {}: {}/{} chunks failed after others committed",
            table,
            failed.len(),
            total
        );
        committed.sort();
        let mut failed: Vec<String> = failed
            .into_iter()
            .map(|(label, e)| format!("{}: {}", label, e))
            .collect();
        failed.sort();
        Err(StoreError::PartialBatchFailure { committed, failed })
    }

    /// Groups ops by partition key, then chunks each group at the batch cap.
    /// Labels are `partition#chunk-index`, for failure reporting.
    fn plan(kind: BatchKind, ops: Vec<RowOp>) -> Vec<(String, RowBatch)> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<RowOp>> = HashMap::new();
        for op in ops {
            let pk = op.row.partition_key.clone();
            if !groups.contains_key(&pk) {
                order.push(pk.clone());
            }
            groups.entry(pk).or_default().push(op);
        }

        let mut batches = Vec::new();
        for pk in order {
            let mut remaining = match groups.remove(&pk) {
                Some(ops) => ops,
                None => continue,
            };
            let mut chunk_index = 0;
            while !remaining.is_empty() {
                let tail = remaining.split_off(remaining.len().min(MAX_BATCH_SIZE));
                let chunk = std::mem::replace(&mut remaining, tail);
                batches.push((
                    format!("{}#{}", pk, chunk_index),
                    RowBatch {
                        kind,
                        partition_key: pk.clone(),
                        ops: chunk,
                    },
                ));
                chunk_index += 1;
            }
        }
        batches
    }
}
