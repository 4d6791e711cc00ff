//! In-memory [`TableBackend`] with the same observable semantics as the real
//! provider: atomic batch application with precondition checks up front,
//! monotonically increasing revision stamps, deterministic paging, and the
//! structural batch validation the provider enforces server-side. Tests use
//! the extra instrumentation (submitted-batch log, in-flight gauge, failure
//! injection); none of it affects the contract.

use crate::backend::{
    BackendError, BatchKind, Page, PageToken, RowBatch, TableBackend, TransportTuning,
    MAX_BATCH_SIZE, MAX_PAGE_SIZE,
};
use crate::row::{Revision, Row};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Separator between partition key and row key inside continuation tokens.
const TOKEN_SEP: char = '\u{1f}';

#[derive(Clone)]
struct StoredRow {
    type_tag: String,
    value: Option<String>,
    revision: u64,
}

type Table = BTreeMap<(String, String), StoredRow>;

pub struct MemoryBackend {
    endpoint: String,
    tables: Mutex<HashMap<String, Table>>,
    next_revision: AtomicU64,
    tuned: AtomicUsize,
    created: Mutex<Vec<String>>,
    batch_log: Mutex<Vec<(String, usize)>>,
    fail_after: Mutex<Option<usize>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_endpoint(&format!("memory-{:08x}", rand::random::<u32>()))
    }

    pub fn with_endpoint(endpoint: &str) -> Self {
        MemoryBackend {
            endpoint: endpoint.to_string(),
            tables: Mutex::new(HashMap::new()),
            next_revision: AtomicU64::new(0),
            tuned: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
            batch_log: Mutex::new(Vec::new()),
            fail_after: Mutex::new(None),
            latency: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Lets the next `n` batch submissions succeed and fails every one after.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock().unwrap() = Some(n);
    }

    /// Delay injected into every batch submission; combined with a paused
    /// tokio clock this exposes the executor's in-flight window.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// `(partition_key, op count)` of every batch that reached application,
    /// in application order.
    pub fn submitted_batches(&self) -> Vec<(String, usize)> {
        self.batch_log.lock().unwrap().clone()
    }

    pub fn tuned_count(&self) -> usize {
        self.tuned.load(Ordering::SeqCst)
    }

    pub fn created_tables(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    fn stamp(&self) -> u64 {
        self.next_revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn apply(&self, table_name: &str, batch: RowBatch) -> Result<(), BackendError> {
        {
            let mut fail = self.fail_after.lock().unwrap();
            if let Some(left) = fail.as_mut() {
                if *left == 0 {
                    return Err(BackendError::Unavailable("injected failure".to_string()));
                }
                *left -= 1;
            }
        }

        let mut tables = self.tables.lock().unwrap();
        let table = tables.get_mut(table_name).ok_or_else(|| {
            BackendError::Unavailable(format!("table `{}` does not exist", table_name))
        })?;
        let op_count = batch.ops.len();

        // all preconditions first, then the writes: the batch is atomic
        for op in &batch.ops {
            let key = (batch.partition_key.clone(), op.row.row_key.clone());
            let existing = table.get(&key);
            let mismatch = || BackendError::RevisionMismatch {
                row_key: op.row.row_key.clone(),
            };
            match batch.kind {
                BatchKind::Insert => {
                    if existing.is_some() {
                        return Err(mismatch());
                    }
                }
                BatchKind::Upsert | BatchKind::Delete => {
                    if let Some(expected) = &op.precondition {
                        match existing {
                            Some(stored) if stored.revision.to_string() == expected.as_str() => {}
                            _ => return Err(mismatch()),
                        }
                    }
                }
            }
        }

        for op in batch.ops {
            let key = (batch.partition_key.clone(), op.row.row_key);
            match batch.kind {
                BatchKind::Insert | BatchKind::Upsert => {
                    table.insert(
                        key,
                        StoredRow {
                            type_tag: op.row.type_tag,
                            value: op.row.value,
                            revision: self.stamp(),
                        },
                    );
                }
                BatchKind::Delete => {
                    table.remove(&key);
                }
            }
        }

        self.batch_log
            .lock()
            .unwrap()
            .push((batch.partition_key, op_count));
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableBackend for MemoryBackend {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn tune_transport(&self, _tuning: &TransportTuning) {
        self.tuned.fetch_add(1, Ordering::SeqCst);
    }

    async fn create_table_if_absent(&self, table: &str) -> Result<(), BackendError> {
        self.created.lock().unwrap().push(table.to_string());
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default();
        Ok(())
    }

    async fn submit_batch(&self, table: &str, batch: RowBatch) -> Result<(), BackendError> {
        if batch.ops.is_empty() {
            return Err(BackendError::Rejected("empty batch".to_string()));
        }
        if batch.ops.len() > MAX_BATCH_SIZE {
            return Err(BackendError::Rejected(format!(
                "{} operations exceed the {}-entity batch cap",
                batch.ops.len(),
                MAX_BATCH_SIZE
            )));
        }
        if let Some(op) = batch
            .ops
            .iter()
            .find(|op| op.row.partition_key != batch.partition_key)
        {
            return Err(BackendError::Rejected(format!(
                "row `{}` carries partition key `{}`, batch is for `{}`",
                op.row.row_key, op.row.partition_key, batch.partition_key
            )));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if latency > Duration::ZERO {
            tokio::time::sleep(latency).await;
        }
        let result = self.apply(table, batch);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn query_page(
        &self,
        table: &str,
        partition_key: Option<&str>,
        token: Option<PageToken>,
        limit: usize,
    ) -> Result<Page, BackendError> {
        let tables = self.tables.lock().unwrap();
        let table = tables.get(table).ok_or_else(|| {
            BackendError::Unavailable(format!("table `{}` does not exist", table))
        })?;

        let resume_after = token.map(|t| {
            let raw = t.as_str().to_string();
            match raw.split_once(TOKEN_SEP) {
                Some((pk, rk)) => (pk.to_string(), rk.to_string()),
                None => (raw, String::new()),
            }
        });

        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let mut rows: Vec<Row> = Vec::with_capacity(limit);
        let mut next = None;

        for ((pk, rk), stored) in table.iter() {
            if let Some(filter) = partition_key {
                if pk.as_str() != filter {
                    continue;
                }
            }
            if let Some((after_pk, after_rk)) = &resume_after {
                if (pk.as_str(), rk.as_str()) <= (after_pk.as_str(), after_rk.as_str()) {
                    continue;
                }
            }
            if rows.len() == limit {
                if let Some(last) = rows.last() {
                    next = Some(PageToken::new(format!(
                        "{}{}{}",
                        last.partition_key, TOKEN_SEP, last.row_key
                    )));
                }
                break;
            }
            rows.push(Row {
                partition_key: pk.clone(),
                row_key: rk.clone(),
                type_tag: stored.type_tag.clone(),
                value: stored.value.clone(),
                revision: Some(Revision::new(stored.revision.to_string())),
            });
        }

        Ok(Page { rows, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::RowOp;

    fn op(pk: &str, rk: &str, value: &str, precondition: Option<Revision>) -> RowOp {
        RowOp {
            row: Row {
                partition_key: pk.to_string(),
                row_key: rk.to_string(),
                type_tag: "text".to_string(),
                value: Some(format!("\"{}\"", value)),
                revision: None,
            },
            precondition,
        }
    }

    fn batch(kind: BatchKind, pk: &str, ops: Vec<RowOp>) -> RowBatch {
        RowBatch {
            kind,
            partition_key: pk.to_string(),
            ops,
        }
    }

    async fn backend_with_table() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.create_table_if_absent("t").await.unwrap();
        backend
    }

    async fn all_rows(backend: &MemoryBackend, pk: &str) -> Vec<Row> {
        backend
            .query_page("t", Some(pk), None, MAX_PAGE_SIZE)
            .await
            .unwrap()
            .rows
    }

    #[tokio::test]
    async fn upsert_then_query_returns_stamped_rows() {
        let backend = backend_with_table().await;
        backend
            .submit_batch("t", batch(BatchKind::Upsert, "p1", vec![op("p1", "a", "1", None)]))
            .await
            .unwrap();
        let rows = all_rows(&backend, "p1").await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].revision.is_some());
    }

    #[tokio::test]
    async fn every_write_changes_the_revision() {
        let backend = backend_with_table().await;
        backend
            .submit_batch("t", batch(BatchKind::Upsert, "p1", vec![op("p1", "a", "1", None)]))
            .await
            .unwrap();
        let first = all_rows(&backend, "p1").await[0].revision.clone();
        backend
            .submit_batch("t", batch(BatchKind::Upsert, "p1", vec![op("p1", "a", "2", None)]))
            .await
            .unwrap();
        let second = all_rows(&backend, "p1").await[0].revision.clone();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn stale_precondition_fails_and_applies_nothing() {
        let backend = backend_with_table().await;
        backend
            .submit_batch(
                "t",
                batch(
                    BatchKind::Upsert,
                    "p1",
                    vec![op("p1", "a", "1", None), op("p1", "b", "1", None)],
                ),
            )
            .await
            .unwrap();
        let current = all_rows(&backend, "p1").await[0].revision.clone().unwrap();

        // row `a` guarded by a stale revision, row `b` unconditional: the
        // whole batch must be refused and `b` must keep its old value
        let stale = Revision::new("0");
        let result = backend
            .submit_batch(
                "t",
                batch(
                    BatchKind::Upsert,
                    "p1",
                    vec![op("p1", "a", "9", Some(stale)), op("p1", "b", "9", None)],
                ),
            )
            .await;
        assert!(matches!(result, Err(BackendError::RevisionMismatch { row_key }) if row_key == "a"));
        let rows = all_rows(&backend, "p1").await;
        assert_eq!(rows[1].value.as_deref(), Some("\"1\""));
        assert_eq!(rows[0].revision.clone().unwrap(), current);
    }

    #[tokio::test]
    async fn matching_precondition_succeeds() {
        let backend = backend_with_table().await;
        backend
            .submit_batch("t", batch(BatchKind::Upsert, "p1", vec![op("p1", "a", "1", None)]))
            .await
            .unwrap();
        let current = all_rows(&backend, "p1").await[0].revision.clone().unwrap();
        backend
            .submit_batch(
                "t",
                batch(BatchKind::Upsert, "p1", vec![op("p1", "a", "2", Some(current))]),
            )
            .await
            .unwrap();
        assert_eq!(all_rows(&backend, "p1").await[0].value.as_deref(), Some("\"2\""));
    }

    #[tokio::test]
    async fn insert_into_existing_row_conflicts() {
        let backend = backend_with_table().await;
        backend
            .submit_batch("t", batch(BatchKind::Insert, "p1", vec![op("p1", "a", "1", None)]))
            .await
            .unwrap();
        let result = backend
            .submit_batch("t", batch(BatchKind::Insert, "p1", vec![op("p1", "a", "2", None)]))
            .await;
        assert!(matches!(result, Err(BackendError::RevisionMismatch { .. })));
    }

    #[tokio::test]
    async fn delete_removes_the_partition() {
        let backend = backend_with_table().await;
        backend
            .submit_batch(
                "t",
                batch(
                    BatchKind::Upsert,
                    "p1",
                    vec![op("p1", "a", "1", None), op("p1", "b", "2", None)],
                ),
            )
            .await
            .unwrap();
        backend
            .submit_batch(
                "t",
                batch(
                    BatchKind::Delete,
                    "p1",
                    vec![op("p1", "a", "", None), op("p1", "b", "", None)],
                ),
            )
            .await
            .unwrap();
        assert!(all_rows(&backend, "p1").await.is_empty());
    }

    #[tokio::test]
    async fn structural_violations_are_rejected() {
        let backend = backend_with_table().await;

        let oversized: Vec<RowOp> = (0..MAX_BATCH_SIZE + 1)
            .map(|i| op("p1", &format!("f{}", i), "x", None))
            .collect();
        assert!(matches!(
            backend.submit_batch("t", batch(BatchKind::Upsert, "p1", oversized)).await,
            Err(BackendError::Rejected(_))
        ));

        let mixed = vec![op("p1", "a", "x", None), op("p2", "b", "x", None)];
        assert!(matches!(
            backend.submit_batch("t", batch(BatchKind::Upsert, "p1", mixed)).await,
            Err(BackendError::Rejected(_))
        ));

        assert!(matches!(
            backend.submit_batch("t", batch(BatchKind::Upsert, "p1", vec![])).await,
            Err(BackendError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn paging_walks_the_whole_table_without_duplicates() {
        let backend = backend_with_table().await;
        for p in 0..3 {
            let pk = format!("p{}", p);
            let ops = (0..5).map(|i| op(&pk, &format!("f{}", i), "v", None)).collect();
            backend
                .submit_batch("t", batch(BatchKind::Upsert, &pk, ops))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut token = None;
        loop {
            let page = backend.query_page("t", None, token, 4).await.unwrap();
            assert!(page.rows.len() <= 4);
            seen.extend(page.rows.into_iter().map(|r| (r.partition_key, r.row_key)));
            match page.next {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        assert_eq!(seen.len(), 15);
        let mut deduped = seen.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), 15, "no row may appear twice across pages");
    }

    #[tokio::test]
    async fn partition_filter_only_sees_its_own_rows() {
        let backend = backend_with_table().await;
        for pk in ["p1", "p2"] {
            backend
                .submit_batch("t", batch(BatchKind::Upsert, pk, vec![op(pk, "a", "v", None)]))
                .await
                .unwrap();
        }
        let rows = all_rows(&backend, "p2").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].partition_key, "p2");
    }

    #[tokio::test]
    async fn fail_after_poisons_later_submissions() {
        let backend = backend_with_table().await;
        backend.fail_after(1);
        assert!(backend
            .submit_batch("t", batch(BatchKind::Upsert, "p1", vec![op("p1", "a", "1", None)]))
            .await
            .is_ok());
        assert!(matches!(
            backend
                .submit_batch("t", batch(BatchKind::Upsert, "p1", vec![op("p1", "b", "1", None)]))
                .await,
            Err(BackendError::Unavailable(_))
        ));
    }
}
