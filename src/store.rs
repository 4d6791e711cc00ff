//! The public facade. Composes the mapper, the batch executor and the table
//! client into the five record operations. The store holds no record state
//! and no locks; every call works on its own row set, so callers may invoke
//! it concurrently from any number of tasks.

use crate::backend::{BatchKind, TableBackend};
use crate::client::TableClient;
use crate::executor::BatchExecutor;
use crate::mapper;
use crate::record::{Record, VersionTag};
use crate::row::{Row, RowOp};
use crate::settings::StoreSettings;
use crate::StoreError;
use futures::TryStreamExt;
use std::collections::HashMap;
use std::sync::Arc;

pub struct EntityStore {
    client: TableClient,
    executor: BatchExecutor,
}

impl EntityStore {
    pub fn new(backend: Arc<dyn TableBackend>, settings: StoreSettings) -> Self {
        let executor = BatchExecutor::new(Arc::clone(&backend), settings.tune_speed);
        let client = TableClient::new(backend, settings);
        EntityStore { client, executor }
    }

    pub fn with_defaults(backend: Arc<dyn TableBackend>) -> Self {
        Self::new(backend, StoreSettings::default())
    }

    /// Loads the record stored under `id`, or [`StoreError::NotFound`] if its
    /// partition holds no rows.
    pub async fn get<R: Record>(&self, id: &str) -> Result<R, StoreError> {
        let table = self.client.table(R::table()).await?;
        let rows: Vec<Row> = self.client.query_partition(&table, id).try_collect().await?;
        mapper::compose(id, &rows)
    }

    /// Every record in the table, in backend enumeration order. The order is
    /// not guaranteed to be stable across calls.
    pub async fn load_all<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let table = self.client.table(R::table()).await?;
        let rows: Vec<Row> = self.client.query_all(&table).try_collect().await?;

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<Row>> = HashMap::new();
        for row in rows {
            let pk = row.partition_key.clone();
            if !groups.contains_key(&pk) {
                order.push(pk.clone());
            }
            groups.entry(pk).or_default().push(row);
        }

        let mut records = Vec::with_capacity(order.len());
        for pk in order {
            let group = &groups[&pk];
            records.push(mapper::compose(&pk, group)?);
        }
        Ok(records)
    }

    /// Persists a new record under a freshly generated id and returns the id.
    /// The record's own id and version tag are ignored; all rows are written
    /// unconditionally.
    pub async fn create<R: Record>(&self, record: &R) -> Result<String, StoreError> {
        let id = new_record_id();
        let table = self.client.table(R::table()).await?;
        let (_, ops) = mapper::decompose_as(record, &id, &VersionTag::default())?;
        self.executor.execute(BatchKind::Upsert, &table, ops).await?;
        Ok(id)
    }

    /// Rewrites every field row of `record`, each guarded by the revision its
    /// version tag captured at read time. Fails with
    /// [`StoreError::ConcurrencyConflict`] — and writes nothing — if any
    /// guarded row changed since; the caller re-reads and retries.
    pub async fn update<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let table = self.client.table(R::table()).await?;
        let (_, ops) = mapper::decompose(record)?;
        self.executor.execute(BatchKind::Upsert, &table, ops).await
    }

    /// Removes every row of the record's partition. Fails with
    /// [`StoreError::NotFound`] when there is nothing to remove.
    pub async fn delete<R: Record>(&self, id: &str) -> Result<(), StoreError> {
        let table = self.client.table(R::table()).await?;
        let rows: Vec<Row> = self.client.query_partition(&table, id).try_collect().await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        let ops: Vec<RowOp> = rows
            .into_iter()
            .map(|row| RowOp {
                row,
                precondition: None,
            })
            .collect();
        self.executor.execute(BatchKind::Delete, &table, ops).await
    }
}

/// Collision-free 128-bit random identifier, hex encoded.
fn new_record_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}
