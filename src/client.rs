//! Backend-facing client. Owns the table handles (create-if-absent, cached
//! per logical name), applies transport tuning exactly once per distinct
//! endpoint, and turns the backend's paged queries into lazy row streams
//! that follow continuation tokens until the backend runs out of pages or a
//! configured item cap is reached.

use crate::backend::{PageToken, TableBackend, TransportTuning, MAX_PAGE_SIZE};
use crate::row::Row;
use crate::settings::StoreSettings;
use crate::{debug, info, StoreError};
use futures::stream::{self, BoxStream, StreamExt};
use futures_util::stream::TryStreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

/// Endpoints that already received transport tuning. Process-wide on purpose:
/// the tuning mutates process-level transport state, so a second client for
/// the same endpoint must not re-apply it.
fn tuned_endpoints() -> &'static Mutex<HashSet<String>> {
    static TUNED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    TUNED.get_or_init(|| Mutex::new(HashSet::new()))
}

struct ScanState {
    backend: Arc<dyn TableBackend>,
    table: String,
    partition_key: Option<String>,
    page_size: usize,
    remaining: usize,
    token: Option<PageToken>,
    done: bool,
}

pub struct TableClient {
    backend: Arc<dyn TableBackend>,
    settings: StoreSettings,
    ensured: Mutex<HashSet<String>>,
}

impl TableClient {
    pub fn new(backend: Arc<dyn TableBackend>, settings: StoreSettings) -> Self {
        let endpoint = backend.endpoint().to_string();
        {
            let mut tuned = tuned_endpoints().lock().unwrap();
            if tuned.insert(endpoint.clone()) {
                let tuning = TransportTuning {
                    connection_limit: settings.transport.connection_limit,
                    disable_nagle: settings.transport.disable_nagle,
                    disable_expect_continue: settings.transport.disable_expect_continue,
                };
                backend.tune_transport(&tuning);
                info!("transport tuning applied to endpoint {}", endpoint);
            }
        }
        TableClient {
            backend,
            settings,
            ensured: Mutex::new(HashSet::new()),
        }
    }

    /// Resolves the physical name of a logical table, creating the table on
    /// first touch. Later calls hit the cache and never reach the backend.
    pub async fn table(&self, logical: &str) -> Result<String, StoreError> {
        let physical = format!("{}{}", logical, self.settings.table_suffix);
        let known = self.ensured.lock().unwrap().contains(logical);
        if !known {
            self.backend
                .create_table_if_absent(&physical)
                .await
                .map_err(StoreError::from)?;
            self.ensured.lock().unwrap().insert(logical.to_string());
            debug!("table {} ready", physical);
        }
        Ok(physical)
    }

    /// All rows of one partition, in backend enumeration order.
    pub fn query_partition(
        &self,
        table: &str,
        partition_key: &str,
    ) -> BoxStream<'static, Result<Row, StoreError>> {
        self.scan(table, Some(partition_key.to_string()))
    }

    /// Every row of the table, in backend enumeration order.
    pub fn query_all(&self, table: &str) -> BoxStream<'static, Result<Row, StoreError>> {
        self.scan(table, None)
    }

    /// Fresh pagination walk per call: lazy, finite, not restartable.
    fn scan(
        &self,
        table: &str,
        partition_key: Option<String>,
    ) -> BoxStream<'static, Result<Row, StoreError>> {
        let state = ScanState {
            backend: Arc::clone(&self.backend),
            table: table.to_string(),
            partition_key,
            page_size: self.settings.page_size.clamp(1, MAX_PAGE_SIZE),
            remaining: self.settings.max_items.unwrap_or(usize::MAX),
            token: None,
            done: false,
        };

        stream::try_unfold(state, |mut state| async move {
            if state.done || state.remaining == 0 {
                return Ok::<_, StoreError>(None);
            }
            let limit = state.page_size.min(state.remaining);
            let page = state
                .backend
                .query_page(
                    &state.table,
                    state.partition_key.as_deref(),
                    state.token.take(),
                    limit,
                )
                .await
                .map_err(StoreError::from)?;
            state.remaining = state.remaining.saturating_sub(page.rows.len());
            state.done = page.next.is_none();
            state.token = page.next;
            Ok(Some((page.rows, state)))
        })
        .map_ok(|rows| stream::iter(rows.into_iter().map(Ok::<Row, StoreError>)))
        .try_flatten()
        .boxed()
    }
}
