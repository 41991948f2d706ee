//! In-memory keyword store for tests and local demos.
//!
//! Mirrors the PostgreSQL layout (one table per service plus a metadata table)
//! and can simulate the failures a live archive produces: unreachable servers,
//! failing statements, undecodable rows, broken cursors and rows that arrive
//! between the count and fetch phases.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::error::{QueryError, QueryResult};
use crate::frame::RawPoint;
use crate::identifier::SafeIdentifier;
use crate::store::{Datasource, DatasourceFactory, SeriesSelector, StoreConnection};

#[derive(Debug, Clone)]
struct StoredRow {
    keyword: String,
    point: RawPoint,
}

/// Failures to inject into subsequent store calls
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    pub connect: Option<String>,
    pub ping: Option<String>,
    pub count: Option<String>,
    /// Count statement succeeds but yields no row
    pub count_no_row: bool,
    pub select: Option<String>,
    /// Index of the first row that fails to decode
    pub scan_error_at: Option<usize>,
    /// Index at which the cursor breaks
    pub cursor_error_at: Option<usize>,
    pub catalog: Option<String>,
    /// Count statements never complete
    pub stall_count: bool,
    /// Row streams never produce an item
    pub stall_fetch: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<StoredRow>>,
    metadata: Vec<(String, String)>,
    // Rows that land in a table right after its next count statement
    late_rows: HashMap<String, Vec<StoredRow>>,
    failures: FailurePlan,
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    released: AtomicUsize,
    created: AtomicUsize,
    disposed: AtomicUsize,
}

/// Shared in-memory archive. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    counters: Arc<Counters>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a keyword in the metadata table
    pub fn add_keyword(&self, service: &str, keyword: &str) {
        let mut state = self.state();
        state
            .metadata
            .push((service.to_string(), keyword.to_string()));
        state.tables.entry(service.to_string()).or_default();
    }

    /// Append a sample to a service table
    pub fn insert(&self, service: &str, keyword: &str, time: f64, value: f64) {
        self.state()
            .tables
            .entry(service.to_string())
            .or_default()
            .push(StoredRow {
                keyword: keyword.to_string(),
                point: RawPoint { time, value },
            });
    }

    /// Queue a sample that appears only after the next count on `service`
    pub fn insert_after_count(&self, service: &str, keyword: &str, time: f64, value: f64) {
        self.state()
            .late_rows
            .entry(service.to_string())
            .or_default()
            .push(StoredRow {
                keyword: keyword.to_string(),
                point: RawPoint { time, value },
            });
    }

    pub fn set_failures(&self, failures: FailurePlan) {
        self.state().failures = failures;
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.counters.disposed.load(Ordering::SeqCst)
    }

    /// Connections currently checked out
    pub fn open_connections(&self) -> usize {
        self.opened() - self.released()
    }
}

impl DatasourceFactory for MemoryStore {
    type Source = MemoryDatasource;

    fn create(&self, config: ConnectionConfig) -> QueryResult<MemoryDatasource> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        info!("Creating in-memory keyword datasource for {}", config.server);
        Ok(MemoryDatasource::new(config, self.clone()))
    }
}

pub struct MemoryDatasource {
    config: ConnectionConfig,
    store: MemoryStore,
    // Connections of this instance still checked out
    checked_out: Arc<AtomicUsize>,
}

impl MemoryDatasource {
    pub fn new(config: ConnectionConfig, store: MemoryStore) -> Self {
        Self {
            config,
            store,
            checked_out: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Datasource for MemoryDatasource {
    type Connection = MemoryConnection;

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn connect(&self) -> QueryResult<MemoryConnection> {
        if let Some(message) = self.store.state().failures.connect.clone() {
            return Err(QueryError::Connection(message));
        }
        let opened = self.store.counters.opened.fetch_add(1, Ordering::SeqCst) + 1;
        self.checked_out.fetch_add(1, Ordering::SeqCst);
        debug!("Memory connection opened, total opened: {}", opened);
        Ok(MemoryConnection {
            store: self.store.clone(),
            checked_out: self.checked_out.clone(),
        })
    }

    /// Waits for every checked-out connection to come back, like closing a pool.
    async fn dispose(&self) {
        while self.checked_out.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.store.counters.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Released exactly once, when dropped
pub struct MemoryConnection {
    store: MemoryStore,
    checked_out: Arc<AtomicUsize>,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.checked_out.fetch_sub(1, Ordering::SeqCst);
        let released = self.store.counters.released.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Memory connection released, total released: {}", released);
    }
}

fn missing_table(name: &str) -> QueryError {
    QueryError::Store(format!("relation \"{}\" does not exist", name))
}

fn in_window(row: &StoredRow, selector: &SeriesSelector<'_>) -> bool {
    row.keyword == selector.keyword
        && row.point.time >= selector.from
        && row.point.time <= selector.to
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn count_points(&mut self, selector: &SeriesSelector<'_>) -> QueryResult<Option<i64>> {
        let stall = self.store.state().failures.stall_count;
        if stall {
            return std::future::pending().await;
        }

        let mut state = self.store.state();
        if let Some(message) = state.failures.count.clone() {
            return Err(QueryError::Store(message));
        }

        let name = selector.table.name();
        let count = state
            .tables
            .get(name)
            .ok_or_else(|| missing_table(name))?
            .iter()
            .filter(|row| in_window(row, selector))
            .count();

        if let Some(late) = state.late_rows.remove(name) {
            state.tables.entry(name.to_string()).or_default().extend(late);
        }

        if state.failures.count_no_row {
            return Ok(None);
        }
        Ok(Some(count as i64))
    }

    fn stream_points<'a>(
        &'a mut self,
        selector: SeriesSelector<'a>,
    ) -> BoxStream<'a, QueryResult<RawPoint>> {
        let state = self.store.state();
        let failures = state.failures.clone();

        if failures.stall_fetch {
            return stream::pending().boxed();
        }
        if let Some(message) = failures.select {
            return stream::iter(vec![Err(QueryError::Store(message))]).boxed();
        }

        let name = selector.table.name();
        let rows = match state.tables.get(name) {
            Some(rows) => rows,
            None => return stream::iter(vec![Err(missing_table(name))]).boxed(),
        };

        let mut items = Vec::new();
        for (index, row) in rows.iter().filter(|row| in_window(row, &selector)).enumerate() {
            if failures.cursor_error_at == Some(index) {
                // Before the first row the driver cannot tell a broken cursor
                // from a failed statement.
                let message = "connection reset by peer".to_string();
                items.push(Err(if index == 0 {
                    QueryError::Store(message)
                } else {
                    QueryError::Cursor(message)
                }));
                break;
            }
            if failures.scan_error_at == Some(index) {
                items.push(Err(QueryError::RowScan(
                    "converting NULL to float64 is unsupported".into(),
                )));
                break;
            }
            items.push(Ok(row.point));
        }

        stream::iter(items).boxed()
    }

    async fn list_services(&mut self, _meta_table: &SafeIdentifier) -> QueryResult<Vec<String>> {
        let state = self.store.state();
        if let Some(message) = state.failures.catalog.clone() {
            return Err(QueryError::Store(message));
        }
        Ok(state
            .metadata
            .iter()
            .map(|(service, _)| service.clone())
            .collect())
    }

    async fn list_keywords(
        &mut self,
        _meta_table: &SafeIdentifier,
        service: &str,
    ) -> QueryResult<Vec<String>> {
        let state = self.store.state();
        if let Some(message) = state.failures.catalog.clone() {
            return Err(QueryError::Store(message));
        }
        Ok(state
            .metadata
            .iter()
            .filter(|(owner, _)| owner == service)
            .map(|(_, keyword)| keyword.clone())
            .collect())
    }

    async fn ping(&mut self) -> QueryResult<()> {
        match self.store.state().failures.ping.clone() {
            Some(message) => Err(QueryError::Connection(message)),
            None => Ok(()),
        }
    }
}
