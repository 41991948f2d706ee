//! Keyword store access.
//!
//! Each service owns a table of `(keyword, time, value)` rows where `time` is
//! fractional Unix seconds. A metadata table lists every `(service, keyword)`
//! pair. [`Datasource`] hands out one [`StoreConnection`] per batch; dropping the
//! connection releases it.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::ConnectionConfig;
use crate::error::QueryResult;
use crate::frame::RawPoint;
use crate::identifier::SafeIdentifier;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryDatasource, MemoryStore};
pub use postgres::{PgDatasource, PgDatasourceFactory};

/// Selects the rows of one keyword inside a time window.
#[derive(Debug, Clone, Copy)]
pub struct SeriesSelector<'a> {
    pub table: &'a SafeIdentifier,
    pub keyword: &'a str,
    /// Inclusive lower bound, fractional Unix seconds
    pub from: f64,
    /// Inclusive upper bound, fractional Unix seconds
    pub to: f64,
}

/// A live connection to the keyword store.
#[async_trait]
pub trait StoreConnection: Send {
    /// Number of rows matching `selector`. `None` when the store returns no row.
    async fn count_points(&mut self, selector: &SeriesSelector<'_>) -> QueryResult<Option<i64>>;

    /// Rows matching `selector` in store order.
    ///
    /// Issuing the statement may fail (yielded as the first item); decoding a
    /// row yields `RowScan`; a failing cursor yields `Cursor`.
    fn stream_points<'a>(
        &'a mut self,
        selector: SeriesSelector<'a>,
    ) -> BoxStream<'a, QueryResult<RawPoint>>;

    /// Every service named in the metadata table
    async fn list_services(&mut self, meta_table: &SafeIdentifier) -> QueryResult<Vec<String>>;

    /// Every keyword of `service` named in the metadata table
    async fn list_keywords(
        &mut self,
        meta_table: &SafeIdentifier,
        service: &str,
    ) -> QueryResult<Vec<String>>;

    /// Round trip to the server to prove the connection is alive
    async fn ping(&mut self) -> QueryResult<()>;
}

/// A configured store that connections are drawn from.
#[async_trait]
pub trait Datasource: Send + Sync + 'static {
    type Connection: StoreConnection + 'static;

    fn config(&self) -> &ConnectionConfig;

    async fn connect(&self) -> QueryResult<Self::Connection>;

    /// Teardown hook, called before the registry replaces this instance.
    async fn dispose(&self) {}
}

/// Builds datasources from connection descriptors.
pub trait DatasourceFactory: Send + Sync + 'static {
    type Source: Datasource;

    fn create(&self, config: ConnectionConfig) -> QueryResult<Self::Source>;
}
