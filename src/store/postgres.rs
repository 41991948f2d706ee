//! PostgreSQL keyword store backed by sqlx.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Connection, PgPool, Postgres, Row};
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::error::{QueryError, QueryResult};
use crate::frame::RawPoint;
use crate::identifier::{self, SafeIdentifier};
use crate::store::{Datasource, DatasourceFactory, SeriesSelector, StoreConnection};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn count_statement(table: &SafeIdentifier) -> String {
    format!(
        "select count(time) from {} where keyword = $1 and time >= $2 and time <= $3",
        table
    )
}

pub fn select_statement(table: &SafeIdentifier, value_column: &SafeIdentifier) -> String {
    format!(
        "select time, {} from {} where keyword = $1 and time >= $2 and time <= $3",
        value_column, table
    )
}

pub fn services_statement(meta_table: &SafeIdentifier) -> String {
    format!(
        "select distinct service from {} order by service asc",
        meta_table
    )
}

pub fn keywords_statement(meta_table: &SafeIdentifier) -> String {
    format!(
        "select distinct keyword from {} where service = $1 order by keyword asc",
        meta_table
    )
}

/// Creates one lazily connected pool per datasource configuration
#[derive(Debug, Clone)]
pub struct PgDatasourceFactory {
    max_connections: u32,
    value_column: SafeIdentifier,
}

impl PgDatasourceFactory {
    pub fn new(max_connections: u32, value_column: &str) -> QueryResult<Self> {
        Ok(Self {
            max_connections: max_connections.max(1),
            value_column: identifier::sanitize(value_column)?,
        })
    }
}

impl DatasourceFactory for PgDatasourceFactory {
    type Source = PgDatasource;

    fn create(&self, config: ConnectionConfig) -> QueryResult<PgDatasource> {
        // sslmode=disable matches the archive deployment
        let options = PgConnectOptions::new()
            .host(&config.server)
            .port(config.port)
            .username(&config.role)
            .database(&config.database)
            .ssl_mode(PgSslMode::Disable);

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);

        info!(
            "Created keyword datasource for {}:{}/{}",
            config.server, config.port, config.database
        );

        Ok(PgDatasource {
            config,
            pool,
            value_column: self.value_column.clone(),
        })
    }
}

pub struct PgDatasource {
    config: ConnectionConfig,
    pool: PgPool,
    value_column: SafeIdentifier,
}

#[async_trait]
impl Datasource for PgDatasource {
    type Connection = PgStoreConnection;

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn connect(&self) -> QueryResult<PgStoreConnection> {
        let conn = self.pool.acquire().await.map_err(QueryError::connection)?;
        Ok(PgStoreConnection {
            conn,
            value_column: self.value_column.clone(),
            statement: String::new(),
        })
    }

    async fn dispose(&self) {
        debug!("Closing pool for {}", self.config.server);
        self.pool.close().await;
    }
}

/// A pooled connection; returned to the pool on drop.
pub struct PgStoreConnection {
    conn: PoolConnection<Postgres>,
    value_column: SafeIdentifier,
    // Backs the statement text borrowed by an in-flight row stream.
    statement: String,
}

/// Map a row stream failure. Before the first row arrives the statement
/// itself failed (unknown column, permissions); afterwards the cursor broke.
pub fn stream_error(err: sqlx::Error, rows_read: usize) -> QueryError {
    if rows_read == 0 {
        QueryError::store(err)
    } else {
        QueryError::cursor(err)
    }
}

fn decode_point(row: PgRow) -> QueryResult<RawPoint> {
    let time: f64 = row.try_get(0).map_err(QueryError::row_scan)?;
    let value: f64 = row.try_get(1).map_err(QueryError::row_scan)?;
    Ok(RawPoint { time, value })
}

#[async_trait]
impl StoreConnection for PgStoreConnection {
    async fn count_points(&mut self, selector: &SeriesSelector<'_>) -> QueryResult<Option<i64>> {
        let sql = count_statement(selector.table);
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(selector.keyword)
            .bind(selector.from)
            .bind(selector.to)
            .fetch_optional(&mut *self.conn)
            .await;

        match count {
            Ok(count) => Ok(count),
            Err(sqlx::Error::RowNotFound) => Ok(None),
            Err(e) => Err(QueryError::store(e)),
        }
    }

    fn stream_points<'a>(
        &'a mut self,
        selector: SeriesSelector<'a>,
    ) -> BoxStream<'a, QueryResult<RawPoint>> {
        let PgStoreConnection {
            conn,
            value_column,
            statement,
        } = self;
        *statement = select_statement(selector.table, value_column);
        let sql: &'a String = statement;
        let mut rows_read = 0usize;

        sqlx::query(sql)
            .bind(selector.keyword)
            .bind(selector.from)
            .bind(selector.to)
            .fetch(&mut **conn)
            .map(move |row| match row {
                Ok(row) => {
                    rows_read += 1;
                    decode_point(row)
                }
                Err(e) => Err(stream_error(e, rows_read)),
            })
            .boxed()
    }

    async fn list_services(&mut self, meta_table: &SafeIdentifier) -> QueryResult<Vec<String>> {
        let sql = services_statement(meta_table);
        sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(QueryError::store)
    }

    async fn list_keywords(
        &mut self,
        meta_table: &SafeIdentifier,
        service: &str,
    ) -> QueryResult<Vec<String>> {
        let sql = keywords_statement(meta_table);
        sqlx::query_scalar::<_, String>(&sql)
            .bind(service)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(QueryError::store)
    }

    async fn ping(&mut self) -> QueryResult<()> {
        self.conn.ping().await.map_err(QueryError::connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_quote_identifiers_and_bind_values() {
        let table = identifier::sanitize("dcs1").unwrap();
        let value = identifier::sanitize("binvalue").unwrap();

        assert_eq!(
            count_statement(&table),
            "select count(time) from \"dcs1\" where keyword = $1 and time >= $2 and time <= $3"
        );
        assert_eq!(
            select_statement(&table, &value),
            "select time, \"binvalue\" from \"dcs1\" where keyword = $1 and time >= $2 and time <= $3"
        );
    }

    #[test]
    fn catalog_statements_use_metadata_table() {
        let meta = identifier::sanitize("ktlmeta").unwrap();
        assert_eq!(
            services_statement(&meta),
            "select distinct service from \"ktlmeta\" order by service asc"
        );
        assert!(keywords_statement(&meta).contains("where service = $1"));
    }

    #[test]
    fn failure_before_first_row_is_a_statement_error() {
        let err = stream_error(
            sqlx::Error::Protocol("column \"nosuchcol\" does not exist".into()),
            0,
        );
        assert!(matches!(err, QueryError::Store(ref m) if m.contains("nosuchcol")));
    }

    #[test]
    fn failure_after_rows_is_a_cursor_error() {
        let err = stream_error(sqlx::Error::PoolClosed, 3);
        assert!(matches!(err, QueryError::Cursor(_)));
    }

    #[test]
    fn factory_rejects_unsafe_value_column() {
        assert!(PgDatasourceFactory::new(5, "binvalue; drop table x").is_err());
    }

    #[tokio::test]
    async fn create_does_not_connect_eagerly() {
        let factory = PgDatasourceFactory::new(2, "binvalue").unwrap();
        let config = ConnectionConfig::from_json(&serde_json::json!({
            "server": "127.0.0.1", "port": 1, "role": "nobody",
            "database": "none", "metatable": "ktlmeta"
        }))
        .unwrap();
        let source = factory.create(config).unwrap();
        assert_eq!(source.config().database, "none");
    }
}
