//! Batch execution over one datasource instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::catalog::{self, CatalogEntry};
use crate::context::QueryContext;
use crate::error::QueryResult;
use crate::store::Datasource;
use crate::translator::{self, DataQuery, DataResponse, SeriesQuery};

/// Runs batches and catalog lookups against one datasource.
pub struct QueryService<D: Datasource> {
    source: Arc<D>,
}

impl<D: Datasource> Clone for QueryService<D> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<D: Datasource> QueryService<D> {
    pub fn new(source: Arc<D>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    /// Answer every query in the batch on a single connection.
    ///
    /// Only a failure to connect aborts the batch. Every other failure lands in
    /// the response of the query that caused it. A later query with a repeated
    /// request id replaces the earlier result.
    pub async fn query_data(
        &self,
        ctx: &QueryContext,
        queries: Vec<DataQuery>,
    ) -> QueryResult<BTreeMap<String, DataResponse>> {
        let mut responses = BTreeMap::new();
        if queries.is_empty() {
            return Ok(responses);
        }

        let mut conn = ctx.run(self.source.connect()).await.map_err(|e| {
            error!("unable to open connection: {}", e);
            e
        })?;
        info!("running batch of {} queries", queries.len());

        for raw in queries {
            let request_id = raw.id();
            let response = match SeriesQuery::try_from(raw) {
                Ok(query) => translator::translate(&mut conn, ctx, &query).await,
                Err(err) => {
                    warn!("query {} rejected: {}", request_id, err);
                    DataResponse::error(err)
                }
            };

            if let Some(err) = &response.error {
                debug!("query {} failed ({}): {}", request_id, err.category(), err);
            }
            if responses.insert(request_id.clone(), response).is_some() {
                warn!("duplicate request id {}, keeping the later result", request_id);
            }
        }

        Ok(responses)
    }

    /// Services listed in the configured metadata table
    pub async fn services(&self, ctx: &QueryContext) -> QueryResult<Vec<CatalogEntry>> {
        let mut conn = ctx.run(self.source.connect()).await?;
        catalog::list_services(&mut conn, ctx, &self.source.config().metatable).await
    }

    /// Keywords of `service` listed in the configured metadata table
    pub async fn keywords(
        &self,
        ctx: &QueryContext,
        service: &str,
    ) -> QueryResult<Vec<CatalogEntry>> {
        let mut conn = ctx.run(self.source.connect()).await?;
        catalog::list_keywords(&mut conn, ctx, &self.source.config().metatable, service).await
    }
}
