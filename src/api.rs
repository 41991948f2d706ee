//! HTTP surface: batch queries, editor discovery and health.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ConnectionConfig;
use crate::context::QueryContext;
use crate::error::{ApiError, QueryError, QueryResult};
use crate::health::{self, HealthReport};
use crate::registry::{InstanceRegistry, DEFAULT_UID};
use crate::service::QueryService;
use crate::store::{Datasource, DatasourceFactory};
use crate::translator::{DataQuery, DataResponse};

pub const SERVICE_NAME: &str = "keyword-datasource";

/// Shared handler state
pub struct AppState<F: DatasourceFactory> {
    registry: Arc<InstanceRegistry<F>>,
    default_settings: Option<Arc<serde_json::Value>>,
    query_timeout: Option<Duration>,
}

impl<F: DatasourceFactory> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            default_settings: self.default_settings.clone(),
            query_timeout: self.query_timeout,
        }
    }
}

impl<F: DatasourceFactory> AppState<F> {
    pub fn new(
        factory: F,
        default_settings: Option<serde_json::Value>,
        query_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry: Arc::new(InstanceRegistry::new(factory)),
            default_settings: default_settings.map(Arc::new),
            query_timeout,
        }
    }

    pub fn registry(&self) -> &InstanceRegistry<F> {
        &self.registry
    }

    fn context(&self) -> QueryContext {
        match self.query_timeout {
            Some(timeout) => QueryContext::with_timeout(timeout),
            None => QueryContext::background(),
        }
    }

    fn default_config(&self) -> QueryResult<ConnectionConfig> {
        match &self.default_settings {
            Some(settings) => ConnectionConfig::from_json(settings),
            None => Err(QueryError::settings("no datasource settings configured")),
        }
    }

    /// Settings sent with the request win, then the registered instance for
    /// the uid, then the configured defaults.
    async fn resolve(
        &self,
        uid: Option<&str>,
        settings: Option<&serde_json::Value>,
    ) -> QueryResult<QueryService<F::Source>> {
        let uid = uid.unwrap_or(DEFAULT_UID);
        let source = match settings {
            Some(settings) => {
                let config = ConnectionConfig::from_json(settings)?;
                self.registry.get_or_create(uid, config).await?
            }
            None => match self.registry.get(uid).await {
                Some(source) => source,
                None => self.registry.get_or_create(uid, self.default_config()?).await?,
            },
        };
        Ok(QueryService::new(source))
    }
}

/// Build the router. CORS is left to the caller.
pub fn router<F: DatasourceFactory>(state: AppState<F>) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/check", post(health_check::<F>))
        .route("/query", post(query_data::<F>))
        .route("/services", get(services::<F>).fallback(ignored))
        .route("/keywords", get(keywords::<F>).fallback(ignored))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub datasource_uid: Option<String>,
    pub settings: Option<serde_json::Value>,
    #[serde(default)]
    pub queries: Vec<DataQuery>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub results: BTreeMap<String, DataResponse>,
}

async fn query_data<F: DatasourceFactory>(
    State(state): State<AppState<F>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let service = state
        .resolve(req.datasource_uid.as_deref(), req.settings.as_ref())
        .await?;
    let results = service.query_data(&state.context(), req.queries).await?;
    Ok(Json(QueryResponse { results }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogParams {
    pub datasource_uid: Option<String>,
    pub service: Option<String>,
}

#[derive(Debug, Serialize)]
struct ServicesResponse {
    services: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct KeywordsResponse {
    keywords: BTreeMap<String, String>,
}

fn encode<T: Serialize>(body: &T) -> Result<Json<serde_json::Value>, ApiError> {
    serde_json::to_value(body)
        .map(Json)
        .map_err(|e| ApiError::Encoding(e.to_string()))
}

async fn services<F: DatasourceFactory>(
    State(state): State<AppState<F>>,
    Query(params): Query<CatalogParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = state.resolve(params.datasource_uid.as_deref(), None).await?;
    let entries = service.services(&state.context()).await?;

    let services = entries
        .into_iter()
        .map(|entry| (entry.key, entry.display_value))
        .collect();
    encode(&ServicesResponse { services })
}

async fn keywords<F: DatasourceFactory>(
    State(state): State<AppState<F>>,
    Query(params): Query<CatalogParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = match params.service.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            warn!("keywords requested without a service");
            return Err(ApiError::BadRequest("missing service".into()));
        }
    };

    let service = state.resolve(params.datasource_uid.as_deref(), None).await?;
    let entries = service.keywords(&state.context(), &name).await?;

    let keywords = entries
        .into_iter()
        .map(|entry| (entry.key, entry.display_value))
        .collect();
    encode(&KeywordsResponse { keywords })
}

// Discovery endpoints answer other methods with an empty body.
async fn ignored() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckRequest {
    pub datasource_uid: Option<String>,
    pub settings: Option<serde_json::Value>,
}

async fn health_check<F: DatasourceFactory>(
    State(state): State<AppState<F>>,
    body: Option<Json<HealthCheckRequest>>,
) -> Json<HealthReport> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let uid = req.datasource_uid.as_deref().unwrap_or(DEFAULT_UID);

    let config = match &req.settings {
        Some(settings) => ConnectionConfig::from_json(settings),
        None => match state.registry.get(uid).await {
            Some(source) => Ok(source.config().clone()),
            None => state.default_config(),
        },
    };

    let report = health::check_health(state.registry.factory(), &state.context(), config).await;
    info!("health check for {}: {:?}", uid, report.status);
    Json(report)
}

async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
