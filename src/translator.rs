//! Turns one editor query into one response frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::QueryContext;
use crate::error::{QueryError, QueryResult};
use crate::fetcher;
use crate::frame::{SeriesFrame, TimeRange};
use crate::identifier;
use crate::store::StoreConnection;
use crate::units::UnitConversion;

/// Separator between service and keyword in a query identifier
pub const IDENTIFIER_SEPARATOR: char = '.';

/// One query as sent by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    /// Editor payload, decoded separately so a bad payload only fails its own query
    #[serde(flatten)]
    pub model: serde_json::Map<String, serde_json::Value>,
}

impl DataQuery {
    /// `requestId`, falling back to the host's `refId`
    pub fn id(&self) -> String {
        self.request_id
            .clone()
            .or_else(|| self.ref_id.clone())
            .unwrap_or_default()
    }
}

/// Fields the query editor writes
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryModel {
    pub query_text: String,
    pub unit_conversion: i64,
    pub format: String,
    pub interval_ms: Option<i64>,
    pub max_data_points: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesQuery {
    pub request_id: String,
    pub query_text: String,
    pub unit_conversion: i64,
    pub range: TimeRange,
}

impl SeriesQuery {
    pub fn new(request_id: &str, query_text: &str, unit_conversion: i64, range: TimeRange) -> Self {
        Self {
            request_id: request_id.to_string(),
            query_text: query_text.to_string(),
            unit_conversion,
            range,
        }
    }
}

impl TryFrom<DataQuery> for SeriesQuery {
    type Error = QueryError;

    fn try_from(raw: DataQuery) -> QueryResult<Self> {
        let request_id = raw.id();
        let model: QueryModel = serde_json::from_value(serde_json::Value::Object(raw.model))
            .map_err(|e| QueryError::MalformedQuery(e.to_string()))?;

        if model.format.is_empty() {
            warn!("format is empty, defaulting to time series");
        }
        debug!(
            "query {}: interval_ms={:?} max_data_points={:?}",
            request_id, model.interval_ms, model.max_data_points
        );

        Ok(SeriesQuery {
            request_id,
            query_text: model.query_text,
            unit_conversion: model.unit_conversion,
            range: TimeRange::new(raw.range_start, raw.range_end),
        })
    }
}

/// Service and keyword named by a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTarget {
    pub service: String,
    pub keyword: String,
}

/// Split "service.keyword" on the first separator.
pub fn parse_identifier(text: &str) -> QueryResult<QueryTarget> {
    match text.split_once(IDENTIFIER_SEPARATOR) {
        Some((service, keyword)) if !service.is_empty() && !keyword.is_empty() => {
            Ok(QueryTarget {
                service: service.to_string(),
                keyword: keyword.to_string(),
            })
        }
        _ => Err(QueryError::MalformedIdentifier(text.to_string())),
    }
}

/// Outcome of one query: a frame, an error, or a partial frame and its error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataResponse {
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub frame: Option<SeriesFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryError>,
}

impl DataResponse {
    pub fn frame(frame: SeriesFrame) -> Self {
        Self {
            frame: Some(frame),
            error: None,
        }
    }

    pub fn error(error: QueryError) -> Self {
        Self {
            frame: None,
            error: Some(error),
        }
    }

    pub fn partial(frame: SeriesFrame, error: Option<QueryError>) -> Self {
        Self {
            frame: Some(frame),
            error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Run one query against an open connection.
pub async fn translate<C: StoreConnection + ?Sized>(
    conn: &mut C,
    ctx: &QueryContext,
    query: &SeriesQuery,
) -> DataResponse {
    let text = query.query_text.trim();
    if text.is_empty() {
        return DataResponse::frame(SeriesFrame::empty(&query.range));
    }

    let target = match parse_identifier(text) {
        Ok(target) => target,
        Err(err) => return DataResponse::error(err),
    };

    // Resolve the conversion before touching the store.
    let conversion = match UnitConversion::try_from(query.unit_conversion) {
        Ok(conversion) => conversion,
        Err(err) => {
            return DataResponse::partial(SeriesFrame::empty(&query.range), Some(err));
        }
    };

    let table = match identifier::sanitize(&target.service) {
        Ok(table) => table,
        Err(err) => return DataResponse::error(err),
    };

    let mut outcome = fetcher::fetch(conn, ctx, &table, &target.keyword, &query.range).await;
    outcome.frame.map_values(|value| conversion.apply(value));

    DataResponse::partial(outcome.frame, outcome.error)
}
