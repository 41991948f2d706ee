//! Query backend for keyword time-series archives stored in PostgreSQL.
//!
//! A batch of editor queries naming `service.keyword` series is answered on one
//! store connection with one frame (or error) per request id.

pub mod api;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod fetcher;
pub mod frame;
pub mod health;
pub mod identifier;
pub mod registry;
pub mod service;
pub mod store;
pub mod translator;
pub mod units;

pub use api::{router, AppState};
pub use config::{ConnectionConfig, ServerConfig};
pub use context::QueryContext;
pub use error::{ApiError, QueryError, QueryResult};
pub use service::QueryService;
pub use translator::{DataQuery, DataResponse, SeriesQuery};
