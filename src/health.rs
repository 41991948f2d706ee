//! Connectivity probe for a datasource configuration.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ConnectionConfig;
use crate::context::QueryContext;
use crate::error::QueryResult;
use crate::store::{Datasource, DatasourceFactory, StoreConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: String,
}

impl HealthReport {
    fn ok(message: String) -> Self {
        Self {
            status: HealthStatus::Ok,
            message,
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: HealthStatus::Error,
            message,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// Open a throwaway datasource for `config` and ping it.
///
/// Nothing is registered, so the probe never changes what queries use.
pub async fn check_health<F: DatasourceFactory>(
    factory: &F,
    ctx: &QueryContext,
    config: QueryResult<ConnectionConfig>,
) -> HealthReport {
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            warn!("health check with unusable settings: {}", err);
            return HealthReport::error("Invalid config".to_string());
        }
    };

    let confirmed = format!(
        "confirmed: {}:{}:{}:{}",
        config.server, config.role, config.database, config.metatable
    );

    let source = match factory.create(config) {
        Ok(source) => source,
        Err(err) => return HealthReport::error(format!("Failure to open SQL driver: {}", err)),
    };

    let pinged = ping(&source, ctx).await;
    source.dispose().await;

    match pinged {
        Ok(()) => {
            info!("health check {}", confirmed);
            HealthReport::ok(confirmed)
        }
        Err(err) => {
            warn!("health check ping failed: {}", err);
            HealthReport::error(format!("Failure to ping db: {}", err))
        }
    }
}

async fn ping<D: Datasource>(source: &D, ctx: &QueryContext) -> QueryResult<()> {
    let mut conn = ctx.run(source.connect()).await?;
    ctx.run(conn.ping()).await
}
