//! Service and keyword discovery for the query editor.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, error};

use crate::context::QueryContext;
use crate::error::QueryResult;
use crate::identifier;
use crate::store::StoreConnection;

/// One selectable option in the query editor
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub key: String,
    pub display_value: String,
}

impl CatalogEntry {
    fn service(name: String) -> Self {
        Self {
            display_value: name.clone(),
            key: name,
        }
    }

    fn keyword(service: &str, keyword: String) -> Self {
        Self {
            display_value: format!("{}.{}", service, keyword),
            key: keyword,
        }
    }
}

/// Distinct services, ascending
pub async fn list_services<C: StoreConnection + ?Sized>(
    conn: &mut C,
    ctx: &QueryContext,
    meta_table: &str,
) -> QueryResult<Vec<CatalogEntry>> {
    let meta = identifier::sanitize(meta_table)?;
    let names = ctx.run(conn.list_services(&meta)).await.map_err(|e| {
        error!("services query failed: {}", e);
        e
    })?;

    let services: BTreeSet<String> = names.into_iter().collect();
    debug!("found {} services in {}", services.len(), meta.name());
    Ok(services.into_iter().map(CatalogEntry::service).collect())
}

/// Distinct keywords of `service`, ascending. Unknown services have none.
pub async fn list_keywords<C: StoreConnection + ?Sized>(
    conn: &mut C,
    ctx: &QueryContext,
    meta_table: &str,
    service: &str,
) -> QueryResult<Vec<CatalogEntry>> {
    let meta = identifier::sanitize(meta_table)?;
    let names = ctx
        .run(conn.list_keywords(&meta, service))
        .await
        .map_err(|e| {
            error!("keywords query for {} failed: {}", service, e);
            e
        })?;

    let keywords: BTreeSet<String> = names.into_iter().collect();
    debug!("found {} keywords for {}", keywords.len(), service);
    Ok(keywords
        .into_iter()
        .map(|keyword| CatalogEntry::keyword(service, keyword))
        .collect())
}
