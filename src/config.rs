//! Process configuration and datasource connection settings.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{QueryError, QueryResult};

/// Connection descriptor for one keyword archive.
///
/// Field names follow the datasource settings JSON written by the config editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub server: String,
    #[serde(deserialize_with = "port_from_string_or_number")]
    pub port: u16,
    pub role: String,
    pub database: String,
    #[serde(alias = "metadataTableName", alias = "metaTable")]
    pub metatable: String,
}

impl ConnectionConfig {
    /// Parse and validate settings JSON
    pub fn from_json(value: &serde_json::Value) -> QueryResult<Self> {
        let config: ConnectionConfig = serde_json::from_value(value.clone())
            .map_err(|e| QueryError::settings(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> QueryResult<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| QueryError::settings(e.to_string()))?;
        Self::from_json(&value)
    }

    pub fn validate(&self) -> QueryResult<()> {
        let required = [
            ("server", &self.server),
            ("role", &self.role),
            ("database", &self.database),
            ("metatable", &self.metatable),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(QueryError::settings(format!("missing field `{}`", field)));
            }
        }
        if self.port == 0 {
            return Err(QueryError::settings("port must be non-zero"));
        }
        Ok(())
    }

    /// Stable fingerprint used to detect settings changes
    pub fn fingerprint(&self) -> String {
        let canonical = format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.server, self.port, self.role, self.database, self.metatable
        );
        format!("{:x}", md5::compute(canonical))
    }
}

fn port_from_string_or_number<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", text))),
    }
}

/// Server configuration, from flags or environment
#[derive(Debug, Clone, Parser)]
#[command(name = "keyword-datasource", version, about = "Keyword archive query backend")]
pub struct ServerConfig {
    /// Address to bind the HTTP server to
    #[arg(long, env = "KEYWORD_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Default datasource settings as a JSON file
    #[arg(long, env = "KEYWORD_SETTINGS_FILE", conflicts_with = "settings_json")]
    pub settings_file: Option<PathBuf>,

    /// Default datasource settings as inline JSON
    #[arg(long, env = "KEYWORD_SETTINGS")]
    pub settings_json: Option<String>,

    /// Per-batch deadline in milliseconds (0 disables it)
    #[arg(long, env = "KEYWORD_QUERY_TIMEOUT_MS", default_value_t = 30_000)]
    pub query_timeout_ms: u64,

    /// Pooled connections per datasource instance
    #[arg(long, env = "KEYWORD_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Column holding keyword values in each service table
    #[arg(long, env = "KEYWORD_VALUE_COLUMN", default_value = "binvalue")]
    pub value_column: String,

    /// Allowed CORS origin; any origin when unset
    #[arg(long, env = "FRONTEND_ORIGIN")]
    pub cors_origin: Option<String>,
}

impl ServerConfig {
    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_ms > 0).then(|| Duration::from_millis(self.query_timeout_ms))
    }

    /// Raw default settings JSON, if any was configured
    pub fn default_settings(&self) -> anyhow::Result<Option<serde_json::Value>> {
        let raw = match (&self.settings_file, &self.settings_json) {
            (Some(path), _) => std::fs::read_to_string(path)?,
            (None, Some(json)) => json.clone(),
            (None, None) => return Ok(None),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }
}
