//! Table identifier sanitizing.
//!
//! Service names arrive inside free-text query strings and name the table that
//! holds their keywords. Identifiers cannot be bound as statement parameters, so
//! this module is the only path by which user text becomes statement text.

use std::fmt;

use crate::error::{QueryError, QueryResult};

/// PostgreSQL truncates identifiers beyond NAMEDATALEN - 1 bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

const FORBIDDEN_SEQUENCES: [&str; 4] = [";", "--", "/*", "*/"];

/// A validated identifier, rendered double-quoted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafeIdentifier {
    name: String,
    quoted: String,
}

impl SafeIdentifier {
    /// The bare (unquoted) object name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The quoted form, safe to interpolate into statement text
    pub fn quoted(&self) -> &str {
        &self.quoted
    }
}

impl fmt::Display for SafeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.quoted)
    }
}

/// Validate `raw` and return it as a quoted identifier.
///
/// Accepts a bare name or a name that is already wrapped in double quotes with
/// any inner quotes doubled. Everything that could change statement structure is
/// rejected rather than escaped.
pub fn sanitize(raw: &str) -> QueryResult<SafeIdentifier> {
    let name = unwrap_quoted(raw)?;

    if name.is_empty() {
        return Err(QueryError::invalid_identifier(raw, "identifier is empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(QueryError::invalid_identifier(
            raw,
            format!("identifier longer than {} bytes", MAX_IDENTIFIER_LEN),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(QueryError::invalid_identifier(
            raw,
            "identifier contains control characters",
        ));
    }
    if let Some(seq) = FORBIDDEN_SEQUENCES.iter().find(|seq| name.contains(*seq)) {
        return Err(QueryError::invalid_identifier(
            raw,
            format!("identifier contains '{}'", seq),
        ));
    }

    let quoted = format!("\"{}\"", name.replace('"', "\"\""));
    Ok(SafeIdentifier { name, quoted })
}

// Returns the logical name: bare input as-is, quoted input with `""` collapsed.
fn unwrap_quoted(raw: &str) -> QueryResult<String> {
    let inner = match raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) => inner,
        None => {
            if raw.contains('"') {
                return Err(QueryError::invalid_identifier(
                    raw,
                    "identifier contains an unescaped quote",
                ));
            }
            return Ok(raw.to_string());
        }
    };

    let mut name = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '"' && chars.next() != Some('"') {
            return Err(QueryError::invalid_identifier(
                raw,
                "identifier contains an unescaped quote",
            ));
        }
        name.push(c);
    }
    Ok(name)
}
