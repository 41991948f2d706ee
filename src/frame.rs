//! Series frames and time helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Requested time window, inclusive at both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Bounds as fractional Unix seconds, the store's time encoding
    pub fn as_unix_seconds(&self) -> (f64, f64) {
        (to_unix_seconds(self.from), to_unix_seconds(self.to))
    }
}

/// One row as read from a service table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    pub time: f64,
    pub value: f64,
}

/// A row after time decomposition and unit conversion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertedPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// An aligned time axis and value axis.
///
/// Apart from [`SeriesFrame::empty`], both axes always have the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesFrame {
    pub time_axis: Vec<DateTime<Utc>>,
    pub value_axis: Vec<f64>,
}

impl SeriesFrame {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            time_axis: Vec::with_capacity(capacity),
            value_axis: Vec::with_capacity(capacity),
        }
    }

    /// The "no data" frame: the requested bounds on the time axis, no values.
    pub fn empty(range: &TimeRange) -> Self {
        Self {
            time_axis: vec![range.from, range.to],
            value_axis: Vec::new(),
        }
    }

    pub fn push(&mut self, point: ConvertedPoint) {
        self.time_axis.push(point.timestamp);
        self.value_axis.push(point.value);
    }

    /// Number of data points (the empty frame has none)
    pub fn len(&self) -> usize {
        self.value_axis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value_axis.is_empty()
    }

    /// Apply `f` to every value in place
    pub fn map_values<F: Fn(f64) -> f64>(&mut self, f: F) {
        for value in &mut self.value_axis {
            *value = f(*value);
        }
    }
}

pub fn to_unix_seconds(instant: DateTime<Utc>) -> f64 {
    instant.timestamp() as f64 + f64::from(instant.timestamp_subsec_nanos()) * 1e-9
}

/// Split fractional Unix seconds into whole seconds and nanoseconds.
pub fn from_unix_seconds(seconds: f64) -> QueryResult<DateTime<Utc>> {
    if !seconds.is_finite() {
        return Err(QueryError::row_scan(format!(
            "non-finite timestamp {}",
            seconds
        )));
    }

    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return Err(QueryError::row_scan(format!(
            "timestamp {} out of range",
            seconds
        )));
    }

    DateTime::from_timestamp(whole as i64, nanos)
        .ok_or_else(|| QueryError::row_scan(format!("timestamp {} out of range", seconds)))
}
