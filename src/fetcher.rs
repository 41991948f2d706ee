//! Two-phase series reads: count the matching rows, then stream them.
//!
//! The count only sizes the result buffers. The fetch loop runs until the cursor
//! is exhausted, so rows that arrive between the phases are kept and a short
//! cursor simply ends the series early.

use futures::StreamExt;
use tracing::{debug, error};

use crate::context::QueryContext;
use crate::error::QueryError;
use crate::frame::{self, ConvertedPoint, SeriesFrame, TimeRange};
use crate::identifier::SafeIdentifier;
use crate::store::{SeriesSelector, StoreConnection};

/// Upper bound on buffer pre-allocation taken from the count phase
pub const MAX_PREALLOCATED_POINTS: usize = 1 << 20;

/// A frame plus the error that cut it short, if any.
///
/// Both are always present to the caller: a failed scan still hands back the
/// points decoded before the failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub frame: SeriesFrame,
    pub error: Option<QueryError>,
    /// Rows predicted by the count phase
    pub expected: Option<usize>,
}

impl FetchOutcome {
    fn complete(frame: SeriesFrame, expected: Option<usize>) -> Self {
        Self {
            frame,
            error: None,
            expected,
        }
    }

    fn failed(frame: SeriesFrame, error: QueryError, expected: Option<usize>) -> Self {
        Self {
            frame,
            error: Some(error),
            expected,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Read the samples of `keyword` in `range` from `table`.
pub async fn fetch<C: StoreConnection + ?Sized>(
    conn: &mut C,
    ctx: &QueryContext,
    table: &SafeIdentifier,
    keyword: &str,
    range: &TimeRange,
) -> FetchOutcome {
    let (from, to) = range.as_unix_seconds();
    let selector = SeriesSelector {
        table,
        keyword,
        from,
        to,
    };

    let expected = match ctx.run(conn.count_points(&selector)).await {
        Ok(Some(count)) => {
            debug!("query yielded {} rows", count);
            usize::try_from(count).unwrap_or(0)
        }
        Ok(None) => {
            debug!("count query returned no rows for {}.{}", table.name(), keyword);
            return FetchOutcome::complete(SeriesFrame::empty(range), None);
        }
        Err(err) => {
            error!("count query failed for {}.{}: {}", table.name(), keyword, err);
            return FetchOutcome::failed(SeriesFrame::empty(range), err, None);
        }
    };

    let mut series = SeriesFrame::with_capacity(expected.min(MAX_PREALLOCATED_POINTS));
    let mut rows = conn.stream_points(selector);
    let interrupted = ctx.interrupted();
    tokio::pin!(interrupted);

    loop {
        let row = tokio::select! {
            biased;
            err = &mut interrupted => {
                // Cancellation never passes a partial frame off as success.
                error!("fetch of {}.{} interrupted: {}", table.name(), keyword, err);
                return FetchOutcome::failed(series, err, Some(expected));
            }
            row = rows.next() => match row {
                Some(row) => row,
                None => break,
            },
        };

        let point = match row {
            Ok(point) => point,
            Err(QueryError::Store(message)) if series.is_empty() => {
                error!("query retrieval error: {}", message);
                return FetchOutcome::failed(
                    SeriesFrame::empty(range),
                    QueryError::Store(message),
                    Some(expected),
                );
            }
            Err(err) => {
                error!("{} after {} rows", err, series.len());
                return FetchOutcome::failed(series, err, Some(expected));
            }
        };

        match frame::from_unix_seconds(point.time) {
            Ok(timestamp) => series.push(ConvertedPoint {
                timestamp,
                value: point.value,
            }),
            Err(err) => {
                error!("{} after {} rows", err, series.len());
                return FetchOutcome::failed(series, err, Some(expected));
            }
        }
    }

    if series.len() != expected {
        debug!(
            "{}.{}: counted {} rows, fetched {}",
            table.name(),
            keyword,
            expected,
            series.len()
        );
    }

    FetchOutcome::complete(series, Some(expected))
}
