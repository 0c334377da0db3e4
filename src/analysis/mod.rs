//! Access analytics core -- aggregation, seasonal-trend decomposition,
//! and the hour-of-day access probability model.
//!
//! Everything in here is synchronous and operates on data already pulled
//! into memory. Storage access lives behind [`crate::storage::EventSource`].

pub mod aggregator;
pub mod decompose;
pub mod estimator;
pub mod loess;
pub mod model;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure kinds surfaced by the analytics core.
///
/// Row-level problems (bad timestamps, unknown status labels) never show up
/// here; the aggregator absorbs them and reports counts instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyticsError {
    #[error("no access events found")]
    EmptyDataset,

    #[error("not enough data points for decomposition: need {needed}, have {have}")]
    InsufficientData { needed: usize, have: usize },

    #[error("training history contains a single class; cannot fit a classifier")]
    DegenerateTrainingSet,

    #[error("prediction model is not ready")]
    ModelNotReady,

    #[error("invalid hour {0}: must be between 0 and 23")]
    InvalidHour(i64),

    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),

    #[error("invalid seasonal period {0}: must be at least 2")]
    InvalidPeriod(usize),

    #[error("event store unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl AnalyticsError {
    /// Stable machine-readable identifier, used in error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyDataset => "empty_dataset",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::DegenerateTrainingSet => "degenerate_training_set",
            Self::ModelNotReady => "model_not_ready",
            Self::InvalidHour(_) => "invalid_hour",
            Self::MalformedTimestamp(_) => "malformed_timestamp",
            Self::InvalidPeriod(_) => "invalid_period",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }

    /// Only upstream failures are worth retrying; everything else
    /// describes the shape of the data.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }
}

/// A row exactly as the event store returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub timestamp: String,
    pub status: String,
}

impl RawEvent {
    pub fn new(timestamp: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            status: status.into(),
        }
    }
}

/// Outcome of an access attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Granted,
    Denied,
    Other,
}

/// One parsed access attempt, timestamp in the deployment's local offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp: DateTime<FixedOffset>,
    pub status: AccessStatus,
}

/// Granted/denied tallies for one distinct timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountPoint {
    pub timestamp: DateTime<FixedOffset>,
    pub granted: u64,
    pub denied: u64,
}

/// Per-timestamp counts, strictly increasing by timestamp. Gaps are absent
/// timestamps, never zero-filled buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AggregatedSeries {
    points: Vec<CountPoint>,
}

impl AggregatedSeries {
    /// Callers guarantee `points` is sorted with unique timestamps.
    pub(crate) fn from_sorted(points: Vec<CountPoint>) -> Self {
        debug_assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        Self { points }
    }

    pub fn points(&self) -> &[CountPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn total_granted(&self) -> u64 {
        self.points.iter().map(|p| p.granted).sum()
    }

    pub fn total_denied(&self) -> u64 {
        self.points.iter().map(|p| p.denied).sum()
    }

    /// The granted column as a `(timestamp, value)` series, ready for decomposition.
    pub fn granted_series(&self) -> Vec<SeriesPoint> {
        self.points
            .iter()
            .map(|p| SeriesPoint {
                timestamp: p.timestamp,
                value: p.granted as f64,
            })
            .collect()
    }

    pub fn denied_series(&self) -> Vec<SeriesPoint> {
        self.points
            .iter()
            .map(|p| SeriesPoint {
                timestamp: p.timestamp,
                value: p.denied as f64,
            })
            .collect()
    }
}

/// A single timestamped value, used for decomposition input and output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<FixedOffset>,
    pub value: f64,
}

/// First and last observed event, with the inclusive day count between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObservationSpan {
    pub first: DateTime<FixedOffset>,
    pub last: DateTime<FixedOffset>,
    pub days: i64,
}

/// First and last parsed event, compared as instants. Rows whose timestamp
/// failed to parse never reach here, so they cannot become a bound.
pub fn observation_span(events: &[Event]) -> Result<ObservationSpan, AnalyticsError> {
    let first = events.iter().map(|e| e.timestamp).min();
    let last = events.iter().map(|e| e.timestamp).max();
    let (first, last) = first.zip(last).ok_or(AnalyticsError::EmptyDataset)?;
    let days = (last - first).num_days() + 1;
    Ok(ObservationSpan { first, last, days })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(AnalyticsError::EmptyDataset.kind(), "empty_dataset");
        assert_eq!(AnalyticsError::InvalidHour(24).kind(), "invalid_hour");
        assert_eq!(
            AnalyticsError::InvalidHour(24).to_string(),
            "invalid hour 24: must be between 0 and 23"
        );
        assert!(AnalyticsError::UpstreamUnavailable("down".into()).is_transient());
        assert!(!AnalyticsError::ModelNotReady.is_transient());
    }

    #[test]
    fn test_observation_span_counts_inclusive_days() {
        let agg = aggregator::Aggregator::new(Default::default(), utc());
        let (events, _) = agg.parse_events(&[
            RawEvent::new("2024-01-10 07:00:00", "Acceso permitido"),
            RawEvent::new("2024-01-01 08:00:00", "Acceso denegado"),
        ]);
        let span = observation_span(&events).unwrap();
        // 8 days 23 hours -> 8 whole days, plus one
        assert_eq!(span.days, 9);
        assert_eq!(span.first.to_rfc3339(), "2024-01-01T08:00:00+00:00");

        let single = observation_span(&events[..1]).unwrap();
        assert_eq!(single.days, 1);
        assert_eq!(single.first, single.last);
    }

    #[test]
    fn test_observation_span_ignores_unparseable_rows() {
        let agg = aggregator::Aggregator::new(Default::default(), utc());
        let (events, dropped) = agg.parse_events(&[
            RawEvent::new("2024-02-01 09:00:00", "Acceso permitido"),
            RawEvent::new("2024-02-10 09:00:00", "Acceso permitido"),
            RawEvent::new("not-a-time", "Acceso permitido"),
        ]);
        assert_eq!(dropped.malformed_timestamps, 1);

        let span = observation_span(&events).unwrap();
        assert_eq!(span.first.to_rfc3339(), "2024-02-01T09:00:00+00:00");
        assert_eq!(span.last.to_rfc3339(), "2024-02-10T09:00:00+00:00");
        assert_eq!(span.days, 10);
    }

    #[test]
    fn test_observation_span_orders_by_instant_not_text() {
        let agg = aggregator::Aggregator::new(Default::default(), utc());
        // Textually "2024-03-01T..." sorts after "2024-03-01 ..." but is earlier.
        let (events, _) = agg.parse_events(&[
            RawEvent::new("2024-03-01 12:00:00", "Acceso permitido"),
            RawEvent::new("2024-03-01T06:00:00+00:00", "Acceso permitido"),
        ]);
        let span = observation_span(&events).unwrap();
        assert_eq!(span.first.to_rfc3339(), "2024-03-01T06:00:00+00:00");
        assert_eq!(span.last.to_rfc3339(), "2024-03-01T12:00:00+00:00");
    }

    #[test]
    fn test_observation_span_empty_store() {
        assert_eq!(observation_span(&[]), Err(AnalyticsError::EmptyDataset));
    }
}
