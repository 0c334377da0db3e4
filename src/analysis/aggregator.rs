use crate::analysis::{
    AccessStatus, AggregatedSeries, AnalyticsError, CountPoint, Event, RawEvent,
};
use crate::analysis::model::TrainingSample;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Naive layouts accepted from the store. Naive values are stored in UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// The two literal status labels the store uses. Matching is exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLabels {
    pub granted: String,
    pub denied: String,
}

impl Default for StatusLabels {
    fn default() -> Self {
        Self {
            granted: "Acceso permitido".to_string(),
            denied: "Acceso denegado".to_string(),
        }
    }
}

/// Rows silently absorbed while aggregating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DropCounts {
    pub malformed_timestamps: u64,
    pub unrecognized_status: u64,
}

impl DropCounts {
    pub fn is_clean(&self) -> bool {
        self.malformed_timestamps == 0 && self.unrecognized_status == 0
    }
}

/// Aggregated series plus a record of what was dropped along the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Aggregation {
    pub series: AggregatedSeries,
    pub dropped: DropCounts,
}

/// Buckets raw access rows into per-timestamp granted/denied counts.
#[derive(Debug, Clone)]
pub struct Aggregator {
    labels: StatusLabels,
    offset: FixedOffset,
}

impl Aggregator {
    pub fn new(labels: StatusLabels, offset: FixedOffset) -> Self {
        Self { labels, offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn classify(&self, status: &str) -> AccessStatus {
        if status == self.labels.granted {
            AccessStatus::Granted
        } else if status == self.labels.denied {
            AccessStatus::Denied
        } else {
            AccessStatus::Other
        }
    }

    /// Parse rows into events. Rows whose timestamp does not parse are
    /// skipped and counted; unrecognized statuses are kept as `Other` and
    /// counted.
    pub fn parse_events(&self, rows: &[RawEvent]) -> (Vec<Event>, DropCounts) {
        let mut dropped = DropCounts::default();
        let mut events = Vec::with_capacity(rows.len());

        for row in rows {
            let timestamp = match parse_timestamp(&row.timestamp, self.offset) {
                Ok(ts) => ts,
                Err(_) => {
                    dropped.malformed_timestamps += 1;
                    continue;
                }
            };
            let status = self.classify(&row.status);
            if status == AccessStatus::Other {
                dropped.unrecognized_status += 1;
            }
            events.push(Event { timestamp, status });
        }

        (events, dropped)
    }

    /// Aggregate raw rows into an [`AggregatedSeries`].
    pub fn aggregate(&self, rows: &[RawEvent]) -> Result<Aggregation, AnalyticsError> {
        if rows.is_empty() {
            return Err(AnalyticsError::EmptyDataset);
        }

        let (events, dropped) = self.parse_events(rows);
        let series = tally(&events);

        debug!(
            rows = rows.len(),
            points = series.len(),
            malformed = dropped.malformed_timestamps,
            unrecognized = dropped.unrecognized_status,
            "aggregated access events"
        );
        if !dropped.is_clean() {
            warn!(
                malformed = dropped.malformed_timestamps,
                unrecognized = dropped.unrecognized_status,
                "dropped access rows during aggregation"
            );
        }

        Ok(Aggregation { series, dropped })
    }
}

/// Collapse events sharing an identical timestamp into one count pair.
/// Events with an `Other` status still mark their timestamp as present.
pub fn tally(events: &[Event]) -> AggregatedSeries {
    let mut buckets: BTreeMap<DateTime<FixedOffset>, (u64, u64)> = BTreeMap::new();
    for event in events {
        let entry = buckets.entry(event.timestamp).or_default();
        match event.status {
            AccessStatus::Granted => entry.0 += 1,
            AccessStatus::Denied => entry.1 += 1,
            AccessStatus::Other => {}
        }
    }

    let points = buckets
        .into_iter()
        .map(|(timestamp, (granted, denied))| CountPoint {
            timestamp,
            granted,
            denied,
        })
        .collect();
    AggregatedSeries::from_sorted(points)
}

/// One training row per event: the local hour and whether access was granted.
pub fn training_samples(events: &[Event]) -> Vec<TrainingSample> {
    events
        .iter()
        .map(|e| TrainingSample {
            hour: e.timestamp.hour() as i64,
            granted: e.status == AccessStatus::Granted,
        })
        .collect()
}

/// Parse a stored timestamp and express it in `offset`.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff][+hh[:mm]]`, and bare dates.
/// Values without an explicit offset are taken as UTC.
pub fn parse_timestamp(
    raw: &str,
    offset: FixedOffset,
) -> Result<DateTime<FixedOffset>, AnalyticsError> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&offset));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(dt.with_timezone(&offset));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc().with_timezone(&offset));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc().with_timezone(&offset));
        }
    }

    Err(AnalyticsError::MalformedTimestamp(raw.to_string()))
}
