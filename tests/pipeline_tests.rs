//! End-to-end checks of the analytics pipeline: store -> aggregate ->
//! decompose / estimate.

use chrono::FixedOffset;
use gatewatch::analysis::aggregator::{Aggregator, StatusLabels};
use gatewatch::analysis::decompose::{decompose, decompose_counts, StlParams};
use gatewatch::analysis::estimator::{Estimator, Phase};
use gatewatch::analysis::model::FitOptions;
use gatewatch::analysis::{observation_span, AnalyticsError, RawEvent};
use gatewatch::storage::{self, EventSource, SqliteEventSource};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn aggregator() -> Aggregator {
    Aggregator::new(
        StatusLabels {
            granted: "Granted".into(),
            denied: "Denied".into(),
        },
        FixedOffset::east_opt(0).unwrap(),
    )
}

fn random_rows(rng: &mut StdRng, n: usize) -> Vec<RawEvent> {
    let statuses = ["Granted", "Denied", "Unknown"];
    (0..n)
        .map(|_| {
            let day = rng.gen_range(1..=28);
            let hour = rng.gen_range(0..24);
            let minute = [0, 15, 30, 45][rng.gen_range(0..4)];
            let status = statuses[rng.gen_range(0..statuses.len())];
            RawEvent::new(format!("2024-02-{day:02} {hour:02}:{minute:02}:00"), status)
        })
        .collect()
}

#[test]
fn test_aggregation_totals_match_labels() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..20 {
        let rows = random_rows(&mut rng, 300);
        let agg = aggregator().aggregate(&rows).unwrap();

        let granted = rows.iter().filter(|r| r.status == "Granted").count() as u64;
        let denied = rows.iter().filter(|r| r.status == "Denied").count() as u64;
        let unknown = rows.iter().filter(|r| r.status == "Unknown").count() as u64;
        assert_eq!(agg.series.total_granted(), granted);
        assert_eq!(agg.series.total_denied(), denied);
        assert_eq!(agg.dropped.unrecognized_status, unknown);

        // Every output timestamp came from the input.
        let (events, _) = aggregator().parse_events(&rows);
        for point in agg.series.points() {
            assert!(events.iter().any(|e| e.timestamp == point.timestamp));
        }
    }
}

#[test]
fn test_aggregation_is_order_independent_and_sorted() {
    let mut rng = StdRng::seed_from_u64(7);
    let rows = random_rows(&mut rng, 500);
    let baseline = aggregator().aggregate(&rows).unwrap();

    for _ in 0..10 {
        let mut shuffled = rows.clone();
        shuffled.shuffle(&mut rng);
        let agg = aggregator().aggregate(&shuffled).unwrap();
        assert_eq!(agg, baseline);
        assert!(agg
            .series
            .points()
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
    }

    // Same input twice gives identical output.
    assert_eq!(aggregator().aggregate(&rows).unwrap(), baseline);
}

#[test]
fn test_scenario_bucketing() {
    let rows = vec![
        RawEvent::new("2024-02-01 08:00:00", "Granted"),
        RawEvent::new("2024-02-01 08:00:00", "Denied"),
        RawEvent::new("2024-02-01 09:00:00", "Granted"),
    ];
    let agg = aggregator().aggregate(&rows).unwrap();
    let counts: Vec<(u64, u64)> = agg
        .series
        .points()
        .iter()
        .map(|p| (p.granted, p.denied))
        .collect();
    assert_eq!(counts, vec![(1, 1), (1, 0)]);
}

#[test]
fn test_decomposition_reconstructs_aggregated_counts() {
    let mut rng = StdRng::seed_from_u64(99);
    let rows = random_rows(&mut rng, 800);
    let agg = aggregator().aggregate(&rows).unwrap();
    let original = agg.series.granted_series();

    let result = decompose_counts(&agg.series, StlParams::with_period(24)).unwrap();
    assert!(result.seasonal_estimated);

    for (i, point) in original.iter().enumerate() {
        let t = result.trend.iter().find(|p| p.timestamp == point.timestamp);
        let s = result.seasonal.iter().find(|p| p.timestamp == point.timestamp);
        let r = result.residual.iter().find(|p| p.timestamp == point.timestamp);
        if let (Some(t), Some(s), Some(r)) = (t, s, r) {
            let sum = t.value + s.value + r.value;
            assert!((sum - point.value).abs() < 1e-6, "index {i}");
        }
    }

    // Decomposition never invents timestamps.
    for p in result.trend.iter().chain(&result.seasonal).chain(&result.residual) {
        assert!(original.iter().any(|o| o.timestamp == p.timestamp));
    }
}

#[test]
fn test_decomposition_boundaries() {
    assert_eq!(
        decompose(&[], 365),
        Err(AnalyticsError::InsufficientData { needed: 2, have: 0 })
    );
    let agg = aggregator()
        .aggregate(&[RawEvent::new("2024-02-01 08:00:00", "Granted")])
        .unwrap();
    assert_eq!(
        decompose(&agg.series.granted_series(), 365),
        Err(AnalyticsError::InsufficientData { needed: 2, have: 1 })
    );
}

#[test]
fn test_store_to_prediction() {
    let dir = tempfile::tempdir().unwrap();
    let pool = storage::open_pool(dir.path().join("events.db").to_str().unwrap()).unwrap();
    for day in 1..=10 {
        for _ in 0..5 {
            storage::insert_event(&pool, &format!("2024-02-{day:02} 09:10:00"), "Granted").unwrap();
            storage::insert_event(&pool, &format!("2024-02-{day:02} 22:10:00"), "Denied").unwrap();
        }
    }
    storage::insert_event(&pool, "not-a-time", "Granted").unwrap();

    let source = SqliteEventSource::new(pool);
    assert_eq!(source.fetch_events().unwrap().len(), 101);

    let estimator = Estimator::new(FitOptions::default());
    let model = estimator.train_from_source(&source, &aggregator()).unwrap();
    assert_eq!(model.samples, 100);
    assert_eq!(estimator.phase(), Phase::Ready);
    assert!(estimator.predict(9).unwrap() > 0.5);
    assert!(estimator.predict(22).unwrap() < 0.5);
    assert_eq!(estimator.predict(24), Err(AnalyticsError::InvalidHour(24)));
}

#[test]
fn test_stored_garbage_row_does_not_hide_span() {
    let dir = tempfile::tempdir().unwrap();
    let pool = storage::open_pool(dir.path().join("events.db").to_str().unwrap()).unwrap();
    storage::insert_event(&pool, "2024-02-01 09:00:00", "Granted").unwrap();
    storage::insert_event(&pool, "2024-02-10 09:00:00", "Granted").unwrap();
    storage::insert_event(&pool, "not-a-time", "Granted").unwrap();

    let source = SqliteEventSource::new(pool);
    let rows = source.fetch_events().unwrap();
    assert_eq!(aggregator().aggregate(&rows).unwrap().series.len(), 2);

    let (events, dropped) = aggregator().parse_events(&rows);
    assert_eq!(dropped.malformed_timestamps, 1);
    let span = observation_span(&events).unwrap();
    assert_eq!(span.first.to_rfc3339(), "2024-02-01T09:00:00+00:00");
    assert_eq!(span.last.to_rfc3339(), "2024-02-10T09:00:00+00:00");
    assert_eq!(span.days, 10);
}
