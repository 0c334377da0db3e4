use crate::analysis::aggregator::{Aggregation, Aggregator};
use crate::analysis::decompose::{Decomposer, Decomposition, StlParams};
use crate::analysis::estimator::Estimator;
use crate::analysis::model::PredictionModel;
use crate::analysis::{observation_span, AnalyticsError, ObservationSpan};
use crate::config::GatewatchConfig;
use crate::storage::EventSource;
use anyhow::Result;
use std::sync::Arc;

/// Shared handles for request handlers and CLI commands. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn EventSource>,
    pub aggregator: Aggregator,
    pub decomposer: Decomposer,
    pub estimator: Arc<Estimator>,
}

impl AppState {
    pub fn new(source: Arc<dyn EventSource>, config: &GatewatchConfig) -> Result<Self> {
        let aggregator = Aggregator::new(config.analytics.labels(), config.analytics.offset()?);
        let decomposer = Decomposer::new(config.decomposition.clone())?;
        Ok(Self {
            source,
            aggregator,
            decomposer,
            estimator: Arc::new(Estimator::new(config.estimator)),
        })
    }

    pub fn access_counts(&self) -> Result<Aggregation, AnalyticsError> {
        let rows = self.source.fetch_events()?;
        self.aggregator.aggregate(&rows)
    }

    /// Decompose the granted-count series, optionally overriding the period.
    pub fn decomposition(&self, period: Option<usize>) -> Result<Decomposition, AnalyticsError> {
        let aggregation = self.access_counts()?;
        let decomposer = match period {
            Some(period) => Decomposer::new(StlParams {
                period,
                ..self.decomposer.params().clone()
            })?,
            None => self.decomposer.clone(),
        };
        decomposer.decompose(&aggregation.series.granted_series())
    }

    pub fn observation_span(&self) -> Result<ObservationSpan, AnalyticsError> {
        let rows = self.source.fetch_events()?;
        let (events, _) = self.aggregator.parse_events(&rows);
        observation_span(&events)
    }

    pub fn retrain(&self) -> Result<Arc<PredictionModel>, AnalyticsError> {
        self.estimator
            .train_from_source(self.source.as_ref(), &self.aggregator)
    }
}
