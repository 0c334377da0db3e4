//! Lifecycle owner for the access probability model.
//!
//! The fitted model is published as an `Arc` swapped in under a short write
//! lock, so concurrent predictions only ever see a complete model. While a
//! retrain is running, readers keep using the previously published model.

use crate::analysis::aggregator::{training_samples, Aggregator};
use crate::analysis::model::{self, FitOptions, PredictionModel, TrainingSample};
use crate::analysis::AnalyticsError;
use crate::storage::EventSource;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Untrained,
    Training,
    Ready,
}

#[derive(Debug, Clone)]
struct State {
    phase: Phase,
    /// Last successful fit. Still served while `phase` is `Training`.
    published: Option<Arc<PredictionModel>>,
}

pub struct Estimator {
    state: RwLock<State>,
    /// Held for a whole retrain so overlapping requests publish in order.
    training: Mutex<()>,
    options: FitOptions,
}

impl Estimator {
    pub fn new(options: FitOptions) -> Self {
        Self {
            state: RwLock::new(State {
                phase: Phase::Untrained,
                published: None,
            }),
            training: Mutex::new(()),
            options,
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.read().unwrap_or_else(PoisonError::into_inner).phase
    }

    /// The currently published model, if any.
    pub fn model(&self) -> Option<Arc<PredictionModel>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .published
            .clone()
    }

    fn set_phase(&self, phase: Phase) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).phase = phase;
    }

    fn publish(&self, published: Option<Arc<PredictionModel>>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.phase = if published.is_some() {
            Phase::Ready
        } else {
            Phase::Untrained
        };
        state.published = published;
    }

    /// Fit a new model from per-event history and publish it.
    ///
    /// On failure the estimator drops back to `Untrained` and the error is
    /// returned; no partially fitted model is ever published.
    pub fn train(&self, history: &[TrainingSample]) -> Result<Arc<PredictionModel>, AnalyticsError> {
        let _guard = self.training.lock().unwrap_or_else(PoisonError::into_inner);
        self.set_phase(Phase::Training);
        self.fit_and_publish(history)
    }

    fn fit_and_publish(
        &self,
        history: &[TrainingSample],
    ) -> Result<Arc<PredictionModel>, AnalyticsError> {
        match PredictionModel::fit(history, &self.options) {
            Ok(fitted) => {
                let fitted = Arc::new(fitted);
                self.publish(Some(Arc::clone(&fitted)));
                info!(
                    samples = fitted.samples,
                    coefficient = fitted.coefficient,
                    intercept = fitted.intercept,
                    "access probability model ready"
                );
                Ok(fitted)
            }
            Err(e) => {
                self.publish(None);
                warn!(error = %e, kind = e.kind(), "model training failed");
                Err(e)
            }
        }
    }

    /// Pull the full event history from `source` and train on it.
    ///
    /// A failed fetch leaves the previous state and model untouched.
    pub fn train_from_source(
        &self,
        source: &dyn EventSource,
        aggregator: &Aggregator,
    ) -> Result<Arc<PredictionModel>, AnalyticsError> {
        let _guard = self.training.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.phase();
        self.set_phase(Phase::Training);

        let rows = match source.fetch_events() {
            Ok(rows) => rows,
            Err(e) => {
                self.set_phase(previous);
                warn!(error = %e, kind = e.kind(), "could not fetch training history");
                return Err(e);
            }
        };
        let (events, dropped) = aggregator.parse_events(&rows);
        if dropped.malformed_timestamps > 0 {
            warn!(
                malformed = dropped.malformed_timestamps,
                "skipping rows with malformed timestamps in training history"
            );
        }
        self.fit_and_publish(&training_samples(&events))
    }

    /// Probability that access at `hour` is granted.
    pub fn predict(&self, hour: i64) -> Result<f64, AnalyticsError> {
        model::predict(self.model().as_deref(), hour)
    }
}
