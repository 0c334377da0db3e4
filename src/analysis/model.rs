use crate::analysis::AnalyticsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const HOURS_PER_DAY: usize = 24;

/// One historical access event reduced to the model's feature and label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub hour: i64,
    pub granted: bool,
}

/// Solver settings for the logistic fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Inverse L2 strength on the hour coefficient; the intercept is unpenalized.
    pub inverse_regularization: f64,
    pub max_iterations: usize,
    /// Stop once every gradient component is below this.
    pub tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            inverse_regularization: 1.0,
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

/// Fitted hour-of-day -> P(granted) logistic model. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionModel {
    pub coefficient: f64,
    pub intercept: f64,
    pub samples: usize,
    pub granted_samples: usize,
    pub iterations: usize,
    pub converged: bool,
    pub trained_at: DateTime<Utc>,
}

/// Per-hour event counts; the logistic objective only depends on these.
struct HourTally {
    total: [f64; HOURS_PER_DAY],
    granted: [f64; HOURS_PER_DAY],
}

impl HourTally {
    fn from_samples(samples: &[TrainingSample]) -> Result<Self, AnalyticsError> {
        let mut tally = Self {
            total: [0.0; HOURS_PER_DAY],
            granted: [0.0; HOURS_PER_DAY],
        };
        for s in samples {
            let h = validate_hour(s.hour)? as usize;
            tally.total[h] += 1.0;
            if s.granted {
                tally.granted[h] += 1.0;
            }
        }
        Ok(tally)
    }

    fn rows(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        (0..HOURS_PER_DAY)
            .filter(|&h| self.total[h] > 0.0)
            .map(|h| (h as f64, self.total[h], self.granted[h]))
    }
}

impl PredictionModel {
    /// Fit the model on per-event history.
    pub fn fit(samples: &[TrainingSample], options: &FitOptions) -> Result<Self, AnalyticsError> {
        if samples.is_empty() {
            return Err(AnalyticsError::EmptyDataset);
        }
        let tally = HourTally::from_samples(samples)?;
        let granted_samples = samples.iter().filter(|s| s.granted).count();
        if granted_samples == 0 || granted_samples == samples.len() {
            return Err(AnalyticsError::DegenerateTrainingSet);
        }

        let penalty = 1.0 / options.inverse_regularization.max(f64::MIN_POSITIVE);
        let objective = |w: f64, b: f64| -> f64 {
            let data: f64 = tally
                .rows()
                .map(|(x, n, k)| {
                    let z = w * x + b;
                    n * softplus(z) - k * z
                })
                .sum();
            0.5 * penalty * w * w + data
        };

        let (mut w, mut b) = (0.0_f64, 0.0_f64);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < options.max_iterations {
            let (mut gw, mut gb) = (penalty * w, 0.0);
            let (mut hww, mut hwb, mut hbb) = (penalty, 0.0, 0.0);
            for (x, n, k) in tally.rows() {
                let p = sigmoid(w * x + b);
                let r = n * p - k;
                let v = n * p * (1.0 - p);
                gw += r * x;
                gb += r;
                hww += v * x * x;
                hwb += v * x;
                hbb += v;
            }

            if gw.abs().max(gb.abs()) < options.tolerance {
                converged = true;
                break;
            }

            let det = hww * hbb - hwb * hwb;
            let (dw, db) = if det > f64::EPSILON {
                (-(hbb * gw - hwb * gb) / det, -(hww * gb - hwb * gw) / det)
            } else {
                (-gw / hww, -gb / hbb.max(1.0))
            };

            // Backtracking keeps the damped Newton step monotone.
            let current = objective(w, b);
            let slope = gw * dw + gb * db;
            let mut step = 1.0;
            for _ in 0..50 {
                if objective(w + step * dw, b + step * db) <= current + 1e-4 * step * slope {
                    break;
                }
                step *= 0.5;
            }
            w += step * dw;
            b += step * db;
            iterations += 1;
        }

        debug!(
            coefficient = w,
            intercept = b,
            iterations,
            converged,
            samples = samples.len(),
            "fitted access probability model"
        );

        Ok(Self {
            coefficient: w,
            intercept: b,
            samples: samples.len(),
            granted_samples,
            iterations,
            converged,
            trained_at: Utc::now(),
        })
    }

    /// Probability that an access attempt at `hour` is granted.
    pub fn probability(&self, hour: i64) -> Result<f64, AnalyticsError> {
        let h = validate_hour(hour)?;
        Ok(sigmoid(self.coefficient * h as f64 + self.intercept))
    }
}

/// Point prediction against an optional model.
pub fn predict(model: Option<&PredictionModel>, hour: i64) -> Result<f64, AnalyticsError> {
    validate_hour(hour)?;
    model.ok_or(AnalyticsError::ModelNotReady)?.probability(hour)
}

pub fn validate_hour(hour: i64) -> Result<u8, AnalyticsError> {
    if (0..HOURS_PER_DAY as i64).contains(&hour) {
        Ok(hour as u8)
    } else {
        Err(AnalyticsError::InvalidHour(hour))
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^z)` without overflow.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}
