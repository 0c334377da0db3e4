//! Seasonal-trend decomposition using loess (STL).
//!
//! The series is treated as equally spaced by observation index: one
//! seasonal cycle is `period` consecutive observations, whatever the wall
//! clock spacing between them.

use crate::analysis::loess::{estimate, moving_average, robustness_weights, smooth};
use crate::analysis::{AggregatedSeries, AnalyticsError, SeriesPoint};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Smallest series the decomposer accepts.
pub const MIN_POINTS: usize = 2;

/// Default cycle length, in observations.
pub const DEFAULT_PERIOD: usize = 365;

/// STL smoothing parameters. Lengths left as `None` are derived from the
/// period and seasonal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StlParams {
    pub period: usize,
    pub seasonal: usize,
    pub trend: Option<usize>,
    pub low_pass: Option<usize>,
    pub seasonal_degree: u8,
    pub trend_degree: u8,
    pub low_pass_degree: u8,
    /// Bisquare-reweighted outer loop, for series with outliers.
    pub robust: bool,
}

impl Default for StlParams {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            seasonal: 7,
            trend: None,
            low_pass: None,
            seasonal_degree: 1,
            trend_degree: 1,
            low_pass_degree: 1,
            robust: false,
        }
    }
}

impl StlParams {
    pub fn with_period(period: usize) -> Self {
        Self {
            period,
            ..Self::default()
        }
    }

    fn seasonal_len(&self) -> usize {
        odd_at_least_3(self.seasonal)
    }

    fn trend_len(&self) -> usize {
        let derived = || {
            let ns = self.seasonal_len() as f64;
            (1.5 * self.period as f64 / (1.0 - 1.5 / ns)).ceil() as usize
        };
        odd_at_least_3(self.trend.unwrap_or_else(derived))
    }

    fn low_pass_len(&self) -> usize {
        odd_at_least_3(self.low_pass.unwrap_or(self.period + 1))
    }

    /// `(inner, outer)` iteration counts. Fixed so results are reproducible.
    fn iterations(&self) -> (usize, usize) {
        if self.robust {
            (1, 15)
        } else {
            (2, 0)
        }
    }
}

fn odd_at_least_3(len: usize) -> usize {
    let len = len.max(3);
    if len % 2 == 0 {
        len + 1
    } else {
        len
    }
}

/// Trend, seasonal and residual components, each keyed by input timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decomposition {
    pub trend: Vec<SeriesPoint>,
    pub seasonal: Vec<SeriesPoint>,
    pub residual: Vec<SeriesPoint>,
    pub period: usize,
    /// False when the series was shorter than one cycle and only the trend
    /// could be estimated.
    pub seasonal_estimated: bool,
}

/// Splits a count series into trend, seasonal and residual components.
#[derive(Debug, Clone)]
pub struct Decomposer {
    params: StlParams,
}

impl Decomposer {
    pub fn new(params: StlParams) -> Result<Self, AnalyticsError> {
        if params.period < 2 {
            return Err(AnalyticsError::InvalidPeriod(params.period));
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &StlParams {
        &self.params
    }

    /// Decompose `series`, which must already be in timestamp order.
    pub fn decompose(&self, series: &[SeriesPoint]) -> Result<Decomposition, AnalyticsError> {
        if series.len() < MIN_POINTS {
            return Err(AnalyticsError::InsufficientData {
                needed: MIN_POINTS,
                have: series.len(),
            });
        }

        let values: Vec<f64> = series.iter().map(|p| p.value).collect();
        let period = self.params.period;

        if values.len() < period {
            warn!(
                points = values.len(),
                period, "series shorter than one seasonal cycle; estimating trend only"
            );
            let trend = smooth(
                &values,
                self.params.trend_len(),
                self.params.trend_degree,
                None,
            );
            return Ok(Decomposition {
                trend: keep_finite(series, &trend),
                seasonal: Vec::new(),
                residual: Vec::new(),
                period,
                seasonal_estimated: false,
            });
        }

        let (trend, seasonal) = self.fit(&values);
        let residual: Vec<f64> = values
            .iter()
            .zip(&trend)
            .zip(&seasonal)
            .map(|((y, t), s)| y - t - s)
            .collect();

        debug!(
            points = values.len(),
            period,
            seasonal_len = self.params.seasonal_len(),
            trend_len = self.params.trend_len(),
            low_pass_len = self.params.low_pass_len(),
            "decomposed series"
        );

        Ok(Decomposition {
            trend: keep_finite(series, &trend),
            seasonal: keep_finite(series, &seasonal),
            residual: keep_finite(series, &residual),
            period,
            seasonal_estimated: true,
        })
    }

    /// Run the inner/outer STL loops. Requires `y.len() >= period`.
    fn fit(&self, y: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let n = y.len();
        let (inner, outer) = self.params.iterations();
        let mut trend = vec![0.0; n];
        let mut seasonal = vec![0.0; n];
        let mut weights: Option<Vec<f64>> = None;

        for pass in 0..=outer {
            for _ in 0..inner {
                self.inner_step(y, weights.as_deref(), &mut trend, &mut seasonal);
            }
            if pass < outer {
                let fit: Vec<f64> = trend.iter().zip(&seasonal).map(|(t, s)| t + s).collect();
                weights = Some(robustness_weights(y, &fit));
            }
        }

        (trend, seasonal)
    }

    fn inner_step(
        &self,
        y: &[f64],
        weights: Option<&[f64]>,
        trend: &mut [f64],
        seasonal: &mut [f64],
    ) {
        let p = &self.params;
        let period = p.period;

        let detrended: Vec<f64> = y.iter().zip(trend.iter()).map(|(v, t)| v - t).collect();
        let cycles = cycle_subseries(
            &detrended,
            period,
            p.seasonal_len(),
            p.seasonal_degree,
            weights,
        );

        let filtered = moving_average(
            &moving_average(&moving_average(&cycles, period), period),
            3,
        );
        let low_pass = smooth(&filtered, p.low_pass_len(), p.low_pass_degree, None);

        for (i, s) in seasonal.iter_mut().enumerate() {
            *s = cycles[period + i] - low_pass[i];
        }

        let deseasonalized: Vec<f64> = y.iter().zip(seasonal.iter()).map(|(v, s)| v - s).collect();
        let smoothed = smooth(&deseasonalized, p.trend_len(), p.trend_degree, weights);
        trend.copy_from_slice(&smoothed);
    }
}

/// Smooth each cycle-subseries and extend it one cycle past both ends.
///
/// Output has `y.len() + 2 * period` entries: index `period + i` lines up
/// with `y[i]`.
fn cycle_subseries(
    y: &[f64],
    period: usize,
    len: usize,
    degree: u8,
    weights: Option<&[f64]>,
) -> Vec<f64> {
    let n = y.len();
    let mut out = vec![0.0; n + 2 * period];

    for j in 0..period {
        let sub: Vec<f64> = y.iter().skip(j).step_by(period).copied().collect();
        let sub_weights: Option<Vec<f64>> =
            weights.map(|w| w.iter().skip(j).step_by(period).copied().collect());
        let sub_weights = sub_weights.as_deref();
        let k = sub.len();
        if k == 0 {
            continue;
        }

        let smoothed = smooth(&sub, len, degree, sub_weights);
        let mut scratch = vec![0.0; k];

        let right = len.min(k) - 1;
        let before = estimate(
            &sub,
            len,
            degree,
            -1.0,
            0,
            right,
            sub_weights,
            &mut scratch,
        )
        .unwrap_or(smoothed[0]);

        let left = k.saturating_sub(len);
        let after = estimate(
            &sub,
            len,
            degree,
            k as f64,
            left,
            k - 1,
            sub_weights,
            &mut scratch,
        )
        .unwrap_or(smoothed[k - 1]);

        out[j] = before;
        for (m, v) in smoothed.iter().enumerate() {
            out[(m + 1) * period + j] = *v;
        }
        out[(k + 1) * period + j] = after;
    }

    out
}

fn keep_finite(series: &[SeriesPoint], values: &[f64]) -> Vec<SeriesPoint> {
    series
        .iter()
        .zip(values)
        .filter(|(_, v)| v.is_finite())
        .map(|(p, v)| SeriesPoint {
            timestamp: p.timestamp,
            value: *v,
        })
        .collect()
}

/// Decompose with default smoothing lengths for the given period.
pub fn decompose(series: &[SeriesPoint], period: usize) -> Result<Decomposition, AnalyticsError> {
    Decomposer::new(StlParams::with_period(period))?.decompose(series)
}

/// Decompose the granted-access column of an aggregated series.
pub fn decompose_counts(
    series: &AggregatedSeries,
    params: StlParams,
) -> Result<Decomposition, AnalyticsError> {
    Decomposer::new(params)?.decompose(&series.granted_series())
}
