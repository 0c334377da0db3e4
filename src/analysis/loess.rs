//! Loess smoothing primitives used by the seasonal-trend decomposition.
//!
//! Positions are the integer indices `0..n` of the input slice, so the
//! smoother assumes equally spaced observations.

/// Weighted local regression estimate at position `xs`, fitted over
/// `y[left..=right]` with a tricube kernel.
///
/// `xs` may lie outside the window (used to extrapolate one step past either
/// end of a cycle-subseries). Returns `None` when every weight in the window
/// is zero.
#[allow(clippy::too_many_arguments)]
pub(crate) fn estimate(
    y: &[f64],
    len: usize,
    degree: u8,
    xs: f64,
    left: usize,
    right: usize,
    robustness: Option<&[f64]>,
    scratch: &mut [f64],
) -> Option<f64> {
    let n = y.len();
    let range = n as f64 - 1.0;

    let mut h = (xs - left as f64).max(right as f64 - xs);
    if len > n {
        h += ((len - n) / 2) as f64;
    }
    let h9 = 0.999 * h;
    let h1 = 0.001 * h;

    let mut total = 0.0;
    for j in left..=right {
        scratch[j] = 0.0;
        let r = (j as f64 - xs).abs();
        if r <= h9 {
            scratch[j] = if r <= h1 {
                1.0
            } else {
                (1.0 - (r / h).powi(3)).powi(3)
            };
            if let Some(rw) = robustness {
                scratch[j] *= rw[j];
            }
            total += scratch[j];
        }
    }
    if total <= 0.0 {
        return None;
    }
    for w in &mut scratch[left..=right] {
        *w /= total;
    }

    if h > 0.0 && degree > 0 {
        let center: f64 = (left..=right).map(|j| scratch[j] * j as f64).sum();
        let spread: f64 = (left..=right)
            .map(|j| scratch[j] * (j as f64 - center).powi(2))
            .sum();
        if spread.sqrt() > 0.001 * range {
            let slope = (xs - center) / spread;
            for j in left..=right {
                scratch[j] *= slope * (j as f64 - center) + 1.0;
            }
        }
    }

    Some((left..=right).map(|j| scratch[j] * y[j]).sum())
}

/// Loess-smooth `y` with a window of `len` neighbours, evaluating at every
/// position. Positions where the fit is undefined fall back to the input.
pub(crate) fn smooth(y: &[f64], len: usize, degree: u8, robustness: Option<&[f64]>) -> Vec<f64> {
    let n = y.len();
    let mut out = vec![0.0; n];
    if n == 0 {
        return out;
    }
    let len = len.max(1);
    let mut scratch = vec![0.0; n];

    if len >= n {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = estimate(y, len, degree, i as f64, 0, n - 1, robustness, &mut scratch)
                .unwrap_or(y[i]);
        }
        return out;
    }

    let half = (len + 1) / 2;
    let (mut left, mut right) = (0, len - 1);
    for (i, slot) in out.iter_mut().enumerate() {
        if i >= half && right != n - 1 {
            left += 1;
            right += 1;
        }
        *slot = estimate(y, len, degree, i as f64, left, right, robustness, &mut scratch)
            .unwrap_or(y[i]);
    }
    out
}

/// Simple trailing moving average; output has `x.len() - len + 1` entries.
pub(crate) fn moving_average(x: &[f64], len: usize) -> Vec<f64> {
    if len == 0 || x.len() < len {
        return Vec::new();
    }
    let flen = len as f64;
    let mut out = Vec::with_capacity(x.len() - len + 1);
    let mut sum: f64 = x[..len].iter().sum();
    out.push(sum / flen);
    for i in len..x.len() {
        sum += x[i] - x[i - len];
        out.push(sum / flen);
    }
    out
}

/// Bisquare robustness weights from the absolute residuals `|y - fit|`,
/// scaled by six times their median.
pub(crate) fn robustness_weights(y: &[f64], fit: &[f64]) -> Vec<f64> {
    let residuals: Vec<f64> = y.iter().zip(fit).map(|(a, b)| (a - b).abs()).collect();
    let n = residuals.len();
    if n == 0 {
        return Vec::new();
    }

    let mut sorted = residuals.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let upper = n / 2;
    let lower = n - upper - 1;
    let cmad = 3.0 * (sorted[upper] + sorted[lower]);
    let c9 = 0.999 * cmad;
    let c1 = 0.001 * cmad;

    residuals
        .into_iter()
        .map(|r| {
            if r <= c1 {
                1.0
            } else if r <= c9 {
                (1.0 - (r / cmad).powi(2)).powi(2)
            } else {
                0.0
            }
        })
        .collect()
}
