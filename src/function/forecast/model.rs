//! Static seasonal models trained on a fixed window
//!
//! Both models are indexed by slot offset `t` from the start of the
//! training window, with a period of `p` slots.
//!
//! - **Generalized Holt-Winters**: every phase `t mod p` has its own level
//!   and trend, `y(t) ≈ α[t mod p] + β[t mod p]·(t − t mod p)/p`
//! - **Multiplicative Holt-Winters**: one shared level and trend scaled by a
//!   seasonal factor, `y(t) ≈ S[t mod p]·(α + β·t)`

use crate::error::{QueryError, Result};

/// A trained model that can estimate any slot offset
pub trait Model: Send + Sync {
    /// Estimate at slot offset `t`
    fn estimate_point(&self, t: i64) -> f64;

    /// Estimates for `length` consecutive offsets starting at `start`
    fn estimate_range(&self, start: i64, length: usize) -> Vec<f64> {
        (0..length as i64).map(|i| self.estimate_point(start.saturating_add(i))).collect()
    }
}

fn phase(t: i64, period: usize) -> usize {
    t.rem_euclid(period as i64) as usize
}

/// Least-squares line through the non-NaN points `(i, ys[i])`
///
/// Returns `(intercept, slope)`; both are NaN when fewer than two points
/// are present.
pub fn linear_regression(ys: &[f64]) -> (f64, f64) {
    let mut count = 0.0;
    let (mut xm, mut ym, mut xym, mut x2m) = (0.0, 0.0, 0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        if y.is_nan() {
            continue;
        }
        let x = i as f64;
        count += 1.0;
        xm += x;
        ym += y;
        xym += x * y;
        x2m += x * x;
    }
    xm /= count;
    ym /= count;
    xym /= count;
    x2m /= count;
    let beta = (xym - xm * ym) / (x2m - xm * xm);
    let alpha = ym - beta * xm;
    (alpha, beta)
}

fn nan_mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

// =============================================================================
// Generalized Holt-Winters
// =============================================================================

/// Per-phase level and trend
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralizedHoltWinters {
    alphas: Vec<f64>,
    betas: Vec<f64>,
}

impl GeneralizedHoltWinters {
    /// Regress each phase of `ys` independently
    pub fn train(ys: &[f64], period: usize) -> Result<Self> {
        if period == 0 {
            return Err(QueryError::invalid_argument(
                "Generalized Holt-Winters model expects a positive period",
            ));
        }
        let count = ys.len() / period;
        if count == 0 {
            return Err(QueryError::invalid_argument(
                "Generalized Holt-Winters model training requires at least one period of data",
            ));
        }
        let (alphas, betas) = (0..period)
            .map(|i| {
                let data: Vec<f64> = (0..count).map(|j| ys[i + j * period]).collect();
                linear_regression(&data)
            })
            .unzip();
        Ok(Self { alphas, betas })
    }
}

impl Model for GeneralizedHoltWinters {
    fn estimate_point(&self, t: i64) -> f64 {
        let period = self.alphas.len();
        let i = phase(t, period);
        self.alphas[i] + self.betas[i] * (t - i as i64) as f64 / period as f64
    }
}

// =============================================================================
// Multiplicative Holt-Winters
// =============================================================================

/// Shared level and trend with a multiplicative season
#[derive(Debug, Clone, PartialEq)]
pub struct MultiplicativeHoltWinters {
    season: Vec<f64>,
    alpha: f64,
    beta: f64,
}

impl MultiplicativeHoltWinters {
    /// Fit the model to `ys`, which must cover at least three periods
    pub fn train(ys: &[f64], period: usize) -> Result<Self> {
        if period == 0 {
            return Err(QueryError::invalid_argument(
                "Training the multiplicative Holt-Winters model requires a positive period.",
            ));
        }
        if ys.len() < period * 3 {
            return Err(QueryError::invalid_argument(
                "Good results with the Multiplicative Holt-Winters model training require at least 3 periods of data.",
            ));
        }
        let periods = ys.len() / period;

        // Trend: regress the per-period means and rescale to per-slot
        let period_means: Vec<f64> = (0..periods)
            .map(|k| nan_mean(ys[k * period..(k + 1) * period].iter().copied()))
            .collect();
        let (_, slope) = linear_regression(&period_means);
        let beta = slope / period as f64;

        // De-trended data: z(t) = a·S(t) + b·(S(t) − 1)·t
        let zs: Vec<f64> = ys.iter().enumerate().map(|(i, y)| y - beta * i as f64).collect();

        let season: Vec<f64> = if beta.abs() > f64::EPSILON {
            // z(np + t) − z(mp + t) = b·p·(S(t) − 1)·(n − m)
            (0..period)
                .map(|t| {
                    let gs: Vec<f64> = (0..periods).map(|n| zs[n * period + t]).collect();
                    let mut estimates = Vec::new();
                    for n in 0..periods {
                        for m in 0..periods {
                            if n != m && gs[n].is_finite() && gs[m].is_finite() {
                                estimates.push(
                                    1.0 + (gs[n] - gs[m]) / (beta * period as f64 * (n as f64 - m as f64)),
                                );
                            }
                        }
                    }
                    nan_mean(estimates.into_iter())
                })
                .collect()
        } else {
            // Without a trend the season is each phase's share of the mean
            let overall = nan_mean(zs.iter().copied());
            (0..period)
                .map(|t| nan_mean((0..periods).map(|n| zs[n * period + t])) / overall)
                .collect()
        };

        // Level: de-seasonalize and average
        let alpha = nan_mean(zs.iter().enumerate().map(|(i, z)| {
            let s = season[i % period];
            (z - beta * (s - 1.0) * i as f64) / s
        }));

        Ok(Self { season, alpha, beta })
    }
}

impl Model for MultiplicativeHoltWinters {
    fn estimate_point(&self, t: i64) -> f64 {
        self.season[phase(t, self.season.len())] * (self.alpha + self.beta * t as f64)
    }
}
