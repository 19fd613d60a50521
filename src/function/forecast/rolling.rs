//! Online forecasting models
//!
//! Each model walks a series once, producing at every slot the estimate it
//! holds after observing that slot. NaN inputs are skipped without
//! disturbing the learned state.

use super::model::linear_regression;

/// Exponentially weighted running estimate
#[derive(Debug, Clone, Copy)]
struct Weighted {
    value: f64,
    weight: f64,
    rate: f64,
}

impl Weighted {
    fn new(rate: f64) -> Self {
        Self {
            value: f64::NAN,
            weight: 0.0,
            rate,
        }
    }

    fn observe(&mut self, y: f64) {
        if y.is_nan() {
            return;
        }
        if self.weight == 0.0 || !self.value.is_finite() {
            self.value = y;
            self.weight = self.rate;
            return;
        }
        self.weight *= 1.0 - self.rate;
        self.value = (self.value * self.weight + y * self.rate) / (self.weight + self.rate);
        self.weight += self.rate;
    }

    /// Decay the accumulated weight without a new observation
    fn skip(&mut self) {
        self.weight *= 1.0 - self.rate;
    }

    fn boost_add(&mut self, dy: f64) {
        if !dy.is_nan() {
            self.value += dy;
        }
    }
}

/// One [`Weighted`] per phase of a period
#[derive(Debug, Clone)]
struct Cycle {
    phases: Vec<Weighted>,
}

impl Cycle {
    fn new(period: usize, rate: f64) -> Self {
        Self {
            phases: vec![Weighted::new(rate); period.max(1)],
        }
    }

    fn observe(&mut self, index: usize, y: f64) {
        let len = self.phases.len();
        self.phases[index % len].observe(y);
    }

    fn get(&self, index: usize) -> f64 {
        self.phases[index % self.phases.len()].value
    }
}

/// Convert a per-period learning rate to the equivalent per-slot rate
fn per_slot_rate(rate: f64, period: usize) -> f64 {
    1.0 - (1.0 - rate).powf(1.0 / period.max(1) as f64)
}

/// Rolling multiplicative Holt-Winters estimates
///
/// The level and trend rates are per period and converted to per-slot
/// rates; the seasonal rate applies per observation of each phase, which
/// already happens once per period.
pub fn rolling_multiplicative_holt_winters(
    ys: &[f64],
    period: usize,
    level_rate: f64,
    trend_rate: f64,
    seasonal_rate: f64,
) -> Vec<f64> {
    let mut level = Weighted::new(per_slot_rate(level_rate, period));
    let mut trend = Weighted::new(per_slot_rate(trend_rate, period));
    let mut season = Cycle::new(period, seasonal_rate);
    for i in 0..period {
        season.observe(i, 1.0);
    }

    ys.iter()
        .enumerate()
        .map(|(i, &y)| {
            let old_level = level.value;
            let old_trend = trend.value;
            let old_season = season.get(i);

            level.boost_add(old_trend);
            level.observe(y / old_season);
            if y.is_nan() {
                trend.skip();
            } else {
                trend.observe(level.value - old_level);
            }
            season.observe(i, y / (old_level + old_trend));

            level.value * season.get(i)
        })
        .collect()
}

/// Rolling per-phase average
pub fn rolling_seasonal(ys: &[f64], period: usize, seasonal_rate: f64) -> Vec<f64> {
    let mut season = Cycle::new(period, seasonal_rate);
    ys.iter()
        .enumerate()
        .map(|(i, &y)| {
            season.observe(i, y);
            season.get(i)
        })
        .collect()
}

/// Least-squares line over the whole series
pub fn linear(ys: &[f64]) -> Vec<f64> {
    let (alpha, beta) = linear_regression(ys);
    (0..ys.len()).map(|i| alpha + beta * i as f64).collect()
}
