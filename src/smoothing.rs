//! Holt-Winters exponential smoothing with additive trend and multiplicative seasonality
//!
//! The model keeps three components, updated after every observation:
//!
//! - **level** `l_t = α · y_t / s_{t-m} + (1 - α) · (l_{t-1} + b_{t-1})`
//! - **trend** `b_t = β · (l_t - l_{t-1}) + (1 - β) · b_{t-1}`
//! - **season** `s_t = γ · y_t / l_t + (1 - γ) · s_{t-m}`
//!
//! and forecasts `h` steps ahead as `(l_n + h · b_n) · s_{n+h-m}`.
//!
//! Smoothing parameters are estimated by [`HoltWinters::optimize`], a bounded
//! grid search over one-step-ahead squared error.

use serde::Serialize;
use tracing::debug;

use crate::error::{AnalyticsError, Result};

/// Candidate values tried for each smoothing parameter
const PARAMETER_GRID: [f64; 10] = [0.05, 0.15, 0.25, 0.35, 0.45, 0.55, 0.65, 0.75, 0.85, 0.95];

/// Smoothing parameters of a fitted model
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SmoothingParams {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

/// Triple exponential smoothing model
#[derive(Debug, Clone)]
pub struct HoltWinters {
    params: SmoothingParams,
    /// Seasonal period length
    period: usize,
    level: f64,
    trend: f64,
    /// Seasonal factors indexed by absolute time modulo `period`
    seasonal: Vec<f64>,
    /// One-step-ahead in-sample predictions
    fitted: Vec<f64>,
    sse: f64,
    n_obs: usize,
}

impl HoltWinters {
    /// Create an unfitted model
    ///
    /// # Arguments
    ///
    /// * `alpha` - Level smoothing (0 < alpha < 1)
    /// * `beta` - Trend smoothing (0 < beta < 1)
    /// * `gamma` - Seasonal smoothing (0 < gamma < 1)
    /// * `period` - Number of observations per seasonal cycle
    pub fn new(alpha: f64, beta: f64, gamma: f64, period: usize) -> Result<Self> {
        for (name, value) in [("alpha", alpha), ("beta", beta), ("gamma", gamma)] {
            if !(0.0 < value && value < 1.0) {
                return Err(AnalyticsError::invalid_parameter(
                    name,
                    "must be between 0 and 1 (exclusive)",
                ));
            }
        }
        if period < 2 {
            return Err(AnalyticsError::invalid_parameter("seasonal_period", "must be at least 2"));
        }

        Ok(Self {
            params: SmoothingParams { alpha, beta, gamma },
            period,
            level: 0.0,
            trend: 0.0,
            seasonal: vec![1.0; period],
            fitted: Vec::new(),
            sse: f64::INFINITY,
            n_obs: 0,
        })
    }

    /// Fit every grid combination and keep the one with the lowest SSE
    pub fn optimize(data: &[f64], period: usize) -> Result<Self> {
        let mut best: Option<HoltWinters> = None;
        let mut last_error = None;

        for &alpha in &PARAMETER_GRID {
            for &beta in &PARAMETER_GRID {
                for &gamma in &PARAMETER_GRID {
                    let mut model = Self::new(alpha, beta, gamma, period)?;
                    match model.fit(data) {
                        Ok(()) if model.sse.is_finite() => {
                            if best.as_ref().map_or(true, |b| model.sse < b.sse) {
                                best = Some(model);
                            }
                        }
                        Ok(()) => {}
                        Err(err @ AnalyticsError::InsufficientSeasonalHistory { .. }) => return Err(err),
                        Err(err) => last_error = Some(err),
                    }
                }
            }
        }

        match best {
            Some(model) => {
                debug!(
                    alpha = model.params.alpha,
                    beta = model.params.beta,
                    gamma = model.params.gamma,
                    sse = model.sse,
                    period,
                    "Holt-Winters parameters selected"
                );
                Ok(model)
            }
            None => Err(last_error.unwrap_or_else(|| AnalyticsError::FitFailed {
                seasonal_period: period,
                training_size: data.len(),
                reason: "no smoothing parameters produced a finite error".to_string(),
            })),
        }
    }

    /// Run the smoothing recursions over `data`
    pub fn fit(&mut self, data: &[f64]) -> Result<()> {
        let period = self.period;
        if data.len() < period {
            return Err(AnalyticsError::InsufficientSeasonalHistory {
                seasonal_period: period,
                training_size: data.len(),
            });
        }
        let fit_failed = |reason: String| AnalyticsError::FitFailed {
            seasonal_period: period,
            training_size: data.len(),
            reason,
        };

        self.initialize(data).map_err(fit_failed)?;

        let SmoothingParams { alpha, beta, gamma } = self.params;
        self.fitted = Vec::with_capacity(data.len());
        self.sse = 0.0;

        for (t, &value) in data.iter().enumerate() {
            let idx = t % period;
            let season = self.seasonal[idx];
            let prediction = (self.level + self.trend) * season;
            self.fitted.push(prediction);
            self.sse += (value - prediction).powi(2);

            let prev_level = self.level;
            self.level = alpha * (value / season) + (1.0 - alpha) * (self.level + self.trend);
            if !(self.level.is_finite() && self.level > 0.0) {
                return Err(fit_failed(format!("level collapsed to {} at step {}", self.level, t)));
            }
            self.trend = beta * (self.level - prev_level) + (1.0 - beta) * self.trend;
            self.seasonal[idx] = gamma * (value / self.level) + (1.0 - gamma) * season;
        }

        self.n_obs = data.len();
        Ok(())
    }

    /// Initial level, trend and seasonal factors from the first cycles.
    ///
    /// The level is placed one step before the first observation so the
    /// first one-step prediction is `(level + trend) · s_0`.
    fn initialize(&mut self, data: &[f64]) -> std::result::Result<(), String> {
        let period = self.period;
        let first = &data[..period];
        let first_mean = mean(first);

        self.trend = if data.len() >= 2 * period {
            (mean(&data[period..2 * period]) - first_mean) / period as f64
        } else {
            slope(first)
        };

        let center = (period as f64 - 1.0) / 2.0;
        // a steep initial slope can push the first-season base below zero
        let lowest_base = first_mean - self.trend.abs() * center;
        if lowest_base <= 0.0 && first_mean > 0.0 {
            debug!(trend = self.trend, period, "Initial trend dropped, first season base not positive");
            self.trend = 0.0;
        }

        for (i, &value) in first.iter().enumerate() {
            let base = first_mean + self.trend * (i as f64 - center);
            if base <= 0.0 {
                return Err(format!("non-positive initial level {base} in the first season"));
            }
            self.seasonal[i] = value / base;
        }
        let seasonal_mean = mean(&self.seasonal);
        for factor in &mut self.seasonal {
            *factor /= seasonal_mean;
        }

        self.level = first_mean - self.trend * (center + 1.0);
        Ok(())
    }

    /// Forecast `steps` periods past the last fitted observation
    pub fn predict(&self, steps: usize) -> Result<Vec<f64>> {
        if self.n_obs == 0 {
            return Err(AnalyticsError::invalid_parameter("model", "must be fitted before prediction"));
        }

        Ok((1..=steps)
            .map(|h| {
                let idx = (self.n_obs + h - 1) % self.period;
                (self.level + h as f64 * self.trend) * self.seasonal[idx]
            })
            .collect())
    }

    pub fn params(&self) -> SmoothingParams {
        self.params
    }

    /// One-step-ahead in-sample predictions
    pub fn fitted_values(&self) -> &[f64] {
        &self.fitted
    }

    pub fn sse(&self) -> f64 {
        self.sse
    }

    /// Get all components: (level, trend, seasonal)
    pub fn components(&self) -> (f64, f64, &[f64]) {
        (self.level, self.trend, &self.seasonal)
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Least-squares slope of `values` against their index
fn slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);
    let (num, den) = values.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, &y)| {
        let dx = i as f64 - x_mean;
        (num + dx * (y - y_mean), den + dx * dx)
    });
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}
