//! Forecasting engine: train/test split, Holt-Winters fit and dated forecasts

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AnalyticsError, Result};
use crate::smoothing::{HoltWinters, SmoothingParams};
use crate::timeseries::{weeks_after, WeeklySeries};

/// Forecasting parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Weeks per seasonal cycle; 13 is one fiscal quarter
    pub seasonal_period: usize,
    /// Number of future weeks to forecast
    pub horizon: usize,
    /// Share of the series used for training, the rest is held out
    pub train_ratio: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            seasonal_period: 13,
            horizon: 13,
            train_ratio: 0.9,
        }
    }
}

impl ForecastConfig {
    fn validate(&self) -> Result<()> {
        if self.seasonal_period < 2 {
            return Err(AnalyticsError::invalid_parameter("seasonal_period", "must be at least 2"));
        }
        if self.horizon == 0 {
            return Err(AnalyticsError::invalid_parameter("horizon", "must be at least 1"));
        }
        if !(self.train_ratio > 0.0 && self.train_ratio <= 1.0) {
            return Err(AnalyticsError::invalid_parameter("train_ratio", "must be in (0, 1]"));
        }
        Ok(())
    }
}

/// A value attached to its week-ending date
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DatedValue {
    pub week_ending: NaiveDate,
    pub value: f64,
}

/// Last observed week against the first forecast week
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProfitChange {
    pub last_week: f64,
    pub next_week: f64,
    /// Percent change; 0 when the last week had no profit
    pub change_pct: f64,
}

/// Everything the presentation side needs to chart one forecast
#[derive(Debug, Clone, Serialize)]
pub struct ForecastOutput {
    pub seasonal_period: usize,
    pub params: SmoothingParams,
    pub series: WeeklySeries,
    /// In-sample one-step predictions over the training window
    pub fitted: Vec<DatedValue>,
    /// Held-out tail of the series
    pub test: Vec<DatedValue>,
    /// Forecast over the held-out weeks
    pub test_forecast: Vec<DatedValue>,
    /// Forecast starting the week after the last observation
    pub future: Vec<DatedValue>,
    /// Mean absolute error on the held-out weeks, if any were held out
    pub test_mae: Option<f64>,
}

impl ForecastOutput {
    pub fn next_week_change(&self) -> Option<ProfitChange> {
        let last_week = self.series.points().last()?.profit;
        let next_week = self.future.first()?.value;
        let change_pct = if last_week != 0.0 {
            (next_week - last_week) / last_week * 100.0
        } else {
            0.0
        };
        Some(ProfitChange {
            last_week,
            next_week,
            change_pct,
        })
    }
}

/// Score of one candidate seasonal period
#[derive(Debug, Clone, Serialize)]
pub struct PeriodScore {
    pub seasonal_period: usize,
    pub mae: Option<f64>,
    pub error: Option<String>,
}

/// Result of searching over candidate seasonal periods
#[derive(Debug, Clone, Serialize)]
pub struct PeriodSelection {
    pub seasonal_period: usize,
    pub mae: f64,
    pub scores: Vec<PeriodScore>,
    pub output: ForecastOutput,
}

/// Fit on the first `train_ratio` of the series and forecast the rest plus `horizon` weeks
pub fn forecast_profit(series: &WeeklySeries, config: &ForecastConfig) -> Result<ForecastOutput> {
    config.validate()?;

    let n = series.len();
    if n < 2 {
        return Err(AnalyticsError::InsufficientHistory {
            required: 2,
            actual: n,
        });
    }
    let period = config.seasonal_period;
    if period > n {
        return Err(AnalyticsError::invalid_parameter(
            "seasonal_period",
            format!("{period} weeks exceeds the {n} weeks of available history"),
        ));
    }

    let train_size = ((n as f64 * config.train_ratio).floor() as usize).clamp(1, n);
    if train_size < period {
        return Err(AnalyticsError::InsufficientSeasonalHistory {
            seasonal_period: period,
            training_size: train_size,
        });
    }

    let train = series.slice(0..train_size);
    if let Some(point) = train.points().iter().find(|p| p.profit <= 0.0) {
        return Err(AnalyticsError::NonPositiveValues {
            seasonal_period: period,
            week: point.week_ending,
            value: point.profit,
        });
    }

    let model = HoltWinters::optimize(&train.values(), period)?;

    let test = series.slice(train_size..n);
    let ahead = model.predict(test.len() + config.horizon)?;
    let (test_ahead, future_ahead) = ahead.split_at(test.len());

    let last_date = series
        .last_date()
        .ok_or_else(|| AnalyticsError::empty("forecast"))?;

    let fitted = dated(&train.dates(), model.fitted_values());
    let test_forecast = dated(&test.dates(), test_ahead);
    let future = dated(&weeks_after(last_date, config.horizon), future_ahead);
    let test_values = test.values();
    let test_mae = (!test_values.is_empty()).then(|| mean_absolute_error(&test_values, test_ahead));

    info!(
        weeks = n,
        train_size,
        seasonal_period = period,
        horizon = config.horizon,
        test_mae = ?test_mae,
        "Profit forecast fitted"
    );

    Ok(ForecastOutput {
        seasonal_period: period,
        params: model.params(),
        series: series.clone(),
        fitted,
        test: dated(&test.dates(), &test_values),
        test_forecast,
        future,
        test_mae,
    })
}

/// Try each candidate seasonal period and keep the one with the lowest test MAE
pub fn select_seasonal_period(
    series: &WeeklySeries,
    candidates: &[usize],
    config: &ForecastConfig,
) -> Result<PeriodSelection> {
    if candidates.is_empty() {
        return Err(AnalyticsError::invalid_parameter("candidates", "at least one seasonal period is required"));
    }

    let mut scores = Vec::with_capacity(candidates.len());
    let mut best: Option<ForecastOutput> = None;
    let mut last_error = None;

    for &period in candidates {
        let candidate = ForecastConfig {
            seasonal_period: period,
            ..config.clone()
        };
        match forecast_profit(series, &candidate) {
            Ok(output) => {
                scores.push(PeriodScore {
                    seasonal_period: period,
                    mae: output.test_mae,
                    error: None,
                });
                let Some(mae) = output.test_mae else { continue };
                if best.as_ref().and_then(|b| b.test_mae).map_or(true, |b| mae < b) {
                    best = Some(output);
                }
            }
            Err(err) => {
                warn!(seasonal_period = period, error = %err, "Seasonal period candidate failed");
                scores.push(PeriodScore {
                    seasonal_period: period,
                    mae: None,
                    error: Some(err.to_string()),
                });
                last_error = Some(err);
            }
        }
    }

    match best {
        Some(output) => {
            let mae = output.test_mae.unwrap_or(f64::NAN);
            info!(seasonal_period = output.seasonal_period, mae, "Seasonal period selected");
            Ok(PeriodSelection {
                seasonal_period: output.seasonal_period,
                mae,
                scores,
                output,
            })
        }
        None => Err(last_error.unwrap_or_else(|| {
            AnalyticsError::invalid_parameter("train_ratio", "no held-out weeks to score candidates on")
        })),
    }
}

/// Mean Absolute Error
pub fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.len() != predicted.len() || actual.is_empty() {
        return f64::NAN;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actual.len() as f64
}

fn dated(dates: &[NaiveDate], values: &[f64]) -> Vec<DatedValue> {
    dates
        .iter()
        .zip(values)
        .map(|(&week_ending, &value)| DatedValue { week_ending, value })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn weekly(values: &[f64]) -> WeeklySeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
        let points: Vec<_> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| (start + Duration::weeks(i as i64), v))
            .collect();
        WeeklySeries::from_points(&points).unwrap()
    }

    fn trending_quarterly(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let phase = 2.0 * std::f64::consts::PI * i as f64 / 13.0;
                100.0 + 2.0 * i as f64 + 8.0 * phase.sin()
            })
            .collect()
    }

    fn std_dev(values: &[f64]) -> f64 {
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
    }

    #[test]
    fn test_thirty_week_quarterly_forecast() {
        let values = trending_quarterly(30);
        let series = weekly(&values);
        let output = forecast_profit(&series, &ForecastConfig::default()).unwrap();

        // 90/10 split of 30 weeks
        assert_eq!(output.fitted.len(), 27);
        assert_eq!(output.test.len(), 3);
        assert_eq!(output.test_forecast.len(), 3);
        assert_eq!(output.future.len(), 13);

        let trailing = values[23..27].iter().sum::<f64>() / 4.0;
        let future_mean = output.future.iter().map(|p| p.value).sum::<f64>() / 13.0;
        assert!(future_mean > trailing, "{future_mean} <= {trailing}");

        let mae = output.test_mae.unwrap();
        assert!(mae < std_dev(&values), "mae {mae}");
    }

    #[test]
    fn test_future_dates_continue_the_series() {
        let series = weekly(&trending_quarterly(40));
        let config = ForecastConfig {
            horizon: 5,
            ..Default::default()
        };
        let output = forecast_profit(&series, &config).unwrap();

        let last = series.last_date().unwrap();
        assert_eq!(output.future[0].week_ending, last + Duration::weeks(1));
        assert_eq!(output.future.len(), 5);
        for pair in output.future.windows(2) {
            assert_eq!(pair[1].week_ending - pair[0].week_ending, Duration::weeks(1));
        }
        assert_eq!(output.test_forecast[0].week_ending, output.test[0].week_ending);
    }

    #[test]
    fn test_insufficient_history() {
        let err = forecast_profit(&weekly(&[10.0]), &ForecastConfig::default()).unwrap_err();
        assert!(matches!(err, AnalyticsError::InsufficientHistory { required: 2, actual: 1 }));
    }

    #[test]
    fn test_period_longer_than_history() {
        let err = forecast_profit(&weekly(&trending_quarterly(10)), &ForecastConfig::default()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn test_insufficient_seasonal_history() {
        // 14 weeks -> 12 training weeks < 13
        let err = forecast_profit(&weekly(&trending_quarterly(14)), &ForecastConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::InsufficientSeasonalHistory {
                seasonal_period: 13,
                training_size: 12
            }
        ));
    }

    #[test]
    fn test_non_positive_profit() {
        let mut values = trending_quarterly(30);
        values[5] = -4.0;
        let err = forecast_profit(&weekly(&values), &ForecastConfig::default()).unwrap_err();
        match err {
            AnalyticsError::NonPositiveValues { seasonal_period, value, .. } => {
                assert_eq!(seasonal_period, 13);
                assert_eq!(value, -4.0);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_collapsing_series_reports_fit_failure() {
        let config = ForecastConfig {
            seasonal_period: 2,
            horizon: 1,
            train_ratio: 1.0,
        };
        let err = forecast_profit(&weekly(&[1000.0, 1000.0, 10.0, 10.0, 1.0, 1.0]), &config).unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::FitFailed {
                seasonal_period: 2,
                training_size: 6,
                ..
            }
        ));
    }

    #[test]
    fn test_single_spike_still_fits() {
        let config = ForecastConfig {
            seasonal_period: 4,
            horizon: 2,
            train_ratio: 0.9,
        };
        let output = forecast_profit(&weekly(&[1.0, 1.0, 1.0, 100.0, 1.0, 1.0]), &config).unwrap();
        assert_eq!(output.future.len(), 2);
        assert_eq!(output.test.len(), 1);
    }

    #[test]
    fn test_invalid_config() {
        let series = weekly(&trending_quarterly(30));
        let config = ForecastConfig {
            horizon: 0,
            ..Default::default()
        };
        assert!(forecast_profit(&series, &config).is_err());
    }

    #[test]
    fn test_select_seasonal_period() {
        let series = weekly(&trending_quarterly(60));
        let selection = select_seasonal_period(&series, &[4, 13, 70], &ForecastConfig::default()).unwrap();

        assert_eq!(selection.scores.len(), 3);
        assert!(selection.scores[2].error.is_some());
        assert!(selection.mae.is_finite());
        assert_eq!(selection.seasonal_period, selection.output.seasonal_period);
        let best = selection
            .scores
            .iter()
            .filter_map(|s| s.mae)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(selection.mae, best);
    }

    #[test]
    fn test_next_week_change() {
        let series = weekly(&trending_quarterly(30));
        let output = forecast_profit(&series, &ForecastConfig::default()).unwrap();
        let change = output.next_week_change().unwrap();
        assert_eq!(change.last_week, *series.values().last().unwrap());
        assert_eq!(change.next_week, output.future[0].value);
    }

    #[test]
    fn test_mean_absolute_error() {
        assert_eq!(mean_absolute_error(&[1.0, 2.0], &[2.0, 0.0]), 1.5);
        assert!(mean_absolute_error(&[], &[]).is_nan());
    }
}
