//! Weekly profit series built from raw transaction rows

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use polars::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::error::{AnalyticsError, Result};
use crate::transactions::{date_from_day, TransactionTable, DAY, PROFIT};

/// One week of the series, labelled by its closing Sunday
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeeklyPoint {
    pub week_ending: NaiveDate,
    pub profit: f64,
    /// True when the week had no sales and the value was interpolated
    pub interpolated: bool,
}

/// Regular weekly profit series: one point every 7 days, no gaps
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklySeries {
    points: Vec<WeeklyPoint>,
}

impl WeeklySeries {
    /// Build a series from `(week_ending, profit)` pairs already on a weekly grid
    pub fn from_points(points: &[(NaiveDate, f64)]) -> Result<Self> {
        for pair in points.windows(2) {
            if pair[1].0 - pair[0].0 != Duration::days(7) {
                return Err(AnalyticsError::invalid_parameter(
                    "points",
                    format!("{} and {} are not one week apart", pair[0].0, pair[1].0),
                ));
            }
        }
        Ok(Self {
            points: points
                .iter()
                .map(|&(week_ending, profit)| WeeklyPoint {
                    week_ending,
                    profit,
                    interpolated: false,
                })
                .collect(),
        })
    }

    pub fn points(&self) -> &[WeeklyPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.profit).collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.week_ending).collect()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.week_ending)
    }

    /// Sub-series over `range`, keeping the weekly grid
    pub fn slice(&self, range: std::ops::Range<usize>) -> WeeklySeries {
        WeeklySeries {
            points: self.points[range].to_vec(),
        }
    }
}

/// The Sunday closing the week that contains `date`
pub fn week_ending(date: NaiveDate) -> NaiveDate {
    let offset = 6 - date.weekday().num_days_from_monday();
    date + Duration::days(offset as i64)
}

/// `count` consecutive week-ending dates starting one week after `last`
pub fn weeks_after(last: NaiveDate, count: usize) -> Vec<NaiveDate> {
    (1..=count as i64)
        .map(|i| last + Duration::weeks(i))
        .collect()
}

/// Aggregate transactions into a weekly profit series.
///
/// Same-day rows are summed first, then each week takes the mean of its
/// daily totals. Weeks without sales are filled by linear interpolation
/// between the neighbouring observed weeks.
pub fn aggregate_weekly(table: &TransactionTable) -> Result<WeeklySeries> {
    if table.is_empty() {
        return Err(AnalyticsError::empty("weekly profit aggregation"));
    }

    let daily = table
        .frame()
        .clone()
        .lazy()
        .group_by_stable([col(DAY)])
        .agg([col(PROFIT).sum()])
        .collect()?;

    let days = daily.column(DAY)?.i32()?;
    let profits = daily.column(PROFIT)?.f64()?;

    let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (day, profit) in days.into_iter().zip(profits.into_iter()) {
        if let (Some(date), Some(profit)) = (day.and_then(date_from_day), profit) {
            // first occurrence wins
            by_day.entry(date).or_insert(profit);
        }
    }

    let mut weekly: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for (date, profit) in by_day {
        let entry = weekly.entry(week_ending(date)).or_insert((0.0, 0));
        entry.0 += profit;
        entry.1 += 1;
    }
    let observed: Vec<(NaiveDate, f64)> = weekly
        .into_iter()
        .map(|(week, (sum, count))| (week, sum / count as f64))
        .collect();

    let points = fill_weekly_gaps(&observed);
    debug!(
        weeks = points.len(),
        interpolated = points.iter().filter(|p| p.interpolated).count(),
        "Weekly profit series built"
    );
    Ok(WeeklySeries { points })
}

/// Expand sorted observed weeks onto a contiguous grid, interpolating gaps
fn fill_weekly_gaps(observed: &[(NaiveDate, f64)]) -> Vec<WeeklyPoint> {
    let mut points = Vec::new();

    for (i, &(week, profit)) in observed.iter().enumerate() {
        points.push(WeeklyPoint {
            week_ending: week,
            profit,
            interpolated: false,
        });

        let Some(&(next_week, next_profit)) = observed.get(i + 1) else {
            break;
        };
        let span = (next_week - week).num_days() as f64;
        let mut gap = week + Duration::weeks(1);
        while gap < next_week {
            let t = (gap - week).num_days() as f64 / span;
            points.push(WeeklyPoint {
                week_ending: gap,
                profit: profit + t * (next_profit - profit),
                interpolated: true,
            });
            gap += Duration::weeks(1);
        }
    }

    points
}
