//! Transaction table: the input contract shared by both analytical stages
//!
//! Source frames arrive from the ingestion side with the branch's own column
//! names. They are normalised once into a fixed-schema polars `DataFrame`;
//! every later stage reads that frame and never mutates it.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AnalyticsError, Result};

/// Normalised column names
pub const PRODUCT_ID: &str = "product_id";
pub const PRODUCT_NAME: &str = "product_name";
pub const CATEGORY: &str = "category";
pub const DAY: &str = "day";
pub const YEAR: &str = "year";
pub const PROFIT: &str = "profit";
pub const MONETARY: &str = "monetary";

/// Days between 0001-01-01 (CE day 1) and 1970-01-01, matching polars' Date encoding
const UNIX_EPOCH_FROM_CE: i32 = 719_163;

/// Column names of the source data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnSchema {
    pub date: String,
    pub product_id: String,
    pub product_name: String,
    pub profit: String,
    /// Optional: rows get no category when the column is absent
    pub category: Option<String>,
    /// Column summed into Monetary; profit when unset
    pub monetary: Option<String>,
}

impl Default for ColumnSchema {
    fn default() -> Self {
        Self {
            date: "TANGGAL".to_string(),
            product_id: "KODE BARANG".to_string(),
            product_name: "NAMA BARANG".to_string(),
            profit: "LABA".to_string(),
            category: Some("KATEGORI".to_string()),
            monetary: None,
        }
    }
}

/// Rows dropped while normalising the source frames
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataQualityReport {
    pub source_rows: usize,
    pub kept_rows: usize,
    pub unparsable_dates: usize,
    pub missing_product_ids: usize,
    /// Kept rows whose profit was empty and counted as 0
    pub null_profits: usize,
    /// Kept rows whose separate monetary column was empty and counted as 0
    pub null_monetary: usize,
}

impl DataQualityReport {
    pub fn dropped_rows(&self) -> usize {
        self.source_rows - self.kept_rows
    }

    fn merge(&mut self, other: &DataQualityReport) {
        self.source_rows += other.source_rows;
        self.kept_rows += other.kept_rows;
        self.unparsable_dates += other.unparsable_dates;
        self.missing_product_ids += other.missing_product_ids;
        self.null_profits += other.null_profits;
        self.null_monetary += other.null_monetary;
    }
}

/// A single typed sale line, for callers that already hold parsed rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub date: NaiveDate,
    pub product_id: String,
    pub product_name: String,
    pub category: Option<String>,
    pub profit: f64,
    /// Defaults to `profit` when absent
    pub monetary: Option<f64>,
}

/// Restricts a table to one category and/or a set of years
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableFilter {
    pub category: Option<String>,
    /// Empty means every year
    pub years: Vec<i32>,
}

impl TableFilter {
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            years: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.years.is_empty()
    }
}

/// Column buffers accumulated before building the normalised frame
#[derive(Default)]
struct Rows {
    ids: Vec<String>,
    names: Vec<String>,
    categories: Vec<Option<String>>,
    days: Vec<i32>,
    years: Vec<i32>,
    profits: Vec<f64>,
    monetary: Vec<f64>,
}

impl Rows {
    fn push(
        &mut self,
        date: NaiveDate,
        id: String,
        name: String,
        category: Option<String>,
        profit: f64,
        monetary: f64,
    ) {
        self.ids.push(id);
        self.names.push(name);
        self.categories.push(category);
        self.days.push(day_from_date(date));
        self.years.push(date.year());
        self.profits.push(profit);
        self.monetary.push(monetary);
    }

    fn into_frame(self) -> Result<DataFrame> {
        Ok(DataFrame::new(vec![
            Series::new(PRODUCT_ID, self.ids),
            Series::new(PRODUCT_NAME, self.names),
            Series::new(CATEGORY, self.categories),
            Series::new(DAY, self.days),
            Series::new(YEAR, self.years),
            Series::new(PROFIT, self.profits),
            Series::new(MONETARY, self.monetary),
        ])?)
    }
}

/// Normalised, read-only transaction table for one branch
#[derive(Debug, Clone)]
pub struct TransactionTable {
    frame: DataFrame,
    quality: DataQualityReport,
}

impl TransactionTable {
    /// Concatenate source frames into one normalised table.
    ///
    /// Columns are looked up by name, so a frame carrying the same column
    /// twice contributes only its first occurrence (polars' CSV reader
    /// renames later copies to `<name>_duplicated_<n>`, which are ignored).
    /// Rows whose date cannot be coerced or whose product id is empty are
    /// dropped and counted in the data-quality report.
    pub fn from_frames(frames: &[DataFrame], schema: &ColumnSchema) -> Result<Self> {
        let mut rows = Rows::default();
        let mut quality = DataQualityReport::default();

        for frame in frames {
            let report = append_frame(&mut rows, frame, schema)?;
            quality.merge(&report);
        }

        if quality.null_profits + quality.null_monetary > 0 {
            warn!(
                null_profits = quality.null_profits,
                null_monetary = quality.null_monetary,
                "Empty profit or monetary values counted as 0"
            );
        }
        if quality.dropped_rows() > 0 {
            warn!(
                unparsable_dates = quality.unparsable_dates,
                missing_product_ids = quality.missing_product_ids,
                "Dropped {} of {} transaction rows",
                quality.dropped_rows(),
                quality.source_rows
            );
        }
        debug!(rows = quality.kept_rows, frames = frames.len(), "Transaction table built");

        Ok(Self {
            frame: rows.into_frame()?,
            quality,
        })
    }

    /// Build a table from already-parsed rows
    pub fn from_transactions(transactions: &[Transaction]) -> Result<Self> {
        let mut rows = Rows::default();
        let mut quality = DataQualityReport {
            source_rows: transactions.len(),
            ..Default::default()
        };

        for tx in transactions {
            let id = tx.product_id.trim();
            if id.is_empty() {
                quality.missing_product_ids += 1;
                continue;
            }
            rows.push(
                tx.date,
                id.to_string(),
                tx.product_name.clone(),
                tx.category.clone(),
                tx.profit,
                tx.monetary.unwrap_or(tx.profit),
            );
            quality.kept_rows += 1;
        }

        Ok(Self {
            frame: rows.into_frame()?,
            quality,
        })
    }

    /// Rows matching `filter`; the data-quality report is carried over
    pub fn filter(&self, filter: &TableFilter) -> Result<Self> {
        if filter.is_empty() {
            return Ok(self.clone());
        }

        let mut lazy = self.frame.clone().lazy();
        if let Some(category) = &filter.category {
            lazy = lazy.filter(col(CATEGORY).eq(lit(category.as_str())));
        }
        if let Some(years) = filter
            .years
            .iter()
            .map(|&year| col(YEAR).eq(lit(year)))
            .reduce(|a, b| a.or(b))
        {
            lazy = lazy.filter(years);
        }

        Ok(Self {
            frame: lazy.collect()?,
            quality: self.quality.clone(),
        })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn data_quality(&self) -> &DataQualityReport {
        &self.quality
    }

    /// Distinct non-null categories, sorted
    pub fn categories(&self) -> Result<Vec<String>> {
        let categories: BTreeSet<String> = self
            .frame
            .column(CATEGORY)?
            .str()?
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();
        Ok(categories.into_iter().collect())
    }

    /// Rows without a category
    pub fn uncategorized_rows(&self) -> Result<usize> {
        Ok(self.frame.column(CATEGORY)?.null_count())
    }

    /// Distinct transaction years, sorted
    pub fn years(&self) -> Result<Vec<i32>> {
        let years: BTreeSet<i32> = self.frame.column(YEAR)?.i32()?.into_iter().flatten().collect();
        Ok(years.into_iter().collect())
    }

    /// Latest transaction date in the table
    pub fn max_date(&self) -> Result<Option<NaiveDate>> {
        Ok(self
            .frame
            .column(DAY)?
            .i32()?
            .max()
            .and_then(date_from_day))
    }
}

fn append_frame(rows: &mut Rows, frame: &DataFrame, schema: &ColumnSchema) -> Result<DataQualityReport> {
    let dates = coerce_dates(required(frame, &schema.date)?)?;
    let ids = string_values(required(frame, &schema.product_id)?)?;
    let names = string_values(required(frame, &schema.product_name)?)?;
    let profits = float_values(required(frame, &schema.profit)?)?;
    let monetary = match &schema.monetary {
        Some(column) => float_values(required(frame, column)?)?,
        None => profits.clone(),
    };
    let categories = match schema.category.as_deref().map(|c| frame.column(c)) {
        Some(Ok(series)) => string_values(series)?,
        _ => vec![None; frame.height()],
    };

    let mut report = DataQualityReport {
        source_rows: frame.height(),
        ..Default::default()
    };

    for i in 0..frame.height() {
        let Some(date) = dates[i] else {
            report.unparsable_dates += 1;
            continue;
        };
        let Some(id) = ids[i].clone() else {
            report.missing_product_ids += 1;
            continue;
        };
        let profit = profits[i].unwrap_or_else(|| {
            report.null_profits += 1;
            0.0
        });
        let monetary = match (&schema.monetary, monetary[i]) {
            (_, Some(value)) => value,
            (Some(_), None) => {
                report.null_monetary += 1;
                0.0
            }
            (None, None) => 0.0,
        };
        rows.push(
            date,
            id,
            names[i].clone().unwrap_or_default(),
            categories[i].clone(),
            profit,
            monetary,
        );
        report.kept_rows += 1;
    }

    Ok(report)
}

fn required<'a>(frame: &'a DataFrame, column: &str) -> Result<&'a Series> {
    frame
        .column(column)
        .map_err(|_| AnalyticsError::MissingColumn {
            column: column.to_string(),
        })
}

/// Coerce a date column of any common shape into calendar dates
fn coerce_dates(series: &Series) -> Result<Vec<Option<NaiveDate>>> {
    let days: Vec<Option<i32>> = match series.dtype() {
        DataType::Date => series.cast(&DataType::Int32)?.i32()?.into_iter().collect(),
        DataType::Datetime(_, _) => series
            .cast(&DataType::Date)?
            .cast(&DataType::Int32)?
            .i32()?
            .into_iter()
            .collect(),
        DataType::String => {
            return Ok(series.str()?.into_iter().map(|v| v.and_then(parse_date)).collect())
        }
        other => {
            return Err(AnalyticsError::UnsupportedColumnType {
                column: series.name().to_string(),
                dtype: other.to_string(),
            })
        }
    };
    Ok(days.into_iter().map(|d| d.and_then(date_from_day)).collect())
}

fn string_values(series: &Series) -> Result<Vec<Option<String>>> {
    let strings = series.cast(&DataType::String)?;
    Ok(strings
        .str()?
        .into_iter()
        .map(|v| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
        .collect())
}

fn float_values(series: &Series) -> Result<Vec<Option<f64>>> {
    Ok(series.cast(&DataType::Float64)?.f64()?.into_iter().collect())
}

/// Parse the date formats seen in branch exports
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%d/%m/%Y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.date());
        }
    }
    ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

/// Days since 1970-01-01
pub fn day_from_date(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_FROM_CE
}

pub fn date_from_day(day: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(day + UNIX_EPOCH_FROM_CE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_frame() -> DataFrame {
        df!(
            "TANGGAL" => &["2024-01-01", "2024-01-02", "not a date", "2024-02-10"],
            "KODE BARANG" => &["A1", "B2", "A1", ""],
            "NAMA BARANG" => &["Guppy", "Filter", "Guppy", "Net"],
            "LABA" => &[10.0, 20.0, 5.0, 7.0],
            "KATEGORI" => &["Ikan", "Aksesoris", "Ikan", "Aksesoris"]
        )
        .unwrap()
    }

    #[test]
    fn test_from_frames_drops_bad_rows() {
        let table = TransactionTable::from_frames(&[source_frame()], &ColumnSchema::default()).unwrap();

        assert_eq!(table.len(), 2);
        let quality = table.data_quality();
        assert_eq!(quality.source_rows, 4);
        assert_eq!(quality.unparsable_dates, 1);
        assert_eq!(quality.missing_product_ids, 1);
        assert_eq!(quality.dropped_rows(), 2);
    }

    #[test]
    fn test_null_profits_are_reported() {
        let frame = df!(
            "TANGGAL" => &["2024-01-01", "2024-01-02", "2024-01-03"],
            "KODE BARANG" => &["A1", "B2", "C3"],
            "NAMA BARANG" => &["Guppy", "Filter", "Pellet"],
            "LABA" => &[Some(10.0), None, Some(4.0)],
            "OMZET" => &[Some(50.0), Some(80.0), None]
        )
        .unwrap();
        let schema = ColumnSchema {
            category: None,
            monetary: Some("OMZET".to_string()),
            ..Default::default()
        };
        let table = TransactionTable::from_frames(&[frame], &schema).unwrap();

        assert_eq!(table.len(), 3);
        let quality = table.data_quality();
        assert_eq!(quality.null_profits, 1);
        assert_eq!(quality.null_monetary, 1);
        assert_eq!(quality.dropped_rows(), 0);
        assert_eq!(table.uncategorized_rows().unwrap(), 3);
        assert!(table.categories().unwrap().is_empty());

        let monetary: f64 = table.frame().column(MONETARY).unwrap().f64().unwrap().sum().unwrap();
        assert_eq!(monetary, 130.0);
    }

    #[test]
    fn test_duplicate_columns_are_ignored() {
        let mut frame = source_frame();
        frame
            .with_column(Series::new("LABA_duplicated_0", &[999.0, 999.0, 999.0, 999.0]))
            .unwrap();
        let table = TransactionTable::from_frames(&[frame], &ColumnSchema::default()).unwrap();

        let profit: f64 = table.frame().column(PROFIT).unwrap().f64().unwrap().sum().unwrap();
        assert_eq!(profit, 30.0);
    }

    #[test]
    fn test_missing_column() {
        let schema = ColumnSchema {
            profit: "PROFIT".to_string(),
            ..Default::default()
        };
        let err = TransactionTable::from_frames(&[source_frame()], &schema).unwrap_err();
        assert!(matches!(err, AnalyticsError::MissingColumn { column } if column == "PROFIT"));
    }

    #[test]
    fn test_filter_and_listings() {
        let table = TransactionTable::from_frames(&[source_frame(), source_frame()], &ColumnSchema::default())
            .unwrap();
        assert_eq!(table.categories().unwrap(), vec!["Aksesoris", "Ikan"]);
        assert_eq!(table.years().unwrap(), vec![2024]);

        let ikan = table.filter(&TableFilter::category("Ikan")).unwrap();
        assert_eq!(ikan.len(), 2);

        let none = table
            .filter(&TableFilter {
                category: None,
                years: vec![2023],
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(parse_date("2024-03-05"), Some(expected));
        assert_eq!(parse_date("05/03/2024"), Some(expected));
        assert_eq!(parse_date("2024-03-05 13:45:00"), Some(expected));
        assert_eq!(parse_date("2024-03-05T13:45:00Z"), Some(expected));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_day_encoding() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(day_from_date(epoch), 0);
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(date_from_day(day_from_date(date)), Some(date));
    }
}
