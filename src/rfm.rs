//! Per-product Recency / Frequency / Monetary features using Polars

use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnalyticsError, Result};
use crate::transactions::{
    day_from_date, TableFilter, TransactionTable, CATEGORY, DAY, MONETARY, PRODUCT_ID, PRODUCT_NAME,
};

/// Grouping key for RFM aggregation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RfmScope {
    /// One record per product id
    Product,
    /// One record per (product id, category)
    #[default]
    ProductCategory,
}

/// Which rows to aggregate and how to group them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RfmRequest {
    /// Restrict to one category before aggregating
    pub category: Option<String>,
    pub scope: RfmScope,
}

/// RFM metrics for one product
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfmRecord {
    pub product_id: String,
    pub product_name: String,
    pub category: Option<String>,
    /// Days between the product's last sale and the latest sale in the subset
    pub recency: i64,
    /// Number of sale lines
    pub frequency: u32,
    /// Summed profit (or the configured monetary column)
    pub monetary: f64,
}

/// Compute RFM records for the rows selected by `request`.
///
/// The recency reference is the latest date *within the subset*, so
/// recency values from two different category calls are not comparable.
pub fn build_rfm(table: &TransactionTable, request: &RfmRequest) -> Result<Vec<RfmRecord>> {
    let subset = match &request.category {
        Some(category) => table.filter(&TableFilter::category(category.clone()))?,
        None => table.clone(),
    };
    if subset.is_empty() {
        let context = match &request.category {
            Some(category) => format!("RFM in category '{category}'"),
            None => "RFM".to_string(),
        };
        return Err(AnalyticsError::empty(context));
    }

    let reference_date = subset
        .max_date()?
        .ok_or_else(|| AnalyticsError::empty("RFM reference date"))?;
    let reference_day = day_from_date(reference_date);

    let mut keys = vec![col(PRODUCT_ID)];
    let mut aggs = vec![
        col(DAY).max().alias("last_day"),
        col(DAY).count().alias("frequency"),
        col(PRODUCT_NAME).first(),
        col(MONETARY).sum(),
    ];
    match request.scope {
        RfmScope::ProductCategory => keys.push(col(CATEGORY)),
        RfmScope::Product => aggs.push(col(CATEGORY).first()),
    }

    let grouped = subset
        .frame()
        .clone()
        .lazy()
        .group_by_stable(keys)
        .agg(aggs)
        .collect()?;

    let ids = grouped.column(PRODUCT_ID)?.str()?;
    let names = grouped.column(PRODUCT_NAME)?.str()?;
    let categories = grouped.column(CATEGORY)?.str()?;
    let last_days = grouped.column("last_day")?.i32()?;
    let frequency = grouped.column("frequency")?.cast(&DataType::UInt32)?;
    let frequency = frequency.u32()?;
    let monetary = grouped.column(MONETARY)?.f64()?;

    let mut records = Vec::with_capacity(grouped.height());
    for i in 0..grouped.height() {
        let (Some(product_id), Some(last_day)) = (ids.get(i), last_days.get(i)) else {
            continue;
        };
        records.push(RfmRecord {
            product_id: product_id.to_string(),
            product_name: names.get(i).unwrap_or_default().to_string(),
            category: categories.get(i).map(str::to_string),
            recency: i64::from(reference_day - last_day),
            frequency: frequency.get(i).unwrap_or(0),
            monetary: monetary.get(i).unwrap_or(0.0),
        });
    }
    records.sort_by(|a, b| {
        a.product_id
            .cmp(&b.product_id)
            .then_with(|| a.category.cmp(&b.category))
    });

    debug!(
        products = records.len(),
        %reference_date,
        scope = ?request.scope,
        "RFM features computed"
    );
    Ok(records)
}

/// Raw feature matrix with columns [recency, frequency, monetary]
pub fn rfm_matrix(records: &[RfmRecord]) -> Result<Array2<f64>> {
    let mut raw = Vec::with_capacity(records.len() * 3);
    for record in records {
        raw.extend_from_slice(&[record.recency as f64, f64::from(record.frequency), record.monetary]);
    }
    Ok(Array2::from_shape_vec((records.len(), 3), raw)?)
}
