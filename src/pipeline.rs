//! Per-branch pipeline: weekly forecast plus RFM segmentation for each category
//!
//! Every slice (the branch forecast, each category segmentation) is run
//! independently. A failure in one slice is recorded in the report and never
//! stops the others.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, Result};
use crate::forecast::{forecast_profit, select_seasonal_period, ForecastConfig, ForecastOutput, PeriodScore, ProfitChange};
use crate::rfm::{build_rfm, rfm_matrix, RfmRecord, RfmRequest, RfmScope};
use crate::segment::{segment, SegmentationConfig, Segmentation, StandardScaler};
use crate::selector::{select_cluster_count, ClusterCount, KScore, KStrategy, SelectorConfig};
use crate::timeseries::aggregate_weekly;
use crate::transactions::{DataQualityReport, TableFilter, TransactionTable};

/// Everything one pipeline run needs; built once and never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineRequest {
    pub branch: String,
    /// Forecast one category instead of the whole branch
    pub forecast_category: Option<String>,
    /// Years kept for segmentation; empty keeps every year
    pub years: Vec<i32>,
    /// Categories to segment; empty segments every category in the table
    pub categories: Vec<String>,
    /// Segment each category on its own, or the whole branch at once
    pub segment_by_category: bool,
    pub rfm_scope: RfmScope,
    pub forecast: ForecastConfig,
    /// When set, the seasonal period with the lowest held-out MAE is used
    pub seasonal_candidates: Vec<usize>,
    pub selector: SelectorConfig,
    pub k_strategy: KStrategy,
    pub segmentation: SegmentationConfig,
}

impl Default for PipelineRequest {
    fn default() -> Self {
        Self {
            branch: String::new(),
            forecast_category: None,
            years: Vec::new(),
            categories: Vec::new(),
            segment_by_category: true,
            rfm_scope: RfmScope::default(),
            forecast: ForecastConfig::default(),
            seasonal_candidates: Vec::new(),
            selector: SelectorConfig::default(),
            k_strategy: KStrategy::default(),
            segmentation: SegmentationConfig::default(),
        }
    }
}

impl PipelineRequest {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            ..Default::default()
        }
    }
}

/// Result of one independent slice of the pipeline
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SliceOutcome<T> {
    Completed(T),
    /// Not enough data to run the slice
    Skipped { reason: String },
    Failed { kind: ErrorKind, message: String },
}

impl<T> SliceOutcome<T> {
    /// Data-quality errors skip the slice, anything else fails it
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(err) => match err.kind() {
                ErrorKind::DataQuality => Self::Skipped {
                    reason: err.to_string(),
                },
                kind => Self::Failed {
                    kind,
                    message: err.to_string(),
                },
            },
        }
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Forecast slice of a branch report
#[derive(Debug, Clone, Serialize)]
pub struct ForecastReport {
    pub output: ForecastOutput,
    /// Only filled when several seasonal periods were compared
    pub period_scores: Vec<PeriodScore>,
    pub next_week: Option<ProfitChange>,
}

/// Segmentation slice of a branch report
#[derive(Debug, Clone, Serialize)]
pub struct SegmentReport {
    pub k: usize,
    pub k_scores: Vec<KScore>,
    pub rfm: Vec<RfmRecord>,
    pub segmentation: Segmentation,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySegment {
    /// `None` when the branch is segmented as a whole
    pub category: Option<String>,
    pub outcome: SliceOutcome<SegmentReport>,
}

/// Everything produced for one branch
#[derive(Debug, Clone, Serialize)]
pub struct BranchReport {
    pub branch: String,
    pub data_quality: DataQualityReport,
    pub forecast: SliceOutcome<ForecastReport>,
    pub segments: Vec<CategorySegment>,
}

/// Run the forecast and every segmentation slice for one branch
pub fn run_pipeline(table: &TransactionTable, request: &PipelineRequest) -> BranchReport {
    info!(branch = %request.branch, rows = table.len(), "Running branch pipeline");

    let forecast = SliceOutcome::from_result(run_forecast(table, request));
    match &forecast {
        SliceOutcome::Skipped { reason } => warn!(branch = %request.branch, %reason, "Forecast skipped"),
        SliceOutcome::Failed { kind, message } => {
            warn!(branch = %request.branch, ?kind, %message, "Forecast failed")
        }
        SliceOutcome::Completed(_) => {}
    }

    let segments = match segment_slices(table, request) {
        Ok(slices) => slices
            .into_iter()
            .map(|(category, subset)| {
                let outcome = SliceOutcome::from_result(run_segmentation(&subset, category.clone(), request))
                    .or_skip_not_possible();
                if let SliceOutcome::Failed { message, .. } = &outcome {
                    warn!(branch = %request.branch, category = ?category, %message, "Segmentation failed");
                }
                CategorySegment { category, outcome }
            })
            .collect(),
        Err(err) => vec![CategorySegment {
            category: None,
            outcome: SliceOutcome::from_result(Err(err)),
        }],
    };

    BranchReport {
        branch: request.branch.clone(),
        data_quality: table.data_quality().clone(),
        forecast,
        segments,
    }
}

fn run_forecast(table: &TransactionTable, request: &PipelineRequest) -> Result<ForecastReport> {
    let subset = match &request.forecast_category {
        Some(category) => table.filter(&TableFilter::category(category.clone()))?,
        None => table.clone(),
    };
    let series = aggregate_weekly(&subset)?;

    let (output, period_scores) = if request.seasonal_candidates.is_empty() {
        (forecast_profit(&series, &request.forecast)?, Vec::new())
    } else {
        let selection = select_seasonal_period(&series, &request.seasonal_candidates, &request.forecast)?;
        (selection.output, selection.scores)
    };

    Ok(ForecastReport {
        next_week: output.next_week_change(),
        output,
        period_scores,
    })
}

/// Year-filtered table split into the slices to segment
fn segment_slices(
    table: &TransactionTable,
    request: &PipelineRequest,
) -> Result<Vec<(Option<String>, TransactionTable)>> {
    let filtered = table.filter(&TableFilter {
        category: None,
        years: request.years.clone(),
    })?;
    if !request.segment_by_category {
        return Ok(vec![(None, filtered)]);
    }

    if !request.categories.is_empty() {
        return Ok(request
            .categories
            .iter()
            .map(|c| (Some(c.clone()), filtered.clone()))
            .collect());
    }

    let categories = filtered.categories()?;
    if categories.is_empty() {
        debug!(branch = %request.branch, "No categories present, segmenting the whole branch");
        return Ok(vec![(None, filtered)]);
    }
    let uncategorized = filtered.uncategorized_rows()?;
    if uncategorized > 0 {
        warn!(
            branch = %request.branch,
            rows = uncategorized,
            "Rows without a category are left out of per-category segmentation"
        );
    }
    Ok(categories.into_iter().map(|c| (Some(c), filtered.clone())).collect())
}

/// `Ok(None)` when the slice has too few products to cluster
fn run_segmentation(
    table: &TransactionTable,
    category: Option<String>,
    request: &PipelineRequest,
) -> Result<Option<SegmentReport>> {
    let rfm = build_rfm(
        table,
        &RfmRequest {
            category,
            scope: request.rfm_scope,
        },
    )?;

    let scaler = StandardScaler::fit_records(&rfm)?;
    let scaled = scaler.transform(&rfm_matrix(&rfm)?)?;
    let strategy = request.k_strategy.strategy();

    let (k, k_scores) = match select_cluster_count(&scaled, &request.selector, strategy.as_ref())? {
        ClusterCount::NotPossible => return Ok(None),
        ClusterCount::Chosen { k, scores } => (k, scores),
    };
    let segmentation = segment(&rfm, k, &scaler, &request.segmentation)?;

    Ok(Some(SegmentReport {
        k,
        k_scores,
        rfm,
        segmentation,
    }))
}

impl SliceOutcome<Option<SegmentReport>> {
    fn or_skip_not_possible(self) -> SliceOutcome<SegmentReport> {
        match self {
            Self::Completed(Some(report)) => SliceOutcome::Completed(report),
            Self::Completed(None) => SliceOutcome::Skipped {
                reason: "fewer than two products to segment".to_string(),
            },
            Self::Skipped { reason } => SliceOutcome::Skipped { reason },
            Self::Failed { kind, message } => SliceOutcome::Failed { kind, message },
        }
    }
}
