//! Error types shared by every analytical stage

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Coarse classification of a failure, used by the pipeline to decide
/// whether a slice was skipped or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unparsable or missing data, empty or near-empty inputs
    DataQuality,
    /// The model could not be fitted to the data it was given
    ModelFit,
    /// Parameters rejected before any fitting attempt
    Configuration,
    /// Failures from the underlying libraries
    Internal,
}

/// Errors that can occur while aggregating, forecasting or segmenting
#[derive(Error, Debug)]
pub enum AnalyticsError {
    /// A required column is absent from a source frame
    #[error("Missing column '{column}' in transaction data")]
    MissingColumn { column: String },

    /// A column exists but holds values that cannot be coerced
    #[error("Column '{column}' has unsupported type {dtype}")]
    UnsupportedColumnType { column: String, dtype: String },

    /// Nothing left to work with after filtering
    #[error("No usable rows for {context}")]
    EmptyInput { context: String },

    /// Too few weekly observations to build a forecast
    #[error("Insufficient history: need at least {required} weeks, got {actual}")]
    InsufficientHistory { required: usize, actual: usize },

    /// Training window shorter than one seasonal cycle
    #[error(
        "Insufficient seasonal history: seasonal period {seasonal_period} needs at least \
         {seasonal_period} training weeks, got {training_size}"
    )]
    InsufficientSeasonalHistory {
        seasonal_period: usize,
        training_size: usize,
    },

    /// Multiplicative seasonality is undefined for zero or negative profit
    #[error(
        "Non-positive weekly profit {value} in week ending {week} (multiplicative seasonality, \
         period {seasonal_period})"
    )]
    NonPositiveValues {
        seasonal_period: usize,
        week: NaiveDate,
        value: f64,
    },

    /// No smoothing parameters produced a usable model
    #[error(
        "Model fit failed (seasonal period {seasonal_period}, training size {training_size}): {reason}"
    )]
    FitFailed {
        seasonal_period: usize,
        training_size: usize,
        reason: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Requested more clusters than the data can support
    #[error("Cannot form {k} clusters from {distinct_rows} distinct RFM rows")]
    InvalidClusterCount { k: usize, distinct_rows: usize },

    /// K-Means itself reported an error
    #[error("K-Means with {k} clusters failed: {reason}")]
    ClusteringFailed { k: usize, reason: String },

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl AnalyticsError {
    pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn empty(context: impl Into<String>) -> Self {
        Self::EmptyInput {
            context: context.into(),
        }
    }

    /// Which part of the error taxonomy this failure belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingColumn { .. }
            | Self::UnsupportedColumnType { .. }
            | Self::EmptyInput { .. }
            | Self::InsufficientHistory { .. } => ErrorKind::DataQuality,
            Self::InsufficientSeasonalHistory { .. }
            | Self::NonPositiveValues { .. }
            | Self::FitFailed { .. }
            | Self::ClusteringFailed { .. } => ErrorKind::ModelFit,
            Self::InvalidParameter { .. } | Self::InvalidClusterCount { .. } => {
                ErrorKind::Configuration
            }
            Self::Polars(_) | Self::Shape(_) => ErrorKind::Internal,
        }
    }
}
