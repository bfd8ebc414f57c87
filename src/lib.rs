//! ProfitLens: weekly profit forecasting and RFM product segmentation
//!
//! This library turns a branch's retail transactions into a weekly profit
//! series forecast with Holt-Winters smoothing, and groups its products into
//! RFM (Recency, Frequency, Monetary) segments with K-Means clustering.

pub mod cli;
pub mod error;
pub mod forecast;
pub mod model;
pub mod pipeline;
pub mod rfm;
pub mod segment;
pub mod selector;
pub mod smoothing;
pub mod timeseries;
pub mod transactions;

// Re-export public items for easier access
pub use cli::Args;
pub use error::{AnalyticsError, ErrorKind, Result};
pub use forecast::{forecast_profit, select_seasonal_period, ForecastConfig, ForecastOutput};
pub use model::{fit_kmeans, KMeansConfig, KMeansModel};
pub use pipeline::{run_pipeline, BranchReport, PipelineRequest, SliceOutcome};
pub use rfm::{build_rfm, RfmRecord, RfmRequest, RfmScope};
pub use segment::{segment, Segmentation, SegmentationConfig, StandardScaler};
pub use selector::{select_cluster_count, ClusterCount, ClusterCountStrategy, KStrategy, SelectorConfig};
pub use timeseries::{aggregate_weekly, WeeklySeries};
pub use transactions::{ColumnSchema, TableFilter, Transaction, TransactionTable};
