//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::forecast::ForecastConfig;
use crate::model::KMeansConfig;
use crate::pipeline::PipelineRequest;
use crate::rfm::RfmScope;
use crate::segment::SegmentationConfig;
use crate::selector::{KStrategy, SelectorConfig};
use crate::transactions::ColumnSchema;

/// Weekly profit forecasting and RFM product segmentation per branch
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Branch data as NAME=DIR; every .csv file in DIR is loaded. Repeatable.
    #[arg(short, long = "branch", required = true)]
    pub branches: Vec<String>,

    /// Forecast a single category instead of the whole branch
    #[arg(short, long)]
    pub category: Option<String>,

    /// Restrict segmentation to these years. Repeatable.
    #[arg(short, long = "year")]
    pub years: Vec<i32>,

    /// Weeks per seasonal cycle
    #[arg(long, default_value = "13")]
    pub seasonal_period: usize,

    /// Weeks to forecast past the last observation
    #[arg(long, default_value = "13")]
    pub horizon: usize,

    /// Share of weeks used for training
    #[arg(long, default_value = "0.9")]
    pub train_ratio: f64,

    /// Compare seasonal periods and keep the best, e.g. "4,13,26"
    #[arg(long)]
    pub seasonal_candidates: Option<String>,

    /// Fixed number of segments; overrides --k-strategy
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// How to pick the number of segments
    #[arg(long, value_enum, default_value_t = KChoice::Elbow)]
    pub k_strategy: KChoice,

    /// Group RFM by product, or by product and category
    #[arg(long, value_enum, default_value_t = ScopeChoice::ProductCategory)]
    pub rfm_scope: ScopeChoice,

    /// Segment each branch as a whole instead of per category
    #[arg(long)]
    pub whole_branch: bool,

    /// Column summed into Monetary (defaults to the profit column)
    #[arg(long)]
    pub monetary_column: Option<String>,

    /// Seed for k-means initialisation
    #[arg(long, default_value = "1")]
    pub seed: u64,

    /// Maximum iterations for K-Means algorithm
    #[arg(long, default_value = "300")]
    pub max_iters: u64,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Write the full JSON report to this path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KChoice {
    Elbow,
    Silhouette,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScopeChoice {
    Product,
    ProductCategory,
}

impl Args {
    /// Parse the NAME=DIR branch arguments
    pub fn parse_branches(&self) -> anyhow::Result<Vec<(String, PathBuf)>> {
        self.branches
            .iter()
            .map(|raw| {
                let (name, dir) = raw
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("Branch must be in format 'NAME=DIR': {}", raw))?;
                let (name, dir) = (name.trim(), dir.trim());
                if name.is_empty() || dir.is_empty() {
                    anyhow::bail!("Branch must be in format 'NAME=DIR': {}", raw);
                }
                Ok((name.to_string(), PathBuf::from(dir)))
            })
            .collect()
    }

    /// Parse the comma-separated seasonal period candidates
    pub fn parse_candidates(&self) -> anyhow::Result<Vec<usize>> {
        let Some(ref raw) = self.seasonal_candidates else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(|part| {
                part.trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid seasonal period: {}", part))
            })
            .collect()
    }

    pub fn k_strategy(&self) -> KStrategy {
        match (self.clusters, self.k_strategy) {
            (Some(k), _) => KStrategy::Fixed(k),
            (None, KChoice::Elbow) => KStrategy::Elbow,
            (None, KChoice::Silhouette) => KStrategy::Silhouette,
        }
    }

    pub fn column_schema(&self) -> ColumnSchema {
        ColumnSchema {
            monetary: self.monetary_column.clone(),
            ..Default::default()
        }
    }

    /// Pipeline request for one branch
    pub fn to_request(&self, branch: &str) -> anyhow::Result<PipelineRequest> {
        let kmeans = KMeansConfig {
            seed: self.seed,
            max_iters: self.max_iters,
            tolerance: self.tolerance,
            ..Default::default()
        };

        Ok(PipelineRequest {
            branch: branch.to_string(),
            forecast_category: self.category.clone(),
            years: self.years.clone(),
            categories: Vec::new(),
            segment_by_category: !self.whole_branch,
            rfm_scope: match self.rfm_scope {
                ScopeChoice::Product => RfmScope::Product,
                ScopeChoice::ProductCategory => RfmScope::ProductCategory,
            },
            forecast: ForecastConfig {
                seasonal_period: self.seasonal_period,
                horizon: self.horizon,
                train_ratio: self.train_ratio,
            },
            seasonal_candidates: self.parse_candidates()?,
            selector: SelectorConfig {
                kmeans: kmeans.clone(),
                ..Default::default()
            },
            k_strategy: self.k_strategy(),
            segmentation: SegmentationConfig { kmeans },
        })
    }
}
