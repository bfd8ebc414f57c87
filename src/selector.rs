//! Choosing the number of segments for a standardized RFM matrix
//!
//! A sweep fits k-means for every candidate k and records its inertia and a
//! sampled silhouette score. Picking k from those scores is delegated to a
//! [`ClusterCountStrategy`], so the elbow heuristic can be swapped for a fixed
//! count or silhouette maximisation without touching the sweep.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{distinct_rows, fit_kmeans, silhouette_score, KMeansConfig};

/// Scores recorded for one candidate cluster count
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KScore {
    pub k: usize,
    pub inertia: f64,
    pub silhouette: f64,
}

/// Outcome of the sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClusterCount {
    /// One row or fewer: segmentation must be skipped
    NotPossible,
    Chosen { k: usize, scores: Vec<KScore> },
}

/// Picks k from the sweep scores, which are sorted by ascending k and never empty
pub trait ClusterCountStrategy {
    fn choose_k(&self, scores: &[KScore]) -> usize;
}

/// Elbow of the inertia curve: the candidate lying furthest below the
/// straight line joining the first and last normalised inertias.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurvatureElbow;

impl ClusterCountStrategy for CurvatureElbow {
    fn choose_k(&self, scores: &[KScore]) -> usize {
        let first = scores[0];
        let last = scores[scores.len() - 1];
        if scores.len() < 3 {
            return first.k;
        }

        let (min, max) = scores.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
            (lo.min(s.inertia), hi.max(s.inertia))
        });
        let k_span = (last.k - first.k) as f64;
        let inertia_span = max - min;
        if inertia_span <= f64::EPSILON {
            return first.k;
        }

        let mut best = (first.k, 0.0);
        for score in scores {
            let x = (score.k - first.k) as f64 / k_span;
            let y = (score.inertia - min) / inertia_span;
            let below_chord = (1.0 - x) - y;
            if below_chord > best.1 + 1e-12 {
                best = (score.k, below_chord);
            }
        }
        best.0
    }
}

/// Always the same k, capped at the largest feasible candidate
#[derive(Debug, Clone, Copy)]
pub struct FixedK(pub usize);

impl ClusterCountStrategy for FixedK {
    fn choose_k(&self, scores: &[KScore]) -> usize {
        let largest = scores.iter().map(|s| s.k).max().unwrap_or(1);
        self.0.clamp(1, largest)
    }
}

/// Highest sampled silhouette; ties go to the smaller k
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxSilhouette;

impl ClusterCountStrategy for MaxSilhouette {
    fn choose_k(&self, scores: &[KScore]) -> usize {
        scores
            .iter()
            .fold(scores[0], |best, s| if s.silhouette > best.silhouette { *s } else { best })
            .k
    }
}

/// Serializable choice of strategy, for request objects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "k", rename_all = "snake_case")]
pub enum KStrategy {
    #[default]
    Elbow,
    Fixed(usize),
    Silhouette,
}

impl KStrategy {
    pub fn strategy(&self) -> Box<dyn ClusterCountStrategy> {
        match *self {
            KStrategy::Elbow => Box::new(CurvatureElbow),
            KStrategy::Fixed(k) => Box::new(FixedK(k)),
            KStrategy::Silhouette => Box::new(MaxSilhouette),
        }
    }
}

/// Candidate range and k-means settings for the sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub k_min: usize,
    pub k_max: usize,
    /// Upper bound of the 1..=n range used for very small inputs
    pub extended_max: usize,
    /// Rows sampled when scoring silhouettes
    pub silhouette_sample: usize,
    pub kmeans: KMeansConfig,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            k_min: 2,
            k_max: 10,
            extended_max: 11,
            silhouette_sample: 200,
            kmeans: KMeansConfig::default(),
        }
    }
}

impl SelectorConfig {
    /// Candidate ks for a matrix with `distinct` distinct rows
    fn candidates(&self, distinct: usize) -> std::ops::RangeInclusive<usize> {
        if distinct > self.k_min {
            self.k_min.max(1)..=self.k_max.min(distinct)
        } else {
            1..=self.extended_max.min(distinct)
        }
    }
}

/// Sweep candidate cluster counts and let `strategy` pick one
pub fn select_cluster_count(
    features: &Array2<f64>,
    config: &SelectorConfig,
    strategy: &dyn ClusterCountStrategy,
) -> Result<ClusterCount> {
    if features.nrows() <= 1 {
        debug!(rows = features.nrows(), "Too few rows to cluster");
        return Ok(ClusterCount::NotPossible);
    }

    let distinct = distinct_rows(features);
    let mut scores = Vec::new();
    for k in config.candidates(distinct) {
        let model = fit_kmeans(features, k, &config.kmeans)?;
        let silhouette = silhouette_score(features, &model.labels, k, config.silhouette_sample);
        debug!(k, inertia = model.inertia, silhouette, "Cluster count candidate");
        scores.push(KScore {
            k,
            inertia: model.inertia,
            silhouette,
        });
    }
    if scores.is_empty() {
        return Ok(ClusterCount::NotPossible);
    }

    let k = strategy.choose_k(&scores);
    info!(k, candidates = scores.len(), "Cluster count selected");
    Ok(ClusterCount::Chosen { k, scores })
}
