//! K-Means clustering model implementation

use std::collections::HashSet;

use linfa::prelude::*;
use linfa_clustering::{KMeans, KMeansInit};
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};

/// K-Means settings shared by the cluster-count sweep and the final fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansConfig {
    /// Seed for the k-means++ initialisation
    pub seed: u64,
    /// Independent initialisations; the lowest inertia wins
    pub n_runs: usize,
    /// Maximum iterations for convergence
    pub max_iters: u64,
    /// Convergence tolerance
    pub tolerance: f64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            n_runs: 10,
            max_iters: 300,
            tolerance: 1e-4,
        }
    }
}

/// K-Means model wrapper with fitted parameters
#[derive(Debug)]
pub struct KMeansModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignments for training data
    pub labels: Array1<usize>,
    /// Cluster centroids in standardized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares (inertia)
    pub inertia: f64,
}

impl KMeansModel {
    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }
}

/// Fit K-Means on a standardized feature matrix
///
/// # Arguments
/// * `features` - One row per product, already standardized
/// * `n_clusters` - Number of clusters, at most the number of distinct rows
/// * `config` - Seed and convergence settings
///
/// # Returns
/// * Fitted `KMeansModel` with labels and inertia
pub fn fit_kmeans(features: &Array2<f64>, n_clusters: usize, config: &KMeansConfig) -> Result<KMeansModel> {
    if n_clusters == 0 {
        return Err(AnalyticsError::invalid_parameter("k", "must be at least 1"));
    }
    let distinct = distinct_rows(features);
    if n_clusters > distinct {
        return Err(AnalyticsError::InvalidClusterCount {
            k: n_clusters,
            distinct_rows: distinct,
        });
    }

    // Create dataset for linfa
    let n_samples = features.nrows();
    let targets: Array1<usize> = Array1::zeros(n_samples); // Dummy targets for unsupervised learning
    let dataset = Dataset::new(features.clone(), targets);

    let rng = StdRng::seed_from_u64(config.seed);
    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .init_method(KMeansInit::KMeansPlusPlus)
        .n_runs(config.n_runs)
        .max_n_iterations(config.max_iters)
        .tolerance(config.tolerance)
        .fit(&dataset)
        .map_err(|err| AnalyticsError::ClusteringFailed {
            k: n_clusters,
            reason: err.to_string(),
        })?;

    let labels = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    Ok(KMeansModel {
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Number of distinct rows; k-means cannot place more centroids than this
pub fn distinct_rows(features: &Array2<f64>) -> usize {
    features
        .outer_iter()
        .map(|row| {
            row.iter()
                // -0.0 and 0.0 are the same point
                .map(|&v| if v == 0.0 { 0 } else { v.to_bits() })
                .collect::<Vec<u64>>()
        })
        .collect::<HashSet<_>>()
        .len()
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    let mut inertia = 0.0;

    for (i, &cluster) in labels.iter().enumerate() {
        if cluster < centroids.nrows() {
            let distance = euclidean_distance(&features.row(i), &centroids.row(cluster));
            inertia += distance * distance;
        }
    }

    inertia
}

/// Mean silhouette coefficient over the first `sample_size` rows
pub fn silhouette_score(features: &Array2<f64>, labels: &Array1<usize>, n_clusters: usize, sample_size: usize) -> f64 {
    let n_samples = features.nrows().min(sample_size);
    if n_samples < 2 || n_clusters < 2 {
        return 0.0;
    }

    let mut silhouette_sum = 0.0;

    for i in 0..n_samples {
        let point = features.row(i);
        let cluster_label = labels[i];

        // a(i): mean distance to points in the same cluster
        let mut same_cluster_distances = Vec::new();
        let mut other_cluster_distances: Vec<Vec<f64>> = vec![Vec::new(); n_clusters];

        for j in 0..n_samples {
            if i == j {
                continue;
            }

            let distance = euclidean_distance(&point, &features.row(j));
            let other_label = labels[j];

            if other_label == cluster_label {
                same_cluster_distances.push(distance);
            } else if other_label < n_clusters {
                other_cluster_distances[other_label].push(distance);
            }
        }

        let a_i = if same_cluster_distances.is_empty() {
            0.0
        } else {
            same_cluster_distances.iter().sum::<f64>() / same_cluster_distances.len() as f64
        };

        // b(i): smallest mean distance to another cluster
        let b_i = other_cluster_distances
            .iter()
            .filter(|distances| !distances.is_empty())
            .map(|distances| distances.iter().sum::<f64>() / distances.len() as f64)
            .fold(f64::INFINITY, f64::min);

        let silhouette_i = if b_i.is_infinite() || (a_i == 0.0 && b_i == 0.0) {
            0.0
        } else {
            (b_i - a_i) / a_i.max(b_i)
        };

        silhouette_sum += silhouette_i;
    }

    silhouette_sum / n_samples as f64
}

/// Calculate Euclidean distance between two points
fn euclidean_distance(point1: &ArrayView1<f64>, point2: &ArrayView1<f64>) -> f64 {
    point1
        .iter()
        .zip(point2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt()
}
