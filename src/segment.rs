//! Segmentation engine: standardize RFM features, cluster them and describe each cluster
//!
//! Descriptions come from quantile bands computed over the segmented subset,
//! so a cluster described as "high value" is high value *relative to the
//! products it was clustered with*.

use std::collections::BTreeMap;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AnalyticsError, Result};
use crate::model::{distinct_rows, fit_kmeans, KMeansConfig, KMeansModel};
use crate::rfm::{rfm_matrix, RfmRecord};

/// Percentiles separating the five bands of each dimension
const BAND_QUANTILES: [f64; 4] = [0.2, 0.4, 0.6, 0.8];

/// Band names, lowest raw value first. Low recency means a recent sale.
const RECENCY_BANDS: [&str; 5] = [
    "very recently purchased",
    "recently purchased",
    "moderately recent",
    "not purchased lately",
    "long inactive",
];
const FREQUENCY_BANDS: [&str; 5] = [
    "very rarely sold",
    "rarely sold",
    "occasionally sold",
    "frequently sold",
    "very frequently sold",
];
const MONETARY_BANDS: [&str; 5] = [
    "very low value",
    "low value",
    "medium value",
    "high value",
    "very high value",
];

/// Per-column standardization (zero mean, unit population variance).
///
/// Fit it once per segmentation call: parameters fitted on one category do
/// not make another category's clusters comparable. Columns without variance
/// standardize to zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandardScaler {
    pub means: Vec<f64>,
    pub std_devs: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(features: &Array2<f64>) -> Result<Self> {
        let means = features
            .mean_axis(Axis(0))
            .ok_or_else(|| AnalyticsError::empty("feature standardization"))?;
        let std_devs = features.std_axis(Axis(0), 0.0);
        Ok(Self {
            means: means.to_vec(),
            std_devs: std_devs.to_vec(),
        })
    }

    /// Fit on the [recency, frequency, monetary] matrix of `records`
    pub fn fit_records(records: &[RfmRecord]) -> Result<Self> {
        Self::fit(&rfm_matrix(records)?)
    }

    pub fn transform(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        if features.ncols() != self.means.len() {
            return Err(AnalyticsError::invalid_parameter(
                "features",
                format!("expected {} columns, got {}", self.means.len(), features.ncols()),
            ));
        }
        let mut scaled = features.clone();
        for (j, mut column) in scaled.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, std_dev) = (self.means[j], self.std_devs[j]);
            column.mapv_inplace(|v| if std_dev > 0.0 { (v - mean) / std_dev } else { 0.0 });
        }
        Ok(scaled)
    }
}

/// Segmentation parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub kmeans: KMeansConfig,
}

/// Quantile cut points of one dimension
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandCuts {
    pub cuts: [f64; 4],
}

impl BandCuts {
    fn from_values(values: &[f64]) -> Self {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Self {
            cuts: BAND_QUANTILES.map(|q| quantile(&sorted, q)),
        }
    }

    /// Band index 0..5; a value equal to a cut point belongs to the lower band
    pub fn band(&self, value: f64) -> usize {
        self.cuts.iter().filter(|&&cut| value > cut).count()
    }
}

/// Cut points for all three dimensions
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RfmBands {
    pub recency: BandCuts,
    pub frequency: BandCuts,
    pub monetary: BandCuts,
}

/// Summary and linguistic descriptor of one cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub size: usize,
    pub mean_recency: f64,
    pub mean_frequency: f64,
    pub mean_monetary: f64,
    pub recency_band: usize,
    pub frequency_band: usize,
    pub monetary_band: usize,
    /// Unique within one segmentation
    pub descriptor: String,
}

/// Cluster assigned to one RFM record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentAssignment {
    pub product_id: String,
    pub product_name: String,
    pub category: Option<String>,
    pub cluster: usize,
}

/// Result of one segmentation call
#[derive(Debug, Clone, Serialize)]
pub struct Segmentation {
    pub k: usize,
    pub inertia: f64,
    pub scaler: StandardScaler,
    pub bands: RfmBands,
    /// Same order as the input records
    pub assignments: Vec<SegmentAssignment>,
    /// One profile per non-empty cluster, by cluster id
    pub clusters: Vec<ClusterProfile>,
}

impl Segmentation {
    pub fn descriptor(&self, cluster: usize) -> Option<&str> {
        self.clusters
            .iter()
            .find(|c| c.cluster == cluster)
            .map(|c| c.descriptor.as_str())
    }
}

/// Cluster `records` into `k` segments and describe each one.
///
/// `scaler` standardizes the features before clustering; pass one fitted
/// on these same records unless cross-call comparability is intended.
pub fn segment(
    records: &[RfmRecord],
    k: usize,
    scaler: &StandardScaler,
    config: &SegmentationConfig,
) -> Result<Segmentation> {
    if k == 0 {
        return Err(AnalyticsError::invalid_parameter("k", "must be at least 1"));
    }
    if records.is_empty() {
        return Err(AnalyticsError::empty("segmentation"));
    }

    let raw = rfm_matrix(records)?;
    let distinct = distinct_rows(&raw);
    if k > distinct {
        return Err(AnalyticsError::InvalidClusterCount {
            k,
            distinct_rows: distinct,
        });
    }

    let scaled = scaler.transform(&raw)?;
    let model = fit_kmeans(&scaled, k, &config.kmeans)?;

    let bands = RfmBands {
        recency: BandCuts::from_values(&raw.column(0).to_vec()),
        frequency: BandCuts::from_values(&raw.column(1).to_vec()),
        monetary: BandCuts::from_values(&raw.column(2).to_vec()),
    };
    let clusters = describe_clusters(&raw, &model, &bands);

    let assignments = records
        .iter()
        .zip(model.labels.iter())
        .map(|(record, &cluster)| SegmentAssignment {
            product_id: record.product_id.clone(),
            product_name: record.product_name.clone(),
            category: record.category.clone(),
            cluster,
        })
        .collect();

    info!(
        k,
        products = records.len(),
        inertia = model.inertia,
        "Products segmented"
    );

    Ok(Segmentation {
        k,
        inertia: model.inertia,
        scaler: scaler.clone(),
        bands,
        assignments,
        clusters,
    })
}

fn describe_clusters(raw: &Array2<f64>, model: &KMeansModel, bands: &RfmBands) -> Vec<ClusterProfile> {
    let labels = &model.labels;
    let sizes = model.cluster_sizes();

    let mut profiles: Vec<ClusterProfile> = (0..model.n_clusters)
        .filter(|&cluster| sizes[cluster] > 0)
        .map(|cluster| {
            let members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == cluster).collect();
            let column_mean = |j: usize| members.iter().map(|&i| raw[[i, j]]).sum::<f64>() / members.len() as f64;
            let modal = |j: usize, cuts: &BandCuts, mean: f64| {
                let member_bands: Vec<usize> = members.iter().map(|&i| cuts.band(raw[[i, j]])).collect();
                modal_band(&member_bands, cuts.band(mean))
            };

            let (mean_recency, mean_frequency, mean_monetary) = (column_mean(0), column_mean(1), column_mean(2));
            let recency_band = modal(0, &bands.recency, mean_recency);
            let frequency_band = modal(1, &bands.frequency, mean_frequency);
            let monetary_band = modal(2, &bands.monetary, mean_monetary);

            ClusterProfile {
                cluster,
                size: sizes[cluster],
                mean_recency,
                mean_frequency,
                mean_monetary,
                recency_band,
                frequency_band,
                monetary_band,
                descriptor: format!(
                    "{}, {}, {}",
                    RECENCY_BANDS[recency_band], FREQUENCY_BANDS[frequency_band], MONETARY_BANDS[monetary_band]
                ),
            }
        })
        .collect();

    disambiguate(&mut profiles);
    profiles
}

/// Most common band; ties go to the band nearest `mean_band`, then the lower band
fn modal_band(member_bands: &[usize], mean_band: usize) -> usize {
    let mut counts = [0usize; 5];
    for &band in member_bands {
        counts[band] += 1;
    }
    let top = counts.iter().copied().max().unwrap_or(0);
    (0..5)
        .filter(|&band| counts[band] == top)
        .min_by_key(|&band| (band.abs_diff(mean_band), band))
        .unwrap_or(mean_band)
}

/// Suffix clusters sharing a descriptor with their rank by mean monetary value
fn disambiguate(profiles: &mut [ClusterProfile]) {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, profile) in profiles.iter().enumerate() {
        groups.entry(profile.descriptor.clone()).or_default().push(idx);
    }

    for mut members in groups.into_values().filter(|m| m.len() > 1) {
        members.sort_by(|&a, &b| {
            profiles[b]
                .mean_monetary
                .total_cmp(&profiles[a].mean_monetary)
                .then(profiles[a].cluster.cmp(&profiles[b].cluster))
        });
        for (rank, idx) in members.into_iter().enumerate() {
            profiles[idx].descriptor = format!("{} (tier {})", profiles[idx].descriptor, rank + 1);
        }
    }
}

/// Linear-interpolated quantile of sorted values
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + fraction * (sorted[upper] - sorted[lower])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::BTreeSet;

    fn record(id: usize, recency: i64, frequency: u32, monetary: f64) -> RfmRecord {
        RfmRecord {
            product_id: format!("P{id:03}"),
            product_name: format!("Product {id}"),
            category: Some("Ikan".to_string()),
            recency,
            frequency,
            monetary,
        }
    }

    /// Three behaviour groups: fresh best-sellers, steady mid-range, stale low-value
    fn catalogue() -> Vec<RfmRecord> {
        let mut records = Vec::new();
        for i in 0..8 {
            records.push(record(i, 1 + i as i64 % 3, 40 + i as u32, 900.0 + 10.0 * i as f64));
            records.push(record(100 + i, 30 + i as i64, 12 + i as u32 % 3, 300.0 + 5.0 * i as f64));
            records.push(record(200 + i, 180 + 3 * i as i64, 1 + i as u32 % 2, 20.0 + i as f64));
        }
        records
    }

    #[test]
    fn test_scaler_zero_mean_unit_variance() {
        let features = rfm_matrix(&catalogue()).unwrap();
        let scaler = StandardScaler::fit(&features).unwrap();
        let scaled = scaler.transform(&features).unwrap();

        for column in scaled.axis_iter(Axis(1)) {
            assert_relative_eq!(column.mean().unwrap(), 0.0, epsilon = 1e-9);
            assert_relative_eq!(column.std(0.0), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_scaler_constant_column() {
        let features = Array2::from_shape_vec((3, 2), vec![1.0, 5.0, 2.0, 5.0, 3.0, 5.0]).unwrap();
        let scaler = StandardScaler::fit(&features).unwrap();
        let scaled = scaler.transform(&features).unwrap();
        assert!(scaled.column(1).iter().all(|&v| v == 0.0));
        assert!(scaler.transform(&Array2::zeros((1, 3))).is_err());
    }

    #[test]
    fn test_segment_separates_behaviour_groups() {
        let records = catalogue();
        let scaler = StandardScaler::fit_records(&records).unwrap();
        let segmentation = segment(&records, 3, &scaler, &SegmentationConfig::default()).unwrap();

        assert_eq!(segmentation.assignments.len(), records.len());
        assert_eq!(segmentation.clusters.len(), 3);
        for profile in &segmentation.clusters {
            let members = segmentation.assignments.iter().filter(|a| a.cluster == profile.cluster).count();
            assert_eq!(profile.size, members);
        }

        let cluster_of = |id: &str| {
            segmentation
                .assignments
                .iter()
                .find(|a| a.product_id == id)
                .map(|a| a.cluster)
                .unwrap()
        };
        let best = cluster_of("P000");
        let stale = cluster_of("P200");
        assert!(segmentation.descriptor(best).unwrap().contains("very high value"));
        assert!(segmentation.descriptor(stale).unwrap().starts_with("long inactive"));
    }

    #[test]
    fn test_segment_is_deterministic() {
        let records = catalogue();
        let scaler = StandardScaler::fit_records(&records).unwrap();
        let config = SegmentationConfig::default();
        let a = segment(&records, 4, &scaler, &config).unwrap();
        let b = segment(&records, 4, &scaler, &config).unwrap();
        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.clusters, b.clusters);
    }

    #[test]
    fn test_descriptors_are_unique() {
        let records = catalogue();
        let scaler = StandardScaler::fit_records(&records).unwrap();
        for k in 1..=6 {
            let segmentation = segment(&records, k, &scaler, &SegmentationConfig::default()).unwrap();
            let descriptors: BTreeSet<&str> = segmentation.clusters.iter().map(|c| c.descriptor.as_str()).collect();
            assert_eq!(descriptors.len(), segmentation.clusters.len(), "k = {k}");
        }
    }

    #[test]
    fn test_invalid_k() {
        let records = catalogue();
        let scaler = StandardScaler::fit_records(&records).unwrap();
        assert!(segment(&records, 0, &scaler, &SegmentationConfig::default()).is_err());
        let err = segment(&records[..2], 3, &scaler, &SegmentationConfig::default()).unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidClusterCount { k: 3, distinct_rows: 2 }));
    }

    #[test]
    fn test_band_boundaries() {
        let cuts = BandCuts::from_values(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_relative_eq!(cuts.cuts[0], 2.0);
        assert_relative_eq!(cuts.cuts[3], 5.0);
        assert_eq!(cuts.band(1.0), 0);
        assert_eq!(cuts.band(2.0), 0);
        assert_eq!(cuts.band(2.5), 1);
        assert_eq!(cuts.band(6.0), 4);
    }

    #[test]
    fn test_modal_band_tie_break() {
        assert_eq!(modal_band(&[0, 0, 3, 3], 2), 3);
        assert_eq!(modal_band(&[0, 0, 4, 4], 2), 0);
        assert_eq!(modal_band(&[1, 1, 1, 4], 4), 1);
    }

    #[test]
    fn test_disambiguate_by_monetary_rank() {
        let profile = |cluster: usize, mean_monetary: f64| ClusterProfile {
            cluster,
            size: 1,
            mean_recency: 0.0,
            mean_frequency: 1.0,
            mean_monetary,
            recency_band: 0,
            frequency_band: 0,
            monetary_band: 0,
            descriptor: "recently purchased, rarely sold, low value".to_string(),
        };
        let mut profiles = vec![profile(0, 10.0), profile(1, 50.0), profile(2, 30.0)];
        disambiguate(&mut profiles);
        assert!(profiles[1].descriptor.ends_with("(tier 1)"));
        assert!(profiles[2].descriptor.ends_with("(tier 2)"));
        assert!(profiles[0].descriptor.ends_with("(tier 3)"));
    }
}
