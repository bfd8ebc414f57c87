//! Integration tests for ProfitLens

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use profitlens::{
    aggregate_weekly, build_rfm, run_pipeline, segment, ColumnSchema, ErrorKind, PipelineRequest, RfmRequest,
    SegmentationConfig, SliceOutcome, StandardScaler, TransactionTable,
};

const CATEGORIES: [&str; 3] = ["Ikan", "Aksesoris", "Pakan"];

fn first_monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
}

/// Sixty weeks of sales for six products per category, with a quarterly swing
fn branch_frame(weeks: i64, profit_sign: f64) -> DataFrame {
    let mut dates = Vec::new();
    let mut ids = Vec::new();
    let mut names = Vec::new();
    let mut profits = Vec::new();
    let mut categories = Vec::new();

    for week in 0..weeks {
        let swing = 1.0 + 0.3 * (2.0 * std::f64::consts::PI * week as f64 / 13.0).sin();
        for (c, category) in CATEGORIES.iter().enumerate() {
            for p in 0..6i64 {
                let product = c as i64 * 6 + p;
                if (week + p) % (1 + p % 4) != 0 {
                    continue;
                }
                let day = first_monday() + Duration::days(7 * week + product % 5);
                dates.push(day.format("%Y-%m-%d").to_string());
                ids.push(format!("BRG{product:03}"));
                names.push(format!("{category} item {p}"));
                profits.push(profit_sign * (20.0 + 15.0 * p as f64 + 5.0 * c as f64) * swing);
                categories.push(category.to_string());
            }
        }
    }

    df!(
        "TANGGAL" => dates,
        "KODE BARANG" => ids,
        "NAMA BARANG" => names,
        "LABA" => profits,
        "KATEGORI" => categories
    )
    .unwrap()
}

fn branch_table() -> TransactionTable {
    TransactionTable::from_frames(&[branch_frame(60, 1.0)], &ColumnSchema::default()).unwrap()
}

#[test]
fn test_end_to_end_pipeline() {
    let table = branch_table();
    let report = run_pipeline(&table, &PipelineRequest::new("Cabang Utama"));

    // Forecast
    let forecast = report.forecast.completed().expect("forecast should complete");
    let output = &forecast.output;
    assert_eq!(output.seasonal_period, 13);
    assert_eq!(output.future.len(), 13);
    assert_eq!(output.test.len(), output.test_forecast.len());
    assert!(output.test_mae.is_some_and(|mae| mae.is_finite()));

    let last = output.series.last_date().unwrap();
    assert_eq!(output.future[0].week_ending, last + Duration::weeks(1));
    assert!(output.future.windows(2).all(|w| w[1].week_ending - w[0].week_ending == Duration::weeks(1)));
    assert!(forecast.next_week.is_some());

    // One segmentation per category
    let labels: Vec<_> = report.segments.iter().map(|s| s.category.clone().unwrap()).collect();
    assert_eq!(labels, vec!["Aksesoris", "Ikan", "Pakan"]);

    for slice in &report.segments {
        let segments = slice.outcome.completed().expect("segmentation should complete");
        assert_eq!(segments.rfm.len(), 6);
        assert_eq!(segments.segmentation.assignments.len(), 6);
        assert!(segments.k >= 1 && segments.k <= 6);

        let descriptors: BTreeSet<_> = segments.segmentation.clusters.iter().map(|c| &c.descriptor).collect();
        assert_eq!(descriptors.len(), segments.segmentation.clusters.len());

        let sizes: usize = segments.segmentation.clusters.iter().map(|c| c.size).sum();
        assert_eq!(sizes, 6);
    }
}

#[test]
fn test_rfm_invariants() {
    let table = branch_table();
    let records = build_rfm(&table, &RfmRequest::default()).unwrap();

    assert_eq!(records.len(), 18);
    let total: u32 = records.iter().map(|r| r.frequency).sum();
    assert_eq!(total as usize, table.len());
    assert!(records.iter().all(|r| r.recency >= 0 && r.frequency >= 1));
    assert_eq!(records.iter().map(|r| r.recency).min(), Some(0));
}

#[test]
fn test_segmentation_is_deterministic() {
    let table = branch_table();
    let records = build_rfm(&table, &RfmRequest::default()).unwrap();
    let scaler = StandardScaler::fit_records(&records).unwrap();

    let a = segment(&records, 4, &scaler, &SegmentationConfig::default()).unwrap();
    let b = segment(&records, 4, &scaler, &SegmentationConfig::default()).unwrap();
    assert_eq!(a.assignments, b.assignments);
    assert_eq!(a.clusters, b.clusters);
}

#[test]
fn test_bad_rows_are_excluded_everywhere() {
    let mut frame = branch_frame(60, 1.0);
    let extra = df!(
        "TANGGAL" => &["31/13/2023", "2023-03-01"],
        "KODE BARANG" => &["BRG999", ""],
        "NAMA BARANG" => &["Ghost", "Unnamed"],
        "LABA" => &[1_000_000.0, 1_000_000.0],
        "KATEGORI" => &["Ikan", "Ikan"]
    )
    .unwrap();
    frame.vstack_mut(&extra).unwrap();

    let table = TransactionTable::from_frames(&[frame], &ColumnSchema::default()).unwrap();
    let quality = table.data_quality();
    assert_eq!(quality.unparsable_dates, 1);
    assert_eq!(quality.missing_product_ids, 1);

    let clean = branch_table();
    assert_eq!(table.len(), clean.len());
    assert_eq!(aggregate_weekly(&table).unwrap(), aggregate_weekly(&clean).unwrap());

    let records = build_rfm(&table, &RfmRequest::default()).unwrap();
    assert!(records.iter().all(|r| r.product_id != "BRG999"));
}

#[test]
fn test_failed_forecast_does_not_stop_segmentation() {
    let table = TransactionTable::from_frames(&[branch_frame(20, -1.0)], &ColumnSchema::default()).unwrap();
    let report = run_pipeline(&table, &PipelineRequest::new("Cabang Rugi"));

    assert!(matches!(report.forecast, SliceOutcome::Failed { kind: ErrorKind::ModelFit, .. }));
    assert_eq!(report.segments.len(), 3);
    assert!(report.segments.iter().all(|s| s.outcome.is_completed()));
}

#[test]
fn test_year_filter_limits_segmentation() {
    let table = branch_table();
    assert_eq!(table.years().unwrap(), vec![2023, 2024]);

    let mut request = PipelineRequest::new("Cabang Utama");
    request.years = vec![2024];
    request.segment_by_category = false;
    let report = run_pipeline(&table, &request);

    let segments = report.segments[0].outcome.completed().unwrap();
    let in_2024: BTreeSet<_> = table
        .filter(&profitlens::TableFilter {
            category: None,
            years: vec![2024],
        })
        .unwrap()
        .frame()
        .column("product_id")
        .unwrap()
        .str()
        .unwrap()
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    assert_eq!(segments.rfm.len(), in_2024.len());
}
