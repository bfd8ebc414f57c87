//! ProfitLens: weekly profit forecasts and RFM product segments per branch
//!
//! This is the main entrypoint that loads each branch's CSV exports, runs the
//! pipeline on them and prints a summary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use polars::prelude::*;
use profitlens::{run_pipeline, Args, BranchReport, SliceOutcome, TransactionTable};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "profitlens=debug" } else { "profitlens=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    let branches = args.parse_branches()?;
    let start_time = Instant::now();

    let run = run_branches(&args, &branches);
    for report in &run.reports {
        print_summary(report);
    }
    for (name, err) in &run.failures {
        println!("\n=== Branch: {name} ===\nNot loaded: {err:#}");
    }

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&run.reports).context("Failed to serialize report")?;
        fs::write(path, json).with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("\nReport saved to: {}", path.display());
    }

    println!("\nTotal processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    if run.reports.is_empty() {
        anyhow::bail!("No branch could be loaded");
    }
    Ok(())
}

/// Reports of the branches that loaded, and the load error of every other branch
struct BranchRun {
    reports: Vec<BranchReport>,
    failures: Vec<(String, anyhow::Error)>,
}

fn run_branches(args: &Args, branches: &[(String, PathBuf)]) -> BranchRun {
    let schema = args.column_schema();
    let mut run = BranchRun {
        reports: Vec::with_capacity(branches.len()),
        failures: Vec::new(),
    };

    for (name, dir) in branches {
        let loaded = load_branch_frames(dir).and_then(|frames| {
            let table = TransactionTable::from_frames(&frames, &schema)
                .context("Failed to normalise transactions")?;
            info!(branch = %name, files = frames.len(), rows = table.len(), "Branch loaded");
            let request = args.to_request(name)?;
            Ok(run_pipeline(&table, &request))
        });

        match loaded {
            Ok(report) => run.reports.push(report),
            Err(err) => {
                warn!(branch = %name, error = %format!("{err:#}"), "Branch skipped");
                run.failures.push((name.clone(), err));
            }
        }
    }

    run
}

/// Read every CSV file in `dir`, sorted by file name
fn load_branch_frames(dir: &Path) -> Result<Vec<DataFrame>> {
    let mut paths: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Cannot read directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")))
        .collect();
    paths.sort();
    if paths.is_empty() {
        anyhow::bail!("No CSV files found in {}", dir.display());
    }

    paths
        .iter()
        .map(|path| {
            CsvReader::from_path(path)
                .and_then(|reader| reader.has_header(true).finish())
                .with_context(|| format!("Failed to read {}", path.display()))
        })
        .collect()
}

fn print_summary(report: &BranchReport) {
    println!("\n=== Branch: {} ===", report.branch);
    let quality = &report.data_quality;
    println!(
        "Transactions: {} kept of {} ({} unparsable dates, {} missing product ids, {} empty profits)",
        quality.kept_rows,
        quality.source_rows,
        quality.unparsable_dates,
        quality.missing_product_ids,
        quality.null_profits
    );

    match &report.forecast {
        SliceOutcome::Completed(forecast) => {
            let output = &forecast.output;
            println!(
                "Forecast: seasonal period {}, alpha={:.2} beta={:.2} gamma={:.2}",
                output.seasonal_period, output.params.alpha, output.params.beta, output.params.gamma
            );
            if let Some(mae) = output.test_mae {
                println!("  Test MAE: {:.2}", mae);
            }
            if let Some(change) = forecast.next_week {
                println!(
                    "  Next week profit: {:.2} ({:+.1}% vs last week {:.2})",
                    change.next_week, change.change_pct, change.last_week
                );
            }
        }
        SliceOutcome::Skipped { reason } => println!("Forecast skipped: {reason}"),
        SliceOutcome::Failed { kind, message } => println!("Forecast failed ({kind:?}): {message}"),
    }

    for slice in &report.segments {
        let label = slice.category.as_deref().unwrap_or("All categories");
        match &slice.outcome {
            SliceOutcome::Completed(segments) => {
                println!("Segments for {label}: k = {}", segments.k);
                for cluster in &segments.segmentation.clusters {
                    let percentage = cluster.size as f64 / segments.rfm.len() as f64 * 100.0;
                    println!(
                        "  Cluster {}: {} products ({:.1}%) - {}",
                        cluster.cluster, cluster.size, percentage, cluster.descriptor
                    );
                }
            }
            SliceOutcome::Skipped { reason } => println!("Segments for {label} skipped: {reason}"),
            SliceOutcome::Failed { kind, message } => {
                println!("Segments for {label} failed ({kind:?}): {message}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn branch_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("januari.csv")).unwrap();
        writeln!(file, "TANGGAL,KODE BARANG,NAMA BARANG,LABA,KATEGORI").unwrap();
        for day in 1..=9 {
            writeln!(file, "2024-01-0{day},BRG00{day},Item {day},{}.5,Ikan", day * 3).unwrap();
        }
        dir
    }

    #[test]
    fn test_unreadable_branch_does_not_stop_the_others() {
        let good = branch_dir();
        let empty = tempfile::tempdir().unwrap();
        let args = Args::parse_from(["profitlens", "-b", "Utama=unused"]);
        let branches = vec![
            ("Hilang".to_string(), PathBuf::from("no/such/branch/dir")),
            ("Kosong".to_string(), empty.path().to_path_buf()),
            ("Utama".to_string(), good.path().to_path_buf()),
        ];

        let run = run_branches(&args, &branches);
        assert_eq!(run.reports.len(), 1);
        assert_eq!(run.reports[0].branch, "Utama");
        assert_eq!(run.reports[0].data_quality.kept_rows, 9);

        let failed: Vec<_> = run.failures.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(failed, vec!["Hilang", "Kosong"]);
    }

    #[test]
    fn test_load_branch_frames_reads_csv() {
        let dir = branch_dir();
        let frames = load_branch_frames(dir.path()).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].height(), 9);
    }
}
