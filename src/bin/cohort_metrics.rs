//! Cohort Metrics CLI
//!
//! One-shot command-line interface over the aggregation and statistics
//! engine: upload a CSV, run one query, print JSON.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use cohort_metrics::data::DateRange;
use cohort_metrics::engine::Engine;
use cohort_metrics::entity::{EntityRequest, MetricAgg};
use cohort_metrics::error::{MetricsError, Result};
use cohort_metrics::stats::StatTestRequest;
use cohort_metrics::timeseries::{AggFunc, TimeSeriesRequest};
use std::path::PathBuf;

/// Cohort experiment aggregation and statistics
#[derive(Parser)]
#[command(name = "cohort-metrics")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a CSV and print the session metadata
    Meta {
        /// Path to the activity CSV
        #[arg(short, long)]
        csv: PathBuf,
    },

    /// Run a time-series aggregation
    Timeseries {
        /// Path to the activity CSV
        #[arg(short, long)]
        csv: PathBuf,

        /// Test cohort name
        #[arg(short = 't', long)]
        test_cohort: String,

        /// Control cohort name
        #[arg(short = 'C', long)]
        control_cohort: String,

        /// Metric column to aggregate
        #[arg(short, long)]
        metric: String,

        /// Aggregation function: sum, mean, or count
        #[arg(short, long, default_value = "sum")]
        agg: String,

        /// Pre period start (YYYY-MM-DD, inclusive)
        #[arg(long)]
        pre_start: Option<NaiveDate>,

        /// Pre period end (YYYY-MM-DD, inclusive)
        #[arg(long)]
        pre_end: Option<NaiveDate>,

        /// Post period start (YYYY-MM-DD, inclusive)
        #[arg(long)]
        post_start: Option<NaiveDate>,

        /// Post period end (YYYY-MM-DD, inclusive)
        #[arg(long)]
        post_end: Option<NaiveDate>,

        /// Categorical column to break the series out by
        #[arg(long)]
        breakout: Option<String>,

        /// Rolling window sizes (comma-separated, e.g., "7,30")
        #[arg(long, default_value = "7,30")]
        rolling: String,

        /// Baseline date for the percent-change series
        #[arg(long)]
        baseline: Option<NaiveDate>,
    },

    /// Run an entity-level aggregation
    Entity {
        /// Path to the activity CSV
        #[arg(short, long)]
        csv: PathBuf,

        /// Test cohort name
        #[arg(short = 't', long)]
        test_cohort: String,

        /// Control cohort name
        #[arg(short = 'C', long)]
        control_cohort: String,

        /// Column to group by (e.g., city)
        #[arg(short, long)]
        group_by: String,

        /// Metric aggregations (comma-separated column:func pairs,
        /// e.g., "trips:sum,earnings:mean")
        #[arg(short, long)]
        aggregations: String,

        /// Pre period start (YYYY-MM-DD, inclusive)
        #[arg(long)]
        pre_start: Option<NaiveDate>,

        /// Pre period end (YYYY-MM-DD, inclusive)
        #[arg(long)]
        pre_end: Option<NaiveDate>,

        /// Post period start (YYYY-MM-DD, inclusive)
        #[arg(long)]
        post_start: Option<NaiveDate>,

        /// Post period end (YYYY-MM-DD, inclusive)
        #[arg(long)]
        post_end: Option<NaiveDate>,

        /// Keep one row per date per group instead of collapsing periods
        #[arg(long)]
        include_dates: bool,

        /// Sampling seed for the output-cardinality cap
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Run a statistical test from a JSON request file
    StatTest {
        /// Path to a StatTestRequest JSON document
        #[arg(short, long)]
        request: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    }

    let result = match cli.command {
        Commands::Meta { csv } => cmd_meta(&csv),
        Commands::Timeseries {
            csv,
            test_cohort,
            control_cohort,
            metric,
            agg,
            pre_start,
            pre_end,
            post_start,
            post_end,
            breakout,
            rolling,
            baseline,
        } => agg.parse().and_then(|agg| {
            cmd_timeseries(
                &csv,
                TimeSeriesRequest {
                    pre_period: range(pre_start, pre_end),
                    post_period: range(post_start, post_end),
                    test_cohort,
                    control_cohort,
                    metric,
                    agg,
                    series_breakout: breakout,
                    rolling_windows: parse_windows(&rolling),
                    baseline_date: baseline,
                    summary_aggs: vec![AggFunc::Sum, AggFunc::Mean, AggFunc::Count],
                },
            )
        }),
        Commands::Entity {
            csv,
            test_cohort,
            control_cohort,
            group_by,
            aggregations,
            pre_start,
            pre_end,
            post_start,
            post_end,
            include_dates,
            seed,
        } => parse_aggregations(&aggregations).and_then(|metric_aggregations| {
            cmd_entity(
                &csv,
                EntityRequest {
                    pre_period: range(pre_start, pre_end),
                    post_period: range(post_start, post_end),
                    test_cohort,
                    control_cohort,
                    group_by,
                    metric_aggregations,
                    include_dates,
                    sample_seed: seed,
                },
            )
        }),
        Commands::StatTest { request } => cmd_stat_test(&request),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> DateRange {
    DateRange { start, end }
}

fn parse_windows(spec: &str) -> Vec<usize> {
    spec.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

/// Parse "column:func" pairs, e.g. "trips:sum,earnings:mean".
fn parse_aggregations(spec: &str) -> Result<Vec<MetricAgg>> {
    spec.split(',')
        .map(|pair| {
            let (column, func) = pair.split_once(':').ok_or_else(|| {
                MetricsError::InvalidParameter(format!(
                    "aggregation '{pair}' must be column:func"
                ))
            })?;
            Ok(MetricAgg {
                column: column.trim().to_string(),
                agg: func.trim().parse()?,
            })
        })
        .collect()
}

fn cmd_meta(csv: &PathBuf) -> Result<()> {
    let engine = Engine::new();
    let upload = engine.upload_csv(csv)?;
    eprintln!(
        "Loaded {} rows ({} dropped for unparsable dates)",
        upload.rows, upload.dropped_rows
    );
    println!("{}", serde_json::to_string_pretty(&upload.meta)?);
    Ok(())
}

fn cmd_timeseries(csv: &PathBuf, request: TimeSeriesRequest) -> Result<()> {
    let engine = Engine::new();
    let upload = engine.upload_csv(csv)?;
    eprintln!(
        "Loaded {} rows; aggregating '{}' by {}",
        upload.rows, request.metric, request.agg
    );
    let result = engine.time_series(&upload.session_id, &request)?;
    eprintln!(
        "{} pre points, {} post points",
        result.pre_series.len(),
        result.post_series.len()
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_entity(csv: &PathBuf, request: EntityRequest) -> Result<()> {
    let engine = Engine::new();
    let upload = engine.upload_csv(csv)?;
    eprintln!(
        "Loaded {} rows; grouping by '{}'",
        upload.rows, request.group_by
    );
    let result = engine.entity(&upload.session_id, &request)?;
    if result.sampled {
        eprintln!(
            "Output sampled: {} of {} rows (rate {:.4})",
            result.rows.len(),
            result.total_rows,
            result.sample_rate.unwrap_or(0.0)
        );
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_stat_test(request_path: &PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(request_path)?;
    let request: StatTestRequest = serde_json::from_str(&raw)?;
    let engine = Engine::new();
    let result = engine.stat_test(&request)?;
    eprintln!("{}", result.summary);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
