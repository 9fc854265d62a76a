//! End-to-end tests through the engine facade: upload, metadata, both
//! aggregators, statistics, and the session lifecycle.

use cohort_metrics::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn reference_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "date,cohort,city,segment,metric").unwrap();
    writeln!(file, "2025-01-01,A,BLR,auto,10").unwrap();
    writeln!(file, "2025-01-01,B,BLR,auto,20").unwrap();
    writeln!(file, "2025-01-02,A,HYD,bike,14").unwrap();
    writeln!(file, "2025-01-02,B,HYD,bike,18").unwrap();
    file.flush().unwrap();
    file
}

fn reference_request() -> TimeSeriesRequest {
    TimeSeriesRequest {
        pre_period: DateRange::new(
            "2025-01-01".parse().unwrap(),
            "2025-01-01".parse().unwrap(),
        ),
        post_period: DateRange::new(
            "2025-01-02".parse().unwrap(),
            "2025-01-02".parse().unwrap(),
        ),
        test_cohort: "A".to_string(),
        control_cohort: "B".to_string(),
        metric: "metric".to_string(),
        agg: AggFunc::Sum,
        series_breakout: None,
        rolling_windows: vec![2],
        baseline_date: None,
        summary_aggs: vec![AggFunc::Sum],
    }
}

#[test]
fn test_upload_and_metadata() {
    let engine = Engine::new();
    let csv = reference_csv();
    let upload = engine.upload_csv(csv.path()).unwrap();

    assert_eq!(upload.rows, 4);
    assert_eq!(upload.dropped_rows, 0);
    assert_eq!(upload.meta.cohorts, vec!["A", "B"]);
    assert_eq!(upload.meta.metrics, vec!["metric"]);
    assert_eq!(upload.meta.categorical_columns, vec!["segment"]);
    assert_eq!(upload.meta.date_min, "2025-01-01".parse().unwrap());
    assert_eq!(upload.meta.date_max, "2025-01-02".parse().unwrap());

    // The metadata query is read-only and repeatable.
    let meta = engine.metadata(&upload.session_id).unwrap();
    assert_eq!(meta.cohorts, upload.meta.cohorts);
}

#[test]
fn test_reference_time_series_scenario() {
    let engine = Engine::new();
    let upload = engine.upload_csv(reference_csv().path()).unwrap();
    let result = engine
        .time_series(&upload.session_id, &reference_request())
        .unwrap();

    let pre: Vec<(String, f64)> = result
        .pre_series
        .iter()
        .map(|p| (p.cohort.clone(), p.value))
        .collect();
    assert_eq!(pre, vec![("A".to_string(), 10.0), ("B".to_string(), 20.0)]);
    let post: Vec<(String, f64)> = result
        .post_series
        .iter()
        .map(|p| (p.cohort.clone(), p.value))
        .collect();
    assert_eq!(post, vec![("A".to_string(), 14.0), ("B".to_string(), 18.0)]);

    assert_eq!(result.pre_summary[0].test_value, 10.0);
    assert_eq!(result.pre_summary[0].control_value, 20.0);
    assert_eq!(result.post_summary[0].test_value, 14.0);
    assert_eq!(result.post_summary[0].control_value, 18.0);
}

#[test]
fn test_time_series_is_deterministic() {
    let engine = Engine::new();
    let upload = engine.upload_csv(reference_csv().path()).unwrap();
    let request = reference_request();
    let first = engine.time_series(&upload.session_id, &request).unwrap();
    let second = engine.time_series(&upload.session_id, &request).unwrap();
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
}

#[test]
fn test_entity_aggregation_by_identifier_column() {
    // city is an identifier (excluded from metrics/categoricals) but remains
    // addressable as a grouping dimension.
    let engine = Engine::new();
    let upload = engine.upload_csv(reference_csv().path()).unwrap();
    let request = EntityRequest {
        pre_period: DateRange::new(
            "2025-01-01".parse().unwrap(),
            "2025-01-01".parse().unwrap(),
        ),
        post_period: DateRange::new(
            "2025-01-02".parse().unwrap(),
            "2025-01-02".parse().unwrap(),
        ),
        test_cohort: "A".to_string(),
        control_cohort: "B".to_string(),
        group_by: "city".to_string(),
        metric_aggregations: vec![
            MetricAgg {
                column: "metric".to_string(),
                agg: EntityAgg::Sum,
            },
            MetricAgg {
                column: "metric".to_string(),
                agg: EntityAgg::Count,
            },
        ],
        include_dates: false,
        sample_seed: 42,
    };
    let result = engine.entity(&upload.session_id, &request).unwrap();
    assert!(!result.sampled);
    assert_eq!(result.rows.len(), 4);

    let pre_test = result
        .rows
        .iter()
        .find(|r| r.period == Period::Pre && r.cohort_type == CohortType::Test)
        .unwrap();
    assert_eq!(pre_test.group_value, "BLR");
    assert_eq!(pre_test.aggregations["metric_sum"], Some(10.0));
    assert_eq!(pre_test.aggregations["metric_count"], Some(1.0));

    let second = engine.entity(&upload.session_id, &request).unwrap();
    assert_eq!(
        serde_json::to_vec(&result).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
}

#[test]
fn test_session_lifecycle() {
    let engine = Engine::new();
    let upload = engine.upload_csv(reference_csv().path()).unwrap();
    assert_eq!(engine.session_count(), 1);

    // Replace swaps the dataset wholesale.
    let table = RawTable::new(
        vec!["date".into(), "cohort".into(), "metric".into()],
        vec![
            vec!["2025-01-01".into(), "A".into(), "100".into()],
            vec!["2025-01-01".into(), "B".into(), "200".into()],
            vec!["2025-01-02".into(), "A".into(), "140".into()],
            vec!["2025-01-02".into(), "B".into(), "180".into()],
        ],
    )
    .unwrap();
    engine.replace(&upload.session_id, &table).unwrap();
    let result = engine
        .time_series(&upload.session_id, &reference_request())
        .unwrap();
    assert_eq!(result.pre_summary[0].test_value, 100.0);

    engine.destroy(&upload.session_id);
    assert!(matches!(
        engine.metadata(&upload.session_id),
        Err(MetricsError::SessionNotFound(_))
    ));
    // Destroy is idempotent.
    engine.destroy(&upload.session_id);
}

#[test]
fn test_unknown_session_propagates() {
    let engine = Engine::new();
    assert!(matches!(
        engine.time_series("deadbeef", &reference_request()),
        Err(MetricsError::SessionNotFound(_))
    ));
}

#[test]
fn test_unknown_agg_string_rejected_at_deserialization() {
    let json = r#"{
        "test_cohort": "A",
        "control_cohort": "B",
        "metric": "metric",
        "agg": "median_of_medians"
    }"#;
    let parsed: std::result::Result<TimeSeriesRequest, _> = serde_json::from_str(json);
    let err = parsed.unwrap_err().to_string();
    assert!(err.contains("median_of_medians"), "{err}");
}

#[test]
fn test_request_defaults_from_json() {
    let json = r#"{
        "test_cohort": "A",
        "control_cohort": "B",
        "metric": "metric"
    }"#;
    let request: TimeSeriesRequest = serde_json::from_str(json).unwrap();
    assert_eq!(request.agg, AggFunc::Sum);
    assert_eq!(request.rolling_windows, vec![7, 30]);
    assert!(request.pre_period.start.is_none());
    assert!(request.pre_period.end.is_none());
}

#[test]
fn test_stat_test_through_engine() {
    let engine = Engine::new();
    let request = StatTestRequest {
        category: "paired".to_string(),
        test_name: "paired_t".to_string(),
        parameters: Default::default(),
        samples: Samples {
            pre_test: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            post_test: vec![2.0, 3.0, 4.0, 5.0, 7.0],
            ..Default::default()
        },
    };
    let result = engine.stat_test(&request).unwrap();
    assert!(result.p_value.unwrap() < 0.01);
    assert!(!result.summary.is_empty());
}

#[test]
fn test_power_reference_through_engine() {
    let engine = Engine::new();
    let request = StatTestRequest {
        category: "power".to_string(),
        test_name: "sample_size".to_string(),
        parameters: [
            ("effect_size".to_string(), serde_json::json!(0.5)),
            ("alpha".to_string(), serde_json::json!(0.05)),
            ("power".to_string(), serde_json::json!(0.8)),
        ]
        .into_iter()
        .collect(),
        samples: Samples::default(),
    };
    let result = engine.stat_test(&request).unwrap();
    let n = result.sample_size.unwrap();
    assert!((63..=65).contains(&n), "got n = {n}");
}

#[test]
fn test_dropped_rows_reported() {
    let engine = Engine::new();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "date,cohort,metric").unwrap();
    writeln!(file, "2025-01-01,A,1").unwrap();
    writeln!(file, "not-a-date,A,2").unwrap();
    writeln!(file, "2025-01-02,B,3").unwrap();
    file.flush().unwrap();

    let upload = engine.upload_csv(file.path()).unwrap();
    assert_eq!(upload.rows, 2);
    assert_eq!(upload.dropped_rows, 1);
}
