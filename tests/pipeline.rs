mod common;

use cplite::config::{BandConfig, PipelineConfig};
use cplite::engine::Value;
use cplite::error::{SchemaError, StorageError};
use cplite::pipeline::Pipeline;
use cplite::predict::FeatureVector;
use cplite::storage::{self, ObjectStore};
use cplite::{PipelineError, Problem, Stage};
use serde_json::json;

#[tokio::test]
async fn run_covers_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    let pattern = common::write_upstream(dir.path(), 120);
    let store = ObjectStore::local(dir.path().join("store"));
    let pipeline = Pipeline::new(PipelineConfig::default());

    let report = pipeline
        .run(&store, &pattern, &dir.path().join("work"), common::ROOT)
        .await
        .unwrap();

    assert_eq!(report.export.files, 2);
    assert_eq!(report.export.records, 121);
    assert_eq!(report.export.skipped_unnamed, 1);
    assert_eq!(report.uploaded.len(), storage::ARTIFACTS.len());
    assert_eq!(report.tables["problems"], 120);
    assert_eq!(report.tables["solutions"], 360);
    assert_eq!(report.tables["problem_tests"], 360);

    let analytics = &report.analytics;
    let per_band: i64 = analytics
        .problems_per_band
        .column("problems")
        .unwrap()
        .iter()
        .filter_map(Value::as_i64)
        .sum();
    assert_eq!(per_band as usize, analytics.band_counts.banded());
    assert_eq!(analytics.band_counts.banded(), 120);
    let per_language: i64 = analytics
        .solutions_per_language
        .column("solutions")
        .unwrap()
        .iter()
        .filter_map(Value::as_i64)
        .sum();
    assert_eq!(per_language, 360);
    assert!(analytics.stats.cache_hits >= 1);

    let eval = report.prediction.trained.evaluation;
    assert!(eval.r2 <= 1.0);
    assert!(eval.r2 > eval.baseline_r2);
}

#[tokio::test]
async fn imputation_fills_exactly_the_null_complete_rows() {
    let dir = tempfile::tempdir().unwrap();
    let built = common::build(dir.path(), 200).await;
    let session = built.warehouse.session(&built.pipeline.config().engine);
    let problems: Vec<Problem> = session.records::<Problem>().unwrap().into_vec();

    let report = built.pipeline.predict(&session).unwrap();
    let fillable = problems
        .iter()
        .filter(|p| p.cf_rating.is_none() && FeatureVector::from_problem(p).is_ok())
        .count();
    let unfillable = problems
        .iter()
        .filter(|p| p.cf_rating.is_none() && FeatureVector::from_problem(p).is_err())
        .count();
    assert!(fillable > 0 && unfillable > 0);
    assert_eq!(report.imputation.imputed, fillable);
    assert_eq!(report.imputation.skipped.len(), unfillable);

    for (before, after) in problems.iter().zip(&report.imputation.rows) {
        assert_eq!(before.id, after.problem.id);
        if before.cf_rating.is_some() {
            assert_eq!(after.problem.cf_rating, before.cf_rating);
            assert!(!after.imputed);
        }
    }
    // the warehouse copy is untouched
    let again: Vec<Problem> = session.records::<Problem>().unwrap().into_vec();
    assert_eq!(again, problems);
}

#[tokio::test]
async fn build_fails_closed_without_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let store = ObjectStore::local(dir.path().join("store"));
    let pipeline = Pipeline::new(PipelineConfig::default());
    let warehouse = dir.path().join("warehouse");

    let err = pipeline.build(&store, "runs/empty", &warehouse).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Warehouse);
    match err {
        PipelineError::Schema(SchemaError::Storage(StorageError::Missing { missing, .. })) => {
            assert_eq!(missing.len(), storage::ARTIFACTS.len());
        }
        other => panic!("unexpected {other}"),
    }
    assert!(!warehouse.exists());
}

#[tokio::test]
async fn reopened_warehouse_answers_the_same() {
    let dir = tempfile::tempdir().unwrap();
    let built = common::build(dir.path(), 80).await;
    let config = built.pipeline.config().engine.clone();
    let query = "SELECT language, COUNT(*) AS n FROM solutions GROUP BY language";

    let fresh = built.warehouse.session(&config).sql(query).unwrap().collect().unwrap();
    let reopened = built
        .pipeline
        .open(built.warehouse.dir())
        .unwrap()
        .session(&config)
        .sql(query)
        .unwrap()
        .collect()
        .unwrap();
    assert_eq!(fresh.sorted_rows(), reopened.sorted_rows());
}

#[tokio::test]
async fn rebuilding_with_fewer_buckets_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let pattern = common::write_upstream(dir.path(), 40);
    let store = ObjectStore::local(dir.path().join("store"));
    let export_dir = dir.path().join("export");
    let warehouse = dir.path().join("warehouse");

    let mut config = PipelineConfig::default();
    config.warehouse.num_buckets = 8;
    let wide = Pipeline::new(config);
    wide.export(&pattern, &export_dir).unwrap();
    wide.load(&store, &export_dir, common::ROOT).await.unwrap();
    wide.build(&store, common::ROOT, &warehouse).await.unwrap();

    let narrow = Pipeline::new(PipelineConfig::default());
    let rebuilt = narrow.build(&store, common::ROOT, &warehouse).await.unwrap();
    let reopened = narrow.open(&warehouse).unwrap();
    assert_eq!(reopened.bucket_spec().num_buckets, 4);
    assert_eq!(reopened.row_counts(), rebuilt.row_counts());
    assert_eq!(reopened.row_counts()["solutions"], 120);
}

#[tokio::test]
async fn inverted_band_thresholds_are_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let built = common::build(dir.path(), 20).await;
    let config = PipelineConfig {
        bands: BandConfig {
            easy_below: 12,
            hard_from: 11,
        },
        ..PipelineConfig::default()
    };
    let session = built.warehouse.session(&config.engine);
    let err = Pipeline::new(config).analyze(&session).unwrap_err();
    assert_eq!(err.stage(), Stage::Config);
    assert!(err.to_string().contains("[bands]"));
}

#[test]
fn export_reruns_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    let pattern = common::write_upstream(dir.path(), 50);
    let pipeline = Pipeline::default();
    let (a, b) = (dir.path().join("a"), dir.path().join("b"));
    assert_eq!(pipeline.export(&pattern, &a).unwrap(), pipeline.export(&pattern, &b).unwrap());
    for artifact in storage::ARTIFACTS {
        let left = std::fs::read(a.join(artifact)).unwrap();
        let right = std::fs::read(b.join(artifact)).unwrap();
        assert_eq!(left, right, "{artifact}");
    }
}

#[test]
fn misaligned_upstream_records_are_skipped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let pattern = common::write_upstream(dir.path(), 20);
    let mut bad = common::upstream_record(500);
    bad["solutions"]["language"] = json!([2, 3, 4]);
    bad["public_tests"]["output"] = json!([]);
    std::fs::write(dir.path().join("upstream/zz-00000.jsonl"), bad.to_string()).unwrap();

    let summary = Pipeline::default().export(&pattern, &dir.path().join("out")).unwrap();
    assert_eq!(summary.records, 22);
    assert_eq!(summary.skipped_unnamed, 1);
    assert_eq!(summary.skipped_misaligned, 1);
    assert_eq!(summary.rows[storage::PROBLEMS], 20);
    assert_eq!(summary.rows[storage::SOLUTIONS], 60);
    assert_eq!(summary.rows[storage::PROBLEM_TESTS], 60);
}

#[test]
fn missing_upstream_is_an_export_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Pipeline::default()
        .export(&format!("{}/nothing/*.jsonl", dir.path().display()), &dir.path().join("out"))
        .unwrap_err();
    assert_eq!(err.stage(), Stage::Export);
}
