use std::collections::BTreeMap;
use std::sync::Arc;

use cplite::config::{BandConfig, EngineConfig, PipelineConfig, SplitConfig};
use cplite::engine::{count_star, Catalog, Frame, Record, Table, TableKind};
use cplite::predict::{impute, r2_score, DifficultyBands, FeatureVector, RatingPredictor};
use cplite::{Problem, Session};

const EASY: usize = 409;
const MEDIUM: usize = 5768;
const HARD: usize = 2396;

/// 8573 banded problems plus a few without a difficulty. Ratings follow
/// difficulty and time limit with a deterministic wobble; every ninth
/// problem is unrated and every 31st has no memory limit.
fn corpus() -> Vec<Problem> {
    let difficulties = (0..EASY)
        .map(|i| 1 + (i % 6) as i64)
        .chain((0..MEDIUM).map(|i| 7 + (i % 4) as i64))
        .chain((0..HARD).map(|i| 11 + (i % 12) as i64))
        .map(Some)
        .chain(std::iter::repeat(None).take(27));
    difficulties
        .enumerate()
        .map(|(i, difficulty)| {
            let time_limit = 1.0 + (i % 4) as f64 * 0.5;
            let rating = difficulty.map(|d| 500 + 110 * d + (time_limit * 40.0) as i64 + (i % 7) as i64 * 5);
            Problem {
                id: format!("{i:05}"),
                description: String::new(),
                difficulty,
                time_limit: Some(time_limit),
                memory_limit_bytes: if i % 31 == 0 { None } else { Some(256 << 20) },
                source: 2,
                tags: vec![],
                cf_rating: if i % 9 == 0 { None } else { rating },
            }
        })
        .collect()
}

fn session(problems: &[Problem]) -> Session {
    let rows = problems.iter().map(Record::to_row).collect();
    let mut catalog = Catalog::new();
    catalog.register(Table::new(
        "problems",
        TableKind::Physical,
        Frame::single(Arc::new(Problem::schema()), rows),
    ));
    Session::new(catalog, EngineConfig::default())
}

#[test]
fn band_partition_is_reproducible_from_thresholds() {
    let problems = corpus();
    let bands = DifficultyBands::new(BandConfig::default()).unwrap();

    let counts = bands.band_counts(&problems);
    assert_eq!((counts.easy, counts.medium, counts.hard), (EASY, MEDIUM, HARD));
    assert_eq!(counts.banded(), 8573);
    assert_eq!(counts.unbanded, 27);

    let session = session(&problems);
    let by_frame = session
        .table("problems")
        .unwrap()
        .group_by([bands.to_expr("difficulty").alias("band")])
        .agg([count_star().alias("n")])
        .unwrap()
        .collect()
        .unwrap();
    let by_sql = session
        .sql(&format!(
            "SELECT {} AS band, COUNT(*) AS n FROM problems GROUP BY band",
            bands.to_sql("difficulty")
        ))
        .unwrap()
        .collect()
        .unwrap();
    assert_eq!(by_frame.sorted_rows(), by_sql.sorted_rows());

    let got: BTreeMap<String, i64> = by_frame
        .rows
        .iter()
        .map(|r| (r[0].as_str().unwrap_or("<none>").to_string(), r[1].as_i64().unwrap_or(-1)))
        .collect();
    let expected: BTreeMap<String, i64> = [
        ("<none>", 27),
        ("Easy", EASY as i64),
        ("Medium", MEDIUM as i64),
        ("Hard", HARD as i64),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    assert_eq!(got, expected);
}

#[test]
fn moving_a_threshold_moves_the_counts() {
    let problems = corpus();
    let bands = DifficultyBands::new(BandConfig {
        easy_below: 8,
        hard_from: 11,
    })
    .unwrap();
    let counts = bands.band_counts(&problems);
    assert_eq!(counts.easy, EASY + MEDIUM / 4);
    assert_eq!(counts.hard, HARD);
    assert_eq!(counts.banded(), 8573);
}

#[test]
fn training_is_seeded_and_beats_the_mean() {
    let problems = corpus();
    let predictor = RatingPredictor::from(&PipelineConfig::default());

    let first = predictor.train(&problems).unwrap();
    let second = predictor.train(&problems).unwrap();
    assert_eq!(first, second);
    assert!(first.model.root.depth() <= 5);

    let eval = first.evaluation;
    assert!(eval.r2 <= 1.0);
    assert!(eval.r2 > 0.9, "r2 = {}", eval.r2);
    assert!(eval.r2 > eval.baseline_r2);
    let labeled = problems
        .iter()
        .filter(|p| p.cf_rating.is_some() && FeatureVector::from_problem(p).is_ok())
        .count();
    assert_eq!(eval.train_rows + eval.test_rows, labeled);
    assert_eq!(eval.train_rows, (labeled as f64 * 0.8).round() as usize);

    let reseeded = RatingPredictor {
        split: SplitConfig {
            seed: 1234,
            ..SplitConfig::default()
        },
        ..predictor.clone()
    }
    .train(&problems)
    .unwrap();
    assert_ne!(reseeded.model, first.model);
}

#[test]
fn imputed_count_equals_null_complete_count() {
    let problems = corpus();
    let trained = RatingPredictor::from(&PipelineConfig::default()).train(&problems).unwrap();
    let out = impute(&problems, &trained.model).unwrap();

    let null_complete = problems
        .iter()
        .filter(|p| p.cf_rating.is_none() && FeatureVector::from_problem(p).is_ok())
        .count();
    assert_eq!(out.imputed, null_complete);
    assert_eq!(out.rows.iter().filter(|r| r.imputed).count(), null_complete);
    assert!(out
        .rows
        .iter()
        .zip(&problems)
        .all(|(after, before)| before.cf_rating.is_none() || after.problem.cf_rating == before.cf_rating));

    // predictions on the imputed rows are close to the generating rule
    let (actual, predicted): (Vec<f64>, Vec<f64>) = out
        .rows
        .iter()
        .filter(|r| r.imputed)
        .filter_map(|r| {
            let d = r.problem.difficulty?;
            let t = r.problem.time_limit?;
            let truth = 500 + 110 * d + (t * 40.0) as i64;
            Some((truth as f64, r.problem.cf_rating? as f64))
        })
        .unzip();
    assert!(r2_score(&actual, &predicted) > 0.8);
}
