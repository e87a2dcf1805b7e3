use anyhow::{Context, Result};
use clap::Parser;
use cplite::cmd::{Args, Commands};
use cplite::pipeline::{Pipeline, PredictionReport, RunReport};
use cplite::storage::ObjectStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_prediction(report: &PredictionReport) {
    let eval = &report.trained.evaluation;
    println!("---------- RATING MODEL ----------");
    println!("Train rows:\t{}", eval.train_rows);
    println!("Test rows:\t{}", eval.test_rows);
    println!("R2:\t\t{:.4}", eval.r2);
    println!("Mean baseline:\t{:.4}", eval.baseline_r2);
    println!("Tree depth:\t{}", report.trained.model.root.depth());
    println!("Imputed:\t{}", report.imputation.imputed);
    println!("Skipped:\t{}", report.imputation.skipped.len());
    for e in &report.imputation.skipped {
        println!("  {e}");
    }
    println!("----------------------------------");
}

fn print_run(report: &RunReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&report.export)?);
    for key in &report.uploaded {
        println!("uploaded {key}");
    }
    for (table, rows) in &report.tables {
        println!("[{table}]\t{rows} rows");
    }
    let a = &report.analytics;
    println!("{}", a.problems_per_band);
    println!(
        "Easy {} / Medium {} / Hard {} (no difficulty: {})",
        a.band_counts.easy, a.band_counts.medium, a.band_counts.hard, a.band_counts.unbanded
    );
    println!("{}", a.solutions_per_language);
    println!("{}", a.rating_per_source);
    println!("{}", serde_json::to_string(&a.stats)?);
    print_prediction(&report.prediction);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.pipeline_config()?;
    let pipeline = Pipeline::new(config.clone());

    match args.command {
        Commands::Export { input, output } => {
            let summary = pipeline.export(&input, &output)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Load { export_dir, root } => {
            let store = ObjectStore::from_config(&config.storage).await?;
            for key in pipeline.load(&store, &export_dir, &root).await? {
                println!("uploaded {key}");
            }
        }
        Commands::Build { root, warehouse } => {
            let store = ObjectStore::from_config(&config.storage).await?;
            let built = pipeline.build(&store, &root, &warehouse).await?;
            for (table, rows) in built.row_counts() {
                println!("[{table}]\t{rows} rows");
            }
        }
        Commands::Query { warehouse, explain, sql } => {
            let session = pipeline.open(&warehouse)?.session(&config.engine);
            let frame = session.sql(&sql)?;
            if explain {
                println!("{}", frame.explain()?);
            } else {
                let (rows, stats) = frame.collect_with_stats()?;
                println!("{rows}");
                info!(?stats, "query done");
            }
        }
        Commands::Predict { warehouse, save_model } => {
            let session = pipeline.open(&warehouse)?.session(&config.engine);
            let report = pipeline.predict(&session)?;
            print_prediction(&report);
            if let Some(path) = save_model {
                report
                    .trained
                    .model
                    .save(&path)
                    .with_context(|| format!("saving model to {}", path.display()))?;
                println!("model written to {}", path.display());
            }
        }
        Commands::Run { input, work_dir, root } => {
            let store = ObjectStore::from_config(&config.storage).await?;
            let report = pipeline.run(&store, &input, &work_dir, &root).await?;
            print_run(&report)?;
        }
    }
    Ok(())
}
