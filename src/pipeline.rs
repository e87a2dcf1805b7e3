//! Runs the stages in order: export, load, build, analyze, predict.
//!
//! Export, load and build are fatal on error; there is no partial
//! warehouse. Analytics and prediction errors are scoped to their call
//! and leave the warehouse and session usable.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::config::PipelineConfig;
use crate::engine::{col, count_star, ExecutionStats, ResultSet, Session, SortKey};
use crate::error::PipelineError;
use crate::export::{self, ExportSummary};
use crate::model::Problem;
use crate::predict::{impute, BandCounts, DifficultyBands, Imputation, RatingPredictor, Trained};
use crate::storage::{self, ObjectStore};
use crate::warehouse::Warehouse;

/// Session root used when none is given.
pub const DEFAULT_ROOT: &str = "code_contests";

pub const SOLUTIONS_PER_LANGUAGE: &str = "SELECT l.name AS language, COUNT(*) AS solutions \
     FROM solutions s JOIN languages l ON s.language = l.id \
     GROUP BY l.name ORDER BY solutions DESC, language";

pub const RATING_PER_SOURCE: &str = "SELECT src.name AS source, COUNT(*) AS problems, \
     AVG(p.cf_rating) AS avg_rating \
     FROM problems p JOIN sources src ON p.source = src.id \
     GROUP BY src.name ORDER BY problems DESC, source";

/// Results of the standard analytics queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analytics {
    /// `band, problems`, computed with the dataframe API.
    pub problems_per_band: ResultSet,
    /// The same partition computed over typed records.
    pub band_counts: BandCounts,
    pub solutions_per_language: ResultSet,
    pub rating_per_source: ResultSet,
    pub stats: ExecutionStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionReport {
    pub trained: Trained,
    pub imputation: Imputation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub export: ExportSummary,
    pub uploaded: Vec<String>,
    pub tables: BTreeMap<String, usize>,
    pub analytics: Analytics,
    pub prediction: PredictionReport,
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn export(&self, pattern: &str, output: &Path) -> Result<ExportSummary, PipelineError> {
        Ok(export::export(pattern, output)?)
    }

    pub async fn load(&self, store: &ObjectStore, export_dir: &Path, root: &str) -> Result<Vec<String>, PipelineError> {
        Ok(storage::load_artifacts(store, root, export_dir).await?)
    }

    pub async fn build(&self, store: &ObjectStore, root: &str, dir: &Path) -> Result<Warehouse, PipelineError> {
        Ok(Warehouse::build(store, root, dir, &self.config.warehouse).await?)
    }

    pub fn open(&self, dir: &Path) -> Result<Warehouse, PipelineError> {
        Ok(Warehouse::open(dir, &self.config.warehouse)?)
    }

    pub fn bands(&self) -> Result<DifficultyBands, PipelineError> {
        Ok(DifficultyBands::new(self.config.bands)?)
    }

    /// Runs the standard queries. `problems` is cached first since every
    /// query after it reads it.
    pub fn analyze(&self, session: &Session) -> Result<Analytics, PipelineError> {
        let bands = self.bands()?;
        let before = session.stats();
        session.cache_table("problems")?;

        let problems_per_band = session
            .table("problems")?
            .filter(col("difficulty").is_not_null())?
            .group_by([bands.to_expr("difficulty").alias("band")])
            .agg([count_star().alias("problems")])?
            .sort(vec![SortKey::asc(col("band"))])?
            .collect()?;
        let problems = session.records::<Problem>()?;
        let band_counts = bands.band_counts(problems.iter());
        let solutions_per_language = session.sql(SOLUTIONS_PER_LANGUAGE)?.collect()?;
        let rating_per_source = session.sql(RATING_PER_SOURCE)?.collect()?;

        let after = session.stats();
        let stats = ExecutionStats {
            shuffles: after.shuffles - before.shuffles,
            broadcasts: after.broadcasts - before.broadcasts,
            colocated: after.colocated - before.colocated,
            cache_hits: after.cache_hits - before.cache_hits,
            rows_out: after.rows_out - before.rows_out,
        };
        info!(
            easy = band_counts.easy,
            medium = band_counts.medium,
            hard = band_counts.hard,
            cache_hits = stats.cache_hits,
            "analytics done"
        );
        Ok(Analytics {
            problems_per_band,
            band_counts,
            solutions_per_language,
            rating_per_source,
            stats,
        })
    }

    /// Trains on the session's `problems` and imputes missing ratings.
    pub fn predict(&self, session: &Session) -> Result<PredictionReport, PipelineError> {
        let problems = session.records::<Problem>()?.into_vec();
        let trained = RatingPredictor::from(&self.config).train(&problems)?;
        let imputation = impute(&problems, &trained.model)?;
        Ok(PredictionReport { trained, imputation })
    }

    /// All stages, working under `work_dir`.
    pub async fn run(
        &self,
        store: &ObjectStore,
        pattern: &str,
        work_dir: &Path,
        root: &str,
    ) -> Result<RunReport, PipelineError> {
        let export_dir = work_dir.join("export");
        let export = self.export(pattern, &export_dir)?;
        let uploaded = self.load(store, &export_dir, root).await?;
        let warehouse = self.build(store, root, &work_dir.join("warehouse")).await?;
        let session = warehouse.session(&self.config.engine);
        let analytics = self.analyze(&session)?;
        let prediction = self.predict(&session)?;
        info!(
            r2 = prediction.trained.evaluation.r2,
            imputed = prediction.imputation.imputed,
            "pipeline finished"
        );
        Ok(RunReport {
            export,
            uploaded,
            tables: warehouse.row_counts().clone(),
            analytics,
            prediction,
        })
    }
}
