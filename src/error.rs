//! Error taxonomy of the pipeline.
//!
//! Every stage owns one error type. Export, storage and warehouse errors are
//! fatal to a pipeline run; query, engine, training and prediction errors are
//! scoped to the failing call and leave the session usable.

use thiserror::Error;

/// The pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Export,
    Storage,
    Warehouse,
    Query,
    Engine,
    Training,
    Prediction,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Export => "export",
            Stage::Storage => "storage",
            Stage::Warehouse => "warehouse",
            Stage::Query => "query",
            Stage::Engine => "engine",
            Stage::Training => "training",
            Stage::Prediction => "prediction",
        };
        f.write_str(name)
    }
}

/// A configuration value that parses but cannot be used.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("config: [{section}] {message}")]
    Invalid { section: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export: upstream dataset unreachable: {0}")]
    Unreachable(String),

    #[error("export: failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("export: malformed upstream record at {path}:{line}: {message}")]
    Malformed {
        path: String,
        line: usize,
        message: String,
    },

    #[error("export: field `{field}` absent from {missing} of {total} records, upstream schema changed")]
    SchemaDrift {
        field: &'static str,
        missing: usize,
        total: usize,
    },

    #[error("export: failed to write artifact {artifact}: {message}")]
    Write { artifact: String, message: String },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage: write of `{key}` failed: {message}")]
    Write { key: String, message: String },

    #[error("storage: read of `{key}` failed: {message}")]
    Read { key: String, message: String },

    #[error("storage: object `{0}` not found")]
    NotFound(String),

    #[error("storage: listing `{prefix}` failed: {message}")]
    List { prefix: String, message: String },

    #[error("storage: artifacts missing under `{root}`: {}", missing.join(", "))]
    Missing { root: String, missing: Vec<String> },

    #[error("storage: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("warehouse: table `{table}` column `{column}` line {line}: expected {expected}, found {found}")]
    TypeMismatch {
        table: String,
        column: String,
        line: usize,
        expected: String,
        found: String,
    },

    #[error("warehouse: table `{table}` is missing column `{column}`")]
    MissingColumn { table: String, column: String },

    #[error("warehouse: table `{table}` line {line}: {message}")]
    Malformed {
        table: String,
        line: usize,
        message: String,
    },

    #[error("warehouse: table `{table}` has duplicate key `{key}`")]
    DuplicateKey { table: String, key: String },

    #[error("warehouse: table `{table}` column `{column}` line {line}: negative value {value}")]
    Negative {
        table: String,
        column: String,
        line: usize,
        value: String,
    },

    #[error("warehouse: table `{table}` is bucketed into {found} buckets, expected {expected}")]
    BucketMismatch {
        table: String,
        expected: usize,
        found: usize,
    },

    #[error("warehouse: parquet layout for `{table}`: {message}")]
    Layout { table: String, message: String },

    #[error("warehouse: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    #[error("query: table `{0}` does not exist")]
    UnknownTable(String),

    #[error("query: column `{column}` does not exist in {available}")]
    UnknownColumn { column: String, available: String },

    #[error("query: column `{0}` is ambiguous")]
    AmbiguousColumn(String),

    #[error("query: syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("query: `{0}` must appear in GROUP BY or be used in an aggregate")]
    NotGrouped(String),

    #[error("query: type error: {0}")]
    Type(String),

    #[error("query: `{0}` is not cached")]
    NotCached(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("engine: worker for partition {partition} panicked: {message}")]
    WorkerPanic { partition: usize, message: String },

    #[error("engine: division by zero in `{0}`")]
    DivisionByZero(String),

    #[error("engine: integer overflow in `{0}`")]
    Overflow(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrainingError {
    #[error("training: only {available} labeled rows with complete features, at least {required} required")]
    InsufficientData { available: usize, required: usize },

    #[error("training: split ratio {ratio} left the {side} set empty ({rows} labeled rows)")]
    EmptySplit {
        ratio: f64,
        side: &'static str,
        rows: usize,
    },

    #[error("training: invalid configuration: {0}")]
    Config(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PredictionError {
    #[error("prediction: problem `{problem_id}` skipped, missing feature(s) {}", missing.join(", "))]
    IncompleteFeatures {
        problem_id: String,
        missing: Vec<&'static str>,
    },

    #[error("prediction: model expects {expected} features, got {found}")]
    FeatureArity { expected: usize, found: usize },

    #[error("prediction: model artifact: {0}")]
    Artifact(String),
}

/// Any failure of a pipeline run, tagged with the stage that raised it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Training(#[from] TrainingError),
    #[error(transparent)]
    Prediction(#[from] PredictionError),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Config(_) => Stage::Config,
            PipelineError::Export(_) => Stage::Export,
            PipelineError::Storage(_) => Stage::Storage,
            PipelineError::Schema(_) => Stage::Warehouse,
            PipelineError::Query(_) => Stage::Query,
            PipelineError::Engine(_) => Stage::Engine,
            PipelineError::Training(_) => Stage::Training,
            PipelineError::Prediction(_) => Stage::Prediction,
        }
    }
}

/// Errors surfaced by the query engine: either the query is wrong or
/// its execution failed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<ExecError> for PipelineError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Query(e) => PipelineError::Query(e),
            ExecError::Engine(e) => PipelineError::Engine(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_reports_stage() {
        let err: PipelineError = QueryError::UnknownTable("nope".into()).into();
        assert_eq!(err.stage(), Stage::Query);
        assert!(err.to_string().contains("nope"));

        let err: PipelineError = ConfigError::Invalid {
            section: "bands",
            message: "easy_below above hard_from".into(),
        }
        .into();
        assert_eq!(err.stage(), Stage::Config);
        assert!(err.to_string().contains("[bands]"));

        let err: PipelineError = ExecError::Engine(EngineError::DivisionByZero("a / b".into())).into();
        assert_eq!(err.stage(), Stage::Engine);
    }

    #[test]
    fn messages_name_table_and_column() {
        let err = SchemaError::TypeMismatch {
            table: "problems".into(),
            column: "time_limit".into(),
            line: 3,
            expected: "Float64".into(),
            found: "string".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("problems"));
        assert!(msg.contains("time_limit"));
        assert!(msg.contains("line 3"));
    }
}
