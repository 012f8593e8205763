//! Errors raised while loading training data and building a simulation.
//!
//! Only load-time problems are reported through [`Error`]. Lookups of unknown queries or frequency steps
//! after loading are programming errors and panic.

use std::path::Path;

use crate::predictor::QueryId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("can't read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}:{line}: {reason}")]
    Parse { file: String, line: usize, reason: String },

    #[error("no frequency steps found in {0}")]
    NoFrequencies(String),

    #[error("query {query} has {found} time/energy values but the device has {steps} frequency steps")]
    TableWidth { query: QueryId, found: usize, steps: usize },

    #[error("query {0} has no cost prediction entry")]
    MissingPrediction(QueryId),

    #[error("{0} requires regressor coefficients but none were loaded")]
    MissingRegressors(String),

    #[error("query {0} is not known to the predictor")]
    UnknownQuery(QueryId),

    #[error("unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Error::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn parse(file: &str, line: usize, reason: impl Into<String>) -> Self {
        Error::Parse {
            file: file.to_string(),
            line,
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_name(kind: &'static str, name: &str) -> Self {
        Error::UnknownName {
            kind,
            name: name.to_string(),
        }
    }
}

pub(crate) fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::io(path, e))
}
