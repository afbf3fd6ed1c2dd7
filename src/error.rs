use std::path::PathBuf;

use thiserror::Error;

use crate::hash::TreeHash;
use crate::version::{Version, VersionError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("field `{field}` in {path} has the wrong type, expected {expected}")]
    Schema {
        path: PathBuf,
        field: String,
        expected: &'static str,
    },

    #[error("missing required field `{field}` in {path}")]
    MissingField { path: PathBuf, field: String },

    #[error("invalid dependency graph: {0}")]
    GraphInvariant(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("dependency resolution failed:\n\n{report}\n\n\
             Possible fixes:\n\
             - loosen the compat entries of the packages named above\n\
             - pin or develop one of them at a compatible version\n\
             - check that the expected registries are attached")]
    ResolverInfeasible { report: String },

    #[error("registries disagree on the tree hash of {name} v{version}: {first} vs {second}")]
    TreeHashConflict {
        name: String,
        version: Version,
        first: TreeHash,
        second: TreeHash,
    },

    #[error("version control error: {0}")]
    Vcs(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("the name `{0}` is claimed by multiple packages; disambiguate with an explicit uuid")]
    AmbiguousName(String),

    #[error("dependency name `{name}` in {path} matches more than one manifest entry")]
    AmbiguousDep { name: String, path: PathBuf },
}

impl Error {
    /// Parse failure for a persisted artifact, keeping the offending path.
    pub(crate) fn parse(path: &std::path::Path, message: impl Into<String>) -> Self {
        Error::Parse {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub(crate) fn schema(path: &std::path::Path, field: &str, expected: &'static str) -> Self {
        Error::Schema {
            path: path.to_path_buf(),
            field: field.to_string(),
            expected,
        }
    }

    pub(crate) fn missing(path: &std::path::Path, field: &str) -> Self {
        Error::MissingField {
            path: path.to_path_buf(),
            field: field.to_string(),
        }
    }
}
