//! Error types shared by the cycle components.

use thiserror::Error;

use crate::partials::PartialFormat;

/// Result alias used throughout the crate.
pub type CycleResult<T> = Result<T, CycleError>;

/// Invalid configuration detected while constructing a component or ring.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("state dimension must be at least 3, got {0}")]
    DimensionTooSmall(usize),
    #[error("ring length must be at least 2, got {0}")]
    RingTooShort(usize),
    #[error("num_var must be at least 1")]
    NoVariables,
    #[error("var_shape must have a positive size, got {0:?}")]
    ZeroSizedShape(Vec<usize>),
    #[error("unknown jacobian strategy `{0}`")]
    UnknownStrategy(String),
    #[error("unknown partial format `{0}`")]
    UnknownFormat(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CycleError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),
    #[error("unsupported partial format `{0}`")]
    UnsupportedFormat(String),
    #[error("variable `{0}` not found")]
    MissingVariable(String),
    #[error("variable `{name}` expects {expected} values, got {actual}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("partial ({of}, {wrt}) was not declared")]
    UndeclaredPartial { of: String, wrt: String },
    #[error("partial ({of}, {wrt}) has entries or a shape outside its declared structure")]
    StructureMismatch { of: String, wrt: String },
    #[error("partial ({of}, {wrt}) declared as {declared:?}, assigned as {assigned:?}")]
    FormatMismatch {
        of: String,
        wrt: String,
        declared: PartialFormat,
        assigned: PartialFormat,
    },
}
