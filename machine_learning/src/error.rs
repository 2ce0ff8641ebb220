use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;
use rand_distr::{NormalError, uniform::Error as UniformError};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidShape(ShapeError),
    UnsupportedRank {
        got: usize,
    },
    EmptyBatch,
    DegenerateBatch {
        classes: usize,
    },
    MissingClasses {
        missing: Vec<usize>,
    },
    EmptyPrototypeTable,
    InvalidLayout(String),
    InvalidInit(String),
    InvalidSpec(String),
    EpochAborted {
        epoch: usize,
        batch: usize,
        source: Box<MlErr>,
    },
}

impl MlErr {
    /// Whether this error reports a batch with less than two distinct classes.
    pub fn is_degenerate(&self) -> bool {
        matches!(self, MlErr::DegenerateBatch { .. })
    }
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch for {what}: got {got}, expected {expected}"),
            MlErr::InvalidShape(e) => write!(f, "invalid shape: {e}"),
            MlErr::UnsupportedRank { got } => write!(
                f,
                "feature extractor output has rank {got}, expected 2 (pooled) or 3 (token sequence)"
            ),
            MlErr::EmptyBatch => write!(f, "the batch is empty"),
            MlErr::DegenerateBatch { classes } => write!(
                f,
                "degenerate batch: {classes} distinct class(es), at least 2 are needed"
            ),
            MlErr::MissingClasses { missing } => {
                write!(f, "no samples were seen for classes {missing:?}")
            }
            MlErr::EmptyPrototypeTable => write!(f, "the prototype table is empty"),
            MlErr::InvalidLayout(msg) => write!(f, "invalid parameter layout: {msg}"),
            MlErr::InvalidInit(msg) => write!(f, "invalid initialization: {msg}"),
            MlErr::InvalidSpec(msg) => write!(f, "invalid spec: {msg}"),
            MlErr::EpochAborted {
                epoch,
                batch,
                source,
            } => write!(f, "epoch {epoch} aborted at batch {batch}: {source}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::InvalidShape(e) => Some(e),
            MlErr::EpochAborted { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::InvalidShape(value)
    }
}

impl From<NormalError> for MlErr {
    fn from(value: NormalError) -> Self {
        Self::InvalidInit(value.to_string())
    }
}

impl From<UniformError> for MlErr {
    fn from(value: UniformError) -> Self {
        Self::InvalidInit(value.to_string())
    }
}
