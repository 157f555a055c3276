use std::{
    error::Error,
    fmt::{self, Display},
};

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
    InvalidDistribution(String),
    EmptyDataset {
        what: &'static str,
    },
    NonFiniteLoss {
        epoch: usize,
        batch: usize,
    },
    ZeroBatchSize,
    Shape(ndarray::ShapeError),
    Collective(Box<dyn Error + Send + Sync>),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::InvalidDistribution(detail) => {
                write!(f, "Invalid parameter distribution: {detail}")
            }
            MlErr::EmptyDataset { what } => write!(f, "The {what} dataset has no samples"),
            MlErr::NonFiniteLoss { epoch, batch } => write!(
                f,
                "The loss became non finite at epoch {epoch}, batch {batch}"
            ),
            MlErr::ZeroBatchSize => write!(f, "The batch size must be at least 1"),
            MlErr::Shape(e) => write!(f, "Invalid array shape: {e}"),
            MlErr::Collective(e) => write!(f, "Collective operation failed: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Collective(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<ndarray::ShapeError> for MlErr {
    fn from(value: ndarray::ShapeError) -> Self {
        Self::Shape(value)
    }
}
