use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use distribution::ClusterErr;
use machine_learning::MlErr;

use crate::grid::HyperParams;

/// Errors while reading or decoding a dataset file.
#[derive(Debug)]
pub enum DatasetErr {
    Io { path: PathBuf, source: io::Error },
    Format(String),
    InvalidLabel { index: usize, label: i64 },
    SafeTensors(safetensors::SafeTensorError),
    Pickle(serde_pickle::Error),
    Ml(MlErr),
}

impl Display for DatasetErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "failed to read {}: {source}", path.display()),
            Self::Format(msg) => write!(f, "malformed dataset: {msg}"),
            Self::InvalidLabel { index, label } => {
                write!(f, "sample {index} has label {label}, outside of [0, 9]")
            }
            Self::SafeTensors(e) => write!(f, "malformed safetensors container: {e}"),
            Self::Pickle(e) => write!(f, "malformed pickle container: {e}"),
            Self::Ml(e) => write!(f, "{e}"),
        }
    }
}

impl Error for DatasetErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::SafeTensors(e) => Some(e),
            Self::Pickle(e) => Some(e),
            Self::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<safetensors::SafeTensorError> for DatasetErr {
    fn from(e: safetensors::SafeTensorError) -> Self {
        Self::SafeTensors(e)
    }
}

impl From<serde_pickle::Error> for DatasetErr {
    fn from(e: serde_pickle::Error) -> Self {
        Self::Pickle(e)
    }
}

impl From<MlErr> for DatasetErr {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<ndarray::ShapeError> for DatasetErr {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Ml(e.into())
    }
}

/// Errors while reading the benchmark configuration.
#[derive(Debug)]
pub enum ConfigErr {
    Io { path: PathBuf, source: io::Error },
    Json(serde_json::Error),
    Invalid(String),
    Cluster(ClusterErr),
}

impl Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "failed to read {}: {source}", path.display()),
            Self::Json(e) => write!(f, "malformed config: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
            Self::Cluster(e) => write!(f, "{e}"),
        }
    }
}

impl Error for ConfigErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json(e) => Some(e),
            Self::Cluster(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<ClusterErr> for ConfigErr {
    fn from(e: ClusterErr) -> Self {
        Self::Cluster(e)
    }
}

/// Errors while running the sweep.
#[derive(Debug)]
pub enum BenchErr {
    Ml(MlErr),
    EmptyHistory(HyperParams),
}

impl Display for BenchErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ml(e) => write!(f, "training failed: {e}"),
            Self::EmptyHistory(params) => write!(f, "no epoch ran for {params}"),
        }
    }
}

impl Error for BenchErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Ml(e) => Some(e),
            Self::EmptyHistory(_) => None,
        }
    }
}

impl From<MlErr> for BenchErr {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}
