use std::{
    error::Error,
    fmt::{self, Display},
    io,
    net::SocketAddr,
    time::Duration,
};

use machine_learning::MlErr;

pub type Result<T> = std::result::Result<T, ClusterErr>;

/// Everything that can go wrong while forming or using a worker group.
#[derive(Debug)]
pub enum ClusterErr {
    InvalidConfig(String),
    Json(serde_json::Error),
    MissingEnv(String),
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },
    FormationTimeout(Duration),
    DuplicateIndex {
        index: usize,
    },
    WrongNeighbour {
        expected: usize,
        got: usize,
    },
    WorldSizeMismatch {
        expected: usize,
        got: usize,
    },
    UnexpectedMsg {
        expected: &'static str,
        got: &'static str,
    },
    PayloadSize {
        expected: usize,
        got: usize,
    },
    PeerDisconnected,
    PeerFailed(String),
    Io(io::Error),
}

impl Display for ClusterErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid cluster config: {msg}"),
            Self::Json(e) => write!(f, "malformed cluster config: {e}"),
            Self::MissingEnv(var) => write!(f, "environment variable {var} is not set"),
            Self::Bind { addr, source } => write!(f, "failed to bind {addr}: {source}"),
            Self::FormationTimeout(timeout) => {
                write!(f, "the worker group did not form within {timeout:?}")
            }
            Self::DuplicateIndex { index } => {
                write!(f, "another worker claims task index {index}")
            }
            Self::WrongNeighbour { expected, got } => {
                write!(f, "expected worker {expected} as neighbour, got worker {got}")
            }
            Self::WorldSizeMismatch { expected, got } => write!(
                f,
                "a peer believes the group has {got} workers instead of {expected}"
            ),
            Self::UnexpectedMsg { expected, got } => {
                write!(f, "expected a {expected} message, got {got}")
            }
            Self::PayloadSize { expected, got } => {
                write!(f, "received {got} values where {expected} were expected")
            }
            Self::PeerDisconnected => write!(f, "a peer left the worker group"),
            Self::PeerFailed(reason) => write!(f, "a peer reported a failure: {reason}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for ClusterErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Bind { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClusterErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ClusterErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<ClusterErr> for MlErr {
    fn from(e: ClusterErr) -> Self {
        MlErr::Collective(Box::new(e))
    }
}
