//! Synchronous data-parallel training over a ring of workers.

mod config;
mod error;
mod mirrored;
mod ring;

pub use config::{ClusterConfig, ClusterSpec, TaskSpec};
pub use error::{ClusterErr, Result};
pub use mirrored::{MultiWorkerMirroredStrategy, StrategyOptions};
