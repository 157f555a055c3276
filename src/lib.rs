//! Grid-search benchmark of data-parallel CIFAR-10 training.

pub mod bench;
pub mod config;
pub mod dataset;
pub mod error;
pub mod grid;
pub mod model;

pub use bench::{BenchResult, Benchmark};
pub use config::BenchConfig;
pub use error::{BenchErr, ConfigErr, DatasetErr};
pub use grid::{Grid, HyperParams};
