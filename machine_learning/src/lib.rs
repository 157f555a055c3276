pub mod arch;
pub mod dataset;
pub mod error;
pub mod initialization;
pub mod optimization;
pub mod strategy;
pub mod training;

pub use error::{MlErr, Result};
pub use strategy::{LocalStrategy, Strategy};
