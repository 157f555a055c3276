mod history;
mod trainer;

pub use history::{EpochStats, Evaluation, History};
pub use trainer::{FitOptions, Trainer, global_batch_size};
