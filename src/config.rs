use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use distribution::{ClusterConfig, StrategyOptions};
use serde::{Deserialize, Serialize};

use crate::{error::ConfigErr, grid::Grid};

/// The optimizer every combination trains with, the learning rate comes from the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam {
        #[serde(default = "default_beta1")]
        beta1: f32,
        #[serde(default = "default_beta2")]
        beta2: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
    GradientDescent,
    GradientDescentWithMomentum {
        momentum: f32,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_epsilon(),
        }
    }
}

/// The benchmark's configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    /// The training batch file.
    pub train_path: PathBuf,
    /// The batch file used for validation.
    pub test_path: PathBuf,
    #[serde(default = "default_batch_sizes")]
    pub batch_sizes: Vec<usize>,
    #[serde(default = "default_learning_rates")]
    pub learning_rates: Vec<f32>,
    #[serde(default = "default_epochs")]
    pub epochs: Vec<usize>,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Seeds parameter initialization and the per-epoch shuffles.
    #[serde(default)]
    pub seed: u64,
    /// The worker group, a single local replica trains when absent.
    #[serde(default)]
    pub cluster: Option<ClusterConfig>,
    #[serde(default = "default_formation_timeout_secs")]
    pub formation_timeout_secs: u64,
}

impl BenchConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigErr> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigErr> {
        let json = fs::read_to_string(path).map_err(|source| ConfigErr::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&json)
    }

    /// Checks every list holds usable values and the cluster record, if any, is sound.
    pub fn validate(&self) -> Result<(), ConfigErr> {
        if self.batch_sizes.is_empty() || self.learning_rates.is_empty() || self.epochs.is_empty()
        {
            return Err(ConfigErr::Invalid(
                "batch_sizes, learning_rates and epochs need at least one value each".to_string(),
            ));
        }

        if self.batch_sizes.contains(&0) {
            return Err(ConfigErr::Invalid("batch sizes must be positive".to_string()));
        }

        if self.epochs.contains(&0) {
            return Err(ConfigErr::Invalid("epoch counts must be positive".to_string()));
        }

        if let Some(lr) = self
            .learning_rates
            .iter()
            .find(|lr| !lr.is_finite() || **lr <= 0.)
        {
            return Err(ConfigErr::Invalid(format!(
                "learning rate {lr} is not a positive number"
            )));
        }

        if let Some(cluster) = &self.cluster {
            cluster.validate()?;
        }

        Ok(())
    }

    pub fn grid(&self) -> Grid {
        Grid::new(
            self.batch_sizes.clone(),
            self.learning_rates.clone(),
            self.epochs.clone(),
        )
    }

    pub fn strategy_options(&self) -> StrategyOptions {
        StrategyOptions {
            formation_timeout: Duration::from_secs(self.formation_timeout_secs),
            ..StrategyOptions::default()
        }
    }
}

fn default_batch_sizes() -> Vec<usize> {
    vec![32, 64, 128]
}

fn default_learning_rates() -> Vec<f32> {
    vec![0.001, 0.0005, 0.01]
}

fn default_epochs() -> Vec<usize> {
    vec![10, 20, 30]
}

fn default_formation_timeout_secs() -> u64 {
    60
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_epsilon() -> f32 {
    1e-7
}
