use std::{env, path::PathBuf};

use anyhow::Context;
use cifar_grid_bench::{BenchConfig, Benchmark, bench, dataset};
use distribution::{ClusterConfig, MultiWorkerMirroredStrategy};
use log::info;
use machine_learning::{LocalStrategy, Strategy};

/// Read when the config file has no `cluster` entry.
const CLUSTER_ENV: &str = "TF_CONFIG";

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path: PathBuf = env::args()
        .nth(1)
        .context("usage: cifar-grid-bench <config.json>")?
        .into();
    let config = BenchConfig::from_file(&path)
        .with_context(|| format!("failed to load config {}", path.display()))?;

    let (train, val) = dataset::load_cifar10(&config.train_path, &config.test_path)
        .context("failed to load the dataset")?;

    let cluster = match config.cluster.clone() {
        Some(cluster) => Some(cluster),
        None if env::var_os(CLUSTER_ENV).is_some() => Some(
            ClusterConfig::from_env(CLUSTER_ENV)
                .with_context(|| format!("invalid {CLUSTER_ENV}"))?,
        ),
        None => None,
    };

    let mut strategy: Box<dyn Strategy> = match cluster {
        Some(cluster) => Box::new(
            MultiWorkerMirroredStrategy::new(cluster, config.strategy_options())
                .context("failed to form the worker group")?,
        ),
        None => Box::new(LocalStrategy::new()),
    };

    let grid = config.grid();
    info!(
        replicas = strategy.num_replicas_in_sync(),
        combinations = grid.len();
        "starting sweep"
    );

    let results = Benchmark::new(
        &mut strategy,
        &train,
        &val,
        config.optimizer,
        config.seed,
    )
    .run(grid.iter())
    .context("benchmark sweep failed")?;

    if let Some(best) = bench::best(&results) {
        info!(
            "Best combination: {} with Final Validation Accuracy: {:.4}",
            best.params, best.final_val_accuracy
        );
    }

    Ok(())
}
