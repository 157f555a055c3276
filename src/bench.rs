use std::time::{Duration, Instant};

use log::info;
use machine_learning::{
    Strategy,
    arch::{Model, loss::SparseCrossEntropy},
    dataset::Dataset,
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer},
    training::{FitOptions, History, Trainer, global_batch_size},
};
use rand::{SeedableRng, rngs::StdRng};

use crate::{config::OptimizerConfig, error::BenchErr, grid::HyperParams, model::cifar_cnn};

/// What one combination of the sweep measured.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchResult {
    pub params: HyperParams,
    /// Wall-clock time spent inside `fit`.
    pub elapsed: Duration,
    pub final_val_accuracy: f32,
    pub history: History,
}

/// Trains a fresh model per combination on shared, read-only datasets.
pub struct Benchmark<'a, S: Strategy + ?Sized> {
    strategy: &'a mut S,
    train: &'a Dataset,
    val: &'a Dataset,
    optimizer: OptimizerConfig,
    seed: u64,
}

impl<'a, S: Strategy + ?Sized> Benchmark<'a, S> {
    pub fn new(
        strategy: &'a mut S,
        train: &'a Dataset,
        val: &'a Dataset,
        optimizer: OptimizerConfig,
        seed: u64,
    ) -> Self {
        Self {
            strategy,
            train,
            val,
            optimizer,
            seed,
        }
    }

    /// Runs every combination in order, the first failure aborts the sweep.
    pub fn run<I>(&mut self, grid: I) -> Result<Vec<BenchResult>, BenchErr>
    where
        I: IntoIterator<Item = HyperParams>,
    {
        grid.into_iter()
            .map(|params| self.run_one(params))
            .collect()
    }

    /// Builds, trains and times a single combination.
    pub fn run_one(&mut self, params: HyperParams) -> Result<BenchResult, BenchErr> {
        let model = cifar_cnn()?;
        let optimizer = build_optimizer(self.optimizer, model.size(), params.learning_rate);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut trainer = Trainer::init(model, optimizer, SparseCrossEntropy, &mut rng)?;

        let replicas = self.strategy.num_replicas_in_sync();
        let options = FitOptions {
            epochs: params.epochs,
            global_batch_size: global_batch_size(params.batch_size, replicas),
            seed: self.seed,
        };

        info!("Starting benchmark: {params}");

        let start = Instant::now();
        let history = trainer.fit(&mut *self.strategy, self.train, self.val, &options)?;
        let elapsed = start.elapsed();

        let final_val_accuracy = history
            .final_val_accuracy()
            .ok_or(BenchErr::EmptyHistory(params))?;

        info!("Completed: {params}");
        info!("Elapsed Time: {:.2} seconds", elapsed.as_secs_f64());
        info!("Final Validation Accuracy: {final_val_accuracy:.4}");

        Ok(BenchResult {
            params,
            elapsed,
            final_val_accuracy,
            history,
        })
    }
}

/// The combination with the highest final validation accuracy, the earliest one on ties.
pub fn best(results: &[BenchResult]) -> Option<&BenchResult> {
    results.iter().reduce(|best, r| {
        if r.final_val_accuracy > best.final_val_accuracy {
            r
        } else {
            best
        }
    })
}

fn build_optimizer(config: OptimizerConfig, len: usize, learning_rate: f32) -> Box<dyn Optimizer> {
    match config {
        OptimizerConfig::Adam {
            beta1,
            beta2,
            epsilon,
        } => Box::new(Adam::new(len, learning_rate, beta1, beta2, epsilon)),
        OptimizerConfig::GradientDescent => Box::new(GradientDescent::new(learning_rate)),
        OptimizerConfig::GradientDescentWithMomentum { momentum } => Box::new(
            GradientDescentWithMomentum::new(len, learning_rate, momentum),
        ),
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::training::{EpochStats, Evaluation};
    use ndarray::{Array1, Array2};

    use super::*;
    use crate::dataset::{IMAGE_BYTES, NUM_CLASSES};

    /// Acts as replica 0 of a pair whose peer contributes nothing, recording every all-reduce.
    #[derive(Default)]
    struct RecordingStrategy {
        reduced_lens: Vec<usize>,
    }

    impl Strategy for RecordingStrategy {
        fn num_replicas_in_sync(&self) -> usize {
            2
        }

        fn replica_id(&self) -> usize {
            0
        }

        fn broadcast(&mut self, _buf: &mut [f32], _root: usize) -> machine_learning::Result<()> {
            Ok(())
        }

        fn all_reduce_sum(&mut self, buf: &mut [f32]) -> machine_learning::Result<()> {
            self.reduced_lens.push(buf.len());
            Ok(())
        }

        fn barrier(&mut self) -> machine_learning::Result<()> {
            Ok(())
        }
    }

    fn images(n: usize) -> Dataset {
        let x = Array2::from_shape_fn((n, IMAGE_BYTES), |(i, j)| ((i * 31 + j) % 256) as f32 / 255.);
        let y = Array1::from_iter((0..n).map(|i| (i % NUM_CLASSES) as u8));
        Dataset::new(x, y).unwrap()
    }

    fn result(batch_size: usize, accuracy: f32) -> BenchResult {
        let mut history = History::new();
        history.push(EpochStats {
            epoch: 0,
            train_loss: 1.,
            val: Evaluation {
                loss: 1.,
                accuracy,
            },
        });

        BenchResult {
            params: HyperParams {
                batch_size,
                learning_rate: 0.1,
                epochs: 1,
            },
            elapsed: Duration::from_secs(1),
            final_val_accuracy: accuracy,
            history,
        }
    }

    #[test]
    fn best_prefers_accuracy_then_order() {
        let results = [result(1, 0.2), result(2, 0.6), result(3, 0.6), result(4, 0.1)];
        assert_eq!(best(&results).unwrap().params.batch_size, 2);
        assert!(best(&[]).is_none());
    }

    #[test]
    fn global_batch_spans_every_replica() {
        let (train, val) = (images(10), images(4));
        let mut strategy = RecordingStrategy::default();
        let params = HyperParams {
            batch_size: 3,
            learning_rate: 0.001,
            epochs: 2,
        };

        let result = Benchmark::new(&mut strategy, &train, &val, OptimizerConfig::default(), 0)
            .run_one(params)
            .unwrap();

        let grad_len = cifar_cnn().unwrap().size() + 1;
        let steps = strategy
            .reduced_lens
            .iter()
            .filter(|&&len| len == grad_len)
            .count();

        // 10 samples per epoch in global batches of 3 * 2
        assert_eq!(steps, 2 * 10usize.div_ceil(6));
        assert_eq!(result.history.len(), 2);
        assert!((0. ..=1.).contains(&result.final_val_accuracy));
    }

    #[test]
    fn every_optimizer_kind_builds() {
        for config in [
            OptimizerConfig::default(),
            OptimizerConfig::GradientDescent,
            OptimizerConfig::GradientDescentWithMomentum { momentum: 0.9 },
        ] {
            let mut optimizer = build_optimizer(config, 2, 0.1);
            let mut params = [1., 1.];
            optimizer.update_params(&[1., -1.], &mut params).unwrap();
            assert!(params[0] < 1. && params[1] > 1.);
        }
    }
}
