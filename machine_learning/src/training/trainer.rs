use log::{debug, info};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::{EpochStats, Evaluation, History};
use crate::{
    MlErr, Result, Strategy,
    arch::{
        Model,
        loss::{LossFn, correct},
    },
    dataset::{Dataset, shard_range},
    optimization::Optimizer,
};

/// The amount of samples forwarded at once while evaluating.
const EVAL_BATCH_SIZE: usize = 256;

/// The global batch a step consumes when every one of `replicas` takes `per_replica` samples.
pub fn global_batch_size(per_replica: usize, replicas: usize) -> usize {
    per_replica * replicas
}

/// How a call to `Trainer::fit` iterates the training data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitOptions {
    pub epochs: usize,
    /// The amount of samples consumed per optimizer step, across all replicas.
    pub global_batch_size: usize,
    /// Seeds the per-epoch shuffle, it must be the same on every replica.
    pub seed: u64,
}

/// Owns a model together with its parameters and the means of training them.
pub struct Trainer<M: Model, O: Optimizer, L: LossFn> {
    model: M,
    optimizer: O,
    loss_fn: L,
    params: Vec<f32>,
    // The model's gradient followed by one slot for the batch loss, so both travel in a
    // single all-reduce.
    sync: Vec<f32>,
}

impl<M: Model, O: Optimizer, L: LossFn> Trainer<M, O, L> {
    /// Creates a new `Trainer` with the given starting parameters.
    ///
    /// # Errors
    /// If `params` does not hold exactly `model.size()` values.
    pub fn new(model: M, optimizer: O, loss_fn: L, params: Vec<f32>) -> Result<Self> {
        if params.len() != model.size() {
            return Err(MlErr::SizeMismatch {
                what: "initial parameters",
                got: params.len(),
                expected: model.size(),
            });
        }

        Ok(Self {
            sync: vec![0.; model.size() + 1],
            model,
            optimizer,
            loss_fn,
            params,
        })
    }

    /// Creates a new `Trainer` whose parameters are drawn from the model's initializers.
    pub fn init<R: Rng + ?Sized>(model: M, optimizer: O, loss_fn: L, rng: &mut R) -> Result<Self> {
        let params = model.init_params(rng)?;
        Self::new(model, optimizer, loss_fn, params)
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Trains the model on `train` for `options.epochs` epochs, evaluating on `val` after each.
    ///
    /// Replica 0's parameters are broadcast first so every replica starts from the same point.
    /// Each step, the replicas split the global batch into contiguous shards, compute their
    /// share of the gradient and sum it over the group, after which every replica applies the
    /// same optimizer update locally.
    ///
    /// # Errors
    /// If either dataset is empty, the batch size is zero, a collective fails or the loss stops
    /// being finite.
    pub fn fit<S: Strategy + ?Sized>(
        &mut self,
        strategy: &mut S,
        train: &Dataset,
        val: &Dataset,
        options: &FitOptions,
    ) -> Result<History> {
        if train.is_empty() {
            return Err(MlErr::EmptyDataset { what: "training" });
        }
        if val.is_empty() {
            return Err(MlErr::EmptyDataset { what: "validation" });
        }
        if options.global_batch_size == 0 {
            return Err(MlErr::ZeroBatchSize);
        }

        strategy.broadcast(&mut self.params, 0)?;

        let mut history = History::new();

        for epoch in 0..options.epochs {
            let mut indices: Vec<usize> = (0..train.len()).collect();
            let mut rng = StdRng::seed_from_u64(epoch_seed(options.seed, epoch));
            indices.shuffle(&mut rng);

            let train_loss = self.train_epoch(strategy, train, &indices, epoch, options)?;
            let val = self.evaluate(strategy, val)?;

            info!(
                epoch = epoch,
                train_loss = train_loss,
                val_loss = val.loss,
                val_accuracy = val.accuracy;
                "epoch finished"
            );

            history.push(EpochStats {
                epoch,
                train_loss,
                val,
            });
        }

        Ok(history)
    }

    fn train_epoch<S: Strategy + ?Sized>(
        &mut self,
        strategy: &mut S,
        train: &Dataset,
        indices: &[usize],
        epoch: usize,
        options: &FitOptions,
    ) -> Result<f32> {
        let replicas = strategy.num_replicas_in_sync();
        let rank = strategy.replica_id();
        let size = self.model.size();

        let mut loss_sum = 0.;
        let mut nbatches = 0;

        for (batch, global) in indices.chunks(options.global_batch_size).enumerate() {
            let shard = &global[shard_range(global.len(), rank, replicas)];
            self.sync.fill(0.);

            if !shard.is_empty() {
                let (x, y) = train.batch(shard);
                let y_pred = self.model.forward(&self.params, x.view())?;
                let loss = self.loss_fn.loss(y_pred.view(), y.view());
                let d = self.loss_fn.loss_prime(y_pred.view(), y.view());
                self.model.backward(&self.params, &mut self.sync[..size], d)?;

                // weigh this shard's mean so the sum over replicas is the global batch mean
                let weight = shard.len() as f32 / global.len() as f32;
                self.sync[..size].iter_mut().for_each(|g| *g *= weight);
                self.sync[size] = loss * weight;
            }

            strategy.all_reduce_sum(&mut self.sync)?;

            let (grad, loss) = self.sync.split_at(size);
            let loss = loss[0];
            if !loss.is_finite() {
                return Err(MlErr::NonFiniteLoss { epoch, batch });
            }

            self.optimizer.update_params(grad, &mut self.params)?;

            debug!(epoch = epoch, batch = batch, loss = loss; "step done");
            loss_sum += loss;
            nbatches += 1;
        }

        Ok(loss_sum / nbatches.max(1) as f32)
    }

    /// Computes the loss and accuracy over `data`, each replica evaluating its own shard.
    ///
    /// # Errors
    /// If `data` is empty or a collective fails.
    pub fn evaluate<S: Strategy + ?Sized>(
        &mut self,
        strategy: &mut S,
        data: &Dataset,
    ) -> Result<Evaluation> {
        let range = shard_range(
            data.len(),
            strategy.replica_id(),
            strategy.num_replicas_in_sync(),
        );

        // loss sum, correct predictions, sample count
        let mut totals = [0f32; 3];
        let mut start = range.start;

        while start < range.end {
            let end = (start + EVAL_BATCH_SIZE).min(range.end);
            let (x, y) = data.slice(start..end);
            let y_pred = self.model.forward(&self.params, x)?;
            let n = (end - start) as f32;

            totals[0] += self.loss_fn.loss(y_pred.view(), y) * n;
            totals[1] += correct(y_pred.view(), y) as f32;
            totals[2] += n;
            start = end;
        }

        strategy.all_reduce_sum(&mut totals)?;

        let [loss_sum, hits, count] = totals;
        if count == 0. {
            return Err(MlErr::EmptyDataset { what: "evaluation" });
        }

        Ok(Evaluation {
            loss: loss_sum / count,
            accuracy: hits / count,
        })
    }
}

fn epoch_seed(seed: u64, epoch: usize) -> u64 {
    seed ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
