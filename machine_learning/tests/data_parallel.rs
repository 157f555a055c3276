use std::{
    sync::{Arc, Barrier, Mutex},
    thread,
};

use machine_learning::{
    LocalStrategy, Result, Strategy,
    arch::{Model, Sequential, activations::ActFn, layers::Layer, loss::SparseCrossEntropy},
    dataset::Dataset,
    optimization::GradientDescent,
    training::{FitOptions, History, Trainer},
};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Replicas living on threads of the same process, exchanging buffers through shared slots.
struct ThreadedStrategy {
    rank: usize,
    slots: Arc<Mutex<Vec<Vec<f32>>>>,
    barrier: Arc<Barrier>,
}

impl ThreadedStrategy {
    fn group(n: usize) -> Vec<Self> {
        let slots = Arc::new(Mutex::new(vec![Vec::new(); n]));
        let barrier = Arc::new(Barrier::new(n));

        (0..n)
            .map(|rank| Self {
                rank,
                slots: slots.clone(),
                barrier: barrier.clone(),
            })
            .collect()
    }

    fn exchange(&self, buf: &[f32]) -> Vec<Vec<f32>> {
        self.slots.lock().unwrap()[self.rank] = buf.to_vec();
        self.barrier.wait();
        let all = self.slots.lock().unwrap().clone();
        self.barrier.wait();
        all
    }
}

impl Strategy for ThreadedStrategy {
    fn num_replicas_in_sync(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    fn replica_id(&self) -> usize {
        self.rank
    }

    fn broadcast(&mut self, buf: &mut [f32], root: usize) -> Result<()> {
        let all = self.exchange(buf);
        buf.copy_from_slice(&all[root]);
        Ok(())
    }

    fn all_reduce_sum(&mut self, buf: &mut [f32]) -> Result<()> {
        let all = self.exchange(buf);
        buf.fill(0.);
        for other in &all {
            buf.iter_mut().zip(other).for_each(|(b, o)| *b += o);
        }
        Ok(())
    }

    fn barrier(&mut self) -> Result<()> {
        self.barrier.wait();
        Ok(())
    }
}

fn blobs(n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array2::from_shape_fn((n, 2), |_| rng.random_range(-1.0..1.0f32));
    let y = Array1::from_iter(x.rows().into_iter().map(|r| (r[0] > r[1]) as u8));
    Dataset::new(x, y).unwrap()
}

fn mlp() -> Sequential {
    Sequential::new([
        Layer::dense((2, 4), Some(ActFn::relu())),
        Layer::dense((4, 2), None),
    ])
    .unwrap()
}

fn train<S: Strategy>(strategy: &mut S, init_seed: u64) -> (Vec<f32>, History) {
    let model = mlp();
    let mut rng = StdRng::seed_from_u64(init_seed);
    let mut trainer =
        Trainer::init(model, GradientDescent::new(0.5), SparseCrossEntropy, &mut rng).unwrap();

    // 29 samples in global batches of 8 leave an uneven last batch
    let options = FitOptions {
        epochs: 3,
        global_batch_size: 8,
        seed: 11,
    };
    let history = trainer
        .fit(strategy, &blobs(29, 1), &blobs(13, 2), &options)
        .unwrap();

    (trainer.params().to_vec(), history)
}

#[test]
fn two_replicas_match_a_single_one() {
    let (single_params, single_history) = train(&mut LocalStrategy, 0);

    let handles: Vec<_> = ThreadedStrategy::group(2)
        .into_iter()
        .map(|mut strategy| {
            // each replica draws its own init, the broadcast must override it with rank 0's
            let seed = strategy.replica_id() as u64;
            thread::spawn(move || train(&mut strategy, seed))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let (params0, history0) = &results[0];
    let (params1, history1) = &results[1];

    assert_eq!(params0, params1);
    assert_eq!(history0, history1);
    assert_eq!(params0.len(), mlp().size());

    for (a, b) in params0.iter().zip(&single_params) {
        assert!((a - b).abs() < 1e-4, "{a} vs {b}");
    }

    let accuracy = history0.final_val_accuracy().unwrap();
    assert!((accuracy - single_history.final_val_accuracy().unwrap()).abs() < 1e-6);
}
