/// The loss and accuracy of a model over a dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
}

/// What a single epoch of `Trainer::fit` achieved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f32,
    pub val: Evaluation,
}

/// The per-epoch record of a `fit` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    epochs: Vec<EpochStats>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stats: EpochStats) {
        self.epochs.push(stats);
    }

    pub fn epochs(&self) -> &[EpochStats] {
        &self.epochs
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// The validation accuracy after the last epoch, if any epoch ran.
    pub fn final_val_accuracy(&self) -> Option<f32> {
        self.epochs.last().map(|stats| stats.val.accuracy)
    }
}
