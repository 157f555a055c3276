use ndarray::{Array2, ArrayView1, ArrayView2, Axis, Zip};

use super::LossFn;

/// Softmax followed by the categorical cross-entropy against integer labels.
///
/// The model is expected to output raw logits, the softmax is folded into the loss so both the
/// loss and its gradient stay numerically stable.
#[derive(Default, Clone, Copy)]
pub struct SparseCrossEntropy;

impl SparseCrossEntropy {
    pub fn new() -> Self {
        Self
    }

    /// Row-wise softmax of `logits`.
    pub fn softmax(logits: ArrayView2<f32>) -> Array2<f32> {
        let mut probs = logits.to_owned();

        for mut row in probs.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row /= sum;
        }

        probs
    }
}

impl LossFn for SparseCrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, labels: ArrayView1<u8>) -> f32 {
        if y_pred.nrows() == 0 {
            return 0.;
        }

        let total: f32 = y_pred
            .rows()
            .into_iter()
            .zip(labels)
            .map(|(row, &label)| {
                let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                let log_sum_exp = row.iter().map(|v| (v - max).exp()).sum::<f32>().ln() + max;
                log_sum_exp - row[label as usize]
            })
            .sum();

        total / y_pred.nrows() as f32
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, labels: ArrayView1<u8>) -> Array2<f32> {
        let n = y_pred.nrows().max(1) as f32;
        let mut d = Self::softmax(y_pred);

        Zip::from(d.axis_iter_mut(Axis(0)))
            .and(labels)
            .for_each(|mut row, &label| row[label as usize] -= 1.);

        d /= n;
        d
    }
}

/// Counts the rows of `y_pred` whose arg max matches the label.
pub fn correct(y_pred: ArrayView2<f32>, labels: ArrayView1<u8>) -> usize {
    y_pred
        .rows()
        .into_iter()
        .zip(labels)
        .filter(|(row, label)| {
            let (best, _) = row
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
            best == **label as usize
        })
        .count()
}
