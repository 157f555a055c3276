use ndarray::{Array2, ArrayView1, ArrayView2};

/// A loss over a batch of model outputs and their integer class labels.
pub trait LossFn {
    /// The mean loss over the batch.
    fn loss(&self, y_pred: ArrayView2<f32>, labels: ArrayView1<u8>) -> f32;

    /// The derivative of the mean loss with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, labels: ArrayView1<u8>) -> Array2<f32>;
}
