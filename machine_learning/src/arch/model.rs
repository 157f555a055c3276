use ndarray::{Array2, ArrayView2};
use rand::Rng;

use crate::Result;

/// A trainable function whose parameters live outside of it, in a single flat slice.
///
/// Keeping the parameters external lets every replica of a data-parallel job hold the model
/// structure while the synchronized values travel as one contiguous buffer.
pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Draws a fresh parameter vector of length `size()`.
    fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f32>>;

    /// Makes a forward pass, caching whatever the following `backward` needs.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `x` - The input batch, one sample per row.
    ///
    /// # Returns
    /// The model's output for the batch.
    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Backpropagates `d`, the derivative of the loss with respect to the last output, writing
    /// the gradient of every parameter into `grad`.
    fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array2<f32>) -> Result<()>;
}
