mod cross_entropy;
mod loss_fn;

pub use cross_entropy::{SparseCrossEntropy, correct};
pub use loss_fn::LossFn;
