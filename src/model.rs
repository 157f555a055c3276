use machine_learning::{
    Result,
    arch::{Sequential, activations::ActFn, layers::Layer},
};

use crate::dataset::{CHANNELS, IMAGE_SIDE, NUM_CLASSES};

const KERNEL: usize = 3;
const POOL: usize = 2;
const CONV1_FILTERS: usize = 16;
const CONV2_FILTERS: usize = 32;
const HIDDEN: usize = 64;

/// The classifier every combination trains from scratch.
///
/// `conv 3x3 (16) -> pool 2 -> conv 3x3 (32) -> pool 2 -> dense 64 -> dense 10`, with relu after
/// every layer but the last, which outputs logits.
pub fn cifar_cnn() -> Result<Sequential> {
    let side = IMAGE_SIDE;
    let half = side / POOL;
    let quarter = half / POOL;

    Sequential::new([
        Layer::conv2d(
            (side, side, CHANNELS),
            CONV1_FILTERS,
            KERNEL,
            Some(ActFn::relu()),
        ),
        Layer::max_pool2d((side, side, CONV1_FILTERS), POOL),
        Layer::conv2d(
            (half, half, CONV1_FILTERS),
            CONV2_FILTERS,
            KERNEL,
            Some(ActFn::relu()),
        ),
        Layer::max_pool2d((half, half, CONV2_FILTERS), POOL),
        Layer::dense(
            (quarter * quarter * CONV2_FILTERS, HIDDEN),
            Some(ActFn::relu()),
        ),
        Layer::dense((HIDDEN, NUM_CLASSES), None),
    ])
}
