use ndarray::{Array2, ArrayView2};

use super::ImageDim;
use crate::{Result, arch::activations::ActFn, initialization::ParamInit};

/// A building block of a `Sequential` model.
#[derive(Clone)]
pub enum Layer {
    Dense(super::Dense),
    Conv2d(super::Conv2d),
    MaxPool2d(super::MaxPool2d),
}
use Layer::*;

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Dense(super::Dense::new(dim, act_fn))
    }

    pub fn conv2d(input: ImageDim, filters: usize, kernel: usize, act_fn: Option<ActFn>) -> Self {
        Conv2d(super::Conv2d::new(input, filters, kernel, act_fn))
    }

    pub fn max_pool2d(input: ImageDim, pool: usize) -> Self {
        MaxPool2d(super::MaxPool2d::new(input, pool))
    }

    /// The amount of parameters this layer owns.
    pub fn size(&self) -> usize {
        match self {
            Dense(l) => l.size(),
            Conv2d(l) => l.size(),
            MaxPool2d(_) => 0,
        }
    }

    /// The amount of features a single sample has on the input side.
    pub fn input_size(&self) -> usize {
        match self {
            Dense(l) => l.dim().0,
            Conv2d(l) => flat(l.input()),
            MaxPool2d(l) => flat(l.input()),
        }
    }

    /// The amount of features a single sample has on the output side.
    pub fn output_size(&self) -> usize {
        match self {
            Dense(l) => l.dim().1,
            Conv2d(l) => flat(l.output()),
            MaxPool2d(l) => flat(l.output()),
        }
    }

    /// The segments of this layer's parameter slice along with their initializers.
    pub fn param_inits(&self) -> Vec<(usize, ParamInit)> {
        match self {
            Dense(l) => l.param_inits().to_vec(),
            Conv2d(l) => l.param_inits().to_vec(),
            MaxPool2d(_) => Vec::new(),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.forward(params, x),
            Conv2d(l) => l.forward(params, x),
            MaxPool2d(l) => l.forward(x),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.backward(params, grad, d),
            Conv2d(l) => l.backward(params, grad, d),
            MaxPool2d(l) => l.backward(d),
        }
    }
}

fn flat((h, w, c): ImageDim) -> usize {
    h * w * c
}
