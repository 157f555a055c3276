use ndarray::{linalg, prelude::*};

use super::size_check;
use crate::{Result, arch::activations::ActFn, initialization::ParamInit};

/// A fully connected layer. Its parameter slice holds the weights (row-major, `dim.0 × dim.1`)
/// followed by the biases (`dim.1`).
#[derive(Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The amount of input and output features.
    /// * `act_fn` - An optional activation applied to the output.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            x: Array2::zeros((0, dim.0)),
            z: Array2::zeros((0, dim.1)),
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn param_inits(&self) -> [(usize, ParamInit); 2] {
        let (n, m) = self.dim;
        [(n * m, ParamInit::Kaiming { fan_in: n }), (m, ParamInit::zeros())]
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        size_check("dense input features", x.ncols(), self.dim.0)?;
        let (w, b) = self.view_params(params)?;

        let mut z = x.dot(&w);
        z += &b;
        self.x = x.to_owned();

        let Some(act_fn) = self.act_fn else {
            return Ok(z);
        };

        let a = z.mapv(|z| act_fn.f(z));
        self.z = z;
        Ok(a)
    }

    /// Computes this layer's gradient into `grad` and returns the delta for the previous layer.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        size_check("dense output delta", d.ncols(), self.dim.1)?;
        size_check("dense batch", d.nrows(), self.x.nrows())?;

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        size_check("dense gradient", grad.len(), self.size)?;

        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        size_check("dense parameters", params.len(), self.size)?;

        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..])?;
        Ok((weights, biases))
    }
}
