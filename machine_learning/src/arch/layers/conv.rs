use ndarray::{linalg, prelude::*};
use rayon::prelude::*;

use super::{ImageDim, as_flat, size_check};
use crate::{Result, arch::activations::ActFn, initialization::ParamInit};

/// A 2d convolution with unit stride and "same" zero padding, so the output keeps the input's
/// height and width.
///
/// The forward pass unfolds every receptive field into a row (im2col) and reduces the
/// convolution to a single matrix product against the `(kernel² · channels) × filters` weight
/// matrix. The parameter slice holds those weights followed by one bias per filter.
#[derive(Clone)]
pub struct Conv2d {
    input: ImageDim,
    filters: usize,
    kernel: usize,
    act_fn: Option<ActFn>,

    // Forward metadata
    cols: Array2<f32>,
    z: Array2<f32>,
}

impl Conv2d {
    /// Creates a new `Conv2d` layer.
    ///
    /// # Arguments
    /// * `input` - The (height, width, channels) of each input sample.
    /// * `filters` - The amount of output channels.
    /// * `kernel` - The side of the square kernel, should be odd.
    /// * `act_fn` - An optional activation applied to the output.
    pub fn new(input: ImageDim, filters: usize, kernel: usize, act_fn: Option<ActFn>) -> Self {
        Self {
            input,
            filters,
            kernel,
            act_fn,
            cols: Array2::zeros((0, 0)),
            z: Array2::zeros((0, 0)),
        }
    }

    pub fn input(&self) -> ImageDim {
        self.input
    }

    pub fn output(&self) -> ImageDim {
        let (h, w, _) = self.input;
        (h, w, self.filters)
    }

    pub fn size(&self) -> usize {
        self.patch() * self.filters + self.filters
    }

    pub fn param_inits(&self) -> [(usize, ParamInit); 2] {
        let fan_in = self.patch();
        [
            (fan_in * self.filters, ParamInit::Kaiming { fan_in }),
            (self.filters, ParamInit::zeros()),
        ]
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (h, w, c) = self.input;
        size_check("conv input features", x.ncols(), h * w * c)?;

        let batch = x.nrows();
        let patch = self.patch();

        let mut cols = vec![0.; batch * h * w * patch];
        self.im2col(&as_flat(&x), &mut cols);
        let cols = Array2::from_shape_vec((batch * h * w, patch), cols)?;

        let (weights, biases) = self.view_params(params)?;
        let mut z = cols.dot(&weights);
        z += &biases;
        self.cols = cols;

        let z = z.into_shape_with_order((batch, h * w * self.filters))?;

        let Some(act_fn) = self.act_fn else {
            return Ok(z);
        };

        let a = z.mapv(|z| act_fn.f(z));
        self.z = z;
        Ok(a)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let (h, w, c) = self.input;
        let batch = self.cols.nrows() / (h * w).max(1);
        size_check("conv output delta", d.len(), batch * h * w * self.filters)?;

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        if !d.is_standard_layout() {
            d = d.as_standard_layout().to_owned();
        }
        let d = d.into_shape_with_order((batch * h * w, self.filters))?;

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &self.cols.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (weights, _) = self.view_params(params)?;
        let dcols = d.dot(&weights.t());

        let mut dx = vec![0.; batch * h * w * c];
        self.col2im(&as_flat(&dcols), &mut dx);
        Ok(Array2::from_shape_vec((batch, h * w * c), dx)?)
    }

    fn patch(&self) -> usize {
        self.kernel * self.kernel * self.input.2
    }

    /// Calls `f(row, offset, pixel)` for every in-bounds kernel tap, where `row` is the output
    /// position, `offset` the tap's position inside the unfolded row and `pixel` the flat index
    /// of the first channel of the input pixel it reads.
    fn for_each_tap<F: FnMut(usize, usize, usize)>(&self, mut f: F) {
        let (h, w, c) = self.input;
        let k = self.kernel;
        let pad = k / 2;

        for i in 0..h {
            for j in 0..w {
                let row = i * w + j;

                for ki in 0..k {
                    let Some(y) = (i + ki).checked_sub(pad).filter(|&y| y < h) else {
                        continue;
                    };

                    for kj in 0..k {
                        let Some(x) = (j + kj).checked_sub(pad).filter(|&x| x < w) else {
                            continue;
                        };

                        f(row, (ki * k + kj) * c, (y * w + x) * c);
                    }
                }
            }
        }
    }

    fn im2col(&self, x: &[f32], cols: &mut [f32]) {
        let (h, w, c) = self.input;
        let patch = self.patch();

        cols.par_chunks_mut(h * w * patch)
            .zip(x.par_chunks(h * w * c))
            .for_each(|(cols, img)| {
                self.for_each_tap(|row, offset, pixel| {
                    let dst = row * patch + offset;
                    cols[dst..dst + c].copy_from_slice(&img[pixel..pixel + c]);
                });
            });
    }

    fn col2im(&self, dcols: &[f32], dx: &mut [f32]) {
        let (h, w, c) = self.input;
        let patch = self.patch();

        dx.par_chunks_mut(h * w * c)
            .zip(dcols.par_chunks(h * w * patch))
            .for_each(|(img, dcols)| {
                self.for_each_tap(|row, offset, pixel| {
                    let src = row * patch + offset;
                    for (acc, g) in img[pixel..pixel + c].iter_mut().zip(&dcols[src..src + c]) {
                        *acc += g;
                    }
                });
            });
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        size_check("conv gradient", grad.len(), self.size())?;

        let (dw_raw, db_raw) = grad.split_at_mut(self.patch() * self.filters);
        let dw = ArrayViewMut2::from_shape((self.patch(), self.filters), dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.filters, db_raw)?;
        Ok((dw, db))
    }

    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        size_check("conv parameters", params.len(), self.size())?;

        let (w_raw, b_raw) = params.split_at(self.patch() * self.filters);
        let weights = ArrayView2::from_shape((self.patch(), self.filters), w_raw)?;
        let biases = ArrayView1::from_shape(self.filters, b_raw)?;
        Ok((weights, biases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_kernel_copies_the_image() {
        // 3x3 kernel with a single 1 in the center, one channel, one filter, no bias.
        let mut params = vec![0.; 10];
        params[4] = 1.;

        let mut conv = Conv2d::new((2, 2, 1), 1, 3, None);
        let x = array![[1., 2., 3., 4.]];
        let y = conv.forward(&params, x.view()).unwrap();

        assert_eq!(y, x);
    }

    #[test]
    fn box_kernel_sums_the_neighbourhood() {
        let mut params = vec![1.; 10];
        params[9] = 0.5;

        let mut conv = Conv2d::new((2, 2, 1), 1, 3, None);
        let y = conv.forward(&params, array![[1., 2., 3., 4.]].view()).unwrap();

        // Every output position sees the whole 2x2 image thanks to the padding.
        assert_eq!(y, array![[10.5, 10.5, 10.5, 10.5]]);
    }

    #[test]
    fn output_is_height_width_channel_ordered() {
        // Two filters: the first copies the pixel, the second doubles it.
        let mut params = vec![0.; 9 * 2 + 2];
        params[4 * 2] = 1.;
        params[4 * 2 + 1] = 2.;

        let mut conv = Conv2d::new((1, 2, 1), 2, 3, None);
        let y = conv.forward(&params, array![[3., 5.]].view()).unwrap();

        assert_eq!(y, array![[3., 6., 5., 10.]]);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let input = (3, 3, 2);
        let mut conv = Conv2d::new(input, 2, 3, None);
        let params: Vec<f32> = (0..conv.size()).map(|i| ((i * 7 % 11) as f32 - 5.) / 10.).collect();
        let x = Array2::from_shape_fn((2, 18), |(n, i)| ((n * 18 + i) % 5) as f32 / 5.);

        // loss = sum of outputs, so the incoming delta is all ones.
        let y = conv.forward(&params, x.view()).unwrap();
        let mut grad = vec![0.; conv.size()];
        conv.backward(&params, &mut grad, Array2::ones(y.raw_dim())).unwrap();

        let eps = 1e-2;
        for i in [0, 5, 17, conv.size() - 1] {
            let mut plus = params.clone();
            plus[i] += eps;
            let mut minus = params.clone();
            minus[i] -= eps;

            let up = conv.forward(&plus, x.view()).unwrap().sum();
            let down = conv.forward(&minus, x.view()).unwrap().sum();
            let numeric = (up - down) / (2. * eps);

            assert!((numeric - grad[i]).abs() < 1e-2, "param {i}: {numeric} vs {}", grad[i]);
        }
    }

    #[test]
    fn input_delta_of_the_identity_kernel_is_the_output_delta() {
        let mut params = vec![0.; 10];
        params[4] = 1.;

        let mut conv = Conv2d::new((2, 2, 1), 1, 3, None);
        conv.forward(&params, array![[1., 2., 3., 4.]].view()).unwrap();

        let mut grad = vec![0.; 10];
        let d = array![[0.1, 0.2, 0.3, 0.4]];
        let dx = conv.backward(&params, &mut grad, d.clone()).unwrap();

        assert_eq!(dx, d);
        assert!((grad[9] - 1.0).abs() < 1e-6);
    }
}
