use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use super::{ImageDim, as_flat, size_check};
use crate::Result;

/// Non-overlapping max pooling over `pool × pool` windows. Trailing rows or columns that do not
/// fill a whole window are dropped.
#[derive(Clone)]
pub struct MaxPool2d {
    input: ImageDim,
    pool: usize,

    // Flat input index (within its sample) of the maximum of every output cell.
    argmax: Vec<usize>,
}

impl MaxPool2d {
    pub fn new(input: ImageDim, pool: usize) -> Self {
        Self {
            input,
            pool: pool.max(1),
            argmax: Vec::new(),
        }
    }

    pub fn input(&self) -> ImageDim {
        self.input
    }

    pub fn output(&self) -> ImageDim {
        let (h, w, c) = self.input;
        (h / self.pool, w / self.pool, c)
    }

    pub fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (h, w, c) = self.input;
        size_check("pool input features", x.ncols(), h * w * c)?;

        let batch = x.nrows();
        let (oh, ow, _) = self.output();
        let out_len = oh * ow * c;
        let pool = self.pool;

        let mut out = vec![0.; batch * out_len];
        let mut argmax = vec![0; batch * out_len];
        let x = as_flat(&x);

        out.par_chunks_mut(out_len.max(1))
            .zip(argmax.par_chunks_mut(out_len.max(1)))
            .zip(x.par_chunks((h * w * c).max(1)))
            .for_each(|((out, argmax), img)| {
                for oi in 0..oh {
                    for oj in 0..ow {
                        for ch in 0..c {
                            let cell = (oi * ow + oj) * c + ch;
                            let mut best = (f32::NEG_INFINITY, 0);

                            for pi in 0..pool {
                                for pj in 0..pool {
                                    let idx = ((oi * pool + pi) * w + oj * pool + pj) * c + ch;
                                    if img[idx] > best.0 {
                                        best = (img[idx], idx);
                                    }
                                }
                            }

                            (out[cell], argmax[cell]) = best;
                        }
                    }
                }
            });

        self.argmax = argmax;
        Ok(Array2::from_shape_vec((batch, out_len), out)?)
    }

    /// Routes every output delta back to the input position that won its window.
    pub fn backward(&mut self, d: Array2<f32>) -> Result<Array2<f32>> {
        let (h, w, c) = self.input;
        size_check("pool output delta", d.len(), self.argmax.len())?;

        let in_len = h * w * c;
        let out_len = d.ncols();
        let batch = d.nrows();

        let mut dx = vec![0.; batch * in_len];
        let d = as_flat(&d);

        dx.par_chunks_mut(in_len.max(1))
            .zip(d.par_chunks(out_len.max(1)))
            .zip(self.argmax.par_chunks(out_len.max(1)))
            .for_each(|((dx, d), argmax)| {
                for (&g, &idx) in d.iter().zip(argmax) {
                    dx[idx] += g;
                }
            });

        Ok(Array2::from_shape_vec((batch, in_len), dx)?)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn picks_the_window_maximum_per_channel() {
        // 2x2 image, 2 channels, one window.
        let mut pool = MaxPool2d::new((2, 2, 2), 2);
        let x = array![[1., 8., 4., 2., 3., 6., 0., 7.]];

        let y = pool.forward(x.view()).unwrap();
        assert_eq!(y, array![[4., 8.]]);
    }

    #[test]
    fn delta_goes_to_the_winner_only() {
        let mut pool = MaxPool2d::new((2, 2, 1), 2);
        pool.forward(array![[1., 5., 3., 2.]].view()).unwrap();

        let dx = pool.backward(array![[0.5]]).unwrap();
        assert_eq!(dx, array![[0., 0.5, 0., 0.]]);
    }

    #[test]
    fn odd_sizes_drop_the_remainder() {
        let pool = MaxPool2d::new((5, 5, 3), 2);
        assert_eq!(pool.output(), (2, 2, 3));
    }
}
