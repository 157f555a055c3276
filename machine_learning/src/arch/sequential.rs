use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{Model, layers::Layer};
use crate::{MlErr, Result};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
    size: usize,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` or an error if two consecutive layers disagree on their feature count.
    pub fn new<I>(layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = Layer>,
    {
        let layers: Vec<Layer> = layers.into_iter().collect();

        for pair in layers.windows(2) {
            let (out, inp) = (pair[0].output_size(), pair[1].input_size());
            if out != inp {
                return Err(MlErr::SizeMismatch {
                    what: "chained layer features",
                    got: inp,
                    expected: out,
                });
            }
        }

        let size = layers.iter().map(Layer::size).sum();
        Ok(Self { layers, size })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// The amount of features a sample must have to be fed to this model.
    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, Layer::input_size)
    }

    /// The amount of outputs this model produces per sample.
    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, Layer::output_size)
    }

    fn check_params(&self, what: &'static str, len: usize) -> Result<()> {
        if len != self.size {
            return Err(MlErr::SizeMismatch {
                what,
                got: len,
                expected: self.size,
            });
        }

        Ok(())
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.size
    }

    fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f32>> {
        let mut params = vec![0.; self.size];
        let mut rest = params.as_mut_slice();

        for layer in &self.layers {
            for (len, init) in layer.param_inits() {
                let (segment, tail) = rest.split_at_mut(len);
                init.fill(rng, segment)?;
                rest = tail;
            }
        }

        Ok(params)
    }

    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_params("model parameters", params.len())?;

        let mut out = x.to_owned();
        let mut offset = 0;

        for layer in self.layers.iter_mut() {
            let size = layer.size();
            out = layer.forward(&params[offset..offset + size], out.view())?;
            offset += size;
        }

        Ok(out)
    }

    fn backward(&mut self, params: &[f32], grad: &mut [f32], mut d: Array2<f32>) -> Result<()> {
        self.check_params("model parameters", params.len())?;
        self.check_params("model gradient", grad.len())?;

        let mut end = self.size;

        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::arch::activations::ActFn;

    fn two_dense() -> Sequential {
        Sequential::new([
            Layer::dense((2, 3), Some(ActFn::relu())),
            Layer::dense((3, 1), None),
        ])
        .unwrap()
    }

    #[test]
    fn size_adds_up_every_layer() {
        assert_eq!(two_dense().size(), 2 * 3 + 3 + 3 + 1);
    }

    #[test]
    fn rejects_disagreeing_layers() {
        let res = Sequential::new([Layer::dense((2, 3), None), Layer::dense((4, 1), None)]);
        assert!(matches!(
            res,
            Err(MlErr::SizeMismatch { got: 4, expected: 3, .. })
        ));
    }

    #[test]
    fn init_is_reproducible_and_biases_start_at_zero() {
        let model = two_dense();
        let a = model.init_params(&mut StdRng::seed_from_u64(7)).unwrap();
        let b = model.init_params(&mut StdRng::seed_from_u64(7)).unwrap();

        assert_eq!(a, b);
        assert_eq!(&a[6..9], &[0., 0., 0.]);
        assert_eq!(a[12], 0.);
    }

    #[test]
    fn forward_rejects_short_params() {
        let mut model = two_dense();
        let x = array![[1., 2.]];
        assert!(model.forward(&[0.; 3], x.view()).is_err());
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut model = two_dense();
        let mut params = model.init_params(&mut StdRng::seed_from_u64(3)).unwrap();
        // keep every hidden unit active so relu stays differentiable around the point
        params[6..9].copy_from_slice(&[1., 1., 1.]);
        let x = array![[0.05, -0.025], [0.01, 0.03]];

        // loss = sum of outputs, so dL/dy is all ones
        let mut grad = vec![0.; model.size()];
        model.forward(&params, x.view()).unwrap();
        model
            .backward(&params, &mut grad, Array2::ones((2, 1)))
            .unwrap();

        let eps = 1e-2;
        for i in 0..params.len() {
            let mut plus = params.clone();
            plus[i] += eps;
            let mut minus = params.clone();
            minus[i] -= eps;

            let f_plus = model.forward(&plus, x.view()).unwrap().sum();
            let f_minus = model.forward(&minus, x.view()).unwrap().sum();
            let numeric = (f_plus - f_minus) / (2. * eps);

            assert!(
                (numeric - grad[i]).abs() < 1e-2,
                "param {i}: numeric {numeric} vs analytic {}",
                grad[i]
            );
        }
    }
}
