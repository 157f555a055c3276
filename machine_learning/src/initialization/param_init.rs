use rand::Rng;
use rand_distr::{Distribution, Normal, NormalError};

use crate::{MlErr, Result};

/// How a contiguous segment of parameters gets its initial values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamInit {
    Const { value: f32 },
    Normal { mean: f32, std_dev: f32 },
    /// He normal, suited to layers followed by a ReLU.
    Kaiming { fan_in: usize },
}

impl ParamInit {
    pub fn zeros() -> Self {
        Self::Const { value: 0. }
    }

    /// Fills `out` with values drawn according to this initializer.
    ///
    /// # Arguments
    /// * `rng` - The random number generator to sample from.
    /// * `out` - The segment of parameters to overwrite.
    ///
    /// # Returns
    /// An error if the resulting distribution is invalid (e.g. a zero fan-in).
    pub fn fill<R: Rng + ?Sized>(&self, rng: &mut R, out: &mut [f32]) -> Result<()> {
        match *self {
            Self::Const { value } => out.fill(value),
            Self::Normal { mean, std_dev } => {
                let dist = Normal::new(mean, std_dev).map_err(invalid_normal)?;
                sample_into(&dist, rng, out);
            }
            Self::Kaiming { fan_in } => {
                let std_dev = (2. / fan_in as f32).sqrt();
                Self::Normal { mean: 0., std_dev }.fill(rng, out)?;
            }
        }

        Ok(())
    }
}

fn sample_into<D, R>(dist: &D, rng: &mut R, out: &mut [f32])
where
    D: Distribution<f32>,
    R: Rng + ?Sized,
{
    for p in out {
        *p = dist.sample(rng);
    }
}

fn invalid_normal(e: NormalError) -> MlErr {
    MlErr::InvalidDistribution(e.to_string())
}
