use std::ops::Range;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::{MlErr, Result};

/// Samples as rows of `x` with their class labels in `y`.
#[derive(Debug, Clone)]
pub struct Dataset {
    x: Array2<f32>,
    y: Array1<u8>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Errors
    /// If `x` and `y` hold a different amount of samples.
    pub fn new(x: Array2<f32>, y: Array1<u8>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(MlErr::SizeMismatch {
                what: "labels",
                got: y.len(),
                expected: x.nrows(),
            });
        }

        Ok(Self { x, y })
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn x(&self) -> ArrayView2<'_, f32> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView1<'_, u8> {
        self.y.view()
    }

    /// Gathers the samples at `indices`, in that order.
    pub fn batch(&self, indices: &[usize]) -> (Array2<f32>, Array1<u8>) {
        (
            self.x.select(Axis(0), indices),
            self.y.select(Axis(0), indices),
        )
    }

    /// Views a contiguous run of samples.
    pub fn slice(&self, range: Range<usize>) -> (ArrayView2<'_, f32>, ArrayView1<'_, u8>) {
        (
            self.x.slice_axis(Axis(0), range.clone().into()),
            self.y.slice_axis(Axis(0), range.into()),
        )
    }
}

/// Splits `total` samples among `replicas` and returns the range belonging to `replica`.
///
/// Ranges are contiguous, disjoint and cover `0..total`, their sizes differ by at most one.
///
/// # Panics
/// If `replicas` is zero or `replica` is not below `replicas`.
pub fn shard_range(total: usize, replica: usize, replicas: usize) -> Range<usize> {
    assert!(replicas > 0);
    assert!(replica < replicas);

    let base = total / replicas;
    let rem = total % replicas;

    let start = replica * base + replica.min(rem);
    let extra = if replica < rem { 1 } else { 0 };
    let end = start + base + extra;

    start..end
}
