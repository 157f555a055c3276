use std::borrow::Cow;

use ndarray::{ArrayBase, Data, Ix2};

mod conv;
mod dense;
mod layer;
mod pool;

pub use conv::Conv2d;
pub use dense::Dense;
pub use layer::Layer;
pub use pool::MaxPool2d;

/// The spatial shape of a sample flowing between image layers, as (height, width, channels).
///
/// Samples are stored as rows of a 2d array, flattened in height-width-channel order.
pub type ImageDim = (usize, usize, usize);

fn size_check(what: &'static str, got: usize, expected: usize) -> crate::Result<()> {
    if got != expected {
        return Err(crate::MlErr::SizeMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}

/// Views a 2d array as a flat row-major slice, copying only if its layout is not standard.
fn as_flat<S: Data<Elem = f32>>(a: &ArrayBase<S, Ix2>) -> Cow<'_, [f32]> {
    match a.as_slice() {
        Some(flat) => Cow::Borrowed(flat),
        None => Cow::Owned(a.iter().copied().collect()),
    }
}
