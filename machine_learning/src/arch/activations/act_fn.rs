use super::Relu;

/// An element-wise activation applied at the output of a parametric layer.
#[derive(Debug, Clone, Copy)]
pub enum ActFn {
    Relu(Relu),
}

impl ActFn {
    pub fn relu() -> Self {
        Self::Relu(Relu)
    }

    pub fn f(&self, z: f32) -> f32 {
        match self {
            Self::Relu(a) => a.f(z),
        }
    }

    /// The derivative evaluated at the pre-activation value `z`.
    pub fn df(&self, z: f32) -> f32 {
        match self {
            Self::Relu(a) => a.df(z),
        }
    }
}
