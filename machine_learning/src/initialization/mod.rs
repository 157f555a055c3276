//! Initial values for a model's parameters.
//!
//! Every parametric layer describes its flat parameter slice as a list of segments, each with
//! its own [`ParamInit`]. A model is initialized by filling those segments in order.

mod param_init;

pub use param_init::ParamInit;
