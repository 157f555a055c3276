// Receive buffers whose elements are at least 4 bytes aligned, so `f32` payloads can be viewed in place.
pub trait Align4: bytemuck::Pod {}

impl Align4 for f32 {}
