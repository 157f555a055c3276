/// Types that can be written as the body of a frame.
pub trait Serialize<'a> {
    /// Writes the owned part of the message into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer holding the frame so far.
    ///
    /// # Returns
    /// An optional borrowed tail to be written right after `buf` without copying.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
