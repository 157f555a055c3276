use crate::Result;

/// Replicates training across a group of workers by synchronizing flat `f32` buffers.
///
/// Every collective is blocking and must be called by all replicas in the same order with buffers
/// of the same length, otherwise the group deadlocks or fails.
pub trait Strategy {
    /// The amount of replicas taking part in each collective.
    fn num_replicas_in_sync(&self) -> usize;

    /// This replica's position in the group, in `0..num_replicas_in_sync()`.
    fn replica_id(&self) -> usize;

    /// Overwrites `buf` on every replica with the contents `root` holds.
    fn broadcast(&mut self, buf: &mut [f32], root: usize) -> Result<()>;

    /// Replaces `buf` on every replica with the element-wise sum over all replicas.
    fn all_reduce_sum(&mut self, buf: &mut [f32]) -> Result<()>;

    /// Replaces `buf` on every replica with the element-wise mean over all replicas.
    fn all_reduce_mean(&mut self, buf: &mut [f32]) -> Result<()> {
        self.all_reduce_sum(buf)?;

        let n = self.num_replicas_in_sync() as f32;
        buf.iter_mut().for_each(|v| *v /= n);
        Ok(())
    }

    /// Blocks until every replica reached this point.
    fn barrier(&mut self) -> Result<()>;
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn num_replicas_in_sync(&self) -> usize {
        (**self).num_replicas_in_sync()
    }

    fn replica_id(&self) -> usize {
        (**self).replica_id()
    }

    fn broadcast(&mut self, buf: &mut [f32], root: usize) -> Result<()> {
        (**self).broadcast(buf, root)
    }

    fn all_reduce_sum(&mut self, buf: &mut [f32]) -> Result<()> {
        (**self).all_reduce_sum(buf)
    }

    fn all_reduce_mean(&mut self, buf: &mut [f32]) -> Result<()> {
        (**self).all_reduce_mean(buf)
    }

    fn barrier(&mut self) -> Result<()> {
        (**self).barrier()
    }
}

/// A single replica, every collective leaves the buffers untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStrategy;

impl LocalStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for LocalStrategy {
    fn num_replicas_in_sync(&self) -> usize {
        1
    }

    fn replica_id(&self) -> usize {
        0
    }

    fn broadcast(&mut self, _buf: &mut [f32], _root: usize) -> Result<()> {
        Ok(())
    }

    fn all_reduce_sum(&mut self, _buf: &mut [f32]) -> Result<()> {
        Ok(())
    }

    fn barrier(&mut self) -> Result<()> {
        Ok(())
    }
}
