use std::{net, time::Duration};

use log::{debug, info};
use machine_learning::{MlErr, Strategy};
use tokio::{
    net::TcpListener,
    runtime::{Builder, Runtime},
    time,
};

use crate::{ClusterConfig, ClusterErr, Result, ring::Ring};

/// Knobs for forming the worker group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyOptions {
    /// How long to wait for every neighbour to show up and greet back.
    pub formation_timeout: Duration,
    /// The pause between connection attempts to a neighbour that is not listening yet.
    pub connect_interval: Duration,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            formation_timeout: Duration::from_secs(60),
            connect_interval: Duration::from_millis(100),
        }
    }
}

/// Synchronous data parallelism across the workers of a `ClusterConfig`, one replica per worker.
///
/// The workers are arranged in a ring ordered by task index, every collective blocks the calling
/// thread on the strategy's own runtime until it completes on this worker.
pub struct MultiWorkerMirroredStrategy {
    runtime: Runtime,
    ring: Option<Ring>,
    rank: usize,
    world_size: usize,
}

impl MultiWorkerMirroredStrategy {
    /// Creates a new `MultiWorkerMirroredStrategy`, binding this task's address and waiting for
    /// the rest of the group.
    ///
    /// # Arguments
    /// * `config` - The cluster record, its task index decides this worker's rank.
    /// * `options` - Formation timeouts.
    ///
    /// # Returns
    /// The formed strategy or an error if the record is invalid, the address can't be bound or
    /// the group fails to form.
    pub fn new(config: ClusterConfig, options: StrategyOptions) -> Result<Self> {
        config.validate()?;

        if config.world_size() == 1 {
            return Self::single(config);
        }

        let addr = config.worker_addr(config.index())?;
        let listener =
            net::TcpListener::bind(addr).map_err(|source| ClusterErr::Bind { addr, source })?;

        Self::with_listener(config, listener, options)
    }

    /// Same as `new` but accepting the left neighbour on an already bound `listener`.
    pub fn with_listener(
        config: ClusterConfig,
        listener: net::TcpListener,
        options: StrategyOptions,
    ) -> Result<Self> {
        config.validate()?;

        if config.world_size() == 1 {
            return Self::single(config);
        }

        let runtime = Self::runtime()?;
        listener.set_nonblocking(true)?;

        let forming = async {
            let listener = TcpListener::from_std(listener)?;
            let formation = Ring::form(listener, &config, options.connect_interval);

            match time::timeout(options.formation_timeout, formation).await {
                Ok(ring) => ring,
                Err(_) => Err(ClusterErr::FormationTimeout(options.formation_timeout)),
            }
        };
        let ring = runtime.block_on(forming)?;

        info!(rank = config.index(), world_size = config.world_size(); "worker group formed");

        Ok(Self {
            runtime,
            ring: Some(ring),
            rank: config.index(),
            world_size: config.world_size(),
        })
    }

    /// A group of one, no sockets involved.
    fn single(config: ClusterConfig) -> Result<Self> {
        info!("single worker cluster, no ring needed");

        Ok(Self {
            runtime: Self::runtime()?,
            ring: None,
            rank: config.index(),
            world_size: 1,
        })
    }

    fn runtime() -> Result<Runtime> {
        Ok(Builder::new_current_thread().enable_all().build()?)
    }
}

impl Strategy for MultiWorkerMirroredStrategy {
    fn num_replicas_in_sync(&self) -> usize {
        self.world_size
    }

    fn replica_id(&self) -> usize {
        self.rank
    }

    fn broadcast(&mut self, buf: &mut [f32], root: usize) -> machine_learning::Result<()> {
        let Some(ring) = self.ring.as_mut() else {
            return Ok(());
        };

        self.runtime
            .block_on(ring.broadcast(buf, root))
            .map_err(MlErr::from)
    }

    fn all_reduce_sum(&mut self, buf: &mut [f32]) -> machine_learning::Result<()> {
        let Some(ring) = self.ring.as_mut() else {
            return Ok(());
        };

        self.runtime
            .block_on(ring.all_reduce_sum(buf))
            .map_err(MlErr::from)
    }

    fn barrier(&mut self) -> machine_learning::Result<()> {
        let Some(ring) = self.ring.as_mut() else {
            return Ok(());
        };

        self.runtime.block_on(ring.barrier()).map_err(MlErr::from)
    }
}

impl Drop for MultiWorkerMirroredStrategy {
    fn drop(&mut self) {
        if let Some(ring) = self.ring.as_mut() {
            if let Err(e) = self.runtime.block_on(ring.disconnect()) {
                debug!(rank = self.rank; "neighbour already gone on shutdown: {e}");
            }
        }
    }
}
