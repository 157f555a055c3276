use std::{
    env,
    net::{SocketAddr, ToSocketAddrs},
};

use serde::{Deserialize, Serialize};

use crate::{ClusterErr, Result};

const WORKER_TASK: &str = "worker";

/// The addresses of every worker in the group, in task index order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub worker: Vec<String>,
}

/// Which of the cluster's tasks this process is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub index: usize,
}

/// The cluster description every worker is started with.
///
/// Serializes to `{"cluster": {"worker": ["host:port", ...]}, "task": {"type": "worker", "index": 0}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster: ClusterSpec,
    pub task: TaskSpec,
}

impl ClusterConfig {
    /// Creates a new `ClusterConfig` for the worker task at `index`.
    pub fn new<I, S>(workers: I, index: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cluster: ClusterSpec {
                worker: workers.into_iter().map(Into::into).collect(),
            },
            task: TaskSpec {
                kind: WORKER_TASK.to_string(),
                index,
            },
        }
    }

    /// Parses and validates a JSON cluster record.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the cluster record from the environment variable `var`.
    pub fn from_env(var: &str) -> Result<Self> {
        let json = env::var(var).map_err(|_| ClusterErr::MissingEnv(var.to_string()))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Checks the record describes a group this process can join.
    ///
    /// # Errors
    /// If there are no workers, the task is not a worker, the index is out of range or an
    /// address cannot be resolved.
    pub fn validate(&self) -> Result<()> {
        let n = self.world_size();

        if n == 0 {
            return Err(ClusterErr::InvalidConfig(
                "the cluster has no workers".to_string(),
            ));
        }

        if self.task.kind != WORKER_TASK {
            return Err(ClusterErr::InvalidConfig(format!(
                "unsupported task type `{}`, only `{WORKER_TASK}` tasks exist",
                self.task.kind
            )));
        }

        if self.task.index >= n {
            return Err(ClusterErr::InvalidConfig(format!(
                "task index {} is out of range for {n} workers",
                self.task.index
            )));
        }

        for i in 0..n {
            self.worker_addr(i)?;
        }

        Ok(())
    }

    /// The amount of workers in the group.
    pub fn world_size(&self) -> usize {
        self.cluster.worker.len()
    }

    pub fn index(&self) -> usize {
        self.task.index
    }

    /// Resolves the address of the worker at `index`.
    pub fn worker_addr(&self, index: usize) -> Result<SocketAddr> {
        let raw = self.cluster.worker.get(index).ok_or_else(|| {
            ClusterErr::InvalidConfig(format!("there is no worker with index {index}"))
        })?;

        raw.to_socket_addrs()
            .map_err(|e| ClusterErr::InvalidConfig(format!("bad worker address `{raw}`: {e}")))?
            .next()
            .ok_or_else(|| ClusterErr::InvalidConfig(format!("`{raw}` resolves to nothing")))
    }

    /// The index of the worker this one sends to.
    pub fn right(&self) -> usize {
        (self.task.index + 1) % self.world_size().max(1)
    }

    /// The index of the worker this one receives from.
    pub fn left(&self) -> usize {
        let n = self.world_size().max(1);
        (self.task.index + n - 1) % n
    }
}
