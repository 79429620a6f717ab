//! Backend abstraction over the engine that actually runs containers.
//!
//! The lifecycle manager only talks to a [`Backend`]. The production
//! implementation is [`DockerBackend`]; tests use
//! [`StubBackend`](crate::testing::StubBackend).
//!
//! Backends are shared between many containers behind an `Arc` and must be
//! safe for concurrent use with independent identities. They do not take a
//! cancellation token: the manager races every backend future against the
//! caller's token.

pub mod detect;
pub mod docker;
pub mod output;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::container::{ContainerConfig, ContainerHandle};
use crate::error::Result;

pub use docker::DockerBackend;
pub use output::{LogBuffer, NullOutput, OutputConsumer, TracingOutput};

/// Well-known names that resolve to the host from inside a container.
pub const GATEWAY_HOSTNAMES: [&str; 2] = ["host.docker.internal", "gateway.docker.internal"];

/// Result of running a command inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A file to place inside a container.
#[derive(Debug, Clone)]
pub struct FileCopy {
    /// Absolute path inside the container.
    pub path: String,
    pub content: Vec<u8>,
    /// Unix permission bits.
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
}

impl FileCopy {
    /// Owner-only read/write file owned by root.
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            mode: 0o600,
            uid: 0,
            gid: 0,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_owner(mut self, uid: u64, gid: u64) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }
}

/// Operations the lifecycle manager needs from a container engine.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Provision a new container and return its identity.
    async fn create(&self, config: &ContainerConfig) -> Result<String>;

    /// Fresh snapshot of the container.
    async fn inspect(&self, id: &str) -> Result<ContainerHandle>;

    async fn start(&self, id: &str) -> Result<()>;

    /// Stop the container. Stopping a stopped container is not an error.
    async fn stop(&self, id: &str) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;

    /// Attach `sink` to the container's stdout/stderr.
    ///
    /// Returns once attached; output keeps flowing in the background until
    /// the stream ends.
    async fn attach_output(&self, id: &str, sink: Arc<dyn OutputConsumer>) -> Result<()>;

    async fn exec(&self, id: &str, command: &[String]) -> Result<ExecResult>;

    async fn copy_file(&self, id: &str, file: &FileCopy) -> Result<()>;

    async fn exit_code(&self, id: &str) -> Result<i64>;

    /// Whether an out-of-process reaper can run against this engine.
    async fn reaper_supported(&self) -> Result<bool>;

    /// Whether this process itself runs inside a container.
    fn is_running_in_container(&self) -> bool;

    /// Whether `host` is reachable from here. Used for gateway resolution.
    async fn host_reachable(&self, host: &str) -> bool {
        resolve_host(host, Duration::from_secs(1)).await
    }
}

/// DNS resolution with a deadline.
pub async fn resolve_host(host: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, tokio::net::lookup_host((host, 0))).await {
        Ok(Ok(mut addrs)) => addrs.next().is_some(),
        Ok(Err(e)) => {
            tracing::trace!("Lookup of {} failed: {}", host, e);
            false
        }
        Err(_) => false,
    }
}
