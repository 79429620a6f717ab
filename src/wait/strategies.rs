//! Built-in readiness checks.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::backend::LogBuffer;
use crate::container::{Container, ContainerState};
use crate::error::{ContainerError, Result};
use crate::wait::WaitStrategy;

/// Resolve `host:port` for a private port, or `None` while it is unpublished.
async fn published_address(container: &Container, private_port: u16) -> Result<Option<String>> {
    let public = match container.mapped_public_port(private_port) {
        Ok(port) => port,
        Err(ContainerError::PortNotMapped { .. }) => return Ok(None),
        Err(e) => return Err(e),
    };
    let host = container.hostname().await?;
    Ok(Some(format!("{}:{}", host, public)))
}

/// Ready once a TCP connection to the published port succeeds.
#[derive(Debug, Clone)]
pub struct UntilPortIsAvailable {
    port: u16,
    connect_timeout: Duration,
}

impl UntilPortIsAvailable {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            connect_timeout: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl WaitStrategy for UntilPortIsAvailable {
    fn name(&self) -> &'static str {
        "port"
    }

    async fn until(&self, container: &Container) -> Result<bool> {
        let Some(addr) = published_address(container, self.port).await? else {
            return Ok(false);
        };

        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => {
                tracing::trace!("Connect to {} failed: {}", addr, e);
                Ok(false)
            }
            Err(_) => Ok(false), // Timeout
        }
    }
}

/// Ready once a line matching a pattern shows up in the container output.
///
/// The same [`LogBuffer`] must be installed as the container's output sink.
#[derive(Debug, Clone)]
pub struct UntilMessageIsLogged {
    pattern: Regex,
    buffer: LogBuffer,
}

impl UntilMessageIsLogged {
    pub fn new(pattern: &str, buffer: LogBuffer) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| ContainerError::WaitStrategy {
            strategy: "log",
            reason: format!("invalid pattern: {e}"),
        })?;
        Ok(Self { pattern, buffer })
    }
}

#[async_trait]
impl WaitStrategy for UntilMessageIsLogged {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn until(&self, _container: &Container) -> Result<bool> {
        Ok(self.buffer.any_line(|line| self.pattern.is_match(line)))
    }
}

/// Ready once an HTTP GET on the published port answers with the expected
/// status.
#[derive(Debug, Clone)]
pub struct UntilHttpRequestIsSucceeded {
    port: u16,
    path: String,
    status: u16,
    client: reqwest::Client,
}

impl UntilHttpRequestIsSucceeded {
    pub fn new(port: u16, path: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            port,
            path: path.into(),
            status: 200,
            client,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

#[async_trait]
impl WaitStrategy for UntilHttpRequestIsSucceeded {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn until(&self, container: &Container) -> Result<bool> {
        let Some(addr) = published_address(container, self.port).await? else {
            return Ok(false);
        };
        let url = format!("http://{}/{}", addr, self.path.trim_start_matches('/'));

        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().as_u16() == self.status),
            Err(e) => {
                // Connection refused is expected during startup
                if e.is_connect() || e.is_timeout() {
                    Ok(false)
                } else {
                    Err(ContainerError::WaitStrategy {
                        strategy: "http",
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}

/// Ready once a command run inside the container exits with 0.
#[derive(Debug, Clone)]
pub struct UntilCommandIsCompleted {
    command: Vec<String>,
    exec_timeout: Duration,
}

impl UntilCommandIsCompleted {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            exec_timeout: Duration::from_secs(10),
        }
    }

    /// Bound on a single run of the command. A run that exceeds it counts
    /// as not ready.
    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }
}

#[async_trait]
impl WaitStrategy for UntilCommandIsCompleted {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn until(&self, container: &Container) -> Result<bool> {
        // The poll loop already races this against the caller's token.
        let token = CancellationToken::new();
        let exec = container.exec(&self.command, &token);
        match tokio::time::timeout(self.exec_timeout, exec).await {
            Ok(result) => Ok(result?.success()),
            Err(_) => {
                tracing::trace!(
                    "{:?} did not finish within {:?}",
                    self.command,
                    self.exec_timeout
                );
                Ok(false)
            }
        }
    }
}

/// Ready once the engine reports the container as running. Fails if it
/// exits first.
#[derive(Debug, Clone, Copy, Default)]
pub struct UntilContainerIsRunning;

#[async_trait]
impl WaitStrategy for UntilContainerIsRunning {
    fn name(&self) -> &'static str {
        "running"
    }

    async fn until(&self, container: &Container) -> Result<bool> {
        match container.state() {
            ContainerState::Running => Ok(true),
            ContainerState::Exited => Err(ContainerError::WaitStrategy {
                strategy: "running",
                reason: "container exited before it was ready".to_string(),
            }),
            _ => Ok(false),
        }
    }
}

type Operation = Box<dyn Fn(&Container) -> bool + Send + Sync>;

/// Ready once a caller-provided check passes, giving up after a number of
/// attempts.
pub struct UntilOperationIsSucceeded {
    operation: Operation,
    max_attempts: u32,
    attempts: AtomicU32,
}

impl UntilOperationIsSucceeded {
    pub fn new(
        operation: impl Fn(&Container) -> bool + Send + Sync + 'static,
        max_attempts: u32,
    ) -> Self {
        Self {
            operation: Box::new(operation),
            max_attempts,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WaitStrategy for UntilOperationIsSucceeded {
    fn name(&self) -> &'static str {
        "operation"
    }

    async fn until(&self, container: &Container) -> Result<bool> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if (self.operation)(container) {
            return Ok(true);
        }

        if attempt >= self.max_attempts {
            return Err(ContainerError::WaitStrategy {
                strategy: "operation",
                reason: format!("not satisfied after {attempt} attempt(s)"),
            });
        }
        Ok(false)
    }

    fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }
}
