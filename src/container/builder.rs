//! Container configuration and its builder.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::backend::detect::Platform;
use crate::backend::{NullOutput, OutputConsumer};
use crate::config::Settings;
use crate::container::handle::Protocol;
use crate::container::manager::Container;
use crate::error::{ContainerError, Result};
use crate::wait::WaitStrategy;

/// Label correlating a container with the test session that created it.
pub const SESSION_LABEL: &str = "capsule.session-id";

/// Default interval between readiness polls.
///
/// Lower values multiply inspect calls against the engine; with many
/// containers the engine starts rejecting requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Identifier shared by every container this process creates.
pub fn session_id() -> &'static str {
    static SESSION_ID: OnceLock<String> = OnceLock::new();
    SESSION_ID.get_or_init(|| uuid::Uuid::new_v4().to_string())
}

/// Hook invoked once after the container reports running and before any
/// wait strategy runs.
#[async_trait]
pub trait StartupCallback: Send + Sync {
    async fn on_started(&self, container: &Container, cancel: &CancellationToken) -> Result<()>;
}

/// Startup callback that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStartup;

#[async_trait]
impl StartupCallback for NoopStartup {
    async fn on_started(&self, _container: &Container, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<F> StartupCallback for F
where
    F: Fn(&Container) -> Result<()> + Send + Sync,
{
    async fn on_started(&self, container: &Container, _cancel: &CancellationToken) -> Result<()> {
        self(container)
    }
}

/// Everything needed to create and run one container.
#[derive(Clone)]
pub struct ContainerConfig {
    /// Engine endpoint; its scheme also drives hostname resolution.
    pub endpoint: Url,
    pub image: String,
    /// Command override. Empty keeps the image default.
    pub command: Vec<String>,
    pub name: Option<String>,
    pub env: Vec<(String, String)>,
    /// Private ports published to random host ports.
    pub exposed_ports: Vec<(u16, Protocol)>,
    pub labels: HashMap<String, String>,
    pub output: Arc<dyn OutputConsumer>,
    /// Readiness checks, run in order.
    pub wait_strategies: Vec<Arc<dyn WaitStrategy>>,
    pub startup_callback: Arc<dyn StartupCallback>,
    pub poll_interval: Duration,
    /// Upper bound per wait strategy. `None` waits until cancelled.
    pub wait_timeout: Option<Duration>,
    /// Whether a reaper watches this session's containers.
    pub reaper_enabled: bool,
}

impl ContainerConfig {
    /// Session label value, if any.
    pub fn session_label(&self) -> Option<&str> {
        self.labels.get(SESSION_LABEL).map(String::as_str)
    }
}

impl fmt::Debug for ContainerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("image", &self.image)
            .field("command", &self.command)
            .field("name", &self.name)
            .field("exposed_ports", &self.exposed_ports)
            .field("labels", &self.labels)
            .field(
                "wait_strategies",
                &self
                    .wait_strategies
                    .iter()
                    .map(|s| s.name())
                    .collect::<Vec<_>>(),
            )
            .field("poll_interval", &self.poll_interval)
            .field("wait_timeout", &self.wait_timeout)
            .field("reaper_enabled", &self.reaper_enabled)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`ContainerConfig`].
pub struct ContainerBuilder {
    endpoint: String,
    image: String,
    command: Vec<String>,
    name: Option<String>,
    env: Vec<(String, String)>,
    exposed_ports: Vec<(u16, Protocol)>,
    labels: HashMap<String, String>,
    output: Arc<dyn OutputConsumer>,
    wait_strategies: Vec<Arc<dyn WaitStrategy>>,
    startup_callback: Arc<dyn StartupCallback>,
    poll_interval: Duration,
    wait_timeout: Option<Duration>,
    reaper_enabled: bool,
    session_id: Option<String>,
}

impl ContainerBuilder {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            endpoint: Platform::current().default_endpoint().to_string(),
            image: image.into(),
            command: Vec::new(),
            name: None,
            env: Vec::new(),
            exposed_ports: Vec::new(),
            labels: HashMap::new(),
            output: Arc::new(NullOutput),
            wait_strategies: Vec::new(),
            startup_callback: Arc::new(NoopStartup),
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: None,
            reaper_enabled: true,
            session_id: None,
        }
    }

    /// Apply endpoint, session and polling defaults resolved from the
    /// environment. Later `with_*` calls still override them.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.endpoint = settings.endpoint.to_string();
        self.reaper_enabled = settings.reaper_enabled;
        self.poll_interval = settings.poll_interval;
        self.wait_timeout = settings.wait_timeout;
        self.session_id = Some(settings.session_id.clone());
        self
    }

    /// Engine endpoint such as `unix:///var/run/docker.sock` or
    /// `tcp://10.0.0.5:2375`. Validated by [`build`](Self::build).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Publish a private tcp port on a random host port.
    pub fn with_exposed_port(self, port: u16) -> Self {
        self.with_exposed_port_protocol(port, Protocol::Tcp)
    }

    pub fn with_exposed_port_protocol(mut self, port: u16, protocol: Protocol) -> Self {
        if !self.exposed_ports.contains(&(port, protocol)) {
            self.exposed_ports.push((port, protocol));
        }
        self
    }

    pub fn with_output(mut self, output: impl OutputConsumer + 'static) -> Self {
        self.output = Arc::new(output);
        self
    }

    /// Append a readiness check. Checks run in the order they are added.
    pub fn with_wait_strategy(mut self, strategy: impl WaitStrategy + 'static) -> Self {
        self.wait_strategies.push(Arc::new(strategy));
        self
    }

    pub fn with_startup_callback(mut self, callback: impl StartupCallback + 'static) -> Self {
        self.startup_callback = Arc::new(callback);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    pub fn with_reaper(mut self, enabled: bool) -> Self {
        self.reaper_enabled = enabled;
        self
    }

    pub fn build(self) -> Result<ContainerConfig> {
        if self.image.trim().is_empty() {
            return Err(ContainerError::Config {
                reason: "image must not be empty".to_string(),
            });
        }

        if self.poll_interval.is_zero() {
            return Err(ContainerError::Config {
                reason: "poll interval must be greater than zero".to_string(),
            });
        }

        let endpoint = Url::parse(&self.endpoint).map_err(|e| ContainerError::Config {
            reason: format!("invalid endpoint '{}': {e}", self.endpoint),
        })?;

        let mut labels = self.labels;
        let session = self
            .session_id
            .unwrap_or_else(|| session_id().to_string());
        labels.entry(SESSION_LABEL.to_string()).or_insert(session);

        Ok(ContainerConfig {
            endpoint,
            image: self.image,
            command: self.command,
            name: self.name,
            env: self.env,
            exposed_ports: self.exposed_ports,
            labels,
            output: self.output,
            wait_strategies: self.wait_strategies,
            startup_callback: self.startup_callback,
            poll_interval: self.poll_interval,
            wait_timeout: self.wait_timeout,
            reaper_enabled: self.reaper_enabled,
        })
    }
}
