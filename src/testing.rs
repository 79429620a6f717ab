//! In-memory backend for exercising the lifecycle manager without an engine.
//!
//! Provides:
//! - [`StubBackend`]: a [`Backend`] that keeps containers in a map, counts
//!   every call, and can be told to fail or to report a scripted sequence of
//!   states
//! - [`StubCalls`]: a snapshot of the call counters
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use capsule::container::{Container, ContainerBuilder};
//! use capsule::testing::StubBackend;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let backend = Arc::new(StubBackend::new().with_port(80, 32768));
//! let config = ContainerBuilder::new("nginx").build().unwrap();
//! let container = Container::new(config, backend.clone());
//!
//! container.start(&CancellationToken::new()).await.unwrap();
//! assert_eq!(backend.calls().create, 1);
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{Backend, ExecResult, FileCopy, OutputConsumer};
use crate::container::{
    ContainerConfig, ContainerHandle, ContainerState, NetworkAttachment, PortBinding, Protocol,
};
use crate::error::{ContainerError, Result};

/// Call counts per backend operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StubCalls {
    pub create: u32,
    pub inspect: u32,
    pub start: u32,
    pub stop: u32,
    pub remove: u32,
    pub attach: u32,
    pub exec: u32,
    pub copy: u32,
    pub reachable: u32,
}

#[derive(Default)]
struct Counters {
    create: AtomicU32,
    inspect: AtomicU32,
    start: AtomicU32,
    stop: AtomicU32,
    remove: AtomicU32,
    attach: AtomicU32,
    exec: AtomicU32,
    copy: AtomicU32,
    reachable: AtomicU32,
}

fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct StubContainer {
    name: String,
    state: ContainerState,
    exit_code: i64,
    files: HashMap<String, Vec<u8>>,
    script: VecDeque<ContainerState>,
}

/// A configurable in-memory [`Backend`] for tests.
///
/// Supports:
/// - Published ports via [`with_port`](Self::with_port)
/// - Gateway resolution via [`in_container`](Self::in_container) and
///   [`with_reachable_host`](Self::with_reachable_host)
/// - Scripted inspect states via [`with_state_script`](Self::with_state_script)
/// - Runtime failure toggling via [`set_failing`](Self::set_failing)
/// - Call counting via [`calls`](Self::calls)
pub struct StubBackend {
    containers: Mutex<HashMap<String, StubContainer>>,
    counters: Counters,
    ports: Vec<(u16, u16)>,
    in_container: bool,
    reachable_hosts: Vec<String>,
    reaper_supported: bool,
    exec_result: ExecResult,
    create_delay: Option<Duration>,
    exec_delay: Option<Duration>,
    state_script: Vec<ContainerState>,
    output: Vec<String>,
    failing: Mutex<Option<&'static str>>,
    last_exec: Mutex<Option<Vec<String>>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            ports: Vec::new(),
            in_container: false,
            reachable_hosts: Vec::new(),
            reaper_supported: true,
            exec_result: ExecResult::default(),
            create_delay: None,
            exec_delay: None,
            state_script: Vec::new(),
            output: Vec::new(),
            failing: Mutex::new(None),
            last_exec: Mutex::new(None),
        }
    }

    /// Publish `private` tcp port on `public` while the container runs.
    pub fn with_port(mut self, private: u16, public: u16) -> Self {
        self.ports.push((private, public));
        self
    }

    /// Pretend this process runs inside a container.
    pub fn in_container(mut self, in_container: bool) -> Self {
        self.in_container = in_container;
        self
    }

    /// Make `host` answer gateway reachability checks.
    pub fn with_reachable_host(mut self, host: impl Into<String>) -> Self {
        self.reachable_hosts.push(host.into());
        self
    }

    /// Report an engine that cannot host a reaper.
    pub fn without_reaper(mut self) -> Self {
        self.reaper_supported = false;
        self
    }

    /// Result returned by every `exec`.
    pub fn with_exec_result(mut self, result: ExecResult) -> Self {
        self.exec_result = result;
        self
    }

    /// Hold every `create` for `delay` before it completes.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Hold every `exec` for `delay` before it completes.
    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = Some(delay);
        self
    }

    /// States reported by successive inspects after each start. The last
    /// state sticks once the script runs out.
    pub fn with_state_script(mut self, states: impl IntoIterator<Item = ContainerState>) -> Self {
        self.state_script = states.into_iter().collect();
        self
    }

    /// Line written to stdout when output is attached.
    pub fn with_output_line(mut self, line: impl Into<String>) -> Self {
        self.output.push(line.into());
        self
    }

    /// Make the named operation (`"create"`, `"start"`, `"inspect"`, ...)
    /// fail until cleared with `None`.
    pub fn set_failing(&self, operation: Option<&'static str>) {
        *lock(&self.failing) = operation;
    }

    pub fn calls(&self) -> StubCalls {
        let c = &self.counters;
        let load = |counter: &AtomicU32| counter.load(Ordering::Relaxed);
        StubCalls {
            create: load(&c.create),
            inspect: load(&c.inspect),
            start: load(&c.start),
            stop: load(&c.stop),
            remove: load(&c.remove),
            attach: load(&c.attach),
            exec: load(&c.exec),
            copy: load(&c.copy),
            reachable: load(&c.reachable),
        }
    }

    /// Command passed to the most recent `exec`.
    pub fn last_exec(&self) -> Option<Vec<String>> {
        lock(&self.last_exec).clone()
    }

    /// Content of a file copied into container `id`.
    pub fn file(&self, id: &str, path: &str) -> Option<Vec<u8>> {
        lock(&self.containers)
            .get(id)
            .and_then(|c| c.files.get(path).cloned())
    }

    /// Whether container `id` still exists.
    pub fn exists(&self, id: &str) -> bool {
        lock(&self.containers).contains_key(id)
    }

    /// Number of containers that exist.
    pub fn container_count(&self) -> usize {
        lock(&self.containers).len()
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if *lock(&self.failing) == Some(operation) {
            return Err(ContainerError::Backend {
                operation,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn with_container<T>(
        &self,
        operation: &'static str,
        id: &str,
        f: impl FnOnce(&mut StubContainer) -> T,
    ) -> Result<T> {
        let mut containers = lock(&self.containers);
        let container = containers
            .get_mut(id)
            .ok_or_else(|| ContainerError::Backend {
                operation,
                reason: format!("no such container: {id}"),
            })?;
        Ok(f(container))
    }

    fn snapshot(&self, id: &str, container: &StubContainer) -> ContainerHandle {
        let running = container.state == ContainerState::Running;
        let ports = self
            .ports
            .iter()
            .map(|&(private, public)| PortBinding {
                private_port: private,
                protocol: Protocol::Tcp,
                public_ports: if running { vec![public] } else { Vec::new() },
            })
            .collect();

        ContainerHandle {
            id: id.to_string(),
            names: vec![container.name.clone()],
            state: container.state,
            networks: vec![NetworkAttachment {
                network: "bridge".to_string(),
                ip_address: "172.17.0.2".to_string(),
                mac_address: "02:42:ac:11:00:02".to_string(),
                gateway: "172.17.0.1".to_string(),
            }],
            ports,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl Backend for StubBackend {
    async fn create(&self, config: &ContainerConfig) -> Result<String> {
        bump(&self.counters.create);
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        self.check("create")?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let name = match &config.name {
            Some(name) => format!("/{name}"),
            None => format!("/stub-{id}"),
        };
        lock(&self.containers).insert(
            id.clone(),
            StubContainer {
                name,
                state: ContainerState::Created,
                exit_code: 0,
                files: HashMap::new(),
                script: VecDeque::new(),
            },
        );
        Ok(id)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerHandle> {
        bump(&self.counters.inspect);
        self.check("inspect")?;

        let mut containers = lock(&self.containers);
        let container = containers
            .get_mut(id)
            .ok_or_else(|| ContainerError::Backend {
                operation: "inspect",
                reason: format!("no such container: {id}"),
            })?;
        if let Some(next) = container.script.pop_front() {
            container.state = next;
        }
        Ok(self.snapshot(id, container))
    }

    async fn start(&self, id: &str) -> Result<()> {
        bump(&self.counters.start);
        self.check("start")?;

        let script = self.state_script.clone();
        self.with_container("start", id, |c| {
            c.state = ContainerState::Running;
            c.script = script.into();
        })
    }

    async fn stop(&self, id: &str) -> Result<()> {
        bump(&self.counters.stop);
        self.check("stop")?;

        self.with_container("stop", id, |c| {
            c.state = ContainerState::Exited;
            c.script.clear();
            c.exit_code = 0;
        })
    }

    async fn remove(&self, id: &str) -> Result<()> {
        bump(&self.counters.remove);
        self.check("remove")?;

        lock(&self.containers)
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ContainerError::Backend {
                operation: "remove",
                reason: format!("no such container: {id}"),
            })
    }

    async fn attach_output(&self, id: &str, sink: Arc<dyn OutputConsumer>) -> Result<()> {
        bump(&self.counters.attach);
        self.check("attach")?;

        self.with_container("attach", id, |_| ())?;
        for line in &self.output {
            sink.stdout(format!("{line}\n").as_bytes());
        }
        Ok(())
    }

    async fn exec(&self, id: &str, command: &[String]) -> Result<ExecResult> {
        bump(&self.counters.exec);
        if let Some(delay) = self.exec_delay {
            tokio::time::sleep(delay).await;
        }
        self.check("exec")?;

        self.with_container("exec", id, |_| ())?;
        *lock(&self.last_exec) = Some(command.to_vec());
        Ok(self.exec_result.clone())
    }

    async fn copy_file(&self, id: &str, file: &FileCopy) -> Result<()> {
        bump(&self.counters.copy);
        self.check("copy")?;

        self.with_container("copy", id, |c| {
            c.files.insert(file.path.clone(), file.content.clone());
        })
    }

    async fn exit_code(&self, id: &str) -> Result<i64> {
        self.check("exit_code")?;
        self.with_container("exit_code", id, |c| c.exit_code)
    }

    async fn reaper_supported(&self) -> Result<bool> {
        self.check("reaper_supported")?;
        Ok(self.reaper_supported)
    }

    fn is_running_in_container(&self) -> bool {
        self.in_container
    }

    async fn host_reachable(&self, host: &str) -> bool {
        bump(&self.counters.reachable);
        self.reachable_hosts.iter().any(|h| h == host)
    }
}
