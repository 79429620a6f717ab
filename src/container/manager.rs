//! The container lifecycle state machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::container::builder::ContainerConfig;
use crate::container::handle::ContainerHandle;
use crate::container::teardown::TeardownPolicy;
use crate::error::{ContainerError, Result};
use crate::wait::{cancellable, wait_until};

/// Manages one disposable container.
///
/// Every lifecycle operation (`start`, `stop`, `clean_up`, `dispose`) runs
/// behind the same single-permit gate, so concurrent callers observe them
/// one at a time. Accessors read the latest handle without waiting on the
/// gate.
pub struct Container {
    pub(crate) config: ContainerConfig,
    pub(crate) backend: Arc<dyn Backend>,
    handle: RwLock<Arc<ContainerHandle>>,
    gate: Semaphore,
    /// Set once dispose is requested; `start` is refused from then on.
    retired: AtomicBool,
    /// Set once teardown has completed and the gate is closed.
    disposed: AtomicBool,
}

impl Container {
    pub fn new(config: ContainerConfig, backend: Arc<dyn Backend>) -> Self {
        Self {
            config,
            backend,
            handle: RwLock::new(Arc::new(ContainerHandle::empty())),
            gate: Semaphore::new(1),
            retired: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Latest snapshot of the container.
    pub fn handle(&self) -> Arc<ContainerHandle> {
        let guard = self.handle.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    fn replace_handle(&self, handle: Arc<ContainerHandle>) {
        let mut guard = self.handle.write().unwrap_or_else(|e| e.into_inner());
        *guard = handle;
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<SemaphorePermit<'_>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ContainerError::Cancelled),
            permit = self.gate.acquire() => permit.map_err(|_| ContainerError::Disposed),
        }
    }

    /// Inspect `id` and swap in the new handle.
    async fn refresh(&self, id: &str, cancel: &CancellationToken) -> Result<Arc<ContainerHandle>> {
        let handle = Arc::new(cancellable(cancel, self.backend.inspect(id)).await?);
        self.replace_handle(Arc::clone(&handle));
        Ok(handle)
    }

    /// Create (unless it already exists), start, and wait until every wait
    /// strategy reports ready.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let _permit = self.acquire(cancel).await?;
        if self.retired.load(Ordering::SeqCst) {
            return Err(ContainerError::Disposed);
        }

        let id = self.create(cancel).await?;
        self.start_and_wait(&id, cancel).await
    }

    /// Stop the container, leaving it in place.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        let _permit = self.acquire(cancel).await?;
        self.stop_locked(cancel).await
    }

    /// Remove the container. A later `start` creates a new one.
    pub async fn clean_up(&self, cancel: &CancellationToken) -> Result<()> {
        let _permit = self.acquire(cancel).await?;
        self.clean_up_locked(cancel).await
    }

    /// Tear the container down and retire this manager.
    ///
    /// Removes the container when no reaper will, otherwise only stops it.
    /// Waits for an in-flight lifecycle call first. `start` fails with
    /// [`ContainerError::Disposed`] as soon as dispose is called.
    ///
    /// The gate closes only once teardown succeeds; after that every later
    /// dispose is a no-op and other lifecycle calls fail with `Disposed`. A
    /// failed or cancelled teardown leaves the gate open so dispose can be
    /// retried.
    pub async fn dispose(&self, cancel: &CancellationToken) -> Result<()> {
        self.retired.store(true, Ordering::SeqCst);
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let _permit = match self.acquire(cancel).await {
            Ok(permit) => permit,
            // Another dispose finished while this one waited.
            Err(ContainerError::Disposed) => return Ok(()),
            Err(e) => return Err(e),
        };

        self.teardown(cancel).await?;
        self.disposed.store(true, Ordering::SeqCst);
        self.gate.close();
        Ok(())
    }

    async fn teardown(&self, cancel: &CancellationToken) -> Result<()> {
        if !self.handle().has_been_created() {
            return Ok(());
        }

        let policy = self.teardown_policy(cancel).await?;
        tracing::debug!("Disposing {} with {:?}", self.config.image, policy);

        match policy {
            TeardownPolicy::SelfManaged => self.clean_up_locked(cancel).await,
            TeardownPolicy::ReaperSupervised => self.stop_locked(cancel).await,
        }
    }

    async fn teardown_policy(&self, cancel: &CancellationToken) -> Result<TeardownPolicy> {
        let reaper_observes = self.config.reaper_enabled
            && cancellable(cancel, self.backend.reaper_supported()).await?;
        Ok(TeardownPolicy::select(
            reaper_observes,
            self.config.session_label(),
        ))
    }

    async fn create(&self, cancel: &CancellationToken) -> Result<String> {
        let current = self.handle();
        if current.has_been_created() {
            tracing::debug!("Reusing container {} ({})", current.id, current.state());
            return Ok(current.id.clone());
        }

        let id = cancellable(cancel, self.backend.create(&self.config)).await?;
        self.refresh(&id, cancel).await?;
        Ok(id)
    }

    async fn start_and_wait(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let sink = Arc::clone(&self.config.output);
        cancellable(cancel, async {
            tokio::try_join!(
                self.backend.attach_output(id, sink),
                self.backend.start(id)
            )
            .map(|_| ())
        })
        .await?;

        self.refresh(id, cancel).await?;

        cancellable(
            cancel,
            self.config.startup_callback.on_started(self, cancel),
        )
        .await?;

        for strategy in &self.config.wait_strategies {
            tracing::debug!("Waiting on {} for {}", strategy.name(), id);

            let strategy = strategy.as_ref();
            strategy.reset();
            wait_until(
                move || async move {
                    self.refresh(id, cancel).await?;
                    strategy.until(self).await
                },
                self.config.poll_interval,
                self.config.wait_timeout,
                cancel,
            )
            .await?;
        }

        tracing::info!("Container {} from {} is ready", id, self.config.image);
        Ok(())
    }

    async fn stop_locked(&self, cancel: &CancellationToken) -> Result<()> {
        let id = self.id()?;
        cancellable(cancel, self.backend.stop(&id)).await?;
        self.refresh(&id, cancel).await?;
        Ok(())
    }

    async fn clean_up_locked(&self, cancel: &CancellationToken) -> Result<()> {
        let id = self.id()?;
        cancellable(cancel, self.backend.remove(&id)).await?;
        self.replace_handle(Arc::new(ContainerHandle::empty()));
        Ok(())
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::SeqCst) && self.handle().has_been_created() {
            tracing::warn!(
                "Container {} dropped without dispose(), it may remain on the engine",
                self.handle().id
            );
        }
    }
}
