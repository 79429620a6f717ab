//! Lifecycle management for a single disposable container.
//!
//! A [`Container`] owns one container on a [`Backend`](crate::backend::Backend)
//! and drives it through create → start → wait-ready → stop/remove.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                               Container                                    │
//! │                                                                            │
//! │   start() / stop() / clean_up() / dispose()   (one gate, one at a time)   │
//! │         │                                                                  │
//! │         ▼                                                                  │
//! │   ┌──────────────┐     ┌──────────────┐     ┌──────────────────────────┐  │
//! │   │ Create       │────▶│ Attach +     │────▶│ Startup callback         │  │
//! │   │ (if needed)  │     │ Start        │     │                          │  │
//! │   └──────────────┘     └──────────────┘     └──────────────────────────┘  │
//! │                                                        │                   │
//! │                                                        ▼                   │
//! │                       ┌──────────────┐     ┌──────────────────────────┐   │
//! │                       │ Evaluate     │◀────│ Refresh handle (inspect) │   │
//! │                       │ strategy     │────▶│ every poll interval      │   │
//! │                       └──────────────┘     └──────────────────────────┘   │
//! │                                                                            │
//! │   id() / name() / hostname() / mapped_public_port()  (lock-free reads)    │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use capsule::backend::DockerBackend;
//! use capsule::container::{Container, ContainerBuilder};
//! use capsule::wait::UntilPortIsAvailable;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ContainerBuilder::new("nginx:alpine")
//!     .with_exposed_port(80)
//!     .with_wait_strategy(UntilPortIsAvailable::new(80))
//!     .build()?;
//!
//! let backend = Arc::new(DockerBackend::connect(&config.endpoint).await?);
//! let container = Container::new(config, backend);
//! let cancel = CancellationToken::new();
//!
//! container.start(&cancel).await?;
//! let port = container.mapped_public_port(80)?;
//! println!("nginx on {}:{}", container.hostname().await?, port);
//!
//! container.dispose(&cancel).await?;
//! # Ok(())
//! # }
//! ```

pub mod accessors;
pub mod builder;
pub mod handle;
pub mod manager;
pub mod teardown;

pub use builder::{
    ContainerBuilder, ContainerConfig, DEFAULT_POLL_INTERVAL, NoopStartup, SESSION_LABEL,
    StartupCallback, session_id,
};
pub use handle::{ContainerHandle, ContainerState, NetworkAttachment, PortBinding, Protocol};
pub use manager::Container;
pub use teardown::TeardownPolicy;
