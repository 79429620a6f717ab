//! Disposable container lifecycle management for tests and local
//! development.
//!
//! A [`Container`](container::Container) creates a container through a
//! [`Backend`](backend::Backend), starts it, polls its
//! [wait strategies](wait) until it is ready, and tears it down on
//! [`dispose`](container::Container::dispose).

pub mod backend;
pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod testing;
pub mod wait;

pub use backend::{Backend, DockerBackend};
pub use config::Settings;
pub use container::{Container, ContainerBuilder, ContainerConfig, ContainerState};
pub use error::{ConfigError, ContainerError, Result};
