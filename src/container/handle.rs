//! Snapshot of the backend's view of a container.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a container, normalized from the backend status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Nothing has been created yet. Never reported by a backend.
    #[default]
    Uncreated,
    /// Created but never started.
    Created,
    /// Started and not yet exited.
    Running,
    /// The main process has exited.
    Exited,
    /// The backend reported a status outside the managed lifecycle.
    Undefined,
}

impl ContainerState {
    /// Whether the container exists on the backend.
    pub fn has_been_created(&self) -> bool {
        matches!(self, Self::Created | Self::Running | Self::Exited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uncreated => "uncreated",
            Self::Created => "created",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Undefined => "undefined",
        }
    }
}

impl FromStr for ContainerState {
    type Err = std::convert::Infallible;

    /// Parses a backend status. Unknown values become `Undefined`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s.trim().to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "exited" => Self::Exited,
            _ => Self::Undefined,
        };
        Ok(state)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport protocol of a port binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "sctp" => Ok(Self::Sctp),
            other => Err(format!("unknown protocol '{other}'")),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Sctp => "sctp",
        })
    }
}

/// A container-private port and the host ports it is published on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub private_port: u16,
    pub protocol: Protocol,
    pub public_ports: Vec<u16>,
}

impl PortBinding {
    /// Parses a Docker style key such as `80/tcp`. A bare number means tcp.
    pub fn parse_key(key: &str) -> Option<(u16, Protocol)> {
        let (port, protocol) = match key.split_once('/') {
            Some((port, protocol)) => (port, protocol.parse().ok()?),
            None => (key, Protocol::Tcp),
        };
        Some((port.parse().ok()?, protocol))
    }
}

/// Addressing of the container on one network.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub network: String,
    pub ip_address: String,
    pub mac_address: String,
    pub gateway: String,
}

/// Immutable snapshot of a container as last reported by the backend.
///
/// A handle with an empty `id` describes a container that does not exist,
/// whatever its other fields say. The manager never edits a handle in place;
/// each refresh produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
    pub names: Vec<String>,
    pub state: ContainerState,
    pub networks: Vec<NetworkAttachment>,
    pub ports: Vec<PortBinding>,
}

impl ContainerHandle {
    /// The uncreated sentinel.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Effective state: `Uncreated` whenever the identity is empty.
    pub fn state(&self) -> ContainerState {
        if self.id.is_empty() {
            ContainerState::Uncreated
        } else {
            self.state
        }
    }

    pub fn has_been_created(&self) -> bool {
        self.state().has_been_created()
    }

    /// First public port published for `private_port`, any protocol.
    pub fn public_port(&self, private_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .filter(|binding| binding.private_port == private_port)
            .find_map(|binding| binding.public_ports.first().copied())
    }

    pub fn primary_network(&self) -> Option<&NetworkAttachment> {
        self.networks.first()
    }
}
