//! Environment detection for the Docker backend.
//!
//! Answers two questions the lifecycle manager cannot answer itself: which
//! endpoint a local Docker daemon listens on by default, and whether this
//! process is already running inside a container (in which case published
//! ports are reached through the host gateway, not `localhost`).
//!
//! # Detection Limitations
//!
//! - **Linux**: `/.dockerenv` covers Docker. Podman and Kubernetes are caught
//!   through `/proc/1/cgroup` on cgroup v1 only; a cgroup v2 host shows `0::/`
//!   and is reported as not containerized.
//! - **macOS / Windows**: processes never run "inside" the Docker VM, so
//!   detection always answers false.

use std::path::Path;

/// Host platform, used to pick the default endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOS,
    Linux,
    Windows,
}

impl Platform {
    /// Detect the current platform.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => Platform::MacOS,
            "windows" => Platform::Windows,
            _ => Platform::Linux,
        }
    }

    /// Endpoint of a local Docker daemon on this platform.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Platform::MacOS | Platform::Linux => "unix:///var/run/docker.sock",
            Platform::Windows => "npipe:////./pipe/docker_engine",
        }
    }
}

const CGROUP_MARKERS: [&str; 4] = ["docker", "containerd", "kubepods", "libpod"];

/// Whether the current process runs inside a container.
pub fn running_in_container() -> bool {
    running_in_container_at(Path::new("/"))
}

/// Same as [`running_in_container`], with an alternate filesystem root.
pub fn running_in_container_at(root: &Path) -> bool {
    if root.join(".dockerenv").exists() {
        return true;
    }

    match std::fs::read_to_string(root.join("proc/1/cgroup")) {
        Ok(cgroup) => cgroup_mentions_runtime(&cgroup),
        Err(_) => false,
    }
}

fn cgroup_mentions_runtime(cgroup: &str) -> bool {
    cgroup
        .lines()
        .any(|line| CGROUP_MARKERS.iter().any(|marker| line.contains(marker)))
}
