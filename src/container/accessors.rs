//! Read accessors and passthroughs derived from the current handle.

use tokio_util::sync::CancellationToken;

use crate::backend::{ExecResult, FileCopy, GATEWAY_HOSTNAMES};
use crate::container::handle::{ContainerHandle, ContainerState};
use crate::container::manager::Container;
use crate::error::{ContainerError, Result};
use crate::wait::cancellable;

/// Hostname used when the container is reachable on the local machine.
pub const LOCALHOST: &str = "localhost";

impl Container {
    /// Handle of a created container, or [`ContainerError::NotCreated`].
    fn created(&self) -> Result<std::sync::Arc<ContainerHandle>> {
        let handle = self.handle();
        if handle.has_been_created() {
            Ok(handle)
        } else {
            Err(ContainerError::NotCreated)
        }
    }

    /// Current lifecycle state. Never fails.
    pub fn state(&self) -> ContainerState {
        self.handle().state()
    }

    pub fn id(&self) -> Result<String> {
        Ok(self.created()?.id.clone())
    }

    /// First declared name without Docker's leading `/`. Falls back to the
    /// id for engines that report no names.
    pub fn name(&self) -> Result<String> {
        let handle = self.created()?;
        Ok(handle
            .names
            .first()
            .map(|name| name.trim_start_matches('/').to_string())
            .unwrap_or_else(|| handle.id.clone()))
    }

    /// IP address on the first network. Empty when the container has no
    /// network attachment.
    pub fn ip_address(&self) -> Result<String> {
        let handle = self.created()?;
        Ok(handle
            .primary_network()
            .map(|n| n.ip_address.clone())
            .unwrap_or_default())
    }

    /// MAC address on the first network. Empty when the container has no
    /// network attachment.
    pub fn mac_address(&self) -> Result<String> {
        let handle = self.created()?;
        Ok(handle
            .primary_network()
            .map(|n| n.mac_address.clone())
            .unwrap_or_default())
    }

    /// Host port published for `private_port`.
    pub fn mapped_public_port(&self, private_port: u16) -> Result<u16> {
        self.created()?
            .public_port(private_port)
            .ok_or_else(|| ContainerError::PortNotMapped {
                port: private_port.to_string(),
            })
    }

    /// Same as [`mapped_public_port`](Self::mapped_public_port) for a port
    /// given as text, e.g. read from configuration.
    pub fn mapped_public_port_str(&self, private_port: &str) -> Result<u16> {
        let handle = self.created()?;
        private_port
            .trim()
            .parse::<u16>()
            .ok()
            .and_then(|port| handle.public_port(port))
            .ok_or_else(|| ContainerError::PortNotMapped {
                port: private_port.to_string(),
            })
    }

    /// Exit code of the main process as reported by the backend.
    pub async fn exit_code(&self, cancel: &CancellationToken) -> Result<i64> {
        let id = self.id()?;
        cancellable(cancel, self.backend.exit_code(&id)).await
    }

    /// Host name under which published ports are reachable.
    ///
    /// Remote endpoints (`http`, `https`, `tcp`) answer with their own host.
    /// Local sockets (`unix`, `npipe`) mean the engine runs on this machine:
    /// `localhost`, unless this process is itself containerized, in which
    /// case the engine host is found through the gateway.
    pub async fn hostname(&self) -> Result<String> {
        let endpoint = &self.config.endpoint;

        match endpoint.scheme() {
            "http" | "https" | "tcp" => {
                endpoint
                    .host_str()
                    .map(str::to_string)
                    .ok_or_else(|| ContainerError::Config {
                        reason: format!("endpoint {endpoint} has no host"),
                    })
            }
            "unix" | "npipe" => Ok(self.gateway().await),
            other => Err(ContainerError::UnsupportedEndpoint {
                scheme: other.to_string(),
            }),
        }
    }

    async fn gateway(&self) -> String {
        let handle = self.handle();
        if !self.backend.is_running_in_container() || !handle.has_been_created() {
            return LOCALHOST.to_string();
        }

        for host in GATEWAY_HOSTNAMES {
            if self.backend.host_reachable(host).await {
                return host.to_string();
            }
            tracing::trace!("Gateway candidate {} is not reachable", host);
        }

        match handle.primary_network() {
            Some(network) if !network.gateway.is_empty() => network.gateway.clone(),
            _ => LOCALHOST.to_string(),
        }
    }

    /// Run `command` inside the container.
    pub async fn exec<S: AsRef<str>>(
        &self,
        command: &[S],
        cancel: &CancellationToken,
    ) -> Result<ExecResult> {
        let id = self.id()?;
        let command: Vec<String> = command.iter().map(|s| s.as_ref().to_string()).collect();
        cancellable(cancel, self.backend.exec(&id, &command)).await
    }

    /// Write a file into the container.
    pub async fn copy_file(&self, file: &FileCopy, cancel: &CancellationToken) -> Result<()> {
        let id = self.id()?;
        cancellable(cancel, self.backend.copy_file(&id, file)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::container::ContainerBuilder;
    use crate::testing::StubBackend;

    fn container(endpoint: &str, backend: StubBackend) -> Container {
        let config = ContainerBuilder::new("alpine")
            .with_endpoint(endpoint)
            .build()
            .unwrap();
        Container::new(config, Arc::new(backend))
    }

    #[test]
    fn test_accessors_fail_before_start() {
        let container = container("unix:///var/run/docker.sock", StubBackend::new());

        assert_eq!(container.state(), ContainerState::Uncreated);
        assert!(matches!(container.id(), Err(ContainerError::NotCreated)));
        assert!(matches!(container.name(), Err(ContainerError::NotCreated)));
        assert!(matches!(
            container.ip_address(),
            Err(ContainerError::NotCreated)
        ));
        assert!(matches!(
            container.mac_address(),
            Err(ContainerError::NotCreated)
        ));
        assert!(matches!(
            container.mapped_public_port(80),
            Err(ContainerError::NotCreated)
        ));
        assert!(matches!(
            container.mapped_public_port_str("80"),
            Err(ContainerError::NotCreated)
        ));
    }

    #[tokio::test]
    async fn test_mapped_port_lookup() {
        let backend = StubBackend::new().with_port(80, 32768);
        let container = container("unix:///var/run/docker.sock", backend);
        let cancel = CancellationToken::new();
        container.start(&cancel).await.unwrap();

        assert_eq!(container.mapped_public_port(80).unwrap(), 32768);
        assert_eq!(container.mapped_public_port_str("80").unwrap(), 32768);

        let err = container.mapped_public_port(81).unwrap_err();
        assert!(matches!(err, ContainerError::PortNotMapped { ref port } if port == "81"));
        let err = container.mapped_public_port_str("http").unwrap_err();
        assert!(matches!(err, ContainerError::PortNotMapped { ref port } if port == "http"));

        container.dispose(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_identity_accessors_after_start() {
        let container = container("unix:///var/run/docker.sock", StubBackend::new());
        let cancel = CancellationToken::new();
        container.start(&cancel).await.unwrap();

        let id = container.id().unwrap();
        assert!(!id.is_empty());
        assert_eq!(container.name().unwrap(), format!("stub-{id}"));
        assert_eq!(container.ip_address().unwrap(), "172.17.0.2");
        assert_eq!(container.mac_address().unwrap(), "02:42:ac:11:00:02");
        assert_eq!(container.state(), ContainerState::Running);

        container.dispose(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_hostname_for_remote_endpoint() {
        let backend = Arc::new(StubBackend::new().in_container(true));
        let config = ContainerBuilder::new("alpine")
            .with_endpoint("tcp://203.0.113.5:2376")
            .build()
            .unwrap();
        let container = Container::new(config, backend.clone());

        assert_eq!(container.hostname().await.unwrap(), "203.0.113.5");
        assert_eq!(backend.calls().reachable, 0);
    }

    #[tokio::test]
    async fn test_hostname_for_https_endpoint() {
        let container = container("https://docker.example.com:2376", StubBackend::new());
        assert_eq!(container.hostname().await.unwrap(), "docker.example.com");
    }

    #[tokio::test]
    async fn test_hostname_for_local_socket_before_create() {
        let container = container(
            "unix:///var/run/x.sock",
            StubBackend::new().in_container(true),
        );
        assert_eq!(container.hostname().await.unwrap(), LOCALHOST);
    }

    #[tokio::test]
    async fn test_hostname_outside_container_is_localhost() {
        let container = container("npipe:////./pipe/docker_engine", StubBackend::new());
        let cancel = CancellationToken::new();
        container.start(&cancel).await.unwrap();

        assert_eq!(container.hostname().await.unwrap(), LOCALHOST);
        container.dispose(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_hostname_checks_gateways_in_order() {
        let backend = Arc::new(
            StubBackend::new()
                .in_container(true)
                .with_reachable_host("gateway.docker.internal"),
        );
        let config = ContainerBuilder::new("alpine")
            .with_endpoint("unix:///var/run/docker.sock")
            .build()
            .unwrap();
        let container = Container::new(config, backend.clone());
        let cancel = CancellationToken::new();
        container.start(&cancel).await.unwrap();

        assert_eq!(
            container.hostname().await.unwrap(),
            "gateway.docker.internal"
        );
        assert_eq!(backend.calls().reachable, 2);
        container.dispose(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_hostname_falls_back_to_network_gateway() {
        let container = container(
            "unix:///var/run/docker.sock",
            StubBackend::new().in_container(true),
        );
        let cancel = CancellationToken::new();
        container.start(&cancel).await.unwrap();

        assert_eq!(container.hostname().await.unwrap(), "172.17.0.1");
        container.dispose(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let container = container("ssh://user@docker-host", StubBackend::new());
        let err = container.hostname().await.unwrap_err();
        assert!(matches!(
            err,
            ContainerError::UnsupportedEndpoint { ref scheme } if scheme == "ssh"
        ));
    }

    #[tokio::test]
    async fn test_exec_and_copy_need_a_container() {
        let container = container("unix:///var/run/docker.sock", StubBackend::new());
        let cancel = CancellationToken::new();

        assert!(matches!(
            container.exec(&["true"], &cancel).await,
            Err(ContainerError::NotCreated)
        ));
        assert!(matches!(
            container
                .copy_file(&FileCopy::new("/tmp/a", "a"), &cancel)
                .await,
            Err(ContainerError::NotCreated)
        ));
        assert!(matches!(
            container.exit_code(&cancel).await,
            Err(ContainerError::NotCreated)
        ));
    }

    #[tokio::test]
    async fn test_exec_copy_and_exit_code_passthrough() {
        let backend = Arc::new(StubBackend::new().with_exec_result(ExecResult {
            exit_code: 0,
            stdout: "hello\n".to_string(),
            stderr: String::new(),
        }));
        let config = ContainerBuilder::new("alpine").build().unwrap();
        let container = Container::new(config, backend.clone());
        let cancel = CancellationToken::new();
        container.start(&cancel).await.unwrap();

        let result = container.exec(&["echo", "hello"], &cancel).await.unwrap();
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(
            backend.last_exec(),
            Some(vec!["echo".to_string(), "hello".to_string()])
        );

        let file = FileCopy::new("/etc/motd", "hi").with_mode(0o644);
        container.copy_file(&file, &cancel).await.unwrap();
        let id = container.id().unwrap();
        assert_eq!(backend.file(&id, "/etc/motd"), Some(b"hi".to_vec()));

        container.stop(&cancel).await.unwrap();
        assert_eq!(container.exit_code(&cancel).await.unwrap(), 0);
        container.dispose(&cancel).await.unwrap();
    }
}
