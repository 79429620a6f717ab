//! Docker implementation of [`Backend`] using bollard.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, InspectContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerInspectResponse, HostConfig};
use futures::StreamExt;
use url::Url;

use crate::backend::detect;
use crate::backend::{Backend, ExecResult, FileCopy, OutputConsumer};
use crate::container::{
    ContainerConfig, ContainerHandle, ContainerState, NetworkAttachment, PortBinding,
};
use crate::error::{ContainerError, Result};

/// Seconds the engine waits for a graceful stop before killing.
const STOP_GRACE_SECS: i64 = 10;

/// Seconds bollard waits on a single request.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Connect to the Docker daemon behind `endpoint` and verify it responds.
pub async fn connect_docker(endpoint: &Url) -> Result<Docker> {
    let docker = match endpoint.scheme() {
        #[cfg(unix)]
        "unix" => Docker::connect_with_unix(
            endpoint.path(),
            REQUEST_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )?,
        #[cfg(windows)]
        "npipe" => Docker::connect_with_named_pipe(
            endpoint.path(),
            REQUEST_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )?,
        "tcp" | "http" => Docker::connect_with_http(
            endpoint.as_str(),
            REQUEST_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )?,
        "https" => {
            return Err(ContainerError::Config {
                reason: format!("TLS endpoint {endpoint} is not supported by the Docker backend"),
            });
        }
        other => {
            return Err(ContainerError::UnsupportedEndpoint {
                scheme: other.to_string(),
            });
        }
    };

    docker.ping().await?;
    tracing::debug!("Connected to Docker at {}", endpoint);
    Ok(docker)
}

/// [`Backend`] talking to a Docker engine.
#[derive(Clone)]
pub struct DockerBackend {
    docker: Docker,
    in_container: bool,
}

impl DockerBackend {
    /// Connect to the daemon at `endpoint`.
    pub async fn connect(endpoint: &Url) -> Result<Self> {
        let docker = connect_docker(endpoint).await?;
        Ok(Self::from_client(docker))
    }

    /// Wrap an existing client.
    pub fn from_client(docker: Docker) -> Self {
        Self {
            docker,
            in_container: detect::running_in_container(),
        }
    }

    pub fn client(&self) -> &Docker {
        &self.docker
    }
}

#[async_trait]
impl Backend for DockerBackend {
    async fn create(&self, config: &ContainerConfig) -> Result<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = config
            .exposed_ports
            .iter()
            .map(|(port, protocol)| (format!("{}/{}", port, protocol), HashMap::new()))
            .collect();

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = HostConfig {
            publish_all_ports: Some(!exposed_ports.is_empty()),
            auto_remove: Some(false),
            ..Default::default()
        };

        let body = Config {
            image: Some(config.image.clone()),
            cmd: if config.command.is_empty() {
                None
            } else {
                Some(config.command.clone())
            },
            env: if env.is_empty() { None } else { Some(env) },
            labels: Some(config.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = config.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            ..Default::default()
        });

        let response = self.docker.create_container(options, body).await?;
        for warning in &response.warnings {
            tracing::warn!("Docker create warning for {}: {}", config.image, warning);
        }

        tracing::info!("Created container {} from {}", response.id, config.image);
        Ok(response.id)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerHandle> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        Ok(handle_from_inspect(info))
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        tracing::info!("Started container {}", id);
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<()> {
        let result = self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await;

        match result {
            Ok(()) => {
                tracing::info!("Stopped container {}", id);
                Ok(())
            }
            // Already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        tracing::info!("Removed container {}", id);
        Ok(())
    }

    async fn attach_output(&self, id: &str, sink: Arc<dyn OutputConsumer>) -> Result<()> {
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };

        let mut attached = self.docker.attach_container(id, Some(options)).await?;
        let id = id.to_string();

        tokio::spawn(async move {
            while let Some(chunk) = attached.output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        sink.stdout(&message)
                    }
                    Ok(LogOutput::StdErr { message }) => sink.stderr(&message),
                    Ok(LogOutput::StdIn { .. }) => {}
                    Err(e) => {
                        tracing::trace!("Output stream of {} ended: {}", id, e);
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    async fn exec(&self, id: &str, command: &[String]) -> Result<ExecResult> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(command.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut output_bytes = ExecOutput::default();

        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(chunk) = output.next().await {
                output_bytes.push(chunk?);
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let result = output_bytes.finish(inspect.exit_code.unwrap_or(-1));

        tracing::debug!(
            "Exec {:?} in {} exited with {}",
            command,
            id,
            result.exit_code
        );
        Ok(result)
    }

    async fn copy_file(&self, id: &str, file: &FileCopy) -> Result<()> {
        let archive = tar_single_file(file)?;

        self.docker
            .upload_to_container(
                id,
                Some(UploadToContainerOptions {
                    path: "/".to_string(),
                    ..Default::default()
                }),
                archive.into(),
            )
            .await?;

        tracing::debug!("Copied {} bytes to {}:{}", file.content.len(), id, file.path);
        Ok(())
    }

    async fn exit_code(&self, id: &str) -> Result<i64> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        Ok(info.state.and_then(|s| s.exit_code).unwrap_or_default())
    }

    async fn reaper_supported(&self) -> Result<bool> {
        let info = self.docker.info().await?;
        let windows = info
            .os_type
            .is_some_and(|os| os.eq_ignore_ascii_case("windows"));
        Ok(!windows)
    }

    fn is_running_in_container(&self) -> bool {
        self.in_container
    }
}

/// Raw exec output, decoded only once the stream ends.
#[derive(Default)]
struct ExecOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ExecOutput {
    fn push(&mut self, chunk: LogOutput) {
        match chunk {
            LogOutput::StdOut { message } | LogOutput::Console { message } => {
                self.stdout.extend_from_slice(&message)
            }
            LogOutput::StdErr { message } => self.stderr.extend_from_slice(&message),
            LogOutput::StdIn { .. } => {}
        }
    }

    fn finish(self, exit_code: i64) -> ExecResult {
        ExecResult {
            exit_code,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        }
    }
}

/// Build a tar archive holding `file` at its absolute path.
fn tar_single_file(file: &FileCopy) -> Result<Vec<u8>> {
    let relative = file.path.trim_start_matches('/');
    if relative.is_empty() {
        return Err(ContainerError::Config {
            reason: format!("'{}' is not a file path", file.path),
        });
    }

    let mtime = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let mut header = tar::Header::new_gnu();
    header.set_size(file.content.len() as u64);
    header.set_mode(file.mode);
    header.set_uid(file.uid);
    header.set_gid(file.gid);
    header.set_mtime(mtime);

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, relative, file.content.as_slice())?;
    Ok(builder.into_inner()?)
}

/// Map a Docker inspect response onto a handle.
fn handle_from_inspect(info: ContainerInspectResponse) -> ContainerHandle {
    let state = info
        .state
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .map(|status| {
            status
                .to_string()
                .parse()
                .unwrap_or(ContainerState::Undefined)
        })
        .unwrap_or(ContainerState::Undefined);

    let settings = info.network_settings.unwrap_or_default();

    let mut networks: Vec<NetworkAttachment> = settings
        .networks
        .unwrap_or_default()
        .into_iter()
        .map(|(network, endpoint)| NetworkAttachment {
            network,
            ip_address: endpoint.ip_address.unwrap_or_default(),
            mac_address: endpoint.mac_address.unwrap_or_default(),
            gateway: endpoint.gateway.unwrap_or_default(),
        })
        .collect();
    networks.sort_by(|a, b| a.network.cmp(&b.network));

    let mut ports: Vec<PortBinding> = settings
        .ports
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, bindings)| {
            let (private_port, protocol) = PortBinding::parse_key(&key)?;
            let public_ports = bindings
                .unwrap_or_default()
                .into_iter()
                .filter_map(|b| b.host_port.and_then(|p| p.parse().ok()))
                .collect();
            Some(PortBinding {
                private_port,
                protocol,
                public_ports,
            })
        })
        .collect();
    ports.sort_by_key(|binding| (binding.private_port, binding.protocol.to_string()));

    ContainerHandle {
        id: info.id.unwrap_or_default(),
        names: info.name.into_iter().collect(),
        state,
        networks,
        ports,
    }
}
