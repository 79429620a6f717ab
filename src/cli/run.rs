//! `capsule run`: start one container and hold it until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::backend::{DockerBackend, LogBuffer, TracingOutput};
use crate::config::Settings;
use crate::container::{Container, ContainerBuilder, ContainerConfig, ContainerHandle};
use crate::wait::{UntilHttpRequestIsSucceeded, UntilMessageIsLogged, UntilPortIsAvailable};

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Image to run, e.g. `redis:7`
    #[arg(long)]
    pub image: String,

    /// Container name (random if omitted)
    #[arg(long)]
    pub name: Option<String>,

    /// Private port to publish on a random host port (repeatable)
    #[arg(long, value_name = "PORT")]
    pub expose: Vec<u16>,

    /// Environment variable as KEY=VALUE (repeatable)
    #[arg(short, long, value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Wait until this private port accepts TCP connections
    #[arg(long, value_name = "PORT")]
    pub wait_port: Option<u16>,

    /// Wait until a line of output matches this regex
    #[arg(long, value_name = "REGEX")]
    pub wait_log: Option<String>,

    /// Wait until GET on PORT:PATH answers 200
    #[arg(long, value_name = "PORT:PATH")]
    pub wait_http: Option<String>,

    /// Give up waiting after this many seconds
    #[arg(long, value_name = "SECS")]
    pub wait_timeout: Option<u64>,

    /// Release the container after this many seconds instead of waiting
    /// for Ctrl-C
    #[arg(long, value_name = "SECS")]
    pub hold: Option<u64>,

    /// Print the container summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Command override, given after `--`
    #[arg(last = true)]
    pub cmd: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PortSummary {
    private: u16,
    public: u16,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    image: String,
    name: String,
    hostname: String,
    ports: Vec<PortSummary>,
    handle: ContainerHandle,
}

/// Split `8080:/health` into port and path.
fn parse_wait_http(raw: &str) -> anyhow::Result<(u16, String)> {
    let (port, path) = raw
        .split_once(':')
        .with_context(|| format!("--wait-http expects PORT:PATH, got '{raw}'"))?;
    let port = port
        .trim()
        .parse::<u16>()
        .with_context(|| format!("invalid port in --wait-http '{raw}'"))?;
    Ok((port, path.to_string()))
}

fn parse_env(raw: &str) -> anyhow::Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("--env expects KEY=VALUE, got '{raw}'"),
    }
}

fn build_config(args: &RunArgs, settings: &Settings) -> anyhow::Result<ContainerConfig> {
    let mut builder = ContainerBuilder::new(&args.image).with_settings(settings);

    if !args.cmd.is_empty() {
        builder = builder.with_command(args.cmd.iter().cloned());
    }
    if let Some(name) = &args.name {
        builder = builder.with_name(name);
    }
    for raw in &args.env {
        let (key, value) = parse_env(raw)?;
        builder = builder.with_env(key, value);
    }
    for port in &args.expose {
        builder = builder.with_exposed_port(*port);
    }

    if let Some(pattern) = &args.wait_log {
        let buffer = LogBuffer::new();
        builder = builder
            .with_wait_strategy(UntilMessageIsLogged::new(pattern, buffer.clone())?)
            .with_output(buffer);
    } else {
        builder = builder.with_output(TracingOutput::new(args.image.clone()));
    }

    if let Some(port) = args.wait_port {
        builder = builder
            .with_exposed_port(port)
            .with_wait_strategy(UntilPortIsAvailable::new(port));
    }
    if let Some(raw) = &args.wait_http {
        let (port, path) = parse_wait_http(raw)?;
        builder = builder
            .with_exposed_port(port)
            .with_wait_strategy(UntilHttpRequestIsSucceeded::new(port, path));
    }
    if let Some(secs) = args.wait_timeout {
        builder = builder.with_wait_timeout(Duration::from_secs(secs));
    }

    Ok(builder.build()?)
}

async fn summarize(container: &Container) -> anyhow::Result<RunSummary> {
    let handle = container.handle();
    let ports = handle
        .ports
        .iter()
        .filter_map(|binding| {
            binding.public_ports.first().map(|public| PortSummary {
                private: binding.private_port,
                public: *public,
            })
        })
        .collect();

    Ok(RunSummary {
        image: container.config().image.clone(),
        name: container.name()?,
        hostname: container.hostname().await?,
        ports,
        handle: ContainerHandle::clone(&handle),
    })
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("Container {} ({})", summary.name, summary.handle.id);
    println!("  Image:    {}", summary.image);
    println!("  State:    {}", summary.handle.state);
    println!("  Hostname: {}", summary.hostname);
    for port in &summary.ports {
        println!("  Port:     {} -> {}:{}", port.private, summary.hostname, port.public);
    }
    Ok(())
}

/// Run the `run` subcommand.
pub async fn run_container_command(args: RunArgs, settings: &Settings) -> anyhow::Result<()> {
    let config = build_config(&args, settings)?;
    let backend = DockerBackend::connect(&config.endpoint)
        .await
        .with_context(|| format!("failed to connect to {}", config.endpoint))?;
    let container = Container::new(config, Arc::new(backend));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, releasing container");
            interrupt.cancel();
        }
    });

    let outcome = hold(&container, &args, &cancel).await;

    // The run token may already be cancelled; teardown gets its own.
    let disposed = container.dispose(&CancellationToken::new()).await;
    outcome?;
    disposed.context("failed to release container")?;
    Ok(())
}

async fn hold(
    container: &Container,
    args: &RunArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    container
        .start(cancel)
        .await
        .with_context(|| format!("failed to start {}", args.image))?;

    print_summary(&summarize(container).await?, args.json)?;

    match args.hold {
        Some(secs) => {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => cancel.cancelled().await,
    }
    Ok(())
}
