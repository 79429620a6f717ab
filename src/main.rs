//! capsule - Main entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use capsule::cli::{Cli, Command, run_container_command};
use capsule::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before resolving settings
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("capsule=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::resolve()?;
    tracing::debug!("Resolved settings: {:?}", settings);

    match cli.command {
        Command::Run(args) => run_container_command(args, &settings).await,
        Command::Settings { json } => {
            print_settings(&settings, json)?;
            Ok(())
        }
    }
}

fn print_settings(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let wait_timeout = settings
        .wait_timeout
        .map(|d| format!("{}s", d.as_secs()))
        .unwrap_or_else(|| "none".to_string());

    if json {
        let value = serde_json::json!({
            "endpoint": settings.endpoint.as_str(),
            "session_id": settings.session_id,
            "reaper_enabled": settings.reaper_enabled,
            "poll_interval_ms": settings.poll_interval.as_millis() as u64,
            "wait_timeout_secs": settings.wait_timeout.map(|d| d.as_secs()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("  endpoint        {}", settings.endpoint);
    println!("  session_id      {}", settings.session_id);
    println!("  reaper_enabled  {}", settings.reaper_enabled);
    println!("  poll_interval   {:?}", settings.poll_interval);
    println!("  wait_timeout    {}", wait_timeout);
    Ok(())
}
