//! Rootcause Probe - Provider and Incident Memory Diagnostics
//!
//! Loads the configuration, selects the incident backend the same way an
//! analysis run would, then reports which providers are reachable and how
//! they have been doing.
//!
//! # Usage
//!
//! ```bash
//! # Report backend and provider status
//! rootcause-probe
//!
//! # Alternate config file
//! rootcause-probe --config ./rootcause.toml
//!
//! # Send a test prompt through the router
//! rootcause-probe --prompt "Reply with the word ready"
//!
//! # Ask for JSON and print the parsed value
//! rootcause-probe --prompt 'Return {"ok": true}' --json
//!
//! # Verbose logging
//! RUST_LOG=debug rootcause-probe
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use rootcause_core::config::{default_config_path, load_config_from_path};
use rootcause_core::{IncidentMemory, LlmRouter};

/// Rootcause Probe - check provider routing and incident memory
#[derive(Parser, Debug)]
#[command(name = "rootcause-probe")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "ROOTCAUSE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Prompt to send through the router
    #[arg(short = 'p', long, value_name = "TEXT")]
    prompt: Option<String>,

    /// Parse the response as JSON (with one correction re-prompt)
    #[arg(long, requires = "prompt")]
    json: bool,

    /// Per-call timeout override in seconds
    #[arg(short = 't', long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "ROOTCAUSE_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

/// Initialize logging; `RUST_LOG` wins over `--log-level`
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "rootcause_probe={level},rootcause_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config_path = args.config.clone().or_else(default_config_path);
    let config = load_config_from_path(config_path).context("Failed to load configuration")?;
    info!(source = %config.source(), "Configuration loaded");

    // Backend selection
    let memory = IncidentMemory::bootstrap(&config.memory).await;
    println!("incident store: {}", memory.kind());
    if let Some(reason) = memory.degraded() {
        println!("  degraded: {reason}");
        println!("  data dir: {}", config.memory.data_dir.display());
    }
    println!(
        "  retention: {} days, health window: {}s",
        config.memory.retention_days(),
        memory.health().window().as_secs()
    );

    // Providers
    let router = LlmRouter::from_config(&config.routing, memory.health())
        .context("Failed to build provider router")?;
    let available = router.available_providers().await;

    println!("providers (priority order):");
    for health in router.provider_health().await {
        let status = if available.contains(&health.name) {
            "available"
        } else {
            "unavailable"
        };
        println!(
            "  {:<12} {:<12} ok={} failed={} avg={:.0}ms",
            health.name,
            status,
            health.success_count,
            health.failure_count,
            health.avg_latency_ms
        );
    }

    let Some(prompt) = args.prompt else {
        return Ok(());
    };
    if available.is_empty() {
        warn!("No provider is available, the prompt will fail");
    }

    if args.json {
        let value = router.call_json(&prompt).await?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let timeout = args.timeout.map(Duration::from_secs);
        let text = router.call(&prompt, timeout).await?;
        println!("{text}");
    }
    if let Some(provider) = router.sticky() {
        println!("answered by: {provider}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_json_requires_prompt() {
        assert!(Args::try_parse_from(["rootcause-probe", "--json"]).is_err());
        let args =
            Args::try_parse_from(["rootcause-probe", "--prompt", "hi", "--json", "-t", "5"]).unwrap();
        assert!(args.json);
        assert_eq!(args.timeout, Some(5));
    }
}
