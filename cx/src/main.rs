use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use clusterctx::cli::{Cli, Command};
use clusterctx::config::{ClusterSettings, RunnerRole};
use clusterctx::{Cluster, CoordError, CoordinationClient, RetryPolicy};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install tracing subscriber: {}", e))?;

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = ClusterSettings::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let settings = ClusterSettings::load(cli.config.as_ref()).context("Failed to load cluster settings")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve => {
            debug!("main: matched Serve command");
            cmd_serve(settings).await
        }
        Command::Sync => {
            debug!("main: matched Sync command");
            cmd_sync(settings).await
        }
        Command::Set { key, value } => {
            debug!(%key, "main: matched Set command");
            cmd_set(&settings, &key, value).await
        }
        Command::Get { key, attempts } => {
            debug!(%key, ?attempts, "main: matched Get command");
            cmd_get(&settings, &key, attempts).await
        }
        Command::Count { scenario } => {
            debug!(%scenario, "main: matched Count command");
            cmd_count(&settings, &scenario).await
        }
    }
}

/// Host the coordination server until interrupted
async fn cmd_serve(mut settings: ClusterSettings) -> Result<()> {
    debug!("cmd_serve: called");
    settings.runner.role = RunnerRole::Coordinator;

    let cluster = Cluster::connect(settings).await?;
    if let Some(addr) = cluster.local_addr() {
        println!("{} Coordinator listening on {}", "✓".green(), addr.to_string().cyan());
    }

    cluster.synchronize().await?;
    println!(
        "{} All {} agents joined",
        "✓".green(),
        cluster.settings().min_agents_count.to_string().yellow()
    );

    println!("Press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("cmd_serve: interrupt received, shutting down");
    cluster.shutdown().await;
    Ok(())
}

/// Join with the configured role and wait for the barrier
async fn cmd_sync(settings: ClusterSettings) -> Result<()> {
    debug!(role = %settings.runner.role, "cmd_sync: called");
    let cluster = Cluster::connect(settings).await?;

    match cluster.synchronize().await {
        Ok(()) => {
            println!("{} Cluster synchronized ({})", "✓".green(), cluster.role());
            cluster.shutdown().await;
            Ok(())
        }
        Err(CoordError::CapacityExceeded) => {
            println!("{} Cluster is already full", "✗".red());
            cluster.shutdown().await;
            Err(CoordError::CapacityExceeded.into())
        }
        Err(e) => {
            cluster.shutdown().await;
            Err(e.into())
        }
    }
}

fn client_for(settings: &ClusterSettings) -> Result<CoordinationClient> {
    let client = CoordinationClient::new(&settings.coordinator_url)?;
    Ok(client.with_known_scenarios(settings.all_scenario_names()))
}

async fn cmd_set(settings: &ClusterSettings, key: &str, value: String) -> Result<()> {
    debug!(%key, "cmd_set: called");
    let client = client_for(settings)?;
    client.set_value(key, value).await?;
    println!("{} Stored {}", "✓".green(), key.cyan());
    Ok(())
}

async fn cmd_get(settings: &ClusterSettings, key: &str, attempts: Option<u32>) -> Result<()> {
    debug!(%key, ?attempts, "cmd_get: called");
    let client = client_for(settings)?;
    let policy = match attempts {
        Some(n) => RetryPolicy::new(n, settings.retry.interval()),
        None => settings.retry.value(),
    };

    match client.get_value(key, &policy).await {
        Ok(value) => {
            println!("{}", value);
            Ok(())
        }
        Err(e @ CoordError::NotFound { .. }) => {
            println!("{} {}", "✗".red(), e);
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Scenario counts are only meaningful once the barrier was observed
async fn cmd_count(settings: &ClusterSettings, scenario: &str) -> Result<()> {
    debug!(%scenario, "cmd_count: called");
    let client = client_for(settings)?;
    client.wait_for_barrier(&settings.retry.barrier()).await?;

    let count = client.get_scenario_executor_count(scenario).await?;
    println!("{} {}", scenario.cyan(), count.to_string().yellow());
    Ok(())
}
