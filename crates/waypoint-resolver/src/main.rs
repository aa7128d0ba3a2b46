//! Waypoint binary.
//!
//! Resolves registry-backed services from the command line, once or
//! continuously.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use waypoint_resolver::{EndpointSet, PollEvent, ResolverFactory, WaypointConfig};

#[derive(Parser)]
#[command(name = "waypoint")]
#[command(about = "Resolve registry-backed services to data-plane endpoints")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./waypoint.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a target once and print its endpoints
    Resolve {
        /// Target such as consul://orders
        target: String,

        /// Port the channel would use when none is resolved
        #[arg(long, default_value_t = 0)]
        default_port: u16,

        /// Print the endpoint set as JSON
        #[arg(long)]
        json: bool,
    },

    /// Keep a target resolved and log every change until interrupted
    Watch {
        /// Target such as consul://orders
        target: String,

        /// Port the channel would use when none is resolved
        #[arg(long, default_value_t = 0)]
        default_port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("waypoint=info".parse()?)
                .add_directive("waypoint_resolver=info".parse()?)
                .add_directive("waypoint_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    info!(
        scheme = %config.resolver.scheme,
        registry = %config.registry.consul.address,
        poll_interval_ms = u64::try_from(config.resolver.poll_interval.as_millis()).unwrap_or(u64::MAX),
        "Configuration loaded"
    );

    let registry = config.registry.connect()?;
    let factory = ResolverFactory::new(registry, config.resolver)?;

    match cli.command {
        Commands::Resolve {
            target,
            default_port,
            json,
        } => resolve(&factory, &target, default_port, json).await,
        Commands::Watch {
            target,
            default_port,
        } => watch(&factory, &target, default_port).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<WaypointConfig, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return Ok(WaypointConfig::load_from(path)?);
    }

    match WaypointConfig::load() {
        Ok(config) => Ok(config),
        Err(e) => {
            info!(error = %e, "Failed to load waypoint.toml, using default configuration");
            Ok(WaypointConfig::default())
        }
    }
}

async fn resolve(
    factory: &ResolverFactory,
    target: &str,
    default_port: u16,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = factory.create(target, default_port).await?;
    let endpoints = resolver
        .last_published()
        .map(|snapshot| snapshot.endpoints().clone())
        .unwrap_or_default();
    resolver.stop().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&endpoints)?);
    } else {
        for endpoint in &endpoints {
            println!("{endpoint}");
        }
    }
    Ok(())
}

async fn watch(
    factory: &ResolverFactory,
    target: &str,
    default_port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = factory
        .create_with_listener(target, default_port, |endpoints: &EndpointSet| {
            info!(endpoints = endpoints.len(), set = %endpoints, "Endpoints published");
        })
        .await?;

    let mut events = resolver.events();
    let report_failures = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PollEvent::Failed { error_type, message }) => {
                    warn!(error_type, error = %message, "Registry poll failed");
                }
                Ok(PollEvent::Stopped) | Err(RecvError::Closed) => break,
                Ok(PollEvent::Published { .. } | PollEvent::Unchanged { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Poll event reporter lagged");
                }
            }
        }
    });

    shutdown_signal().await;
    info!("Shutdown signal received, stopping resolver");

    resolver.stop().await;
    if let Err(e) = report_failures.await {
        error!(error = %e, "Event reporter ended abnormally");
    }

    info!("Waypoint shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C");
        }
        () = terminate => {
            info!("Received SIGTERM");
        }
    }
}
