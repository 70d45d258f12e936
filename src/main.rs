use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use routekeeper::{
    balancer::BalancerRegistry,
    config::{spawn_config_watcher, GatewayConfig},
    mapping::MappingRuleBase,
    metrics,
    registry::{LocalRegistry, RegistryTreeWatcher},
    rules::DeclarativeRuleBase,
    Dispatcher,
};

#[derive(Parser, Debug)]
#[command(name = "routekeeper")]
#[command(about = "Registry-driven routing core for self-updating HTTP gateways")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,

    /// Resolve these request paths against the loaded routes and exit
    #[arg(long, value_name = "PATH")]
    resolve: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(args.json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.json).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Loading configuration from {:?}", args.config);

    let config = GatewayConfig::load(&args.config)?;

    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    metrics::describe_metrics();

    let balancers = Arc::new(BalancerRegistry::new());
    let mapping = Arc::new(
        MappingRuleBase::from_config(&config.mapping, balancers)
            .context("Failed to build mapping rules")?,
    );

    let registry = Arc::new(LocalRegistry::new());
    for (path, data) in config.registry.seed_nodes() {
        registry
            .put(&path, data)
            .with_context(|| format!("Failed to seed registry node {}", path))?;
    }

    let dispatcher = Dispatcher::new(Arc::clone(&mapping), Arc::new(DeclarativeRuleBase::new()));
    let table = Arc::downgrade(&mapping);
    dispatcher.on_routes_changed(Arc::new(move || {
        if let Some(table) = table.upgrade() {
            debug!("Routes changed, {} mapping(s) active", table.len());
        }
    }));

    let watcher = RegistryTreeWatcher::new(registry, Arc::clone(&mapping), &config.registry.path);
    watcher.init()?;
    watcher.sync().await?;
    info!(
        "Loaded {} route(s) from {} using template '{}'",
        mapping.len(),
        watcher.path(),
        mapping.uri_template()
    );

    if !args.resolve.is_empty() {
        for path in &args.resolve {
            match dispatcher.resolve_route(path) {
                Ok(route) => println!("{} -> {}", path, route.destination_url),
                Err(e) => println!("{} -> {}", path, e),
            }
        }
        watcher.destroy().await;
        return Ok(());
    }

    let (mut config_rx, _config_handle) = spawn_config_watcher(args.config.clone());
    let mut applied = config;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            update = config_rx.recv() => match update {
                Ok(new_config) => {
                    let _ = apply_config(&mapping, &applied, &new_config);
                    applied = new_config;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Missed {} config update(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    error!("Config watcher stopped");
                    break;
                }
            },
        }
    }

    watcher.destroy().await;
    Ok(())
}

/// Apply the parts of a reloaded config that can change at runtime.
/// `previous` is the last revision seen, so restart-only settings are
/// reported once per edit rather than on every reload. Returns whether
/// such a setting changed.
fn apply_config(mapping: &MappingRuleBase, previous: &GatewayConfig, new_config: &GatewayConfig) -> bool {
    let template = &new_config.mapping.uri_template;
    if *template != mapping.uri_template().pattern() {
        if let Err(e) = mapping.set_uri_template(template) {
            warn!("Keeping current URI template: {}", e);
        }
    }

    let restart_required = new_config.needs_restart(previous);
    if restart_required {
        warn!("Registry and balancer settings only take effect after a restart");
    }
    restart_required
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reloads_compare_against_last_revision() {
        let startup = GatewayConfig::default();
        let mapping =
            MappingRuleBase::from_config(&startup.mapping, Arc::new(BalancerRegistry::new())).unwrap();

        let mut edited = startup.clone();
        edited.mapping.load_balancer = "sticky".to_string();
        edited.mapping.uri_template = "/v2/{servicePath}".to_string();

        assert!(apply_config(&mapping, &startup, &edited));
        assert_eq!(mapping.uri_template().pattern(), "/v2/{servicePath}");

        // saving the same file again is not a new restart-only change
        assert!(!apply_config(&mapping, &edited, &edited.clone()));
    }
}
