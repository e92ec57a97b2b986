mod cli;

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::{Cli, Commands};
use fleetpulse_core::{Config, DomainError, FleetError, PresenceBackend};
use fleetpulse_gateway::{generate_token, hash_token, GatewayServer, MethodHandlers, TokenAuth};
use fleetpulse_notify::{ConnectionRegistry, NotificationDispatcher};
use fleetpulse_presence::{
    MemoryPresenceStore, PresenceReconciler, PresenceStore, PresenceTracker, RedisPresenceStore,
};
use fleetpulse_storage::{SqliteStore, StorageError};

/// How often the in-process presence map drops expired entries
const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), FleetError> {
    let cli = Cli::parse();

    // Initialize tracing
    let dev = matches!(cli.command, Some(Commands::Serve { dev: true, .. }));
    let default_filter = if dev { "fleetpulse=debug,info" } else { "fleetpulse=info,warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    // Handle ConfigSample immediately without loading config
    if let Some(Commands::ConfigSample { output }) = &cli.command {
        let sample_config = Config::sample();
        let path = output
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("./fleetpulse.sample.yaml"));
        sample_config.save(&path)?;
        println!("✅ Sample config written: {:?}", path);
        return Ok(());
    }

    let config = load_config(&cli.config_path)?;

    match cli.command {
        Some(Commands::Serve { host, port, dev }) => {
            handle_serve(&config, host, port, dev).await?;
        }
        Some(Commands::IssueToken { user_id }) => {
            handle_issue_token(&config, &user_id).await?;
        }
        Some(Commands::RevokeTokens { user_id }) => {
            let store = open_store(&config)?;
            let removed = store.revoke_tokens(&user_id).await.map_err(storage_err)?;
            println!("Revoked {} token(s) for {}", removed, user_id);
        }
        Some(Commands::Reconcile) => {
            handle_reconcile(&config).await?;
        }
        Some(Commands::ConfigSample { .. }) => {
            // Already handled
        }
        None => {
            handle_serve(&config, None, None, false).await?;
        }
    }

    Ok(())
}

/// An explicit path must exist; otherwise missing config means defaults
fn load_config(path: &Option<String>) -> Result<Config, FleetError> {
    match Config::load(path) {
        Err(FleetError::Domain(DomainError::ConfigNotFound { .. })) if path.is_none() => {
            tracing::warn!("No config file found; using built-in defaults");
            Ok(Config::default())
        }
        other => other,
    }
}

fn storage_err(err: StorageError) -> FleetError {
    FleetError::database(err.to_string())
}

fn open_store(config: &Config) -> Result<Arc<SqliteStore>, FleetError> {
    let store = SqliteStore::from_config(&config.storage).map_err(storage_err)?;
    info!("Durable store at {}", config.storage.db_path.display());
    Ok(Arc::new(store))
}

async fn build_presence_store(config: &Config) -> Result<Arc<dyn PresenceStore>, FleetError> {
    match config.presence.backend {
        PresenceBackend::Memory => {
            let store = MemoryPresenceStore::new();
            let sweeper = store.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(MEMORY_SWEEP_INTERVAL);
                loop {
                    ticker.tick().await;
                    let purged = sweeper.purge_expired().await;
                    if purged > 0 {
                        tracing::debug!("Purged {} expired presence entries", purged);
                    }
                }
            });
            Ok(Arc::new(store))
        }
        PresenceBackend::Redis => {
            let store = RedisPresenceStore::connect(&config.presence.redis_url)
                .await
                .map_err(|e| FleetError::cache(e.to_string()))?;
            info!("Presence cache at {}", config.presence.redis_url);
            Ok(Arc::new(store))
        }
    }
}

async fn handle_serve(
    config: &Config,
    host: Option<String>,
    port: Option<u16>,
    dev: bool,
) -> Result<(), FleetError> {
    let mut gateway_config = config.gateway.clone();
    if let Some(host) = host {
        gateway_config.host = host;
    }
    if let Some(port) = port {
        gateway_config.port = port;
    }

    let store = open_store(config)?;

    let auth = Arc::new(TokenAuth::new());
    let tokens = store.list_tokens().await.map_err(storage_err)?;
    for token in &tokens {
        auth.register_hashed(token.token_hash.clone(), &token.user_id, token.created_at)
            .await;
    }
    if tokens.is_empty() {
        tracing::warn!("No API tokens registered. Run `fleetpulse issue-token <user_id>` first.");
    }

    let tracker = Arc::new(PresenceTracker::from_config(
        build_presence_store(config).await?,
        &config.presence,
    ));
    let reconciler = Arc::new(PresenceReconciler::new(
        tracker.clone(),
        store.clone(),
        Duration::from_secs(config.reconciler.interval_secs),
    ));
    if config.reconciler.enabled {
        reconciler.start().await;
    } else {
        info!("Presence reconciler disabled");
    }

    let dispatcher = Arc::new(NotificationDispatcher::new(
        store.clone(),
        ConnectionRegistry::new(),
    ));
    let handlers = Arc::new(MethodHandlers::new(
        store,
        tracker,
        reconciler.clone(),
        dispatcher,
        config.notifications.clone(),
    ));

    println!("FleetPulse gateway starting...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Address:    {}", gateway_config.bind_addr());
    println!("  Presence:   {:?} (ttl {}s)", config.presence.backend, config.presence.ttl_secs);
    println!(
        "  Reconciler: {}",
        if config.reconciler.enabled {
            format!("every {}s", config.reconciler.interval_secs)
        } else {
            "off".to_string()
        }
    );
    println!("  Tokens:     {}", auth.token_count().await);
    println!("  Mode:       {}", if dev { "development" } else { "production" });
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let addr = gateway_config.bind_addr();
    let server = GatewayServer::new(gateway_config, handlers, auth);
    let result = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await;

    reconciler.stop().await;
    result.map_err(|e| FleetError::network(addr, e.to_string()))
}

async fn handle_issue_token(config: &Config, user_id: &str) -> Result<(), FleetError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(FleetError::invalid_input("user_id", "cannot be empty"));
    }

    let store = open_store(config)?;
    let token = generate_token();
    store
        .save_token(&hash_token(&token), user_id)
        .await
        .map_err(storage_err)?;

    println!("Token for {} (shown once, store it now):", user_id);
    println!("{}", token);
    Ok(())
}

/// One reconciliation pass against the shared cache
async fn handle_reconcile(config: &Config) -> Result<(), FleetError> {
    if config.presence.backend == PresenceBackend::Memory {
        return Err(FleetError::invalid_input(
            "presence.backend",
            "a one-off pass needs the shared redis cache; the memory cache lives inside `serve`",
        ));
    }

    let store = open_store(config)?;
    let tracker = Arc::new(PresenceTracker::from_config(
        build_presence_store(config).await?,
        &config.presence,
    ));
    let reconciler = PresenceReconciler::new(
        tracker,
        store,
        Duration::from_secs(config.reconciler.interval_secs),
    );

    let report = reconciler.run_once().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
