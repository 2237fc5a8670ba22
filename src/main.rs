mod activity;
mod audit;
mod config;
mod error;
mod registry;
mod routes;
mod server;
mod state;

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use activity::{ActivityLevel, ActivitySource};
use audit::db::AuditDb;
use config::{AuditConfig, CliArgs};
use registry::Registry;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "readiness_audit=info,tower_http=info".into()),
        )
        .init();

    let args = CliArgs::parse();
    info!("Starting readiness-audit v{}", env!("CARGO_PKG_VERSION"));

    let config = AuditConfig::from_args(args)?;
    info!("Platform base URL: {}", config.base_url);
    info!("Data dir: {:?}", config.data_dir);
    info!(
        "Probes: max {} concurrent, {}s timeout, unreachable={:?}",
        config.max_concurrent_probes,
        config.probe_timeout.as_secs(),
        config.unreachable
    );

    let registry = match &config.registry_file {
        Some(path) => {
            let registry = Registry::load(path)?;
            info!(
                "Loaded registry {:?}: {} pages, {} APIs",
                path,
                registry.pages.len(),
                registry.apis.len()
            );
            registry
        }
        None => Registry::builtin(),
    };
    if registry.is_empty() {
        error!("Registry is empty; nothing to audit");
    }

    let store = Arc::new(AuditDb::new(&config.data_dir)?);
    info!("Audit database: {:?}", store.path());

    let port = config.port;
    let audit_once = config.audit_once;
    let state = Arc::new(AppState::new(config, registry, store)?);

    if audit_once {
        return audit_once_and_print(&state).await;
    }

    state
        .activity
        .emit(
            ActivitySource::Api,
            ActivityLevel::Info,
            None,
            format!("Audit service starting on port {}", port),
        )
        .await;

    let router = server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Audit service listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    info!("Audit service shutting down");
    Ok(())
}

/// Run one full audit and print its report as JSON on stdout.
async fn audit_once_and_print(state: &AppState) -> anyhow::Result<()> {
    let run = state.engine.start_full_audit("cli", None).await?;
    let report = state.engine.generate_report(&run.id)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    ctrl_c.await;
    info!("Received shutdown signal");
    if state.coordinator.stop().await {
        info!("Stopping active audit run");
    }
    state
        .activity
        .emit(
            ActivitySource::Api,
            ActivityLevel::Info,
            None,
            "Shutdown signal received",
        )
        .await;
}
