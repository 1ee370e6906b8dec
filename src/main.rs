use std::{net::SocketAddr, sync::Arc};

use http::HeaderValue;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use layaway_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db_pool = api::db::establish_connection(&cfg.database_url).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    let (event_sender, event_rx) = api::events::channel(1024);
    tokio::spawn(api::events::process_events(event_rx));

    let tax: Arc<dyn api::tax::SalesTaxCalculator> =
        Arc::new(api::tax::StateRateTaxCalculator);
    let gateway: Arc<dyn api::gateway::PaymentGateway> =
        Arc::new(api::gateway::SandboxGateway);

    let plans = Arc::new(api::services::PlanService::new(
        db.clone(),
        tax,
        event_sender.clone(),
        cfg.layaway.clone(),
    ));
    let ledger = Arc::new(api::services::LedgerService::new(
        db.clone(),
        event_sender,
        cfg.layaway.clone(),
    ));

    if cfg.autopay_enabled {
        info!(
            poll_interval_secs = cfg.layaway.autopay_poll_interval_secs,
            batch_size = cfg.layaway.autopay_batch_size,
            "autopay worker enabled"
        );
        let _worker =
            api::workers::autopay::spawn(ledger.clone(), gateway.clone(), cfg.layaway.clone());
    } else {
        info!("autopay worker disabled; due payments require manual charges");
    }

    // Explicit origins when configured, permissive otherwise (dev default)
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = match configured_origins {
        Some(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };

    let state = api::AppState {
        db,
        config: cfg.clone(),
        plans,
        ledger,
        gateway,
    };

    let app = api::app_router(state).layer(cors_layer);

    let addr = SocketAddr::new(cfg.host.parse()?, cfg.port);
    info!("layaway-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
