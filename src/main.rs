use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use storefront_api as api;
use storefront_api::payments::{DisabledGateway, PaymentGateway, StripeClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    // Payment provider; checkout still works for non-provider payment methods without it
    let gateway: Arc<dyn PaymentGateway> = match StripeClient::from_config(&cfg)? {
        Some(client) => {
            info!("Stripe payments enabled ({})", cfg.stripe_api_base);
            Arc::new(client)
        }
        None => {
            warn!("APP__STRIPE_SECRET_KEY not set; Stripe checkout is disabled");
            Arc::new(DisabledGateway)
        }
    };
    if cfg.stripe_webhook_secret.is_none() {
        warn!("APP__STRIPE_WEBHOOK_SECRET not set; Stripe webhooks will be rejected");
    }

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid listen address")?;

    let app_state = api::AppState::new(db, cfg, gateway);
    let app = api::build_router(app_state);

    // Bind and serve
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("storefront-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
