//! Storefront API Library
//!
//! Voucher-aware cart pricing, checkout into immutable order snapshots and
//! payment reconciliation against Stripe.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod payments;
pub mod services;
pub mod webhooks;

use axum::{
    http::{HeaderName, HeaderValue},
    routing::post,
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::payments::PaymentGateway;
use crate::webhooks::StripeWebhookVerifier;

const REQUEST_ID_HEADER: &str = "x-request-id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub services: handlers::AppServices,
    /// `None` when no webhook secret is configured; webhooks are then refused
    pub webhook_verifier: Option<Arc<StripeWebhookVerifier>>,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let config = Arc::new(config);
        let webhook_verifier = config
            .stripe_webhook_secret
            .as_deref()
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
            .map(|secret| {
                Arc::new(StripeWebhookVerifier::new(
                    secret,
                    Duration::from_secs(config.payment_webhook_tolerance_secs),
                ))
            });
        let services = handlers::AppServices::new(db.clone(), config.clone(), gateway);

        Self {
            db,
            config,
            services,
            webhook_verifier,
        }
    }
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Routes served under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/cart", handlers::carts::carts_routes())
        .nest("/orders", handlers::orders::orders_routes())
        .nest(
            "/shipping-config",
            handlers::shipping_config::shipping_config_routes(),
        )
        // Signature-verified rather than user-authenticated
        .route(
            "/webhooks/stripe",
            post(handlers::payment_webhooks::stripe_webhook),
        )
}

/// Full application router with HTTP middleware applied.
pub fn build_router(state: AppState) -> Router {
    let origins = state.config.cors_origins();
    let cors = if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(
                origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<HeaderValue>>(),
            )
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .nest("/health", handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}
