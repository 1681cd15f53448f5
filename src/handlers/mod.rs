pub mod carts;
pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod shipping_config;

use crate::{
    config::AppConfig,
    payments::PaymentGateway,
    services::{
        commerce::{CartService, CheckoutService, PricingService, ShippingConfigService},
        orders::OrderService,
    },
    webhooks::StripeWebhookProcessor,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub pricing: Arc<PricingService>,
    pub shipping_config: Arc<ShippingConfigService>,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub webhooks: Arc<StripeWebhookProcessor>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let orders = Arc::new(OrderService::new(db.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            orders.clone(),
            gateway,
            config,
        ));

        Self {
            cart: Arc::new(CartService::new(db.clone())),
            pricing: Arc::new(PricingService::new(db.clone())),
            shipping_config: Arc::new(ShippingConfigService::new(db)),
            webhooks: Arc::new(StripeWebhookProcessor::new(orders.clone())),
            orders,
            checkout,
        }
    }
}
