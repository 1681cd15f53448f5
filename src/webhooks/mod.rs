/// Inbound payment-provider webhooks
pub mod stripe;

pub use stripe::{StripeEvent, StripeWebhookProcessor, StripeWebhookVerifier, WebhookError};
