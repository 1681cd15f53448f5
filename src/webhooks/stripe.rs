use crate::{
    errors::ServiceError,
    services::orders::{MarkPaidOutcome, OrderService, SessionPayment},
};
use hmac::{Hmac, Mac};
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Event types that mean the checkout has been paid for.
const PAID_EVENT_TYPES: [&str; 2] = [
    "checkout.session.completed",
    "checkout.session.async_payment_succeeded",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing Stripe-Signature header")]
    MissingSignature,
    #[error("malformed signature header")]
    MalformedSignature,
    #[error("signature timestamp outside tolerance")]
    TimestampOutOfTolerance,
    #[error("signature mismatch")]
    SignatureMismatch,
}

impl From<WebhookError> for ServiceError {
    fn from(err: WebhookError) -> Self {
        ServiceError::BadRequest(format!("Invalid webhook signature: {}", err))
    }
}

/// Verifies `Stripe-Signature` headers (`t=<unix>,v1=<hex hmac>[,v1=...]`).
///
/// The signed payload is `"{t}." + raw body`, HMAC-SHA256 with the endpoint
/// secret. Any matching `v1` entry is accepted so secrets can be rolled.
#[derive(Clone)]
pub struct StripeWebhookVerifier {
    secret: String,
    tolerance: Duration,
}

impl StripeWebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    fn mac(&self, timestamp: &str, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| WebhookError::SignatureMismatch)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Header value for `payload` signed at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, WebhookError> {
        let timestamp = timestamp.to_string();
        let digest = self.mac(&timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
    }

    pub fn verify(
        &self,
        header: Option<&str>,
        payload: &[u8],
        now: i64,
    ) -> Result<(), WebhookError> {
        let header = header.ok_or(WebhookError::MissingSignature)?;

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(WebhookError::MalformedSignature)?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedSignature);
        }
        let signed_at: i64 = timestamp
            .parse()
            .map_err(|_| WebhookError::MalformedSignature)?;
        if now.abs_diff(signed_at) > self.tolerance.as_secs() {
            return Err(WebhookError::TimestampOutOfTolerance);
        }

        let mac = self.mac(timestamp, payload)?;
        let matched = signatures.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
                .unwrap_or(false)
        });

        if matched {
            Ok(())
        } else {
            Err(WebhookError::SignatureMismatch)
        }
    }
}

/// Minimal view of a Stripe event envelope.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: StripeEventData,
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeEventData {
    #[serde(default)]
    pub object: Value,
}

impl StripeEvent {
    fn order_reference(&self) -> Option<Uuid> {
        let object = &self.data.object;
        object
            .get("client_reference_id")
            .and_then(Value::as_str)
            .or_else(|| {
                object
                    .get("metadata")
                    .and_then(|m| m.get("order_id"))
                    .and_then(Value::as_str)
            })
            .and_then(|reference| Uuid::parse_str(reference).ok())
    }

    fn session_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(Value::as_str)
    }

    fn amount_total(&self) -> Option<i64> {
        self.data.object.get("amount_total").and_then(Value::as_i64)
    }

    fn is_paid(&self) -> bool {
        // Delayed payment methods complete the session before funds settle.
        match self.data.object.get("payment_status").and_then(Value::as_str) {
            Some(status) => status == "paid",
            None => self.event_type == "checkout.session.async_payment_succeeded",
        }
    }
}

/// Applies authenticated events to orders.
///
/// Processing never fails the delivery: problems are logged and the event is
/// acknowledged, since Stripe would otherwise keep retrying it.
#[derive(Clone)]
pub struct StripeWebhookProcessor {
    orders: Arc<OrderService>,
}

impl StripeWebhookProcessor {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }

    #[instrument(skip(self, payload))]
    pub async fn process(&self, payload: &[u8]) {
        counter!("storefront_webhook_events_received_total", 1);

        let event: StripeEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring malformed webhook payload: {}", e);
                return;
            }
        };

        if !PAID_EVENT_TYPES.contains(&event.event_type.as_str()) {
            info!(event_type = %event.event_type, "Ignoring unhandled webhook event");
            return;
        }

        if !event.is_paid() {
            info!(
                event_id = ?event.id,
                "Checkout completed without payment; waiting for settlement"
            );
            return;
        }

        let order_id = match event.order_reference() {
            Some(id) => id,
            None => {
                warn!(event_id = ?event.id, "Webhook event has no usable order reference");
                return;
            }
        };

        let Some(session_id) = event.session_id() else {
            warn!(%order_id, event_id = ?event.id, "Webhook event has no session id");
            return;
        };
        let payment = SessionPayment {
            session_id,
            amount_total: event.amount_total(),
        };

        match self.orders.mark_session_paid(order_id, payment).await {
            Ok(MarkPaidOutcome::Transitioned(_)) => {
                info!(%order_id, event_id = ?event.id, "Order paid via webhook");
            }
            Ok(MarkPaidOutcome::AlreadyPaid(_)) => {
                info!(%order_id, event_id = ?event.id, "Duplicate payment webhook ignored");
            }
            Ok(MarkPaidOutcome::SessionMismatch(_)) => {
                warn!(
                    %order_id,
                    event_id = ?event.id,
                    session_id,
                    "Payment for a superseded session left the order pending"
                );
            }
            Err(e) => {
                error!(%order_id, event_id = ?event.id, "Failed to apply payment webhook: {}", e);
            }
        }
    }
}
