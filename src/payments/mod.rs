//! Outbound payment-provider integration.
//!
//! The checkout core talks to the provider only through [`PaymentGateway`],
//! so tests can substitute an in-memory implementation.

pub mod stripe;

pub use stripe::StripeClient;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PaymentProviderError {
    #[error("payment provider is not configured")]
    NotConfigured,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

impl PaymentProviderError {
    /// Worth retrying: network failures, rate limiting and provider 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::NotConfigured | Self::InvalidResponse(_) | Self::InvalidAmount(_) => false,
        }
    }
}

/// One provider line item, amounts in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLineItem {
    pub name: String,
    pub unit_amount: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    /// Sent as the client reference so confirmations can find the order.
    pub order_id: Uuid,
    pub currency: String,
    pub line_items: Vec<SessionLineItem>,
    /// Order-level discount in minor units, applied as a one-off coupon.
    pub discount_amount: i64,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutSessionRequest {
    pub fn gross_amount(&self) -> i64 {
        self.line_items
            .iter()
            .map(|item| item.unit_amount * item.quantity)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub id: String,
    pub url: Option<String>,
    pub payment_status: String,
    pub client_reference_id: Option<String>,
    /// Amount charged in minor units, after discounts
    #[serde(default)]
    pub amount_total: Option<i64>,
}

impl ProviderSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<ProviderSession, PaymentProviderError>;

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<ProviderSession, PaymentProviderError>;
}

/// Gateway used when no provider credentials are configured.
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn create_checkout_session(
        &self,
        _request: &CheckoutSessionRequest,
    ) -> Result<ProviderSession, PaymentProviderError> {
        Err(PaymentProviderError::NotConfigured)
    }

    async fn retrieve_checkout_session(
        &self,
        _session_id: &str,
    ) -> Result<ProviderSession, PaymentProviderError> {
        Err(PaymentProviderError::NotConfigured)
    }
}

/// Converts a decimal amount to minor units (cents), half away from zero.
pub fn to_minor_units(amount: Decimal) -> Result<i64, PaymentProviderError> {
    use rust_decimal::prelude::ToPrimitive;

    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| PaymentProviderError::InvalidAmount(format!("{} is out of range", amount)))
}
