use super::{CheckoutSessionRequest, PaymentGateway, PaymentProviderError, ProviderSession};
use crate::config::AppConfig;
use async_trait::async_trait;
use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Stripe REST client for Checkout Sessions.
///
/// Requests are form-encoded. Transient failures (transport errors, 429 and
/// 5xx) are retried with exponential backoff; POSTs carry one idempotency key
/// across all attempts so a retry never creates a second object.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeCoupon {
    id: String,
}

impl StripeClient {
    pub fn new(
        secret_key: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, PaymentProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentProviderError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            max_retries,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        })
    }

    /// Builds a client when a secret key is configured.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, PaymentProviderError> {
        match config.stripe_secret_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Self::new(
                key,
                config.stripe_api_base.clone(),
                config.payment_request_timeout(),
                config.payment_max_retries,
            )
            .map(Some),
            _ => Ok(None),
        }
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        form: Option<&[(String, String)]>,
    ) -> Result<T, PaymentProviderError> {
        let url = format!("{}{}", self.api_base, path);
        let idempotency_key = Uuid::new_v4().to_string();
        let mut attempt: u32 = 0;

        loop {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.secret_key);
            if let Some(form) = form {
                request = request
                    .header("Idempotency-Key", &idempotency_key)
                    .form(form);
            }

            let result = match request.send().await {
                Ok(response) => Self::decode(response).await,
                Err(e) => Err(PaymentProviderError::Transport(e.to_string())),
            };

            match result {
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.retry_base_delay * 2_u32.pow(attempt - 1);
                    warn!(
                        "Stripe request {} {} failed: {} (retry {}/{} in {:?})",
                        method, path, err, attempt, self.max_retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    error!("Stripe request {} {} failed: {}", method, path, err);
                    return Err(err);
                }
                Ok(value) => return Ok(value),
            }
        }
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PaymentProviderError> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| PaymentProviderError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<StripeErrorEnvelope>(&body)
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(PaymentProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_slice(&body).map_err(|e| PaymentProviderError::InvalidResponse(e.to_string()))
    }

    /// One-off fixed-amount coupon carrying the order discount.
    async fn create_coupon(
        &self,
        amount_off: i64,
        currency: &str,
    ) -> Result<String, PaymentProviderError> {
        let form = vec![
            ("amount_off".to_string(), amount_off.to_string()),
            ("currency".to_string(), currency.to_lowercase()),
            ("duration".to_string(), "once".to_string()),
        ];
        let coupon: StripeCoupon = self
            .send(Method::POST, "/v1/coupons", Some(&form))
            .await?;
        Ok(coupon.id)
    }

    /// Best-effort removal of a coupon whose session was never created.
    async fn discard_coupon(&self, coupon_id: &str) {
        let path = format!("/v1/coupons/{}", coupon_id);
        match self
            .send::<serde_json::Value>(Method::DELETE, &path, None)
            .await
        {
            Ok(_) => info!(coupon_id, "Discarded unused Stripe coupon"),
            Err(e) => warn!(coupon_id, "Failed to discard unused Stripe coupon: {}", e),
        }
    }
}

/// Form fields for `POST /v1/checkout/sessions`.
pub(crate) fn session_form(
    request: &CheckoutSessionRequest,
    coupon_id: Option<&str>,
) -> Vec<(String, String)> {
    let order_id = request.order_id.to_string();
    let currency = request.currency.to_lowercase();
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("client_reference_id".to_string(), order_id.clone()),
        ("metadata[order_id]".to_string(), order_id),
    ];

    for (i, item) in request.line_items.iter().enumerate() {
        form.push((
            format!("line_items[{}][price_data][currency]", i),
            currency.clone(),
        ));
        form.push((
            format!("line_items[{}][price_data][product_data][name]", i),
            item.name.clone(),
        ));
        form.push((
            format!("line_items[{}][price_data][unit_amount]", i),
            item.unit_amount.to_string(),
        ));
        form.push((format!("line_items[{}][quantity]", i), item.quantity.to_string()));
    }

    if let Some(coupon_id) = coupon_id {
        form.push(("discounts[0][coupon]".to_string(), coupon_id.to_string()));
    }

    form
}

#[async_trait]
impl PaymentGateway for StripeClient {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<ProviderSession, PaymentProviderError> {
        // The coupon can never exceed what is being charged.
        let amount_off = request.discount_amount.min(request.gross_amount());
        let coupon_id = if amount_off > 0 {
            Some(self.create_coupon(amount_off, &request.currency).await?)
        } else {
            None
        };

        let form = session_form(request, coupon_id.as_deref());
        let session: ProviderSession = match self
            .send(Method::POST, "/v1/checkout/sessions", Some(&form))
            .await
        {
            Ok(session) => session,
            Err(e) => {
                if let Some(coupon_id) = coupon_id.as_deref() {
                    self.discard_coupon(coupon_id).await;
                }
                return Err(e);
            }
        };

        info!(session_id = %session.id, "Stripe checkout session created");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<ProviderSession, PaymentProviderError> {
        self.send(
            Method::GET,
            &format!("/v1/checkout/sessions/{}", session_id),
            None,
        )
        .await
    }
}
