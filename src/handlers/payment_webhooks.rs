use crate::{errors::ServiceError, webhooks::stripe::SIGNATURE_HEADER, AppState};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use metrics::counter;
use serde_json::json;
use tracing::{error, warn};

// POST /api/v1/webhooks/stripe
//
// The raw body is verified before parsing. Once authenticated the event is
// always acknowledged with 200, whatever processing does with it.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let verifier = match state.webhook_verifier.as_ref() {
        Some(verifier) => verifier,
        None => {
            error!("Stripe webhook received but no webhook secret is configured");
            counter!("storefront_webhook_events_rejected_total", 1);
            return Err(ServiceError::BadRequest(
                "Webhook endpoint is not configured".to_string(),
            ));
        }
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if let Err(e) = verifier.verify(signature, &body, chrono::Utc::now().timestamp()) {
        warn!("Stripe webhook signature verification failed: {}", e);
        counter!("storefront_webhook_events_rejected_total", 1);
        return Err(e.into());
    }

    state.services.webhooks.process(&body).await;

    Ok((StatusCode::OK, Json(json!({ "status": "success" }))))
}
