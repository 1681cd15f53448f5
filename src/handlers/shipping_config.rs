use crate::handlers::common::{success_response, validate_input};
use crate::{
    auth::AdminUser, errors::ServiceError, services::commerce::UpdateShippingConfigRequest,
    AppState,
};
use axum::{
    extract::{Json, State},
    response::Response,
    routing::get,
    Router,
};

pub fn shipping_config_routes() -> Router<AppState> {
    Router::new().route("/", get(get_shipping_config).put(replace_shipping_config))
}

/// The active shipping fee configuration
async fn get_shipping_config(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Response, ServiceError> {
    let config = state.services.shipping_config.active().await?;
    Ok(success_response(config))
}

/// Replace the active configuration; the previous one is deactivated
async fn replace_shipping_config(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(payload): Json<UpdateShippingConfigRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let config = state.services.shipping_config.replace_active(payload).await?;
    tracing::info!(admin_id = %admin.id(), "Shipping configuration replaced");
    Ok(success_response(config))
}
