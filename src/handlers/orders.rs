use crate::handlers::common::{created_response, success_response, validate_input};
use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    services::commerce::CreateOrderRequest,
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    response::Response,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/retry-payment", post(retry_payment))
        .route("/verify-payment/:session_id", get(verify_payment))
}

/// Check out the caller's cart.
///
/// Returns 201 for a new order and 200 when the pending order was reused.
async fn create_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<Response, ServiceError> {
    // A bodiless POST checks out with defaults.
    let request = match payload {
        Ok(Json(body)) => body,
        Err(JsonRejection::MissingJsonContentType(_)) => CreateOrderRequest::default(),
        Err(rejection) => return Err(ServiceError::BadRequest(rejection.body_text())),
    };
    validate_input(&request)?;

    let result = state
        .services
        .checkout
        .create_order_from_cart(user.id(), request)
        .await?;

    if result.reused {
        Ok(success_response(result))
    } else {
        Ok(created_response(result))
    }
}

async fn list_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Response, ServiceError> {
    let orders = state.services.orders.list_orders_for_user(user.id()).await?;
    Ok(success_response(orders))
}

async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .orders
        .get_order_for_user(id, user.id())
        .await?;
    Ok(success_response(order))
}

/// Open a new payment session for a pending order
async fn retry_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let session = state
        .services
        .checkout
        .retry_payment_for_order(id, user.id())
        .await?;
    Ok(success_response(session))
}

/// Confirm a completed provider session after the customer is redirected back
async fn verify_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<String>,
) -> Result<Response, ServiceError> {
    let verification = state
        .services
        .checkout
        .verify_payment_status(&session_id, user.id())
        .await?;
    Ok(success_response(verification))
}
