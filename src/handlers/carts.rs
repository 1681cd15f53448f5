use crate::handlers::common::{
    created_response, no_content_response, success_response, validate_input,
};
use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    services::commerce::{AddToCartRequest, UpdateCartItemRequest},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::Response,
    routing::{get, post, put},
    Router,
};
use uuid::Uuid;

/// Creates the router for the caller's cart
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_to_cart))
        .route("/items/:item_id", put(update_cart_item).delete(remove_cart_item))
        .route("/clear", post(clear_cart))
        .route("/totals", get(get_cart_totals))
}

/// Get the caller's cart with lines
async fn get_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Response, ServiceError> {
    let cart = state.services.cart.get_cart(user.id()).await?;
    Ok(success_response(cart))
}

/// Add a product to the cart, incrementing an existing line
async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<AddToCartRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let cart = state.services.cart.add_item(user.id(), payload).await?;
    Ok(created_response(cart))
}

/// Set a line's quantity; zero or less removes the line
async fn update_cart_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateCartItemRequest>,
) -> Result<Response, ServiceError> {
    match state
        .services
        .cart
        .update_item_quantity(user.id(), item_id, payload.quantity)
        .await?
    {
        Some(item) => Ok(success_response(item)),
        None => Ok(no_content_response()),
    }
}

async fn remove_cart_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.cart.remove_item(user.id(), item_id).await?;
    Ok(no_content_response())
}

async fn clear_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Response, ServiceError> {
    let removed = state.services.cart.clear_cart(user.id()).await?;
    Ok(success_response(serde_json::json!({ "removed": removed })))
}

/// Current price breakdown for the caller's cart
async fn get_cart_totals(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Response, ServiceError> {
    let totals = state.services.pricing.compute_totals(user.id()).await?;
    Ok(success_response(totals))
}
