use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::checkout::{
        CheckoutRequest, CheckoutResponse, ConfirmCheckoutRequest, ConfirmCheckoutResponse,
    },
    error::AppResult,
    middleware::auth::ShopperIdentity,
    response::ApiResponse,
    services::{checkout_service, order_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(stage_checkout))
        .route("/confirm", post(confirm_checkout))
}

#[utoipa::path(
    post,
    path = "/api/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Stage the order and quote its fees", body = ApiResponse<CheckoutResponse>),
        (status = 400, description = "Empty cart or invalid checkout details"),
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn stage_checkout(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<ApiResponse<CheckoutResponse>>> {
    let resp = checkout_service::stage_order(&state, &identity, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/checkout/confirm",
    request_body = ConfirmCheckoutRequest,
    responses(
        (status = 200, description = "Materialize the order after a settled payment", body = ApiResponse<ConfirmCheckoutResponse>),
        (status = 400, description = "Payment not confirmed"),
        (status = 404, description = "Staged order expired or unknown"),
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn confirm_checkout(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmCheckoutRequest>,
) -> AppResult<Json<ApiResponse<ConfirmCheckoutResponse>>> {
    let resp = order_service::materialize_order(&state, &payload.staging_token).await?;
    Ok(Json(resp))
}
