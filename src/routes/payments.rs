use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use crate::{
    dto::payments::{PaymentCodeResponse, RequestPaymentRequest},
    error::AppResult,
    payment::StatusReport,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(request_payment_code))
        .route("/{transaction_id}", get(get_payment_status))
}

#[utoipa::path(
    post,
    path = "/api/payments",
    request_body = RequestPaymentRequest,
    responses(
        (status = 200, description = "Generate a scannable payment code for a staged order", body = ApiResponse<PaymentCodeResponse>),
        (status = 404, description = "Staged order expired or unknown"),
        (status = 502, description = "Payment temporarily unavailable"),
    ),
    tag = "Payments"
)]
pub async fn request_payment_code(
    State(state): State<AppState>,
    Json(payload): Json<RequestPaymentRequest>,
) -> AppResult<Json<ApiResponse<PaymentCodeResponse>>> {
    let resp = payment_service::request_payment_code(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/payments/{transaction_id}",
    params(("transaction_id" = String, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Current settlement status", body = ApiResponse<StatusReport>),
        (status = 404, description = "Unknown transaction"),
    ),
    tag = "Payments"
)]
pub async fn get_payment_status(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> AppResult<Json<ApiResponse<StatusReport>>> {
    let resp = payment_service::get_payment_status(&state, &transaction_id).await?;
    Ok(Json(resp))
}
