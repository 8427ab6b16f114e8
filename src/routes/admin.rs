use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, patch},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::orders::{OrderList, OrderWithItems},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Order,
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::admin_service,
    state::AppState,
    status::OrderStatus,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_all_orders))
        .route("/orders/{id}", get(get_order_admin))
        .route("/orders/{id}/status", patch(update_order_status))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Structured verdict for a requested transition: the back-office UI
/// shows `message` inline and only swaps the row when `success` is set.
#[derive(Debug, Serialize, ToSchema)]
pub struct TransitionOutcome {
    pub success: bool,
    pub message: String,
    pub order: Option<Order>,
}

#[utoipa::path(
    get,
    path = "/api/admin/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("sort_order" = Option<String>, Query, description = "Sort order: asc, desc")
    ),
    responses(
    (status = 200, description = "Get all orders (admin only)", body = ApiResponse<OrderList>),
    (status = 403, description = "Forbidden"),
    (status = 500, description = "Internal Server Error"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_all_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let resp = admin_service::list_all_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/admin/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
    (status = 200, description = "Get any order with items (admin only)", body = ApiResponse<OrderWithItems>),
    (status = 404, description = "Not Found", ),
    (status = 403, description = "Forbidden", ),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn get_order_admin(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let resp = admin_service::get_order_admin(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/admin/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Transition verdict, including rejections", body = ApiResponse<TransitionOutcome>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> AppResult<Json<ApiResponse<TransitionOutcome>>> {
    let resp = admin_service::update_order_status(&state, &user, id, payload).await?;
    Ok(Json(resp))
}
