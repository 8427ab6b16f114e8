use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::orders::{OrderList, OrderLookupRequest, OrderLookupResponse, OrderWithItems},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::order_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/lookup", post(lookup_order))
        .route("/{id}", get(get_order))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("sort_order" = Option<String>, Query, description = "Sort order: asc, desc")
    ),
    responses(
        (status = 200, description = "List the caller's orders", body = ApiResponse<OrderList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let resp = order_service::list_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Get one of the caller's orders", body = ApiResponse<OrderWithItems>),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let resp = order_service::get_order(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/orders/lookup",
    request_body = OrderLookupRequest,
    responses(
        (status = 200, description = "Verify guest order ownership", body = ApiResponse<OrderLookupResponse>),
        (status = 404, description = "Not Found"),
    ),
    tag = "Orders"
)]
pub async fn lookup_order(
    State(state): State<AppState>,
    Json(payload): Json<OrderLookupRequest>,
) -> AppResult<Json<ApiResponse<OrderLookupResponse>>> {
    let resp = order_service::lookup_guest_order(&state, payload).await?;
    Ok(Json(resp))
}
