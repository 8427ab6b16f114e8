use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post},
};
use uuid::Uuid;

use crate::{
    cart::Cart,
    dto::cart::{AddToCartRequest, MergeCartRequest, UpdateCartItemRequest},
    error::AppResult,
    middleware::auth::{AuthUser, ShopperIdentity},
    response::ApiResponse,
    services::cart_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route(
            "/{product_id}",
            delete(remove_from_cart).patch(update_cart_item),
        )
        .route("/merge", post(merge_cart))
}

#[utoipa::path(
    get,
    path = "/api/cart",
    responses(
        (status = 200, description = "Current cart with derived total", body = ApiResponse<Cart>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    identity: ShopperIdentity,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let resp = cart_service::get_cart(&state, &identity).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/cart",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Add a line to the cart", body = ApiResponse<Cart>),
        (status = 400, description = "Bad request"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Json(payload): Json<AddToCartRequest>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let resp = cart_service::add_to_cart(&state, &identity, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/cart/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Update quantity or weight", body = ApiResponse<Cart>),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Line not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateCartItemRequest>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let resp = cart_service::update_cart_item(&state, &identity, product_id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/cart/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Remove a line", body = ApiResponse<Cart>),
        (status = 404, description = "Line not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let resp = cart_service::remove_from_cart(&state, &identity, product_id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/cart",
    responses(
        (status = 200, description = "Empty the cart", body = ApiResponse<Cart>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    identity: ShopperIdentity,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let resp = cart_service::clear_cart(&state, &identity).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/cart/merge",
    request_body = MergeCartRequest,
    responses(
        (status = 200, description = "Replace the persisted cart with the guest cart", body = ApiResponse<Cart>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn merge_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<MergeCartRequest>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let resp = cart_service::merge_guest_cart(&state, &user, payload).await?;
    Ok(Json(resp))
}
