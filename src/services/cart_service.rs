use sea_orm::EntityTrait;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    cart::{Cart, CartItem, Shopper},
    dto::cart::{AddToCartRequest, MergeCartRequest, UpdateCartItemRequest},
    entity::products::Entity as Products,
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ShopperIdentity},
    models::SellingMethod,
    response::{ApiResponse, Meta},
    state::AppState,
};

pub async fn get_cart(
    state: &AppState,
    identity: &ShopperIdentity,
) -> AppResult<ApiResponse<Cart>> {
    let cart = state.cart_repo(&identity.shopper).load(&identity.shopper).await?;
    Ok(ApiResponse::success("OK", cart, Some(Meta::empty())))
}

pub async fn add_to_cart(
    state: &AppState,
    identity: &ShopperIdentity,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<Cart>> {
    let product = Products::find_by_id(payload.product_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::Validation("product not found".to_string()))?;

    let selling_method = SellingMethod::parse(&product.selling_method).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "unknown selling method on product {}",
            product.id
        ))
    })?;

    // The line is always built from the catalog row; client-sent prices
    // or names are never trusted.
    let item = match selling_method {
        SellingMethod::Unit => CartItem {
            product_id: product.id,
            name: product.name,
            price: product.price,
            image: product.image,
            selling_method,
            quantity: Some(payload.quantity.unwrap_or(1)),
            weight: None,
            weight_unit: None,
            locked: false,
        },
        SellingMethod::WeightCustom => {
            let weight = payload
                .weight
                .ok_or_else(|| AppError::Validation("weight is required".to_string()))?;
            CartItem {
                product_id: product.id,
                name: product.name,
                price: product.price,
                image: product.image,
                selling_method,
                quantity: None,
                weight: Some(weight),
                weight_unit: product.weight_unit,
                locked: false,
            }
        }
        SellingMethod::WeightFixed => CartItem {
            product_id: product.id,
            name: product.name,
            price: product.price,
            image: product.image,
            selling_method,
            quantity: None,
            weight: product.weight,
            weight_unit: product.weight_unit,
            locked: true,
        },
    };

    let repo = state.cart_repo(&identity.shopper);
    let mut cart = repo.load(&identity.shopper).await?;
    cart.add_item(item)?;
    repo.save(&identity.shopper, &cart).await?;

    audit_cart_change(state, identity, "cart_add", payload.product_id).await;
    Ok(ApiResponse::success("OK", cart, None))
}

pub async fn update_cart_item(
    state: &AppState,
    identity: &ShopperIdentity,
    product_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<Cart>> {
    let repo = state.cart_repo(&identity.shopper);
    let mut cart = repo.load(&identity.shopper).await?;

    match (payload.quantity, payload.weight) {
        (Some(quantity), None) => cart.update_quantity(product_id, quantity)?,
        (None, Some(weight)) => cart.update_weight(product_id, weight)?,
        _ => {
            return Err(AppError::Validation(
                "send either quantity or weight".to_string(),
            ));
        }
    }

    repo.save(&identity.shopper, &cart).await?;
    audit_cart_change(state, identity, "cart_update", product_id).await;
    Ok(ApiResponse::success("OK", cart, None))
}

pub async fn remove_from_cart(
    state: &AppState,
    identity: &ShopperIdentity,
    product_id: Uuid,
) -> AppResult<ApiResponse<Cart>> {
    let repo = state.cart_repo(&identity.shopper);
    let mut cart = repo.load(&identity.shopper).await?;
    cart.remove_item(product_id)?;
    repo.save(&identity.shopper, &cart).await?;

    audit_cart_change(state, identity, "cart_remove", product_id).await;
    Ok(ApiResponse::success(
        "Removed from cart",
        cart,
        Some(Meta::empty()),
    ))
}

pub async fn clear_cart(
    state: &AppState,
    identity: &ShopperIdentity,
) -> AppResult<ApiResponse<Cart>> {
    let repo = state.cart_repo(&identity.shopper);
    repo.clear(&identity.shopper).await?;
    Ok(ApiResponse::success(
        "Cart cleared",
        Cart::default(),
        Some(Meta::empty()),
    ))
}

/// Replace the user's persisted cart with the guest session cart, then
/// drop the session copy. Whole-cart last-write-wins, not an item-level
/// union.
pub async fn merge_guest_cart(
    state: &AppState,
    user: &AuthUser,
    payload: MergeCartRequest,
) -> AppResult<ApiResponse<Cart>> {
    let guest = Shopper::Guest(payload.session_token);
    let owner = Shopper::User(user.user_id);

    let guest_cart = state.session_carts.load(&guest).await?;
    if guest_cart.is_empty() {
        let current = state.user_carts.load(&owner).await?;
        return Ok(ApiResponse::success("Nothing to merge", current, None));
    }

    state.user_carts.save(&owner, &guest_cart).await?;
    state.session_carts.clear(&guest).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_merge",
        Some("carts"),
        Some(serde_json::json!({ "items": guest_cart.items.len() })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("Cart merged", guest_cart, None))
}

async fn audit_cart_change(
    state: &AppState,
    identity: &ShopperIdentity,
    action: &str,
    product_id: Uuid,
) {
    // Guest mutations stay local-only; nothing worth auditing server-side.
    let Some(user) = &identity.user else { return };
    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        action,
        Some("carts"),
        Some(serde_json::json!({ "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
}
