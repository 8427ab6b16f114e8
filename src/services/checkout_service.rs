use chrono::Utc;

use crate::{
    audit::log_audit,
    dto::checkout::{CheckoutRequest, CheckoutResponse},
    error::{AppError, AppResult},
    middleware::auth::ShopperIdentity,
    models::{DeliveryMethod, ShippingAddress},
    pricing,
    response::{ApiResponse, Meta},
    staging::{StagingRecord, new_staging_token},
    state::AppState,
};

/// Snapshot the shopper's cart into a staged order and hand back the
/// token the payment step will confirm against. Nothing durable is
/// written here; abandoning the payment screen leaves no ghost order
/// behind.
pub async fn stage_order(
    state: &AppState,
    identity: &ShopperIdentity,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<CheckoutResponse>> {
    let phone_number = validate_phone(&payload.phone_number)?;

    if payload.full_name.trim().is_empty() {
        return Err(AppError::Validation("Full name is required".into()));
    }
    match payload.delivery_method {
        DeliveryMethod::Delivery => {
            if payload.city.trim().is_empty() {
                return Err(AppError::Validation(
                    "Delivery orders need a city".into(),
                ));
            }
        }
        DeliveryMethod::Pickup => {
            if payload
                .pickup_location
                .as_deref()
                .is_none_or(|loc| loc.trim().is_empty())
            {
                return Err(AppError::Validation(
                    "Pickup orders need a pickup location".into(),
                ));
            }
        }
    }

    let cart = state
        .cart_repo(&identity.shopper)
        .load(&identity.shopper)
        .await?;
    if cart.is_empty() {
        return Err(AppError::Validation("Cart is empty".into()));
    }

    // Fees are always derived server-side, at staging time, from the
    // snapshot that will later materialize.
    let quote = pricing::quote(&cart.items, payload.delivery_method);

    let shipping_address = ShippingAddress {
        full_name: payload.full_name,
        city: payload.city,
        street: payload.street,
        coordinates: payload.coordinates,
        delivery_method: payload.delivery_method,
        pickup_location: payload.pickup_location,
    };

    let token = new_staging_token();
    let record = StagingRecord {
        token: token.clone(),
        user_id: identity.user.as_ref().map(|u| u.user_id),
        cart_owner: identity.shopper.clone(),
        items: cart.items,
        quote,
        phone_number,
        shipping_address,
        created_at: Utc::now(),
    };
    state.staging.put(record).await?;

    if let Some(user) = &identity.user {
        if let Err(err) = log_audit(
            &state.pool,
            Some(user.user_id),
            "checkout_staged",
            Some("orders"),
            Some(serde_json::json!({ "staging_token": token, "total": quote.total })),
        )
        .await
        {
            tracing::warn!(error = %err, "audit log failed");
        }
    }

    Ok(ApiResponse::success(
        "Order staged",
        CheckoutResponse {
            staging_token: token,
            quote,
        },
        Some(Meta::empty()),
    ))
}

/// Keep the digits, require at least nine of them. Formatting variance
/// ("+966 55..." vs "055...") is handled at lookup time.
pub(crate) fn validate_phone(raw: &str) -> AppResult<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 9 {
        return Err(AppError::Validation("Invalid phone number".into()));
    }
    Ok(raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_must_carry_enough_digits() {
        assert!(validate_phone("055-123").is_err());
        assert!(validate_phone("not a phone").is_err());
        assert_eq!(
            validate_phone(" +966 55 123 4567 ").unwrap(),
            "+966 55 123 4567"
        );
        assert!(validate_phone("0551234567").is_ok());
    }
}
