use axum::{extract::FromRequestParts, http::header};
use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use crate::{cart::Shopper, dto::auth::Claims, error::AppError};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
}

pub fn ensure_role(user: &AuthUser, role: &str) -> Result<(), AppError> {
    if user.role != role {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

pub fn ensure_admin(user: &AuthUser) -> Result<(), AppError> {
    ensure_role(user, "admin")
}

fn decode_bearer(parts: &axum::http::request::Parts) -> Result<Option<AuthUser>, AppError> {
    let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AppError::Validation("Invalid Authorization header".into()))?;

    if !auth_str.starts_with("Bearer ") {
        return Err(AppError::Validation("Invalid Authorization scheme".into()));
    }
    let token = auth_str.trim_start_matches("Bearer ").trim();

    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| AppError::Internal(anyhow::anyhow!("JWT_SECRET is not set")))?;

    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Validation("Invalid or expired token".into()))?;

    let user_id = Uuid::parse_str(&decoded.claims.sub)
        .map_err(|_| AppError::Validation("Invalid user id in token".into()))?;

    Ok(Some(AuthUser {
        user_id,
        role: decoded.claims.role.clone(),
    }))
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;
    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        decode_bearer(parts)?
            .ok_or_else(|| AppError::Validation("Missing Authorization header".into()))
    }
}

/// Identity for endpoints guests may call: an authenticated user when a
/// bearer token is present, otherwise a guest keyed by the client's
/// `x-session-token` header.
#[derive(Debug, Clone)]
pub struct ShopperIdentity {
    pub shopper: Shopper,
    pub user: Option<AuthUser>,
}

impl<S> FromRequestParts<S> for ShopperIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;
    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = decode_bearer(parts)? {
            return Ok(ShopperIdentity {
                shopper: Shopper::User(user.user_id),
                user: Some(user),
            });
        }

        let session = parts
            .headers
            .get("x-session-token")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                AppError::Validation(
                    "Provide a bearer token or an x-session-token header".into(),
                )
            })?;

        Ok(ShopperIdentity {
            shopper: Shopper::Guest(session.to_string()),
            user: None,
        })
    }
}
