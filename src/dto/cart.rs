use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    /// Unit-priced lines only.
    pub quantity: Option<u32>,
    /// Custom-weight lines only; ignored for pre-measured units.
    pub weight: Option<Decimal>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCartItemRequest {
    pub quantity: Option<u32>,
    pub weight: Option<Decimal>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MergeCartRequest {
    /// The guest session whose cart replaces the persisted one.
    pub session_token: String,
}
