use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::status::OrderStatus;

/// How a product line is priced. Exactly one pricing basis applies per
/// cart line: quantity for `Unit`, weight for `WeightCustom`; a
/// `WeightFixed` unit is pre-measured, so its stored price is already the
/// final line total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SellingMethod {
    Unit,
    WeightCustom,
    WeightFixed,
}

impl SellingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SellingMethod::Unit => "unit",
            SellingMethod::WeightCustom => "weight_custom",
            SellingMethod::WeightFixed => "weight_fixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unit" => Some(SellingMethod::Unit),
            "weight_custom" => Some(SellingMethod::WeightCustom),
            "weight_fixed" => Some(SellingMethod::WeightFixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Delivery,
    Pickup,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShippingAddress {
    pub full_name: String,
    pub city: String,
    pub street: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub delivery_method: DeliveryMethod,
    pub pickup_location: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub image: Option<String>,
    pub selling_method: SellingMethod,
    pub weight: Option<Decimal>,
    pub weight_unit: Option<String>,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub reference: String,
    pub phone_number: String,
    pub subtotal: Decimal,
    pub service_fee: Decimal,
    pub delivery_fee: Decimal,
    pub total_price: Decimal,
    pub status: OrderStatus,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub shipping_address: ShippingAddress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub image: Option<String>,
    pub selling_method: SellingMethod,
    pub quantity: Option<i32>,
    pub weight: Option<Decimal>,
    pub weight_unit: Option<String>,
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}
