use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Order, OrderItem};

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrderLookupRequest {
    /// Full order id or the short human-readable reference.
    pub order_ref: String,
    pub phone_number: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderLookupResponse {
    pub verified: bool,
    pub order_id: Uuid,
}
