use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    models::{Coordinates, DeliveryMethod},
    pricing::Quote,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub delivery_method: DeliveryMethod,
    pub phone_number: String,
    pub full_name: String,
    pub city: String,
    pub street: Option<String>,
    pub coordinates: Option<Coordinates>,
    /// Required for pickup orders.
    pub pickup_location: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub staging_token: String,
    pub quote: Quote,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmCheckoutRequest {
    pub staging_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfirmCheckoutResponse {
    pub order_id: Uuid,
    pub reference: String,
    /// Guests keep their cart client-side; a confirmed order tells the
    /// client to drop that copy.
    pub clear_local_cart: bool,
}
