use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RequestPaymentRequest {
    pub staging_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentCodeResponse {
    pub transaction_id: String,
    pub qr_image: String,
    pub qr_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_mock: bool,
}
