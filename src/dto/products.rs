use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Product, SellingMethod};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub image: Option<String>,
    pub selling_method: SellingMethod,
    /// Pre-measured weight; required for fixed-weight inventory units.
    pub weight: Option<Decimal>,
    pub weight_unit: Option<String>,
    pub stock: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub image: Option<String>,
    pub weight: Option<Decimal>,
    pub weight_unit: Option<String>,
    pub stock: Option<i32>,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct ProductList {
    #[schema(value_type = Vec<Product>)]
    pub items: Vec<Product>,
}
