use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    cart::CartItem,
    models::DeliveryMethod,
};

/// 3% of the subtotal.
pub const SERVICE_FEE_RATE: Decimal = Decimal::from_parts(3, 0, 0, false, 2);
/// Flat delivery fee, charged only below the free-delivery threshold.
pub const DELIVERY_FEE: Decimal = Decimal::from_parts(15, 0, 0, false, 0);
pub const FREE_DELIVERY_THRESHOLD: Decimal = Decimal::from_parts(450, 0, 0, false, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Quote {
    pub subtotal: Decimal,
    pub service_fee: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
}

/// Derive the full fee breakdown from cart contents and delivery method.
/// Pure; callers recompute on every cart or delivery-method change instead
/// of caching the result.
pub fn quote(items: &[CartItem], delivery_method: DeliveryMethod) -> Quote {
    let subtotal: Decimal = items.iter().map(CartItem::line_total).sum();
    let service_fee = round2(subtotal * SERVICE_FEE_RATE);
    let delivery_fee = if delivery_method == DeliveryMethod::Delivery
        && subtotal < FREE_DELIVERY_THRESHOLD
    {
        DELIVERY_FEE
    } else {
        Decimal::ZERO
    };

    Quote {
        subtotal,
        service_fee,
        delivery_fee,
        total: subtotal + service_fee + delivery_fee,
    }
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SellingMethod;
    use uuid::Uuid;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn unit_line(price: &str, quantity: u32) -> CartItem {
        CartItem {
            product_id: Uuid::new_v4(),
            name: "Dates".into(),
            price: d(price),
            image: None,
            selling_method: SellingMethod::Unit,
            quantity: Some(quantity),
            weight: None,
            weight_unit: None,
            locked: false,
        }
    }

    #[test]
    fn pickup_happy_path() {
        let q = quote(&[unit_line("100", 2)], DeliveryMethod::Pickup);
        assert_eq!(q.subtotal, d("200"));
        assert_eq!(q.service_fee, d("6"));
        assert_eq!(q.delivery_fee, Decimal::ZERO);
        assert_eq!(q.total, d("206"));
    }

    #[test]
    fn delivery_under_threshold_charges_flat_fee() {
        let q = quote(&[unit_line("100", 1)], DeliveryMethod::Delivery);
        assert_eq!(q.subtotal, d("100"));
        assert_eq!(q.service_fee, d("3"));
        assert_eq!(q.delivery_fee, d("15"));
        assert_eq!(q.total, d("118"));
    }

    #[test]
    fn delivery_at_threshold_is_free() {
        let q = quote(&[unit_line("450", 1)], DeliveryMethod::Delivery);
        assert_eq!(q.subtotal, d("450"));
        assert_eq!(q.delivery_fee, Decimal::ZERO);
        assert_eq!(q.total, d("463.50"));
    }

    #[test]
    fn total_identity_holds_with_mixed_lines() {
        let lamb = CartItem {
            product_id: Uuid::new_v4(),
            name: "Lamb shoulder".into(),
            price: d("80"),
            image: None,
            selling_method: SellingMethod::WeightCustom,
            quantity: None,
            weight: Some(d("0.75")),
            weight_unit: Some("kg".into()),
            locked: false,
        };
        let cheese = CartItem {
            product_id: Uuid::new_v4(),
            name: "Cheese wheel".into(),
            price: d("95.40"),
            image: None,
            selling_method: SellingMethod::WeightFixed,
            quantity: None,
            weight: Some(d("1.2")),
            weight_unit: Some("kg".into()),
            locked: true,
        };
        let items = vec![unit_line("12.50", 4), lamb, cheese];

        let q = quote(&items, DeliveryMethod::Delivery);
        assert_eq!(q.subtotal, d("205.40"));
        assert_eq!(q.service_fee, d("6.16")); // 6.162 rounded to 2dp
        assert_eq!(q.delivery_fee, d("15"));
        assert_eq!(q.total, q.subtotal + q.service_fee + q.delivery_fee);
    }

    #[test]
    fn empty_cart_quotes_zero() {
        let q = quote(&[], DeliveryMethod::Pickup);
        assert_eq!(q.subtotal, Decimal::ZERO);
        assert_eq!(q.total, Decimal::ZERO);
    }
}
