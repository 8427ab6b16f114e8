use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::OrmConn,
    entity::carts::{ActiveModel as CartActive, Column as CartCol, Entity as Carts},
    error::{AppError, AppResult},
    models::SellingMethod,
};

/// Smallest weight a buyer can dial in for weight-priced lines.
const MIN_WEIGHT: Decimal = Decimal::from_parts(1, 0, 0, false, 1); // 0.1

/// One purchasable line. Stored as a JSON element on the shopper's cart
/// row; snapshotted verbatim into the staging record at checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartItem {
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub image: Option<String>,
    pub selling_method: SellingMethod,
    pub quantity: Option<u32>,
    pub weight: Option<Decimal>,
    pub weight_unit: Option<String>,
    /// Pre-measured inventory unit; weight and price are frozen.
    pub locked: bool,
}

impl CartItem {
    /// Exactly one pricing basis applies: `price x quantity` for unit
    /// lines, `price x weight` for custom-weight lines, and the stored
    /// price itself for a pre-measured unit.
    pub fn line_total(&self) -> Decimal {
        match self.selling_method {
            SellingMethod::Unit => {
                self.price * Decimal::from(self.quantity.unwrap_or(0))
            }
            SellingMethod::WeightCustom => {
                self.price * self.weight.unwrap_or(Decimal::ZERO)
            }
            SellingMethod::WeightFixed => self.price,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CartError {
    #[error("Item is already in the cart")]
    DuplicateItem,
    #[error("Weight of a pre-measured item cannot be changed")]
    ImmutableWeight,
    #[error("Quantity must be at least 1")]
    InvalidQuantity,
    #[error("Weight must be at least 0.1")]
    InvalidWeight,
    #[error("Item is not priced that way")]
    WrongPricingBasis,
    #[error("Item is not in the cart")]
    ItemNotFound,
}

impl From<CartError> for AppError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::ItemNotFound => AppError::NotFound,
            other => AppError::Validation(other.to_string()),
        }
    }
}

/// The shopper's cart. Every mutation recomputes the derived total, so a
/// persisted or serialized cart never carries a stale one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Cart {
    pub items: Vec<CartItem>,
    pub total_price: Decimal,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert a line. A line for the same product replaces the existing
    /// one, except that a locked fixed-weight unit cannot be selected
    /// twice.
    pub fn add_item(&mut self, item: CartItem) -> Result<(), CartError> {
        match item.selling_method {
            SellingMethod::Unit => {
                if item.quantity.unwrap_or(0) < 1 {
                    return Err(CartError::InvalidQuantity);
                }
            }
            SellingMethod::WeightCustom => {
                if item.weight.unwrap_or(Decimal::ZERO) < MIN_WEIGHT {
                    return Err(CartError::InvalidWeight);
                }
            }
            SellingMethod::WeightFixed => {}
        }

        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|line| line.product_id == item.product_id)
        {
            if existing.locked && item.locked {
                return Err(CartError::DuplicateItem);
            }
            *existing = item;
        } else {
            self.items.push(item);
        }

        self.recompute_total();
        Ok(())
    }

    pub fn update_quantity(&mut self, product_id: Uuid, quantity: u32) -> Result<(), CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity);
        }
        let item = self.find_mut(product_id)?;
        if item.selling_method != SellingMethod::Unit {
            return Err(CartError::WrongPricingBasis);
        }
        item.quantity = Some(quantity);
        self.recompute_total();
        Ok(())
    }

    pub fn update_weight(&mut self, product_id: Uuid, weight: Decimal) -> Result<(), CartError> {
        if weight < MIN_WEIGHT {
            return Err(CartError::InvalidWeight);
        }
        let item = self.find_mut(product_id)?;
        if item.locked {
            return Err(CartError::ImmutableWeight);
        }
        if item.selling_method != SellingMethod::WeightCustom {
            return Err(CartError::WrongPricingBasis);
        }
        item.weight = Some(weight);
        self.recompute_total();
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: Uuid) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|line| line.product_id != product_id);
        if self.items.len() == before {
            return Err(CartError::ItemNotFound);
        }
        self.recompute_total();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.total_price = Decimal::ZERO;
    }

    fn find_mut(&mut self, product_id: Uuid) -> Result<&mut CartItem, CartError> {
        self.items
            .iter_mut()
            .find(|line| line.product_id == product_id)
            .ok_or(CartError::ItemNotFound)
    }

    fn recompute_total(&mut self) {
        self.total_price = self.items.iter().map(CartItem::line_total).sum();
    }
}

/// Who owns the cart being mutated. Authenticated shoppers get the
/// persisted row; guests get the session-scoped store and are never
/// synced until merge-on-login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shopper {
    User(Uuid),
    Guest(String),
}

#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn load(&self, shopper: &Shopper) -> AppResult<Cart>;
    async fn save(&self, shopper: &Shopper, cart: &Cart) -> AppResult<()>;
    async fn clear(&self, shopper: &Shopper) -> AppResult<()>;
}

/// Server-persisted carts, one row per user, line items as a JSON list.
/// The stored total is always recomputed from the items before the write;
/// a client-sent total is never trusted.
pub struct DbCartRepository {
    orm: OrmConn,
}

impl DbCartRepository {
    pub fn new(orm: OrmConn) -> Self {
        Self { orm }
    }

    fn user_id(shopper: &Shopper) -> AppResult<Uuid> {
        match shopper {
            Shopper::User(id) => Ok(*id),
            Shopper::Guest(_) => Err(AppError::Internal(anyhow::anyhow!(
                "guest carts are not persisted"
            ))),
        }
    }
}

#[async_trait]
impl CartRepository for DbCartRepository {
    async fn load(&self, shopper: &Shopper) -> AppResult<Cart> {
        let user_id = Self::user_id(shopper)?;
        let row = Carts::find()
            .filter(CartCol::UserId.eq(user_id))
            .one(&self.orm)
            .await?;

        let cart = match row {
            Some(row) => {
                let items: Vec<CartItem> = serde_json::from_value(row.items)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
                // The JSON list is the source of truth; the total column
                // is derived.
                let mut cart = Cart {
                    items,
                    total_price: Decimal::ZERO,
                };
                cart.recompute_total();
                cart
            }
            None => Cart::default(),
        };
        Ok(cart)
    }

    async fn save(&self, shopper: &Shopper, cart: &Cart) -> AppResult<()> {
        let user_id = Self::user_id(shopper)?;
        let mut snapshot = cart.clone();
        snapshot.recompute_total();
        let items = serde_json::to_value(&snapshot.items)
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

        let existing = Carts::find()
            .filter(CartCol::UserId.eq(user_id))
            .one(&self.orm)
            .await?;

        match existing {
            Some(row) => {
                let mut active: CartActive = row.into();
                active.items = Set(items);
                active.total_price = Set(snapshot.total_price);
                active.updated_at = Set(Utc::now().into());
                active.update(&self.orm).await?;
            }
            None => {
                CartActive {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    items: Set(items),
                    total_price: Set(snapshot.total_price),
                    updated_at: NotSet,
                }
                .insert(&self.orm)
                .await?;
            }
        }
        Ok(())
    }

    async fn clear(&self, shopper: &Shopper) -> AppResult<()> {
        let user_id = Self::user_id(shopper)?;
        Carts::delete_many()
            .filter(CartCol::UserId.eq(user_id))
            .exec(&self.orm)
            .await?;
        Ok(())
    }
}

/// Guest carts, held in process memory keyed by the client's session
/// token. Gone on restart, which matches their ephemeral contract.
#[derive(Default)]
pub struct SessionCartRepository {
    carts: DashMap<String, Cart>,
}

impl SessionCartRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn token(shopper: &Shopper) -> AppResult<&str> {
        match shopper {
            Shopper::Guest(token) => Ok(token),
            Shopper::User(_) => Err(AppError::Internal(anyhow::anyhow!(
                "authenticated carts live in the database"
            ))),
        }
    }
}

#[async_trait]
impl CartRepository for SessionCartRepository {
    async fn load(&self, shopper: &Shopper) -> AppResult<Cart> {
        let token = Self::token(shopper)?;
        Ok(self
            .carts
            .get(token)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn save(&self, shopper: &Shopper, cart: &Cart) -> AppResult<()> {
        let token = Self::token(shopper)?;
        let mut snapshot = cart.clone();
        snapshot.recompute_total();
        self.carts.insert(token.to_string(), snapshot);
        Ok(())
    }

    async fn clear(&self, shopper: &Shopper) -> AppResult<()> {
        let token = Self::token(shopper)?;
        self.carts.remove(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn unit_item(price: &str, quantity: u32) -> CartItem {
        CartItem {
            product_id: Uuid::new_v4(),
            name: "Apples".into(),
            price: d(price),
            image: None,
            selling_method: SellingMethod::Unit,
            quantity: Some(quantity),
            weight: None,
            weight_unit: None,
            locked: false,
        }
    }

    fn weighed_item(price: &str, weight: &str, locked: bool) -> CartItem {
        CartItem {
            product_id: Uuid::new_v4(),
            name: "Lamb shoulder".into(),
            price: d(price),
            image: None,
            selling_method: if locked {
                SellingMethod::WeightFixed
            } else {
                SellingMethod::WeightCustom
            },
            quantity: None,
            weight: Some(d(weight)),
            weight_unit: Some("kg".into()),
            locked,
        }
    }

    #[test]
    fn mutations_keep_total_in_sync() {
        let mut cart = Cart::default();
        let item = unit_item("100", 2);
        let id = item.product_id;
        cart.add_item(item).unwrap();
        assert_eq!(cart.total_price, d("200"));

        cart.update_quantity(id, 3).unwrap();
        assert_eq!(cart.total_price, d("300"));

        cart.remove_item(id).unwrap();
        assert_eq!(cart.total_price, Decimal::ZERO);
        assert!(cart.is_empty());
    }

    #[test]
    fn exactly_one_pricing_basis_per_line() {
        let unit = unit_item("12.50", 4);
        assert_eq!(unit.line_total(), d("50"));

        let custom = weighed_item("80", "0.75", false);
        assert_eq!(custom.line_total(), d("60"));

        // A pre-measured unit's price is already the line total.
        let fixed = weighed_item("95.40", "1.2", true);
        assert_eq!(fixed.line_total(), d("95.40"));
    }

    #[test]
    fn duplicate_locked_unit_is_rejected() {
        let mut cart = Cart::default();
        let unit = weighed_item("95.40", "1.2", true);
        let copy = unit.clone();
        cart.add_item(unit).unwrap();
        assert_eq!(cart.add_item(copy), Err(CartError::DuplicateItem));
        assert_eq!(cart.items.len(), 1);
    }

    #[test]
    fn re_adding_an_unlocked_line_replaces_it() {
        let mut cart = Cart::default();
        let mut item = unit_item("10", 1);
        let id = item.product_id;
        cart.add_item(item.clone()).unwrap();
        item.quantity = Some(5);
        cart.add_item(item).unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].product_id, id);
        assert_eq!(cart.total_price, d("50"));
    }

    #[test]
    fn quantity_rules() {
        let mut cart = Cart::default();
        let item = unit_item("10", 2);
        let id = item.product_id;
        cart.add_item(item).unwrap();

        assert_eq!(cart.update_quantity(id, 0), Err(CartError::InvalidQuantity));

        let weighed = weighed_item("80", "0.5", false);
        let weighed_id = weighed.product_id;
        cart.add_item(weighed).unwrap();
        assert_eq!(
            cart.update_quantity(weighed_id, 2),
            Err(CartError::WrongPricingBasis)
        );
    }

    #[test]
    fn weight_rules() {
        let mut cart = Cart::default();
        let custom = weighed_item("80", "0.5", false);
        let custom_id = custom.product_id;
        cart.add_item(custom).unwrap();

        assert_eq!(
            cart.update_weight(custom_id, d("0.05")),
            Err(CartError::InvalidWeight)
        );
        cart.update_weight(custom_id, d("1.5")).unwrap();
        assert_eq!(cart.total_price, d("120"));

        let fixed = weighed_item("95.40", "1.2", true);
        let fixed_id = fixed.product_id;
        cart.add_item(fixed).unwrap();
        assert_eq!(
            cart.update_weight(fixed_id, d("2")),
            Err(CartError::ImmutableWeight)
        );
    }

    #[tokio::test]
    async fn session_repository_round_trip() {
        let repo = SessionCartRepository::new();
        let shopper = Shopper::Guest("sess-1".into());

        let mut cart = Cart::default();
        cart.add_item(unit_item("10", 2)).unwrap();
        repo.save(&shopper, &cart).await.unwrap();

        let loaded = repo.load(&shopper).await.unwrap();
        assert_eq!(loaded, cart);

        repo.clear(&shopper).await.unwrap();
        assert!(repo.load(&shopper).await.unwrap().is_empty());

        // Other sessions are isolated.
        let other = Shopper::Guest("sess-2".into());
        assert!(repo.load(&other).await.unwrap().is_empty());
    }
}
