use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    cart::{CartItem, Shopper},
    error::AppResult,
    models::ShippingAddress,
    pricing::Quote,
};

/// How long a staged order survives before the buyer is sent back to the
/// cart. Long enough to scan and settle a payment code, short enough that
/// abandoned checkouts do not pile up.
pub const STAGING_TTL_MINUTES: i64 = 30;

/// Snapshot of an intended order, created when the checkout form is
/// submitted and consumed exactly once after payment confirmation. Not a
/// business record: it never outlives the session that created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingRecord {
    pub token: String,
    pub user_id: Option<Uuid>,
    /// Which cart produced this snapshot, so materialization knows what
    /// to clear.
    pub cart_owner: Shopper,
    pub items: Vec<CartItem>,
    pub quote: Quote,
    pub phone_number: String,
    pub shipping_address: ShippingAddress,
    pub created_at: DateTime<Utc>,
}

/// Locally-unique token for a staged order: timestamp plus random suffix.
pub fn new_staging_token() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("stg-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Store a record under its token, replacing any previous entry.
    async fn put(&self, record: StagingRecord) -> AppResult<()>;
    /// Peek without consuming. `None` when unknown or expired.
    async fn get(&self, token: &str) -> AppResult<Option<StagingRecord>>;
    /// Check-and-delete: at most one caller ever receives the record.
    async fn take(&self, token: &str) -> AppResult<Option<StagingRecord>>;
    /// Drop entries past their TTL.
    async fn purge_expired(&self) -> AppResult<usize>;
}

struct StoredRecord {
    record: StagingRecord,
    expires_at: DateTime<Utc>,
}

/// In-memory TTL store. Sufficient while checkout and payment run in one
/// process; a short-expiry table would take its place if they ever split.
pub struct InMemoryStagingStore {
    entries: DashMap<String, StoredRecord>,
    ttl: Duration,
}

impl InMemoryStagingStore {
    pub fn new() -> Self {
        Self::with_ttl(Duration::minutes(STAGING_TTL_MINUTES))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }
}

impl Default for InMemoryStagingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StagingStore for InMemoryStagingStore {
    async fn put(&self, record: StagingRecord) -> AppResult<()> {
        let expires_at = Utc::now() + self.ttl;
        self.entries.insert(
            record.token.clone(),
            StoredRecord { record, expires_at },
        );
        Ok(())
    }

    async fn get(&self, token: &str) -> AppResult<Option<StagingRecord>> {
        if let Some(entry) = self.entries.get(token) {
            if entry.expires_at > Utc::now() {
                return Ok(Some(entry.record.clone()));
            }
        }
        // Expired entries are dropped lazily on access.
        self.entries
            .remove_if(token, |_, stored| stored.expires_at <= Utc::now());
        Ok(None)
    }

    async fn take(&self, token: &str) -> AppResult<Option<StagingRecord>> {
        let removed = self.entries.remove(token);
        Ok(removed.and_then(|(_, stored)| {
            if stored.expires_at > Utc::now() {
                Some(stored.record)
            } else {
                None
            }
        }))
    }

    async fn purge_expired(&self) -> AppResult<usize> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, stored| stored.expires_at > now);
        Ok(before - self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeliveryMethod, SellingMethod};
    use rust_decimal::Decimal;

    fn record(token: &str) -> StagingRecord {
        let item = CartItem {
            product_id: Uuid::new_v4(),
            name: "Dates".into(),
            price: Decimal::from(100),
            image: None,
            selling_method: SellingMethod::Unit,
            quantity: Some(2),
            weight: None,
            weight_unit: None,
            locked: false,
        };
        StagingRecord {
            token: token.to_string(),
            user_id: None,
            cart_owner: Shopper::Guest("sess-1".into()),
            items: vec![item],
            quote: crate::pricing::quote(
                &[],
                DeliveryMethod::Pickup,
            ),
            phone_number: "0551234567".into(),
            shipping_address: ShippingAddress {
                full_name: "Guest".into(),
                city: "Riyadh".into(),
                street: None,
                coordinates: None,
                delivery_method: DeliveryMethod::Pickup,
                pickup_location: Some("Main branch".into()),
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn tokens_are_locally_unique() {
        let a = new_staging_token();
        let b = new_staging_token();
        assert_ne!(a, b);
        assert!(a.starts_with("stg-"));
    }

    #[tokio::test]
    async fn take_consumes_exactly_once() {
        let store = InMemoryStagingStore::new();
        store.put(record("stg-1")).await.unwrap();

        assert!(store.get("stg-1").await.unwrap().is_some());
        // Peeking does not consume.
        assert!(store.get("stg-1").await.unwrap().is_some());

        let taken = store.take("stg-1").await.unwrap();
        assert!(taken.is_some());

        // A second take finds nothing: replay protection.
        assert!(store.take("stg-1").await.unwrap().is_none());
        assert!(store.get("stg-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_tokens_are_not_found() {
        let store = InMemoryStagingStore::new();
        assert!(store.get("stg-nope").await.unwrap().is_none());
        assert!(store.take("stg-nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_records_are_unreachable_and_purged() {
        let store = InMemoryStagingStore::with_ttl(Duration::minutes(-1));
        store.put(record("stg-old")).await.unwrap();
        assert!(store.get("stg-old").await.unwrap().is_none());

        store.put(record("stg-old-2")).await.unwrap();
        assert!(store.take("stg-old-2").await.unwrap().is_none());

        store.put(record("stg-old-3")).await.unwrap();
        let purged = store.purge_expired().await.unwrap();
        assert_eq!(purged, 1);
    }

    #[tokio::test]
    async fn restore_after_failed_materialization() {
        let store = InMemoryStagingStore::new();
        store.put(record("stg-2")).await.unwrap();
        let taken = store.take("stg-2").await.unwrap().unwrap();

        // Materialization failed after the take; putting the record back
        // lets the buyer retry without losing the confirmed payment.
        store.put(taken).await.unwrap();
        assert!(store.get("stg-2").await.unwrap().is_some());
    }
}
