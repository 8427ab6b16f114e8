use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    cart::{CartRepository, DbCartRepository, SessionCartRepository, Shopper},
    config::AppConfig,
    db::{DbPool, OrmConn},
    payment::{HttpPaymentProcessor, PaymentGateway, PaymentProcessor, TransactionStore},
    staging::{InMemoryStagingStore, StagingStore},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub currency: String,
    pub staging: Arc<dyn StagingStore>,
    pub gateway: Arc<PaymentGateway>,
    pub user_carts: Arc<dyn CartRepository>,
    pub session_carts: Arc<dyn CartRepository>,
    /// Serializes materialization so a duplicate "paid" notification
    /// always observes either the staging record or the finished order,
    /// never the gap in between.
    pub materialize_lock: Arc<tokio::sync::Mutex<()>>,
    pub poll_interval: Duration,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pool: DbPool, orm: OrmConn, config: &AppConfig) -> Self {
        let processor: Option<Arc<dyn PaymentProcessor>> =
            HttpPaymentProcessor::from_config(&config.payment)
                .map(|p| Arc::new(p) as Arc<dyn PaymentProcessor>);

        let gateway = Arc::new(PaymentGateway::new(
            processor,
            Arc::new(TransactionStore::new()),
            config.currency.clone(),
            config.payment.allow_mock,
        ));

        Self {
            pool,
            currency: config.currency.clone(),
            staging: Arc::new(InMemoryStagingStore::new()),
            gateway,
            user_carts: Arc::new(DbCartRepository::new(orm.clone())),
            session_carts: Arc::new(SessionCartRepository::new()),
            materialize_lock: Arc::new(tokio::sync::Mutex::new(())),
            poll_interval: Duration::from_secs(config.payment.poll_interval_secs),
            shutdown: CancellationToken::new(),
            orm,
        }
    }

    /// Pick the cart repository matching the shopper's authentication
    /// state instead of branching at every call site.
    pub fn cart_repo(&self, shopper: &Shopper) -> &dyn CartRepository {
        match shopper {
            Shopper::User(_) => self.user_carts.as_ref(),
            Shopper::Guest(_) => self.session_carts.as_ref(),
        }
    }
}
