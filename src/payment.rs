use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::PaymentConfig,
    error::{AppError, AppResult},
};

/// Mock transactions settle after this many polls.
pub const MOCK_SETTLE_AFTER_POLLS: u32 = 3;
/// Lifetime of a simulated payment code.
const MOCK_CODE_TTL_MINUTES: i64 = 10;

/// Canonical transaction states. `Requesting` only exists while the code
/// is being generated; polling deals in the remaining four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Requesting,
    Pending,
    Paid,
    Expired,
    Error,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid | PaymentStatus::Expired | PaymentStatus::Error
        )
    }
}

#[derive(Debug, Error)]
pub enum ProcessorFailure {
    #[error("payment processor unreachable: {0}")]
    Unreachable(String),
    #[error("payment processor misconfigured: {0}")]
    Misconfigured(String),
    #[error("payment processor rejected the request: {0}")]
    Rejected(String),
}

/// A freshly generated scannable code.
#[derive(Debug, Clone)]
pub struct ProcessorCode {
    pub qr_id: String,
    pub qr_image: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// External payment processor: authenticate, generate a code, check its
/// settlement state. Implementations translate processor-specific codes
/// to [`PaymentStatus`].
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn generate_code(
        &self,
        reference: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<ProcessorCode, ProcessorFailure>;

    async fn check_status(&self, qr_id: &str) -> Result<PaymentStatus, ProcessorFailure>;
}

/// Ephemeral record correlating a payment code to the order it settles.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentTransaction {
    pub transaction_id: String,
    pub qr_id: Option<String>,
    pub qr_image: String,
    /// Staging token of the order this code pays for.
    pub order_ref: String,
    pub amount: Decimal,
    pub currency: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: PaymentStatus,
    pub is_mock: bool,
    #[serde(skip)]
    poll_count: u32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusReport {
    pub status: PaymentStatus,
    pub message: Option<String>,
}

/// In-process registry of live transactions, including the per-transaction
/// mock poll counters. Injected into the gateway at construction; cleared
/// on restart.
#[derive(Default)]
pub struct TransactionStore {
    entries: DashMap<String, PaymentTransaction>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, txn: PaymentTransaction) {
        self.entries.insert(txn.transaction_id.clone(), txn);
    }

    pub fn get(&self, transaction_id: &str) -> Option<PaymentTransaction> {
        self.entries.get(transaction_id).map(|e| e.clone())
    }

    /// Find the transaction currently settling `order_ref`. A staged
    /// order can accumulate dead codes (expired, errored) before a live
    /// one; prefer paid, then pending, so a re-minted code shadows them.
    pub fn find_by_order_ref(&self, order_ref: &str) -> Option<PaymentTransaction> {
        fn rank(status: PaymentStatus) -> u8 {
            match status {
                PaymentStatus::Paid => 3,
                PaymentStatus::Pending => 2,
                PaymentStatus::Requesting => 1,
                PaymentStatus::Expired | PaymentStatus::Error => 0,
            }
        }

        let mut best: Option<PaymentTransaction> = None;
        for entry in self.entries.iter() {
            if entry.order_ref != order_ref {
                continue;
            }
            match &best {
                Some(current) if rank(current.status) >= rank(entry.status) => {}
                _ => best = Some(entry.clone()),
            }
        }
        best
    }
}

pub struct PaymentGateway {
    processor: Option<Arc<dyn PaymentProcessor>>,
    transactions: Arc<TransactionStore>,
    currency: String,
    allow_mock: bool,
}

impl PaymentGateway {
    pub fn new(
        processor: Option<Arc<dyn PaymentProcessor>>,
        transactions: Arc<TransactionStore>,
        currency: String,
        allow_mock: bool,
    ) -> Self {
        Self {
            processor,
            transactions,
            currency,
            allow_mock,
        }
    }

    /// Ask the processor for a scannable code covering `amount`. When the
    /// processor is unreachable or unconfigured and mock mode is allowed,
    /// degrade to a simulated transaction that settles after a fixed
    /// number of polls; otherwise the failure surfaces as a processor
    /// error.
    pub async fn request_payment(
        &self,
        order_ref: &str,
        amount: Decimal,
    ) -> AppResult<PaymentTransaction> {
        let transaction_id = format!("txn-{}", Uuid::new_v4().simple());

        let failure = match &self.processor {
            Some(processor) => {
                match processor
                    .generate_code(order_ref, amount, &self.currency)
                    .await
                {
                    Ok(code) => {
                        let txn = PaymentTransaction {
                            transaction_id,
                            qr_id: Some(code.qr_id),
                            qr_image: code.qr_image,
                            order_ref: order_ref.to_string(),
                            amount,
                            currency: self.currency.clone(),
                            expires_at: code.expires_at,
                            status: PaymentStatus::Pending,
                            is_mock: false,
                            poll_count: 0,
                        };
                        self.transactions.insert(txn.clone());
                        return Ok(txn);
                    }
                    Err(failure) => failure,
                }
            }
            None => ProcessorFailure::Misconfigured("no payment processor configured".into()),
        };

        if !self.allow_mock {
            return Err(AppError::Processor(failure.to_string()));
        }

        tracing::warn!(error = %failure, order_ref = %order_ref, "falling back to mock payment");

        let txn = PaymentTransaction {
            qr_image: format!("data:text/plain,mock-qr-{transaction_id}"),
            transaction_id,
            qr_id: None,
            order_ref: order_ref.to_string(),
            amount,
            currency: self.currency.clone(),
            expires_at: Some(Utc::now() + Duration::minutes(MOCK_CODE_TTL_MINUTES)),
            status: PaymentStatus::Pending,
            is_mock: true,
            poll_count: 0,
        };
        self.transactions.insert(txn.clone());
        Ok(txn)
    }

    /// Idempotent settlement check. Terminal states are sticky; a mock
    /// transaction advances its own counter, a real one delegates to the
    /// processor. A transport failure leaves the transaction pending so a
    /// later poll can retry; only a definitive processor verdict marks it
    /// errored.
    pub async fn poll_status(&self, transaction_id: &str) -> AppResult<StatusReport> {
        let txn = self
            .transactions
            .get(transaction_id)
            .ok_or(AppError::NotFound)?;

        if txn.status.is_terminal() {
            return Ok(StatusReport {
                status: txn.status,
                message: None,
            });
        }

        if let Some(expires_at) = txn.expires_at {
            if Utc::now() > expires_at {
                self.set_status(transaction_id, PaymentStatus::Expired);
                return Ok(StatusReport {
                    status: PaymentStatus::Expired,
                    message: Some("Payment code expired".into()),
                });
            }
        }

        if txn.is_mock {
            let status = self.advance_mock(transaction_id);
            return Ok(StatusReport {
                status,
                message: None,
            });
        }

        let processor = self.processor.as_ref().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("real transaction without a processor"))
        })?;
        let qr_id = txn.qr_id.as_deref().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("real transaction without a code id"))
        })?;

        match processor.check_status(qr_id).await {
            Ok(status) => {
                self.set_status(transaction_id, status);
                Ok(StatusReport {
                    status,
                    message: None,
                })
            }
            Err(failure) => {
                tracing::warn!(
                    transaction_id = %transaction_id,
                    error = %failure,
                    "status check failed; leaving transaction pending"
                );
                Ok(StatusReport {
                    status: PaymentStatus::Pending,
                    message: Some("Status check failed, retrying".into()),
                })
            }
        }
    }

    pub fn get(&self, transaction_id: &str) -> Option<PaymentTransaction> {
        self.transactions.get(transaction_id)
    }

    pub fn find_by_order_ref(&self, order_ref: &str) -> Option<PaymentTransaction> {
        self.transactions.find_by_order_ref(order_ref)
    }

    fn set_status(&self, transaction_id: &str, status: PaymentStatus) {
        if let Some(mut entry) = self.transactions.entries.get_mut(transaction_id) {
            entry.status = status;
        }
    }

    fn advance_mock(&self, transaction_id: &str) -> PaymentStatus {
        match self.transactions.entries.get_mut(transaction_id) {
            Some(mut entry) => {
                entry.poll_count += 1;
                if entry.poll_count >= MOCK_SETTLE_AFTER_POLLS {
                    entry.status = PaymentStatus::Paid;
                }
                entry.status
            }
            None => PaymentStatus::Error,
        }
    }
}

/// Reqwest-backed processor client. Token is fetched lazily and cached
/// until shortly before its expiry.
pub struct HttpPaymentProcessor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    token: tokio::sync::Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct GenerateCodeResponse {
    qr_id: String,
    qr_image: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CodeStatusResponse {
    status: String,
}

impl HttpPaymentProcessor {
    /// Build from config; `None` when the processor is not configured.
    pub fn from_config(config: &PaymentConfig) -> Option<Self> {
        let base_url = config.base_url.clone()?;
        let api_key = config.api_key.clone()?;
        let api_secret = config.api_secret.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            token: tokio::sync::Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, ProcessorFailure> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() + Duration::seconds(30) {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/v1/auth/token", self.base_url))
            .json(&serde_json::json!({
                "api_key": self.api_key,
                "api_secret": self.api_secret,
            }))
            .send()
            .await
            .map_err(|e| ProcessorFailure::Unreachable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProcessorFailure::Misconfigured(
                "credentials rejected".into(),
            ));
        }
        if !response.status().is_success() {
            return Err(ProcessorFailure::Rejected(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProcessorFailure::Rejected(e.to_string()))?;

        let token = CachedToken {
            access_token: body.access_token.clone(),
            expires_at: Utc::now() + Duration::seconds(body.expires_in),
        };
        *cached = Some(token);
        Ok(body.access_token)
    }

    fn translate_status(raw: &str) -> PaymentStatus {
        match raw.to_ascii_uppercase().as_str() {
            "CREATED" | "PENDING" | "IN_PROGRESS" => PaymentStatus::Pending,
            "PAID" | "SETTLED" | "COMPLETED" => PaymentStatus::Paid,
            "EXPIRED" | "TIMED_OUT" => PaymentStatus::Expired,
            _ => PaymentStatus::Error,
        }
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    async fn generate_code(
        &self,
        reference: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<ProcessorCode, ProcessorFailure> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}/v1/codes", self.base_url))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "reference": reference,
                "amount": amount,
                "currency": currency,
            }))
            .send()
            .await
            .map_err(|e| ProcessorFailure::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProcessorFailure::Rejected(format!(
                "code endpoint returned {}",
                response.status()
            )));
        }

        let body: GenerateCodeResponse = response
            .json()
            .await
            .map_err(|e| ProcessorFailure::Rejected(e.to_string()))?;

        Ok(ProcessorCode {
            qr_id: body.qr_id,
            qr_image: body.qr_image,
            expires_at: body.expires_at,
        })
    }

    async fn check_status(&self, qr_id: &str) -> Result<PaymentStatus, ProcessorFailure> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/v1/codes/{qr_id}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProcessorFailure::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProcessorFailure::Rejected(format!(
                "status endpoint returned {}",
                response.status()
            )));
        }

        let body: CodeStatusResponse = response
            .json()
            .await
            .map_err(|e| ProcessorFailure::Rejected(e.to_string()))?;

        Ok(Self::translate_status(&body.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnreachableProcessor;

    #[async_trait]
    impl PaymentProcessor for UnreachableProcessor {
        async fn generate_code(
            &self,
            _reference: &str,
            _amount: Decimal,
            _currency: &str,
        ) -> Result<ProcessorCode, ProcessorFailure> {
            Err(ProcessorFailure::Unreachable("connection refused".into()))
        }

        async fn check_status(&self, _qr_id: &str) -> Result<PaymentStatus, ProcessorFailure> {
            Err(ProcessorFailure::Unreachable("connection refused".into()))
        }
    }

    fn mock_gateway() -> PaymentGateway {
        PaymentGateway::new(
            None,
            Arc::new(TransactionStore::new()),
            "SAR".into(),
            true,
        )
    }

    #[tokio::test]
    async fn unconfigured_processor_falls_back_to_mock() {
        let gateway = mock_gateway();
        let txn = gateway
            .request_payment("stg-1", Decimal::from(206))
            .await
            .unwrap();
        assert!(txn.is_mock);
        assert_eq!(txn.status, PaymentStatus::Pending);
        assert!(!txn.qr_image.is_empty());
    }

    #[tokio::test]
    async fn unreachable_processor_falls_back_when_allowed() {
        let gateway = PaymentGateway::new(
            Some(Arc::new(UnreachableProcessor)),
            Arc::new(TransactionStore::new()),
            "SAR".into(),
            true,
        );
        let txn = gateway
            .request_payment("stg-1", Decimal::from(100))
            .await
            .unwrap();
        assert!(txn.is_mock);
    }

    #[tokio::test]
    async fn production_config_never_reaches_mock() {
        let gateway = PaymentGateway::new(
            Some(Arc::new(UnreachableProcessor)),
            Arc::new(TransactionStore::new()),
            "SAR".into(),
            false,
        );
        let err = gateway
            .request_payment("stg-1", Decimal::from(100))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Processor(_)));
    }

    #[tokio::test]
    async fn mock_settles_after_fixed_polls() {
        let gateway = mock_gateway();
        let txn = gateway
            .request_payment("stg-1", Decimal::from(206))
            .await
            .unwrap();

        for _ in 0..MOCK_SETTLE_AFTER_POLLS - 1 {
            let report = gateway.poll_status(&txn.transaction_id).await.unwrap();
            assert_eq!(report.status, PaymentStatus::Pending);
        }
        let report = gateway.poll_status(&txn.transaction_id).await.unwrap();
        assert_eq!(report.status, PaymentStatus::Paid);

        // Terminal states are sticky.
        let report = gateway.poll_status(&txn.transaction_id).await.unwrap();
        assert_eq!(report.status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn mock_counters_are_isolated_per_transaction() {
        let gateway = mock_gateway();
        let a = gateway
            .request_payment("stg-a", Decimal::from(50))
            .await
            .unwrap();
        let b = gateway
            .request_payment("stg-b", Decimal::from(60))
            .await
            .unwrap();

        for _ in 0..MOCK_SETTLE_AFTER_POLLS {
            gateway.poll_status(&a.transaction_id).await.unwrap();
        }

        // Transaction B's counter never moved.
        assert_eq!(
            gateway.poll_status(&a.transaction_id).await.unwrap().status,
            PaymentStatus::Paid
        );
        assert_eq!(
            gateway.poll_status(&b.transaction_id).await.unwrap().status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn unknown_transactions_are_not_found() {
        let gateway = mock_gateway();
        assert!(matches!(
            gateway.poll_status("txn-missing").await.unwrap_err(),
            AppError::NotFound
        ));
    }

    #[test]
    fn processor_status_translation() {
        assert_eq!(
            HttpPaymentProcessor::translate_status("pending"),
            PaymentStatus::Pending
        );
        assert_eq!(
            HttpPaymentProcessor::translate_status("SETTLED"),
            PaymentStatus::Paid
        );
        assert_eq!(
            HttpPaymentProcessor::translate_status("Expired"),
            PaymentStatus::Expired
        );
        assert_eq!(
            HttpPaymentProcessor::translate_status("DECLINED"),
            PaymentStatus::Error
        );
    }

    #[tokio::test]
    async fn transactions_are_found_by_order_ref() {
        let gateway = mock_gateway();
        let txn = gateway
            .request_payment("stg-xyz", Decimal::from(10))
            .await
            .unwrap();
        let found = gateway.find_by_order_ref("stg-xyz").unwrap();
        assert_eq!(found.transaction_id, txn.transaction_id);
        assert!(gateway.find_by_order_ref("stg-other").is_none());
    }
}
