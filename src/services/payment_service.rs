use crate::{
    audit::log_audit,
    dto::payments::{PaymentCodeResponse, RequestPaymentRequest},
    error::{AppError, AppResult},
    payment::{PaymentStatus, PaymentTransaction, StatusReport},
    response::{ApiResponse, Meta},
    services::order_service,
    state::AppState,
};

/// Generate (or re-use) a scannable code for a staged order. The amount
/// is always taken from the staging record; a client-sent amount would
/// let the buyer pick their own price.
pub async fn request_payment_code(
    state: &AppState,
    payload: RequestPaymentRequest,
) -> AppResult<ApiResponse<PaymentCodeResponse>> {
    let record = state
        .staging
        .get(&payload.staging_token)
        .await?
        .ok_or(AppError::NotFound)?;

    // Refreshing the payment screen must not mint a second code for the
    // same staged order.
    if let Some(existing) = state.gateway.find_by_order_ref(&record.token) {
        if !matches!(
            existing.status,
            PaymentStatus::Expired | PaymentStatus::Error
        ) {
            return Ok(code_response(&existing));
        }
    }

    let txn = state
        .gateway
        .request_payment(&record.token, record.quote.total)
        .await?;

    if let Err(err) = log_audit(
        &state.pool,
        record.user_id,
        "payment_requested",
        Some("payments"),
        Some(serde_json::json!({
            "transaction_id": txn.transaction_id,
            "amount": txn.amount,
            "is_mock": txn.is_mock,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    spawn_status_poller(state.clone(), txn.transaction_id.clone());

    Ok(code_response(&txn))
}

pub async fn get_payment_status(
    state: &AppState,
    transaction_id: &str,
) -> AppResult<ApiResponse<StatusReport>> {
    let report = state.gateway.poll_status(transaction_id).await?;
    Ok(ApiResponse::success("OK", report, Some(Meta::empty())))
}

fn code_response(txn: &PaymentTransaction) -> ApiResponse<PaymentCodeResponse> {
    ApiResponse::success(
        "Scan to pay",
        PaymentCodeResponse {
            transaction_id: txn.transaction_id.clone(),
            qr_image: txn.qr_image.clone(),
            qr_id: txn.qr_id.clone(),
            expires_at: txn.expires_at,
            is_mock: txn.is_mock,
        },
        Some(Meta::empty()),
    )
}

/// Watch one transaction until it settles or dies. A single task owns
/// the cadence, each poll is awaited before the next tick, so overlapping
/// polls for the same transaction cannot start; shutdown cancels the loop
/// without cancelling the code at the processor.
pub fn spawn_status_poller(state: AppState, transaction_id: String) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.poll_interval);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => {
                    tracing::debug!(transaction_id = %transaction_id, "status poller stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let report = match state.gateway.poll_status(&transaction_id).await {
                Ok(report) => report,
                Err(err) => {
                    tracing::warn!(transaction_id = %transaction_id, error = %err, "status poll failed");
                    continue;
                }
            };

            match report.status {
                PaymentStatus::Paid => {
                    let Some(txn) = state.gateway.get(&transaction_id) else {
                        return;
                    };
                    if let Err(err) =
                        order_service::materialize_order(&state, &txn.order_ref).await
                    {
                        // The confirm endpoint can still retry from the
                        // restored staging record; this only ends the
                        // poller's attempt.
                        tracing::error!(
                            transaction_id = %transaction_id,
                            error = %err,
                            "materialization after settled payment failed"
                        );
                    }
                    return;
                }
                PaymentStatus::Expired | PaymentStatus::Error => {
                    tracing::info!(
                        transaction_id = %transaction_id,
                        status = ?report.status,
                        "payment transaction closed without settlement"
                    );
                    return;
                }
                PaymentStatus::Pending | PaymentStatus::Requesting => {}
            }
        }
    });
}
