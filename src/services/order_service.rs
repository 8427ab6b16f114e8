use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    cart::Shopper,
    dto::checkout::ConfirmCheckoutResponse,
    dto::orders::{OrderList, OrderLookupRequest, OrderLookupResponse, OrderWithItems},
    entity::{
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, SellingMethod, ShippingAddress},
    payment::PaymentStatus,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    staging::StagingRecord,
    state::AppState,
    status::OrderStatus,
};

/// Convert a staged checkout into the durable order, exactly once.
///
/// The staging token is the idempotency key end to end: a UNIQUE column
/// on the order row backstops the check-and-delete on the staging store,
/// so a duplicate "paid" notification (second poll tick, double confirm
/// click) finds the existing order and no-ops instead of charging twice.
pub async fn materialize_order(
    state: &AppState,
    staging_token: &str,
) -> AppResult<ApiResponse<ConfirmCheckoutResponse>> {
    // One materialization at a time: a concurrent duplicate waits here
    // and then finds the committed order instead of a half-built one.
    let _serialized = state.materialize_lock.lock().await;

    // Duplicate notification: the order already exists, report success.
    if let Some(existing) = Orders::find()
        .filter(OrderCol::StagingToken.eq(staging_token))
        .one(&state.orm)
        .await?
    {
        return Ok(confirmed_response(&existing, false));
    }

    // Only a transaction observed `paid` may trigger materialization.
    let txn = state
        .gateway
        .find_by_order_ref(staging_token)
        .ok_or_else(|| AppError::Validation("Payment not confirmed".into()))?;
    let status = if txn.status == PaymentStatus::Paid {
        txn.status
    } else {
        // The client may confirm before our poller saw the settlement;
        // one idempotent poll closes that gap.
        state.gateway.poll_status(&txn.transaction_id).await?.status
    };
    if status != PaymentStatus::Paid {
        return Err(AppError::Validation("Payment not confirmed".into()));
    }

    // Check-and-delete: at most one caller proceeds past this point.
    let record = match state.staging.take(staging_token).await? {
        Some(record) => record,
        None => {
            // Lost the race with another confirmation, or the session
            // expired. An existing order means the former.
            if let Some(existing) = Orders::find()
                .filter(OrderCol::StagingToken.eq(staging_token))
                .one(&state.orm)
                .await?
            {
                return Ok(confirmed_response(&existing, false));
            }
            return Err(AppError::NotFound);
        }
    };

    match insert_order(state, &record).await {
        Ok(order) => {
            let owner = record.cart_owner.clone();
            if let Err(err) = state.cart_repo(&owner).clear(&owner).await {
                tracing::warn!(error = %err, order_id = %order.id, "failed to clear source cart");
            }

            if let Err(err) = log_audit(
                &state.pool,
                record.user_id,
                "order_materialized",
                Some("orders"),
                Some(serde_json::json!({ "order_id": order.id, "total": order.total_price })),
            )
            .await
            {
                tracing::warn!(error = %err, "audit log failed");
            }

            let clear_local_cart = matches!(owner, Shopper::Guest(_));
            Ok(confirmed_response(&order, clear_local_cart))
        }
        Err(err) => {
            // Money has already moved. Put the snapshot back so the buyer
            // can retry, and leave a loud trail for manual reconciliation.
            tracing::error!(
                staging_token = %staging_token,
                error = %err,
                "payment settled but order materialization failed; manual reconciliation required"
            );
            if let Err(restore_err) = state.staging.put(record).await {
                tracing::error!(error = %restore_err, "failed to restore staging record");
            }
            Err(err)
        }
    }
}

async fn insert_order(state: &AppState, record: &StagingRecord) -> AppResult<OrderModel> {
    let order_id = Uuid::new_v4();
    let now = Utc::now();
    let shipping_address = serde_json::to_value(&record.shipping_address)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    // Header and line snapshots land in one transaction, so a failed item
    // insert rolls the header back instead of leaving an empty order.
    let txn = state.orm.begin().await?;

    let order = OrderActive {
        id: Set(order_id),
        user_id: Set(record.user_id),
        reference: Set(build_reference(order_id)),
        staging_token: Set(record.token.clone()),
        phone_number: Set(record.phone_number.clone()),
        subtotal: Set(record.quote.subtotal),
        service_fee: Set(record.quote.service_fee),
        delivery_fee: Set(record.quote.delivery_fee),
        total_price: Set(record.quote.total),
        status: Set(OrderStatus::Paid.as_str().to_string()),
        is_paid: Set(true),
        paid_at: Set(Some(now.into())),
        is_delivered: Set(false),
        delivered_at: Set(None),
        shipping_address: Set(shipping_address),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    for item in &record.items {
        OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(item.product_id),
            name: Set(item.name.clone()),
            price: Set(item.price),
            image: Set(item.image.clone()),
            selling_method: Set(item.selling_method.as_str().to_string()),
            quantity: Set(item.quantity.map(|q| q as i32)),
            weight: Set(item.weight),
            weight_unit: Set(item.weight_unit.clone()),
            line_total: Set(item.line_total()),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
    }

    txn.commit().await?;
    Ok(order)
}

fn confirmed_response(
    order: &OrderModel,
    clear_local_cart: bool,
) -> ApiResponse<ConfirmCheckoutResponse> {
    ApiResponse::success(
        "Order confirmed",
        ConfirmCheckoutResponse {
            order_id: order.id,
            reference: order.reference.clone(),
            clear_local_cart,
        },
        Some(Meta::empty()),
    )
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect::<AppResult<Vec<_>>>()?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => order_from_entity(o)?,
        None => return Err(AppError::NotFound),
    };

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect::<AppResult<Vec<_>>>()?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

/// Guest order lookup: the reference and the phone number must both
/// match. Any mismatch yields the same generic not-found, so the
/// response never reveals which half was wrong.
pub async fn lookup_guest_order(
    state: &AppState,
    payload: OrderLookupRequest,
) -> AppResult<ApiResponse<OrderLookupResponse>> {
    let candidates = find_by_reference(state, payload.order_ref.trim()).await?;

    let mut matched = candidates
        .into_iter()
        .filter(|order| phone_matches(&order.phone_number, &payload.phone_number));

    match (matched.next(), matched.next()) {
        (Some(order), None) => Ok(ApiResponse::success(
            "Order found",
            OrderLookupResponse {
                verified: true,
                order_id: order.id,
            },
            Some(Meta::empty()),
        )),
        // Zero hits and ambiguous prefixes look identical from outside.
        _ => Err(AppError::NotFound),
    }
}

/// Resolution priority: full id, exact reference, case-insensitive
/// reference, then a prefix of at least six characters. Substring
/// matching in both directions was deliberately dropped; short inputs
/// matching unrelated orders is worse than asking the buyer to retype.
async fn find_by_reference(state: &AppState, order_ref: &str) -> AppResult<Vec<OrderModel>> {
    if order_ref.len() < 6 {
        return Ok(Vec::new());
    }

    if let Ok(id) = Uuid::parse_str(order_ref) {
        return Ok(Orders::find_by_id(id)
            .one(&state.orm)
            .await?
            .into_iter()
            .collect());
    }

    let exact = Orders::find()
        .filter(OrderCol::Reference.eq(order_ref))
        .one(&state.orm)
        .await?;
    if let Some(order) = exact {
        return Ok(vec![order]);
    }

    let sanitized: String = order_ref
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if sanitized.len() < 6 {
        return Ok(Vec::new());
    }

    let case_insensitive = Orders::find()
        .filter(Expr::col(OrderCol::Reference).ilike(sanitized.clone()))
        .one(&state.orm)
        .await?;
    if let Some(order) = case_insensitive {
        return Ok(vec![order]);
    }

    let prefixed = Orders::find()
        .filter(Expr::col(OrderCol::Reference).ilike(format!("{sanitized}%")))
        .limit(10)
        .all(&state.orm)
        .await?;
    Ok(prefixed)
}

/// Digit-normalized comparison tolerating country-code prefixes: equal
/// digits, or one is a suffix of the other and the shorter side still
/// has at least nine digits. Covers "+966 55 123 4567" against
/// "0551234567" without letting short fragments over-match.
fn phone_matches(stored: &str, provided: &str) -> bool {
    let a = normalize_phone(stored);
    let b = normalize_phone(provided);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let (longer, shorter) = if a.len() >= b.len() { (&a, &b) } else { (&b, &a) };
    shorter.len() >= 9 && longer.ends_with(shorter.as_str())
}

/// Digits only, minus the local trunk prefix, so "05x" and "+966 5x"
/// forms compare equal.
fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.trim_start_matches('0').to_string()
}

fn build_reference(order_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = order_id.simple().to_string();
    format!("ORD-{}-{}", date, &suffix[..8])
}

pub(crate) fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    let status = OrderStatus::parse(&model.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "unknown order status {:?} on order {}",
            model.status,
            model.id
        ))
    })?;
    let shipping_address: ShippingAddress = serde_json::from_value(model.shipping_address)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    Ok(Order {
        id: model.id,
        user_id: model.user_id,
        reference: model.reference,
        phone_number: model.phone_number,
        subtotal: model.subtotal,
        service_fee: model.service_fee,
        delivery_fee: model.delivery_fee,
        total_price: model.total_price,
        status,
        is_paid: model.is_paid,
        paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
        is_delivered: model.is_delivered,
        delivered_at: model.delivered_at.map(|dt| dt.with_timezone(&Utc)),
        shipping_address,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

pub(crate) fn order_item_from_entity(model: OrderItemModel) -> AppResult<OrderItem> {
    let selling_method = SellingMethod::parse(&model.selling_method).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "unknown selling method {:?} on order item {}",
            model.selling_method,
            model.id
        ))
    })?;
    Ok(OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        name: model.name,
        price: model.price,
        image: model.image,
        selling_method,
        quantity: model.quantity,
        weight: model.weight,
        weight_unit: model.weight_unit,
        line_total: model.line_total,
        created_at: model.created_at.with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_matching_tolerates_formatting_only() {
        assert!(phone_matches("0551234567", "055 123 4567"));
        assert!(phone_matches("+966551234567", "966551234567"));
        // Country-code vs local trunk prefix.
        assert!(phone_matches("+966551234567", "0551234567"));
        assert!(phone_matches("0551234567", "+966 55 123 4567"));
        assert!(phone_matches("+966551234567", "551234567"));
        assert!(phone_matches("551234567", "+966551234567"));
    }

    #[test]
    fn phone_matching_rejects_short_or_different_numbers() {
        assert!(!phone_matches("0551234567", "0559999999"));
        // A short suffix is not enough to claim a match.
        assert!(!phone_matches("0551234567", "34567"));
        assert!(!phone_matches("", "0551234567"));
        assert!(!phone_matches("no digits", "also none"));
    }

    #[test]
    fn references_are_short_and_dated() {
        let id = Uuid::new_v4();
        let reference = build_reference(id);
        assert!(reference.starts_with("ORD-"));
        let parts: Vec<&str> = reference.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 8);
        assert!(id.simple().to_string().starts_with(parts[2]));
    }
}
