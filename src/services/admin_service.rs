use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{OrderList, OrderWithItems},
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    response::{ApiResponse, Meta},
    routes::admin::{TransitionOutcome, UpdateOrderStatusRequest},
    routes::params::{OrderListQuery, SortOrder},
    services::order_service::{order_from_entity, order_item_from_entity},
    state::AppState,
    status::{OrderFlags, OrderStatus, plan_transition},
};

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let mut finder = Orders::find().filter(condition);

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
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
    let order_list = OrderList { items: orders };

    Ok(ApiResponse::success("Orders", order_list, Some(meta)))
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    let order = Orders::find_by_id(id).one(&state.orm).await?;
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

    let data = OrderWithItems { order, items };
    Ok(ApiResponse::success("Order found", data, Some(Meta::empty())))
}

/// Drive one order through the lifecycle machine. A rejected transition
/// comes back as a structured `{success: false, message}` payload so the
/// back-office UI can render it inline instead of treating it as a crash.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<TransitionOutcome>> {
    ensure_admin(user)?;

    let existing = Orders::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let current = OrderStatus::parse(&existing.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "unknown order status {:?} on order {}",
            existing.status,
            existing.id
        ))
    })?;
    let flags = OrderFlags {
        is_paid: existing.is_paid,
        is_delivered: existing.is_delivered,
    };

    let plan = match plan_transition(current, flags, payload.status) {
        Ok(plan) => plan,
        Err(rejected) => {
            return Ok(ApiResponse::success(
                "Transition rejected",
                TransitionOutcome {
                    success: false,
                    message: rejected.to_string(),
                    order: None,
                },
                Some(Meta::empty()),
            ));
        }
    };

    let now = Utc::now();
    let had_paid_at = existing.paid_at.is_some();
    let had_delivered_at = existing.delivered_at.is_some();

    let mut active: OrderActive = existing.into();
    active.status = Set(plan.status.as_str().to_string());
    match plan.set_paid {
        Some(true) => {
            active.is_paid = Set(true);
            // Re-asserting payment keeps the original settlement time.
            if !had_paid_at {
                active.paid_at = Set(Some(now.into()));
            }
        }
        Some(false) => {
            active.is_paid = Set(false);
            active.paid_at = Set(None);
        }
        None => {}
    }
    match plan.set_delivered {
        Some(true) => {
            active.is_delivered = Set(true);
            if !had_delivered_at {
                active.delivered_at = Set(Some(now.into()));
            }
        }
        Some(false) => {
            active.is_delivered = Set(false);
            active.delivered_at = Set(None);
        }
        None => {}
    }
    active.updated_at = Set(now.into());
    let order = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": order.id,
            "from": current.as_str(),
            "to": order.status,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let order = order_from_entity(order)?;
    Ok(ApiResponse::success(
        "Order updated",
        TransitionOutcome {
            success: true,
            message: format!("Order moved to {}", order.status),
            order: Some(order),
        },
        Some(Meta::empty()),
    ))
}
