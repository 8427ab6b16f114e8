use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Order lifecycle states. The admin UI derives its flags from this enum
/// plus the planned side effects, never the other way around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid order transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Payment/delivery flags as currently stored on the order.
#[derive(Debug, Clone, Copy)]
pub struct OrderFlags {
    pub is_paid: bool,
    pub is_delivered: bool,
}

/// The computed outcome of an allowed transition. `set_paid` /
/// `set_delivered` are `None` when the flag must be left untouched
/// (cancellation keeps payment flags as historical fact).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub status: OrderStatus,
    pub set_paid: Option<bool>,
    pub set_delivered: Option<bool>,
}

/// Decide whether `target` is reachable from `current` and which flag
/// updates come with it. Rules:
///
/// - pending -> paid marks the order paid
/// - pending/paid -> cancelled keeps flags untouched
/// - paid -> shipped re-asserts the paid flag
/// - any non-delivered status -> delivered marks delivered and self-heals
///   the paid flag instead of rejecting unpaid deliveries
/// - delivered -> paid un-delivers (delivery flag cleared, payment kept)
/// - paid -> pending un-pays, rejected once the order was delivered
pub fn plan_transition(
    current: OrderStatus,
    flags: OrderFlags,
    target: OrderStatus,
) -> Result<TransitionPlan, InvalidTransition> {
    use OrderStatus::*;

    let rejected = InvalidTransition {
        from: current,
        to: target,
    };

    let plan = match (current, target) {
        (Pending, Paid) => TransitionPlan {
            status: Paid,
            set_paid: Some(true),
            set_delivered: None,
        },
        (Pending, Cancelled) | (Paid, Cancelled) => TransitionPlan {
            status: Cancelled,
            set_paid: None,
            set_delivered: None,
        },
        (Paid, Shipped) => TransitionPlan {
            status: Shipped,
            set_paid: Some(true),
            set_delivered: None,
        },
        (from, Delivered) if from != Delivered => TransitionPlan {
            status: Delivered,
            set_paid: Some(true),
            set_delivered: Some(true),
        },
        (Delivered, Paid) => TransitionPlan {
            // Reverting delivery falls back to pending when the payment
            // flag was somehow never set.
            status: if flags.is_paid { Paid } else { Pending },
            set_paid: None,
            set_delivered: Some(false),
        },
        (Paid, Pending) => {
            if flags.is_delivered {
                return Err(rejected);
            }
            TransitionPlan {
                status: Pending,
                set_paid: Some(false),
                set_delivered: None,
            }
        }
        _ => return Err(rejected),
    };

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    fn flags(is_paid: bool, is_delivered: bool) -> OrderFlags {
        OrderFlags {
            is_paid,
            is_delivered,
        }
    }

    #[test]
    fn pending_to_paid_sets_payment_flag() {
        let plan = plan_transition(Pending, flags(false, false), Paid).unwrap();
        assert_eq!(plan.status, Paid);
        assert_eq!(plan.set_paid, Some(true));
        assert_eq!(plan.set_delivered, None);
    }

    #[test]
    fn cancellation_leaves_flags_as_historical_fact() {
        for from in [Pending, Paid] {
            let plan = plan_transition(from, flags(from == Paid, false), Cancelled).unwrap();
            assert_eq!(plan.status, Cancelled);
            assert_eq!(plan.set_paid, None);
            assert_eq!(plan.set_delivered, None);
        }
    }

    #[test]
    fn shipping_reasserts_payment() {
        let plan = plan_transition(Paid, flags(true, false), Shipped).unwrap();
        assert_eq!(plan.status, Shipped);
        assert_eq!(plan.set_paid, Some(true));
    }

    #[test]
    fn delivery_self_heals_unpaid_orders() {
        for from in [Pending, Paid, Shipped, Cancelled] {
            let plan = plan_transition(from, flags(false, false), Delivered).unwrap();
            assert_eq!(plan.status, Delivered);
            assert_eq!(plan.set_paid, Some(true));
            assert_eq!(plan.set_delivered, Some(true));
        }
    }

    #[test]
    fn undeliver_reverts_to_paid_and_clears_delivery() {
        let plan = plan_transition(Delivered, flags(true, true), Paid).unwrap();
        assert_eq!(plan.status, Paid);
        assert_eq!(plan.set_paid, None);
        assert_eq!(plan.set_delivered, Some(false));

        let plan = plan_transition(Delivered, flags(false, true), Paid).unwrap();
        assert_eq!(plan.status, Pending);
    }

    #[test]
    fn unpay_rejected_for_delivered_orders() {
        let err = plan_transition(Delivered, flags(true, true), Pending).unwrap_err();
        assert_eq!(err.from, Delivered);
        assert_eq!(err.to, Pending);

        // Flag drift: status says paid but delivery flag already set.
        assert!(plan_transition(Paid, flags(true, true), Pending).is_err());
    }

    #[test]
    fn unpay_allowed_before_delivery() {
        let plan = plan_transition(Paid, flags(true, false), Pending).unwrap();
        assert_eq!(plan.status, Pending);
        assert_eq!(plan.set_paid, Some(false));
    }

    #[test]
    fn totality_over_all_pairs() {
        // Every (from, to) pair either matches an explicitly allowed rule
        // or fails with InvalidTransition naming the pair.
        let allowed = |from: OrderStatus, to: OrderStatus, f: OrderFlags| -> bool {
            match (from, to) {
                (Pending, Paid)
                | (Pending, Cancelled)
                | (Paid, Cancelled)
                | (Paid, Shipped)
                | (Delivered, Paid) => true,
                (_, Delivered) => from != Delivered,
                (Paid, Pending) => !f.is_delivered,
                _ => false,
            }
        };

        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                let f = flags(from != Pending, from == Delivered);
                let result = plan_transition(from, f, to);
                assert_eq!(
                    result.is_ok(),
                    allowed(from, to, f),
                    "unexpected verdict for {from} -> {to}"
                );
                if let Err(err) = result {
                    assert_eq!((err.from, err.to), (from, to));
                }
            }
        }
    }
}
