//! Role-scoped status transitions.
//!
//! Each role owns a slice of the status chain:
//!
//! | role       | may set                                                  |
//! |------------|----------------------------------------------------------|
//! | restaurant | `confirmed`, `preparing`, `ready-for-pickup`, `cancelled` |
//! | rider      | `out-for-delivery`, `delivered`                          |
//! | customer   | nothing                                                  |
//!
//! [`plan_transition`] runs the checks against a snapshot of the order and
//! returns an [`AppliedTransition`]; the store commits it only if the order
//! has not moved since the snapshot was read.

use serde::Deserialize;

use crate::{
    directory::{RestaurantDirectory, User, UserDirectory},
    errors::{OrderError, Resource},
    orders::{Order, OrderStatus, Role, UserId},
};

const WHITELIST: [(Role, &[OrderStatus]); 3] = [
    (
        Role::Restaurant,
        &[
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::ReadyForPickup,
            OrderStatus::Cancelled,
        ],
    ),
    (
        Role::Rider,
        &[OrderStatus::OutForDelivery, OrderStatus::Delivered],
    ),
    (Role::Customer, &[]),
];

/// Statuses `role` is allowed to request.
pub fn permitted_statuses(role: Role) -> &'static [OrderStatus] {
    WHITELIST
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, statuses)| *statuses)
        .unwrap_or(&[])
}

pub fn is_permitted(role: Role, status: OrderStatus) -> bool {
    permitted_statuses(role).contains(&status)
}

/// A caller's request to move an order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    #[serde(alias = "targetStatus")]
    pub status: OrderStatus,
    #[serde(default)]
    pub rider_id: Option<UserId>,
    /// Optimistic precondition: the status the caller last saw.
    #[serde(default)]
    pub expected_status: Option<OrderStatus>,
}

impl TransitionRequest {
    pub fn to(status: OrderStatus) -> Self {
        Self {
            status,
            rider_id: None,
            expected_status: None,
        }
    }

    pub fn with_rider(mut self, rider: UserId) -> Self {
        self.rider_id = Some(rider);
        self
    }

    pub fn expecting(mut self, status: OrderStatus) -> Self {
        self.expected_status = Some(status);
        self
    }

    /// Shape checks that need no order state.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.rider_id.is_some() && self.status != OrderStatus::ReadyForPickup {
            return Err(OrderError::Validation(
                "riderId can only be supplied with status ready-for-pickup".into(),
            ));
        }
        Ok(())
    }
}

/// The outcome of a validated transition, ready to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// Version of the snapshot the plan was made against.
    pub expected_version: u64,
    /// Rider bound by this transition (first and only binding).
    pub bind_rider: Option<UserId>,
    pub delivered_at: Option<u64>,
}

impl AppliedTransition {
    /// Writes the transition onto `order`. Callers must have checked
    /// `order.version == self.expected_version`.
    pub fn apply_to(&self, order: &mut Order) {
        order.status = self.to;
        if let (None, Some(rider)) = (order.rider_id, self.bind_rider) {
            order.rider_id = Some(rider);
        }
        if self.to == OrderStatus::Delivered {
            order.delivered_at = self.delivered_at;
        }
        order.version += 1;
    }
}

/// Checks that `actor` may act on `order` at all.
///
/// Restaurant owners must own the order's restaurant, riders must be the
/// rider bound to it, customers must have placed it.
pub fn authorize_actor(
    order: &Order,
    actor: &User,
    restaurants: &dyn RestaurantDirectory,
) -> Result<(), OrderError> {
    let allowed = match actor.role {
        Role::Restaurant => restaurants
            .restaurant_by_owner(actor.id)
            .is_some_and(|r| r.id == order.restaurant_id),
        Role::Rider => order.rider_id == Some(actor.id),
        Role::Customer => order.customer_id == actor.id,
    };
    if allowed {
        Ok(())
    } else {
        Err(OrderError::NotAuthorized)
    }
}

/// Validates `req` against a snapshot of `order`, in this order:
///
/// 1. the actor is authorized for the order,
/// 2. the requested status is in the actor role's whitelist,
/// 3. the order is not already terminal,
/// 4. the optional expected status still matches,
/// 5. the move goes forward along the status chain (or repeats
///    `ready-for-pickup` to bind a rider the order does not have yet),
/// 6. a rider supplied with `ready-for-pickup` exists and is a rider.
///
/// Nothing is mutated; a failed plan leaves the order untouched.
pub fn plan_transition(
    order: &Order,
    actor: &User,
    req: &TransitionRequest,
    restaurants: &dyn RestaurantDirectory,
    users: &dyn UserDirectory,
    now_ms: u64,
) -> Result<AppliedTransition, OrderError> {
    req.validate()?;
    authorize_actor(order, actor, restaurants)?;

    if !is_permitted(actor.role, req.status) {
        return Err(OrderError::InvalidStatusForRole {
            role: actor.role,
            status: req.status,
        });
    }
    if order.status.is_terminal() {
        return Err(OrderError::OrderAlreadyFinalized(order.status));
    }
    if let Some(expected) = req.expected_status {
        if expected != order.status {
            return Err(OrderError::ConcurrentModification);
        }
    }
    // an owner who marked the order ready without a rider binds one later
    // by repeating ready-for-pickup with a riderId
    let late_binding = order.status == OrderStatus::ReadyForPickup
        && req.status == OrderStatus::ReadyForPickup
        && req.rider_id.is_some()
        && order.rider_id.is_none();
    if !late_binding && !order.status.can_advance_to(req.status) {
        return Err(OrderError::InvalidTransition {
            from: order.status,
            to: req.status,
        });
    }

    let bind_rider = match (req.status, req.rider_id) {
        (OrderStatus::ReadyForPickup, Some(rider_id)) => {
            let is_rider = users.user(rider_id).is_some_and(|u| u.role == Role::Rider);
            if !is_rider {
                return Err(OrderError::NotFound(Resource::Rider));
            }
            match order.rider_id {
                None => Some(rider_id),
                Some(bound) if bound == rider_id => None,
                Some(_) => {
                    return Err(OrderError::Validation(
                        "order already has a rider assigned".into(),
                    ));
                }
            }
        }
        _ => None,
    };

    Ok(AppliedTransition {
        from: order.status,
        to: req.status,
        expected_version: order.version,
        bind_rider,
        delivered_at: (req.status == OrderStatus::Delivered).then_some(now_ms),
    })
}
