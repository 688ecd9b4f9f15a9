use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::OrderError;

pub type OrderId = Uuid;
pub type UserId = Uuid;
pub type RestaurantId = Uuid;
pub type MenuItemId = Uuid;

/// Where an order sits in its lifecycle.
///
/// The happy path is a straight chain:
///
/// `Placed → Confirmed → Preparing → ReadyForPickup → OutForDelivery → Delivered`
///
/// `Cancelled` can be reached from any non-terminal status. `Delivered` and
/// `Cancelled` are terminal: nothing moves an order out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    Placed,
    Confirmed,
    Preparing,
    ReadyForPickup,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Placed,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::ReadyForPickup,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Position on the delivery chain. `Cancelled` sits off the chain.
    pub fn rank(self) -> Option<u8> {
        match self {
            OrderStatus::Placed => Some(0),
            OrderStatus::Confirmed => Some(1),
            OrderStatus::Preparing => Some(2),
            OrderStatus::ReadyForPickup => Some(3),
            OrderStatus::OutForDelivery => Some(4),
            OrderStatus::Delivered => Some(5),
            OrderStatus::Cancelled => None,
        }
    }

    /// True when moving from `self` to `next` goes forward along the chain
    /// (forward skips included) or cancels a live order.
    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            (_, None) => true,
            (None, Some(_)) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Placed => "placed",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::ReadyForPickup => "ready-for-pickup",
            OrderStatus::OutForDelivery => "out-for-delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown order status: `{}`", s))
    }
}

/// The role a user acts in. Comes from the user directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Customer,
    /// Owner of a restaurant.
    Restaurant,
    Rider,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Customer, Role::Restaurant, Role::Rider];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Customer => "customer",
            Role::Restaurant => "restaurant",
            Role::Rider => "rider",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    Cash,
    CreditCard,
    DebitCard,
    Wallet,
}

/// Recorded only; owned by the payment collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
}

impl DeliveryAddress {
    pub fn validate(&self) -> Result<(), OrderError> {
        let fields = [
            ("street", &self.street),
            ("city", &self.city),
            ("state", &self.state),
            ("zipCode", &self.zip_code),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(OrderError::Validation(format!(
                "deliveryAddress.{} is required",
                name
            )));
        }
        if let Some(p) = self.coordinates {
            if !p.lat.is_finite() || !p.lng.is_finite() {
                return Err(OrderError::Validation(
                    "deliveryAddress.coordinates must be finite numbers".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Last reported rider position. Overwritten on every update, never historized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiderLocation {
    pub lat: f64,
    pub lng: f64,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
}

/// One line of an order. `unit_price_cents` is a snapshot taken from the menu
/// at creation time and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub menu_item_id: MenuItemId,
    pub name: String,
    pub quantity: u32,
    pub unit_price_cents: u64,
    pub special_instructions: Option<String>,
}

impl LineItem {
    pub fn line_total_cents(&self) -> Option<u64> {
        self.unit_price_cents.checked_mul(u64::from(self.quantity))
    }
}

/// Fee and tax policy applied once, at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    pub delivery_fee_cents: u64,
    /// Tax rate in basis points (800 = 8%).
    pub tax_rate_bps: u32,
    pub eta_minutes: u32,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            delivery_fee_cents: 399,
            tax_rate_bps: 800,
            eta_minutes: 30,
        }
    }
}

/// The monetary snapshot of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub subtotal_cents: u64,
    pub delivery_fee_cents: u64,
    pub tax_cents: u64,
    pub total_cents: u64,
}

impl Totals {
    /// Prices a list of line items.
    ///
    /// Tax is rounded half-up to the nearest cent, and the total is the exact
    /// sum of its three parts, so `total == subtotal + fee + tax` always holds.
    ///
    /// # Example
    /// Two items at 500 and 350 cents, two of each, with the default policy:
    /// subtotal 1700, fee 399, tax 136, total 2235.
    pub fn compute(items: &[LineItem], pricing: &Pricing) -> Result<Totals, OrderError> {
        let overflow = || OrderError::Validation("order amount out of range".into());
        let subtotal = items.iter().try_fold(0u64, |acc, item| {
            item.line_total_cents()
                .and_then(|line| acc.checked_add(line))
                .ok_or_else(overflow)
        })?;
        let tax = subtotal
            .checked_mul(u64::from(pricing.tax_rate_bps))
            .and_then(|v| v.checked_add(5_000))
            .map(|v| v / 10_000)
            .ok_or_else(overflow)?;
        let total = subtotal
            .checked_add(pricing.delivery_fee_cents)
            .and_then(|v| v.checked_add(tax))
            .ok_or_else(overflow)?;
        Ok(Totals {
            subtotal_cents: subtotal,
            delivery_fee_cents: pricing.delivery_fee_cents,
            tax_cents: tax,
            total_cents: total,
        })
    }

    pub fn is_consistent(&self) -> bool {
        self.subtotal_cents
            .checked_add(self.delivery_fee_cents)
            .and_then(|v| v.checked_add(self.tax_cents))
            == Some(self.total_cents)
    }
}

/// A persisted order record.
///
/// Only the transition engine changes `status`, `rider_id` and
/// `delivered_at`; only the location tracker changes `rider_location`.
/// Everything else is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub customer_id: UserId,
    pub restaurant_id: RestaurantId,
    pub rider_id: Option<UserId>,
    pub items: Vec<LineItem>,
    pub status: OrderStatus,
    pub totals: Totals,
    pub delivery_address: DeliveryAddress,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub rider_location: Option<RiderLocation>,
    pub created_at: u64,
    pub estimated_delivery_at: u64,
    pub delivered_at: Option<u64>,
    /// Bumped on every status commit; guards conditional updates.
    pub version: u64,
}

/// Everything needed to create an order once the menu has been consulted.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: UserId,
    pub restaurant_id: RestaurantId,
    pub items: Vec<LineItem>,
    pub delivery_address: DeliveryAddress,
    pub payment_method: PaymentMethod,
}

impl Order {
    /// Builds a fresh `Placed` order, pricing it once.
    pub fn create(new: NewOrder, pricing: &Pricing, now_ms: u64) -> Result<Order, OrderError> {
        if new.items.is_empty() {
            return Err(OrderError::Validation("order must contain at least one item".into()));
        }
        if new.items.iter().any(|i| i.quantity == 0) {
            return Err(OrderError::Validation("quantity must be > 0".into()));
        }
        new.delivery_address.validate()?;
        let totals = Totals::compute(&new.items, pricing)?;
        let eta_ms = u64::from(pricing.eta_minutes) * 60_000;

        Ok(Order {
            id: Uuid::new_v4(),
            customer_id: new.customer_id,
            restaurant_id: new.restaurant_id,
            rider_id: None,
            items: new.items,
            status: OrderStatus::Placed,
            totals,
            delivery_address: new.delivery_address,
            payment_method: new.payment_method,
            payment_status: PaymentStatus::Pending,
            rider_location: None,
            created_at: now_ms,
            estimated_delivery_at: now_ms.saturating_add(eta_ms),
            delivered_at: None,
            version: 0,
        })
    }
}
