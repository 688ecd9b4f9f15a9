use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    bus::{Channel, NotificationBus, ServerEvent},
    directory::{Directory, MenuCatalog, RestaurantDirectory, User, UserDirectory},
    errors::{OrderError, Resource},
    orders::{
        DeliveryAddress, LineItem, MenuItemId, NewOrder, Order, OrderId, OrderStatus,
        PaymentMethod, Pricing, RestaurantId, RiderLocation, Role, UserId,
    },
    store::{MAX_PAGE, Store, with_retry},
    tracker::{self, LocationReport},
    transition::{self, TransitionRequest},
    utils::now_millis,
};

pub const DEFAULT_PAGE: usize = 20;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub menu_item_id: MenuItemId,
    pub quantity: u32,
    #[serde(default)]
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub restaurant_id: RestaurantId,
    pub items: Vec<OrderItemRequest>,
    pub delivery_address: DeliveryAddress,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub phone: Option<String>,
}

impl From<User> for UserSummary {
    fn from(u: User) -> Self {
        UserSummary {
            id: u.id,
            name: u.name,
            phone: u.phone,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantSummary {
    pub id: RestaurantId,
    pub name: String,
    pub address: String,
}

/// An order with the parties it references resolved for display.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub restaurant: Option<RestaurantSummary>,
    pub customer: Option<UserSummary>,
    pub rider: Option<UserSummary>,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// Whoever may act on an order may also watch it: the customer who placed it,
/// the owner of its restaurant, and its bound rider.
fn ensure_viewer(order: &Order, caller: &User, directory: &Directory) -> Result<(), OrderError> {
    transition::authorize_actor(order, caller, directory)
}

pub fn effective_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE)
}

/// The order core: everything the gateway calls lands here.
///
/// Every mutating operation follows the same shape: validate against a fresh
/// snapshot, commit to the store, and only then publish to the bus. Publish
/// never fails the operation.
pub struct OrderService {
    store: Arc<Store>,
    directory: Arc<Directory>,
    bus: Arc<NotificationBus>,
    pricing: Pricing,
}

impl OrderService {
    pub fn new(
        store: Arc<Store>,
        directory: Arc<Directory>,
        bus: Arc<NotificationBus>,
        pricing: Pricing,
    ) -> Self {
        Self {
            store,
            directory,
            bus,
            pricing,
        }
    }

    async fn load(&self, id: OrderId) -> Result<Order, OrderError> {
        with_retry("get_order", || self.store.get_order(id))
            .await?
            .ok_or(OrderError::NotFound(Resource::Order))
    }

    /// Customer places an order. Prices are snapshotted from the menu.
    #[instrument(skip_all, fields(customer = %caller.id, restaurant = %req.restaurant_id))]
    pub async fn place_order(
        &self,
        caller: &User,
        req: PlaceOrderRequest,
    ) -> Result<Order, OrderError> {
        if caller.role != Role::Customer {
            return Err(OrderError::NotAuthorized);
        }
        if req.items.iter().any(|i| i.quantity == 0) {
            return Err(OrderError::Validation("quantity must be > 0".into()));
        }
        let restaurant = self
            .directory
            .restaurant(req.restaurant_id)
            .ok_or(OrderError::NotFound(Resource::Restaurant))?;

        let items = req
            .items
            .into_iter()
            .map(|item| {
                let menu = self
                    .directory
                    .menu_item(item.menu_item_id)
                    .filter(|m| m.restaurant_id == restaurant.id)
                    .ok_or(OrderError::NotFound(Resource::MenuItem))?;
                if !menu.is_available {
                    return Err(OrderError::Validation(format!(
                        "{} is not available",
                        menu.name
                    )));
                }
                Ok(LineItem {
                    menu_item_id: menu.id,
                    name: menu.name,
                    quantity: item.quantity,
                    unit_price_cents: menu.price_cents,
                    special_instructions: item.special_instructions,
                })
            })
            .collect::<Result<Vec<_>, OrderError>>()?;

        let order = Order::create(
            NewOrder {
                customer_id: caller.id,
                restaurant_id: restaurant.id,
                items,
                delivery_address: req.delivery_address,
                payment_method: req.payment_method,
            },
            &self.pricing,
            now_millis(),
        )?;
        with_retry("insert_order", || self.store.insert_order(&order)).await?;
        info!(order_id = %order.id, total_cents = order.totals.total_cents, "order placed");

        self.bus.publish_to_user(
            restaurant.owner_id,
            ServerEvent::NewOrder {
                order_id: order.id,
                customer_name: caller.name.clone(),
                total_cents: order.totals.total_cents,
            },
        );
        Ok(order)
    }

    /// Applies a role-scoped status transition.
    ///
    /// The plan is made against a fresh snapshot and committed only if the
    /// order's version is unchanged, so two callers racing on one order
    /// cannot both win. The loser sees `ConcurrentModification` (or
    /// `OrderAlreadyFinalized` once the winner's state is visible).
    #[instrument(skip_all, fields(order_id = %order_id, actor = %caller.id, role = %caller.role, target = %req.status))]
    pub async fn transition_status(
        &self,
        caller: &User,
        order_id: OrderId,
        req: TransitionRequest,
    ) -> Result<Order, OrderError> {
        req.validate()?;
        let current = self.load(order_id).await?;
        let plan = transition::plan_transition(
            &current,
            caller,
            &req,
            self.directory.as_ref(),
            self.directory.as_ref(),
            now_millis(),
        )?;
        // publish under the store's write lock so one order's events leave in
        // commit order
        let updated = with_retry("commit_transition", || {
            self.store
                .commit_transition_then(order_id, &plan, |o| self.publish_status(o))
        })
        .await?;
        info!(from = %plan.from, to = %plan.to, version = updated.version, "status changed");
        Ok(updated)
    }

    fn publish_status(&self, order: &Order) {
        let event = ServerEvent::OrderStatusUpdate {
            order_id: order.id,
            status: order.status,
        };
        self.bus.publish_many(
            &[Channel::User(order.customer_id), Channel::Order(order.id)],
            event,
        );
    }

    /// Records the bound rider's position and broadcasts it on the order
    /// channel.
    pub async fn update_rider_location(
        &self,
        caller: &User,
        order_id: OrderId,
        report: LocationReport,
    ) -> Result<RiderLocation, OrderError> {
        tracker::ensure_rider_role(caller)?;
        report.validate()?;
        let order = self.load(order_id).await?;
        tracker::ensure_bound_rider(&order, caller)?;

        let reported = report.stamp(now_millis());
        let updated = with_retry("set_rider_location", || {
            self.store.set_rider_location_then(order_id, reported, |o| {
                if let Some(location) = o.rider_location {
                    self.bus.publish_to_order(
                        order_id,
                        ServerEvent::RiderLocationUpdate { order_id, location },
                    );
                }
            })
        })
        .await?;
        let location = updated.rider_location.unwrap_or(reported);
        debug!(order_id = %order_id, lat = location.lat, lng = location.lng, "rider location");
        Ok(location)
    }

    pub async fn get_order(&self, caller: &User, order_id: OrderId) -> Result<OrderView, OrderError> {
        let order = self.load(order_id).await?;
        ensure_viewer(&order, caller, &self.directory)?;
        let restaurant = self
            .directory
            .restaurant(order.restaurant_id)
            .map(|r| RestaurantSummary {
                id: r.id,
                name: r.name,
                address: r.address,
            });
        let customer = self.directory.user(order.customer_id).map(UserSummary::from);
        let rider = order
            .rider_id
            .and_then(|id| self.directory.user(id))
            .map(UserSummary::from);
        Ok(OrderView {
            order,
            restaurant,
            customer,
            rider,
        })
    }

    /// Checks the caller may watch `order:<id>` before the gateway joins it.
    pub async fn authorize_tracking(&self, caller: &User, order_id: OrderId) -> Result<(), OrderError> {
        let order = self.load(order_id).await?;
        ensure_viewer(&order, caller, &self.directory)
    }

    pub async fn customer_orders(
        &self,
        caller: &User,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<Order>, OrderError> {
        if caller.role != Role::Customer {
            return Err(OrderError::NotAuthorized);
        }
        let (items, next) = with_retry("page_customer_orders", || {
            self.store.page_customer_orders(caller.id, after, limit)
        })
        .await?;
        Ok(Page { items, next })
    }

    pub async fn restaurant_orders(
        &self,
        caller: &User,
        status: Option<OrderStatus>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<Order>, OrderError> {
        let restaurant = match caller.role {
            Role::Restaurant => self.directory.restaurant_by_owner(caller.id),
            _ => None,
        }
        .ok_or(OrderError::NotAuthorized)?;
        let (items, next) = with_retry("page_restaurant_orders", || {
            self.store
                .page_restaurant_orders(restaurant.id, status, after, limit)
        })
        .await?;
        Ok(Page { items, next })
    }
}
