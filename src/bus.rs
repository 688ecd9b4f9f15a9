//! Publish/subscribe fan-out of order events to live connections.
//!
//! Two kinds of channel exist:
//! - `user:<id>`: every connection joins its own user channel on connect.
//!   Restaurant owners hear about new orders here, customers about status
//!   changes.
//! - `order:<id>`: joined explicitly while a client watches one order. Rider
//!   locations and status changes for that order are broadcast here.
//!
//! Delivery is at-most-once and nothing is persisted. A subscriber whose
//! buffer is full misses the event; a disconnected client re-fetches the order
//! from the store when it comes back.

use std::{
    collections::HashSet,
    fmt,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::orders::{OrderId, OrderStatus, RiderLocation, UserId};

pub type ConnectionId = u64;

/// Events pushed from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    OrderStatusUpdate {
        order_id: OrderId,
        status: OrderStatus,
    },
    RiderLocationUpdate {
        order_id: OrderId,
        location: RiderLocation,
    },
    NewOrder {
        order_id: OrderId,
        customer_name: String,
        total_cents: u64,
    },
    /// Reply to a client frame that could not be honoured.
    Error { kind: String, message: String },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::OrderStatusUpdate { .. } => "order-status-update",
            ServerEvent::RiderLocationUpdate { .. } => "rider-location-update",
            ServerEvent::NewOrder { .. } => "new-order",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// Frames a client sends over its connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientFrame {
    JoinOrderTracking { order_id: OrderId },
    LeaveOrderTracking { order_id: OrderId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    User(UserId),
    Order(OrderId),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::User(id) => write!(f, "user:{}", id),
            Channel::Order(id) => write!(f, "order:{}", id),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("bus is shut down")]
    Closed,
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("cannot join another user's channel")]
    ForeignUserChannel,
}

#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    /// Events buffered per connection before new ones are dropped.
    pub subscriber_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 64,
        }
    }
}

/// The receiving end handed to a freshly authenticated connection.
#[derive(Debug)]
pub struct Subscription {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub events: mpsc::Receiver<ServerEvent>,
}

struct Connection {
    user_id: UserId,
    sender: mpsc::Sender<ServerEvent>,
    channels: HashSet<Channel>,
}

/// Fan-out hub shared by everything that publishes.
///
/// Created once at startup and passed around by `Arc`; [`shutdown`]
/// disconnects everybody so socket tasks can wind down.
///
/// [`shutdown`]: NotificationBus::shutdown
pub struct NotificationBus {
    config: BusConfig,
    next_id: AtomicU64,
    closed: AtomicBool,
    connections: DashMap<ConnectionId, Connection>,
    channels: DashMap<Channel, HashSet<ConnectionId>>,
}

impl NotificationBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            connections: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// Registers an authenticated connection and joins it to its user channel.
    pub fn connect(&self, user_id: UserId) -> Result<Subscription, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, events) = mpsc::channel(self.config.subscriber_buffer.max(1));
        let own = Channel::User(user_id);
        self.connections.insert(
            id,
            Connection {
                user_id,
                sender,
                channels: HashSet::from([own]),
            },
        );
        self.channels.entry(own).or_default().insert(id);
        debug!(conn_id = id, channel = %own, "connection registered");
        Ok(Subscription {
            id,
            user_id,
            events,
        })
    }

    pub fn join(&self, conn: ConnectionId, channel: Channel) -> Result<(), BusError> {
        {
            let mut entry = self
                .connections
                .get_mut(&conn)
                .ok_or(BusError::UnknownConnection(conn))?;
            if let Channel::User(uid) = channel {
                if uid != entry.user_id {
                    return Err(BusError::ForeignUserChannel);
                }
            }
            // still holding the connection so a racing disconnect sees the channel
            entry.channels.insert(channel);
            self.channels.entry(channel).or_default().insert(conn);
        }
        debug!(conn_id = conn, %channel, "joined");
        Ok(())
    }

    pub fn leave(&self, conn: ConnectionId, channel: Channel) -> Result<(), BusError> {
        {
            let mut entry = self
                .connections
                .get_mut(&conn)
                .ok_or(BusError::UnknownConnection(conn))?;
            entry.channels.remove(&channel);
        }
        self.remove_member(channel, conn);
        debug!(conn_id = conn, %channel, "left");
        Ok(())
    }

    /// Drops a connection from every channel it joined.
    pub fn disconnect(&self, conn: ConnectionId) {
        if let Some((_, entry)) = self.connections.remove(&conn) {
            for channel in entry.channels {
                self.remove_member(channel, conn);
            }
            debug!(conn_id = conn, "connection removed");
        }
    }

    fn remove_member(&self, channel: Channel, conn: ConnectionId) {
        if let Some(mut members) = self.channels.get_mut(&channel) {
            members.remove(&conn);
        }
        self.channels.remove_if(&channel, |_, members| members.is_empty());
    }

    pub fn publish_to_user(&self, user_id: UserId, event: ServerEvent) -> usize {
        self.publish(Channel::User(user_id), event)
    }

    pub fn publish_to_order(&self, order_id: OrderId, event: ServerEvent) -> usize {
        self.publish(Channel::Order(order_id), event)
    }

    /// Hands `event` to every member of `channel` without waiting.
    ///
    /// Returns how many subscribers accepted it. Full buffers drop the event;
    /// closed receivers are disconnected. Never fails.
    pub fn publish(&self, channel: Channel, event: ServerEvent) -> usize {
        self.publish_many(&[channel], event)
    }

    /// Like [`publish`](Self::publish) over several channels, delivering at
    /// most once to a connection that sits on more than one of them.
    pub fn publish_many(&self, channels: &[Channel], event: ServerEvent) -> usize {
        let mut members: Vec<ConnectionId> = channels
            .iter()
            .filter_map(|c| self.channels.get(c))
            .flat_map(|m| m.iter().copied().collect::<Vec<_>>())
            .collect();
        members.sort_unstable();
        members.dedup();
        if members.is_empty() {
            debug!(?channels, event = event.name(), "no subscribers");
            return 0;
        }

        let mut delivered = 0;
        let mut stale = Vec::new();
        for conn in members {
            let Some(sender) = self.connections.get(&conn).map(|c| c.sender.clone()) else {
                continue;
            };
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(conn_id = conn, ?channels, event = event.name(), "subscriber lagging, event dropped");
                }
                Err(TrySendError::Closed(_)) => stale.push(conn),
            }
        }
        for conn in stale {
            debug!(conn_id = conn, "pruning closed subscriber");
            self.disconnect(conn);
        }
        delivered
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.channels.get(&channel).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuses new connections and drops every registered one, closing their
    /// event streams.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let n = self.connections.len();
        self.connections.clear();
        self.channels.clear();
        info!(connections = n, "notification bus shut down");
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}
