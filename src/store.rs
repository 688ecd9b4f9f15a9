use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use bincode::{
    config::standard,
    error::{DecodeError, EncodeError},
};
use parity_db::{BTreeIterator, ColId, Db, Options};
use rand::Rng;
use std::{path::Path, sync::Mutex, time::Duration};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    errors::{OrderError, Resource},
    orders::{Order, OrderId, OrderStatus, RestaurantId, RiderLocation, UserId},
    transition::AppliedTransition,
};

const ORDERS: ColId = 0;
const BY_CUSTOMER: ColId = 1;
const BY_RESTAURANT: ColId = 2;

/// Upper bound on a single listing page.
pub const MAX_PAGE: usize = 100;

//Cursor (opaque to clients)
#[derive(serde::Serialize, serde::Deserialize)]
struct Cursor {
    created_at: u64,
    order_id: Uuid,
}

/// Errors from the order store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ParityDB error: {0}")]
    Parity(#[from] parity_db::Error),

    #[error("Serialization/Deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Bincode encode error: {0}")]
    BincodeEncode(#[from] EncodeError),

    #[error("Bincode decode error: {0}")]
    BincodeDecode(#[from] DecodeError),

    #[error("Invalid cursor")]
    BadCursor,

    #[error("Order not found")]
    NotFound,

    #[error("Order version changed underneath the update")]
    VersionConflict,

    #[error("Corrupt index entry")]
    CorruptIndex,
}

impl StoreError {
    /// I/O hiccups worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Parity(parity_db::Error::Io(_)))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for OrderError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => OrderError::NotFound(Resource::Order),
            StoreError::VersionConflict => OrderError::ConcurrentModification,
            StoreError::BadCursor => OrderError::Validation("invalid cursor".into()),
            e if e.is_transient() => OrderError::ServiceUnavailable,
            other => {
                error!(error = %other, "order store failure");
                OrderError::Internal
            }
        }
    }
}

/// A ParityDB-backed order store.
///
/// Column 0 holds orders keyed by id. Columns 1 and 2 are B-tree indexes
/// keyed by `owner ++ created_at ++ order_id` for customer and restaurant
/// listings.
///
/// Read-modify-write operations hold `write_lock` for their whole span, so
/// a status commit and a location overwrite never interleave.
pub struct Store {
    db: Db,
    write_lock: Mutex<()>,
}

impl Store {
    /// Open (or create) a ParityDB at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut opts = Options::with_columns(path.as_ref(), 3);
        opts.columns[BY_CUSTOMER as usize].btree_index = true;
        opts.columns[BY_RESTAURANT as usize].btree_index = true;
        let db = Db::open_or_create(&opts)?;
        Ok(Store {
            db,
            write_lock: Mutex::new(()),
        })
    }

    #[inline]
    fn index_key(owner: Uuid, created_at: u64, order_id: Uuid) -> Vec<u8> {
        let mut k = Vec::with_capacity(40);
        k.extend_from_slice(owner.as_bytes());
        k.extend_from_slice(&created_at.to_be_bytes());
        k.extend_from_slice(order_id.as_bytes());
        k
    }

    #[inline]
    fn encode_order(order: &Order) -> StoreResult<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(order, standard())?)
    }

    #[inline]
    fn decode_order(raw: &[u8]) -> StoreResult<Order> {
        let (order, _): (Order, usize) = bincode::serde::decode_from_slice(raw, standard())?;
        Ok(order)
    }

    #[inline]
    fn encode_cursor(order: &Order) -> StoreResult<String> {
        let c = Cursor {
            created_at: order.created_at,
            order_id: order.id,
        };
        Ok(B64.encode(serde_json::to_vec(&c)?))
    }

    #[inline]
    fn decode_cursor(s: &str) -> StoreResult<Cursor> {
        let bytes = B64.decode(s).map_err(|_| StoreError::BadCursor)?;
        serde_json::from_slice(&bytes).map_err(|_| StoreError::BadCursor)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persist a new order together with both index entries.
    pub fn insert_order(&self, order: &Order) -> StoreResult<()> {
        let value = Self::encode_order(order)?;
        let id = order.id.as_bytes().to_vec();
        let _guard = self.lock();
        self.db.commit(vec![
            (ORDERS, id.clone(), Some(value)),
            (
                BY_CUSTOMER,
                Self::index_key(order.customer_id, order.created_at, order.id),
                Some(id.clone()),
            ),
            (
                BY_RESTAURANT,
                Self::index_key(order.restaurant_id, order.created_at, order.id),
                Some(id),
            ),
        ])?;
        Ok(())
    }

    pub fn get_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        match self.db.get(ORDERS, id.as_bytes())? {
            Some(raw) => Ok(Some(Self::decode_order(&raw)?)),
            None => Ok(None),
        }
    }

    /// Commit a planned transition if the order is still at the version it
    /// was planned against.
    pub fn commit_transition(
        &self,
        id: OrderId,
        applied: &AppliedTransition,
    ) -> StoreResult<Order> {
        self.commit_transition_then(id, applied, |_| {})
    }

    /// [`commit_transition`](Self::commit_transition), running `on_commit`
    /// with the stored record before the write lock is released. Anything
    /// `on_commit` does for one order therefore happens in commit order.
    pub fn commit_transition_then(
        &self,
        id: OrderId,
        applied: &AppliedTransition,
        on_commit: impl FnOnce(&Order),
    ) -> StoreResult<Order> {
        let _guard = self.lock();
        let mut order = self.get_order(id)?.ok_or(StoreError::NotFound)?;
        if order.version != applied.expected_version {
            return Err(StoreError::VersionConflict);
        }
        applied.apply_to(&mut order);
        self.db
            .commit(vec![(ORDERS, id.as_bytes().to_vec(), Some(Self::encode_order(&order)?))])?;
        on_commit(&order);
        Ok(order)
    }

    /// Overwrite the rider location on the latest persisted record.
    pub fn set_rider_location(&self, id: OrderId, location: RiderLocation) -> StoreResult<Order> {
        self.set_rider_location_then(id, location, |_| {})
    }

    /// Location overwrite with an `on_commit` hook run under the write lock.
    ///
    /// The stored timestamp never goes backwards: a report stamped earlier
    /// than the current one keeps the current timestamp.
    pub fn set_rider_location_then(
        &self,
        id: OrderId,
        mut location: RiderLocation,
        on_commit: impl FnOnce(&Order),
    ) -> StoreResult<Order> {
        let _guard = self.lock();
        let mut order = self.get_order(id)?.ok_or(StoreError::NotFound)?;
        if let Some(prev) = order.rider_location {
            location.timestamp = location.timestamp.max(prev.timestamp);
        }
        order.rider_location = Some(location);
        self.db
            .commit(vec![(ORDERS, id.as_bytes().to_vec(), Some(Self::encode_order(&order)?))])?;
        on_commit(&order);
        Ok(order)
    }

    pub fn page_customer_orders(
        &self,
        customer: UserId,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<(Vec<Order>, Option<String>)> {
        self.page_index(BY_CUSTOMER, customer, after, limit, |_| true)
    }

    pub fn page_restaurant_orders(
        &self,
        restaurant: RestaurantId,
        status: Option<OrderStatus>,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<(Vec<Order>, Option<String>)> {
        self.page_index(BY_RESTAURANT, restaurant, after, limit, |o| {
            status.is_none_or(|s| o.status == s)
        })
    }

    /// Ascending-by-creation page over one owner's slice of an index.
    fn page_index(
        &self,
        col: ColId,
        owner: Uuid,
        after: Option<&str>,
        limit: usize,
        keep: impl Fn(&Order) -> bool,
    ) -> StoreResult<(Vec<Order>, Option<String>)> {
        let prefix = owner.as_bytes().to_vec();
        let mut it: BTreeIterator<'_> = self.db.iter(col)?;

        if let Some(s) = after {
            let c = Self::decode_cursor(s)?;
            let full = Self::index_key(owner, c.created_at, c.order_id);
            let mut check = self.db.iter(col)?;
            check.seek(&full)?;
            match check.next()? {
                Some((k, _)) if k == full => {}
                _ => return Err(StoreError::BadCursor),
            }
            // Start strictly after that exact key
            it.seek(&full)?;
            let _ = it.next()?;
        } else {
            it.seek(&prefix)?;
        }

        let mut items = Vec::with_capacity(limit.min(MAX_PAGE));
        let mut last_cursor: Option<String> = None;
        while items.len() < limit {
            match it.next()? {
                Some((k, v)) if k.starts_with(&prefix) => {
                    let id = Uuid::from_slice(&v).map_err(|_| StoreError::CorruptIndex)?;
                    let Some(order) = self.get_order(id)? else {
                        warn!(order_id = %id, "index entry without order");
                        continue;
                    };
                    if keep(&order) {
                        last_cursor = Some(Self::encode_cursor(&order)?);
                        items.push(order);
                    }
                }
                _ => break,
            }
        }
        Ok((items, last_cursor))
    }
}

/// Runs a store operation, retrying once after a short jittered pause when
/// it fails with a transient error.
pub async fn with_retry<T>(
    op: &'static str,
    mut f: impl FnMut() -> StoreResult<T>,
) -> Result<T, OrderError> {
    match f() {
        Err(e) if e.is_transient() => {
            let pause = Duration::from_millis(50 + rand::rng().random_range(0..50));
            warn!(op, error = %e, ?pause, "transient store failure, retrying once");
            tokio::time::sleep(pause).await;
            f().map_err(|e| {
                if e.is_transient() {
                    error!(op, error = %e, "store still unavailable after retry");
                }
                OrderError::from(e)
            })
        }
        other => other.map_err(OrderError::from),
    }
}
