use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::orders::{OrderStatus, Role};

/// What a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Order,
    Restaurant,
    Rider,
    MenuItem,
    User,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resource::Order => "order",
            Resource::Restaurant => "restaurant",
            Resource::Rider => "rider",
            Resource::MenuItem => "menu item",
            Resource::User => "user",
        };
        f.write_str(s)
    }
}

/// Every failure an order operation can surface to a caller.
///
/// All variants are recoverable: the gateway turns them into a typed
/// response with a stable [`kind`](OrderError::kind) and a message that never
/// carries storage internals.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("{0} not found")]
    NotFound(Resource),

    #[error("authentication required")]
    NotAuthenticated,

    #[error("not authorized")]
    NotAuthorized,

    #[error("status `{status}` cannot be set by a {role}")]
    InvalidStatusForRole { role: Role, status: OrderStatus },

    #[error("order is already {0}")]
    OrderAlreadyFinalized(OrderStatus),

    #[error("cannot move order from `{from}` to `{to}`")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("order was modified concurrently, reload and retry")]
    ConcurrentModification,

    #[error("{0}")]
    Validation(String),

    #[error("order storage is temporarily unavailable")]
    ServiceUnavailable,

    #[error("internal error")]
    Internal,
}

impl OrderError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::NotFound(_) => "not_found",
            OrderError::NotAuthenticated => "not_authenticated",
            OrderError::NotAuthorized => "not_authorized",
            OrderError::InvalidStatusForRole { .. } => "invalid_status_for_role",
            OrderError::OrderAlreadyFinalized(_) => "order_already_finalized",
            OrderError::InvalidTransition { .. } => "invalid_transition",
            OrderError::ConcurrentModification => "concurrent_modification",
            OrderError::Validation(_) => "validation_error",
            OrderError::ServiceUnavailable => "service_unavailable",
            OrderError::Internal => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            OrderError::NotFound(_) => StatusCode::NOT_FOUND,
            OrderError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            OrderError::NotAuthorized => StatusCode::FORBIDDEN,
            OrderError::InvalidStatusForRole { .. } | OrderError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            OrderError::OrderAlreadyFinalized(_)
            | OrderError::InvalidTransition { .. }
            | OrderError::ConcurrentModification => StatusCode::CONFLICT,
            OrderError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            OrderError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let body = json!({ "kind": self.kind(), "error": self.to_string() });
        (self.status_code(), Json(body)).into_response()
    }
}

/// Failures of the command-line clients.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connect(String),
    #[error("server rejected request: {0}")]
    Rejected(String),
}
