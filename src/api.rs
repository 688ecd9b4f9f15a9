use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    auth::Caller,
    errors::OrderError,
    orders::{Order, OrderId, OrderStatus},
    service::{OrderView, Page, PlaceOrderRequest, effective_limit},
    state::AppState,
    tracker::LocationReport,
    transition::TransitionRequest,
    ws,
};

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<usize>,
    pub after: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RestaurantPageParams {
    pub status: Option<OrderStatus>,
    pub limit: Option<usize>,
    pub after: Option<String>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, OrderError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| OrderError::Validation(e.body_text()))
}

fn params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, OrderError> {
    query
        .map(|Query(v)| v)
        .map_err(|e| OrderError::Validation(e.body_text()))
}

fn order_id(path: Result<Path<OrderId>, PathRejection>) -> Result<OrderId, OrderError> {
    path.map(|Path(id)| id)
        .map_err(|_| OrderError::Validation("order id must be a uuid".into()))
}

fn paged<T: Serialize>(page: Page<T>, limit: usize) -> Response {
    let mut res = Json(page).into_response();
    res.headers_mut()
        .insert("x-effective-limit", HeaderValue::from(limit));
    res
}

pub async fn place_order(
    State(state): State<AppState>,
    Caller(caller): Caller,
    payload: Result<Json<PlaceOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), OrderError> {
    let order = state.service.place_order(&caller, body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn my_orders(
    State(state): State<AppState>,
    Caller(caller): Caller,
    query: Result<Query<PageParams>, QueryRejection>,
) -> Result<Response, OrderError> {
    let p = params(query)?;
    let limit = effective_limit(p.limit);
    let page = state
        .service
        .customer_orders(&caller, p.after.as_deref(), limit)
        .await?;
    Ok(paged(page, limit))
}

pub async fn restaurant_orders(
    State(state): State<AppState>,
    Caller(caller): Caller,
    query: Result<Query<RestaurantPageParams>, QueryRejection>,
) -> Result<Response, OrderError> {
    let p = params(query)?;
    let limit = effective_limit(p.limit);
    let page = state
        .service
        .restaurant_orders(&caller, p.status, p.after.as_deref(), limit)
        .await?;
    Ok(paged(page, limit))
}

pub async fn get_order(
    State(state): State<AppState>,
    Caller(caller): Caller,
    path: Result<Path<OrderId>, PathRejection>,
) -> Result<Json<OrderView>, OrderError> {
    let view = state.service.get_order(&caller, order_id(path)?).await?;
    Ok(Json(view))
}

pub async fn update_status(
    State(state): State<AppState>,
    Caller(caller): Caller,
    path: Result<Path<OrderId>, PathRejection>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> Result<Json<Order>, OrderError> {
    let id = order_id(path)?;
    let order = state
        .service
        .transition_status(&caller, id, body(payload)?)
        .await?;
    Ok(Json(order))
}

pub async fn update_rider_location(
    State(state): State<AppState>,
    Caller(caller): Caller,
    path: Result<Path<OrderId>, PathRejection>,
    payload: Result<Json<LocationReport>, JsonRejection>,
) -> Result<Json<serde_json::Value>, OrderError> {
    let id = order_id(path)?;
    let location = state
        .service
        .update_rider_location(&caller, id, body(payload)?)
        .await?;
    Ok(Json(json!({ "message": "Location updated", "location": location })))
}

pub async fn health() -> &'static str {
    "ok"
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/orders", post(place_order))
        .route("/orders/mine", get(my_orders))
        .route("/orders/restaurant", get(restaurant_orders))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/status", patch(update_status))
        .route("/orders/{id}/rider-location", post(update_rider_location))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
