use std::time::Duration;

use axum::Router;
use delivery_order_engine::{
    api::router,
    bus::{Channel, ServerEvent},
    state::AppState,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::tempdir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use uuid::Uuid;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ALICE: &str = "11111111-0000-4000-8000-000000000001";
const BOB: &str = "11111111-0000-4000-8000-000000000002";
const CARLA: &str = "22222222-0000-4000-8000-000000000001";
const EVE: &str = "33333333-0000-4000-8000-000000000001";
const CARLAS_KITCHEN: &str = "44444444-0000-4000-8000-000000000001";
const MARGHERITA: &str = "55555555-0000-4000-8000-000000000001";

async fn spawn_server() -> (String, AppState, tokio::task::JoinHandle<()>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let state = AppState::new(dir.path()).unwrap();
    let app: Router = router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{}", addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let ok = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(r) = client.get(format!("{}/health", base)).send().await {
                if r.status().is_success() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .is_ok();
    assert!(ok, "server did not become ready in time");

    (base, state, handle, dir)
}

async fn connect(http_base: &str, token: &str) -> Ws {
    let url = http_base.replace("http://", "ws://") + "/ws?token=" + token;
    let (ws, _resp) = connect_async(&url).await.expect("ws connect");
    ws
}

async fn next_event(ws: &mut Ws) -> ServerEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("ws recv timeout")
            .expect("ws closed")
            .expect("ws error");
        match msg {
            Message::Text(t) => return serde_json::from_str(t.as_str()).expect("parse ServerEvent"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {:?}", other),
        }
    }
}

async fn send_frame(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

async fn wait_for_subscribers(state: &AppState, channel: Channel, n: usize) {
    let ok = tokio::time::timeout(Duration::from_secs(2), async {
        while state.bus.subscriber_count(channel) < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok();
    assert!(ok, "{} never reached {} subscribers", channel, n);
}

async fn place_order(client: &reqwest::Client, base: &str) -> Uuid {
    let r = client
        .post(format!("{}/orders", base))
        .bearer_auth(ALICE)
        .json(&json!({
            "restaurantId": CARLAS_KITCHEN,
            "items": [{ "menuItemId": MARGHERITA, "quantity": 1 }],
            "deliveryAddress": {
                "street": "12 Main St",
                "city": "Springfield",
                "state": "IL",
                "zipCode": "62701"
            },
            "paymentMethod": "cash"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(r.status(), reqwest::StatusCode::CREATED);
    let v: Value = r.json().await.unwrap();
    v["id"].as_str().unwrap().parse().unwrap()
}

async fn set_status(client: &reqwest::Client, base: &str, id: Uuid, token: &str, body: Value) {
    let r = client
        .patch(format!("{}/orders/{}/status", base, id))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert!(r.status().is_success(), "status change failed: {}", r.status());
}

#[tokio::test]
async fn unauthenticated_socket_is_refused() {
    let (base, _state, server, _tmp) = spawn_server().await;
    let url = base.replace("http://", "ws://") + "/ws";
    assert!(connect_async(&url).await.is_err());

    let url = base.replace("http://", "ws://") + "/ws?token=" + &Uuid::new_v4().to_string();
    assert!(connect_async(&url).await.is_err());
    server.abort();
}

#[tokio::test]
async fn owner_hears_new_orders_and_customer_hears_status() {
    let (base, state, server, _tmp) = spawn_server().await;
    let owner_id: Uuid = CARLA.parse().unwrap();
    let customer_id: Uuid = ALICE.parse().unwrap();
    let mut owner = connect(&base, CARLA).await;
    let mut customer = connect(&base, ALICE).await;
    wait_for_subscribers(&state, Channel::User(owner_id), 1).await;
    wait_for_subscribers(&state, Channel::User(customer_id), 1).await;

    let client = reqwest::Client::new();
    let id = place_order(&client, &base).await;

    match next_event(&mut owner).await {
        ServerEvent::NewOrder {
            order_id,
            customer_name,
            total_cents,
        } => {
            assert_eq!(order_id, id);
            assert_eq!(customer_name, "Alice Customer");
            // 500 + 399 fee + 40 tax
            assert_eq!(total_cents, 939);
        }
        other => panic!("expected new-order, got {:?}", other),
    }

    set_status(&client, &base, id, CARLA, json!({ "status": "confirmed" })).await;
    assert_eq!(
        next_event(&mut customer).await,
        ServerEvent::OrderStatusUpdate {
            order_id: id,
            status: "confirmed".parse().unwrap(),
        }
    );
    server.abort();
}

#[tokio::test]
async fn tracking_channel_carries_rider_location() {
    let (base, state, server, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let id = place_order(&client, &base).await;
    for body in [
        json!({ "status": "confirmed" }),
        json!({ "status": "preparing" }),
        json!({ "status": "ready-for-pickup", "riderId": EVE }),
    ] {
        set_status(&client, &base, id, CARLA, body).await;
    }

    let mut watcher = connect(&base, ALICE).await;
    send_frame(
        &mut watcher,
        json!({ "event": "join-order-tracking", "data": { "orderId": id } }),
    )
    .await;
    wait_for_subscribers(&state, Channel::Order(id), 1).await;

    let r = client
        .post(format!("{}/orders/{}/rider-location", base, id))
        .bearer_auth(EVE)
        .json(&json!({ "lat": 40.7128, "lng": -74.006 }))
        .send()
        .await
        .unwrap();
    assert!(r.status().is_success());

    match next_event(&mut watcher).await {
        ServerEvent::RiderLocationUpdate { order_id, location } => {
            assert_eq!(order_id, id);
            assert_eq!((location.lat, location.lng), (40.7128, -74.006));
        }
        other => panic!("expected rider-location-update, got {:?}", other),
    }

    // on both user and order channel, still one frame per change
    set_status(&client, &base, id, EVE, json!({ "status": "out-for-delivery" })).await;
    assert!(matches!(
        next_event(&mut watcher).await,
        ServerEvent::OrderStatusUpdate { .. }
    ));
    set_status(&client, &base, id, EVE, json!({ "status": "delivered" })).await;
    match next_event(&mut watcher).await {
        ServerEvent::OrderStatusUpdate { status, .. } => assert_eq!(status.as_str(), "delivered"),
        other => panic!("expected order-status-update, got {:?}", other),
    }

    send_frame(
        &mut watcher,
        json!({ "event": "leave-order-tracking", "data": { "orderId": id } }),
    )
    .await;
    let ok = tokio::time::timeout(Duration::from_secs(2), async {
        while state.bus.subscriber_count(Channel::Order(id)) > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok();
    assert!(ok, "leave was not applied");
    server.abort();
}

#[tokio::test]
async fn refused_and_malformed_frames_get_error_replies() {
    let (base, state, server, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let id = place_order(&client, &base).await;

    let mut stranger = connect(&base, BOB).await;
    send_frame(
        &mut stranger,
        json!({ "event": "join-order-tracking", "data": { "orderId": id } }),
    )
    .await;
    match next_event(&mut stranger).await {
        ServerEvent::Error { kind, .. } => assert_eq!(kind, "not_authorized"),
        other => panic!("expected error frame, got {:?}", other),
    }
    assert_eq!(state.bus.subscriber_count(Channel::Order(id)), 0);

    stranger
        .send(Message::Text("not json".to_string().into()))
        .await
        .unwrap();
    match next_event(&mut stranger).await {
        ServerEvent::Error { kind, .. } => assert_eq!(kind, "validation_error"),
        other => panic!("expected error frame, got {:?}", other),
    }

    // still open after bad frames
    send_frame(
        &mut stranger,
        json!({ "event": "join-order-tracking", "data": { "orderId": Uuid::new_v4() } }),
    )
    .await;
    match next_event(&mut stranger).await {
        ServerEvent::Error { kind, .. } => assert_eq!(kind, "not_found"),
        other => panic!("expected error frame, got {:?}", other),
    }
    server.abort();
}

#[tokio::test]
async fn bus_shutdown_closes_sockets() {
    let (base, state, server, _tmp) = spawn_server().await;
    let mut ws = connect(&base, ALICE).await;
    wait_for_subscribers(&state, Channel::User(ALICE.parse().unwrap()), 1).await;

    state.bus.shutdown();
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .is_ok();
    assert!(closed, "socket stayed open after shutdown");
    server.abort();
}
