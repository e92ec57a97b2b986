use fleetpulse_core::{GatewayConfig, NotificationsConfig};
use fleetpulse_gateway::{
    GatewayEvent, GatewayFrame, GatewayRequest, GatewayServer, MethodHandlers, ProtocolError,
    TokenAuth,
};
use fleetpulse_notify::{ConnectionRegistry, NotificationDispatcher};
use fleetpulse_presence::{MemoryPresenceStore, PresenceReconciler, PresenceTracker};
use fleetpulse_storage::SqliteStore;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const TOKEN: &str = "smoke-token-abcdefghijklmnopqrstuvwxyz0123";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_gateway() -> (SocketAddr, Arc<MethodHandlers>, tokio::sync::oneshot::Sender<()>) {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let tracker = Arc::new(PresenceTracker::new(
        Arc::new(MemoryPresenceStore::new()),
        Duration::from_secs(60),
        Duration::from_secs(1),
    ));
    let reconciler = Arc::new(PresenceReconciler::new(
        tracker.clone(),
        store.clone(),
        Duration::from_secs(30),
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        store.clone(),
        ConnectionRegistry::new(),
    ));
    let handlers = Arc::new(MethodHandlers::new(
        store,
        tracker,
        reconciler,
        dispatcher,
        NotificationsConfig::default(),
    ));

    let auth = Arc::new(TokenAuth::new());
    auth.register(TOKEN, "u1").await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = GatewayServer::new(GatewayConfig::default(), handlers.clone(), auth);
    tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
    });

    (addr, handlers, shutdown_tx)
}

async fn send(client: &mut Client, request: GatewayRequest) {
    let text = serde_json::to_string(&GatewayFrame::Request(request)).unwrap();
    client.send(Message::Text(text.into())).await.unwrap();
}

async fn next_frame(client: &mut Client) -> GatewayFrame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).unwrap();
        }
    }
}

#[tokio::test]
async fn gateway_smoke_connect_push_and_shutdown() {
    let (addr, handlers, shutdown_tx) = start_gateway().await;
    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();

    send(&mut client, GatewayRequest::connect("c1", TOKEN)).await;
    match next_frame(&mut client).await {
        GatewayFrame::Response(res) => {
            assert!(res.ok, "connect failed: {:?}", res.error);
            assert_eq!(res.id, "c1");
            let payload = res.payload.unwrap();
            assert_eq!(payload["user_id"], "u1");
            assert_eq!(payload["unread_count"], 0);
        }
        other => panic!("expected hello-ok, got {:?}", other),
    }

    // The login notification is persisted and pushed live
    match next_frame(&mut client).await {
        GatewayFrame::Event(GatewayEvent::Notification(view)) => {
            assert_eq!(view.title, "Login Successful")
        }
        other => panic!("expected notification, got {:?}", other),
    }
    assert!(handlers.registry().is_connected("u1").await);

    send(
        &mut client,
        GatewayRequest::new(
            "r1",
            "device.register",
            json!({"id": "d1", "name": "Pump", "type": "controller"}),
        ),
    )
    .await;
    let mut saw_response = false;
    let mut saw_event = false;
    for _ in 0..2 {
        match next_frame(&mut client).await {
            GatewayFrame::Response(res) => {
                assert!(res.ok);
                assert_eq!(res.id, "r1");
                saw_response = true;
            }
            GatewayFrame::Event(GatewayEvent::Notification(view)) => {
                assert_eq!(view.title, "Device Created");
                assert_eq!(view.device_id.as_deref(), Some("d1"));
                saw_event = true;
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }
    assert!(saw_response && saw_event);

    send(
        &mut client,
        GatewayRequest::new("r2", "notifications.unreadCount", serde_json::Value::Null),
    )
    .await;
    match next_frame(&mut client).await {
        GatewayFrame::Response(res) => assert_eq!(res.payload.unwrap()["count"], 2),
        other => panic!("unexpected frame {:?}", other),
    }

    shutdown_tx.send(()).unwrap();
    match next_frame(&mut client).await {
        GatewayFrame::Event(GatewayEvent::Shutdown(event)) => {
            assert!(!event.reason.is_empty())
        }
        other => panic!("expected shutdown, got {:?}", other),
    }
}

#[tokio::test]
async fn gateway_smoke_rejects_bad_token() {
    let (addr, handlers, _shutdown_tx) = start_gateway().await;
    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();

    send(
        &mut client,
        GatewayRequest::connect("c1", "wrong-token-abcdefghijklmnopqrstuvwxyz0123"),
    )
    .await;
    match next_frame(&mut client).await {
        GatewayFrame::Response(res) => {
            assert!(!res.ok);
            assert_eq!(res.error_code(), Some(ProtocolError::UNAUTHORIZED));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(!handlers.registry().is_connected("u1").await);
}

#[tokio::test]
async fn gateway_smoke_first_request_must_be_connect() {
    let (addr, _handlers, _shutdown_tx) = start_gateway().await;
    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();

    send(
        &mut client,
        GatewayRequest::new("r1", "health", serde_json::Value::Null),
    )
    .await;
    match next_frame(&mut client).await {
        GatewayFrame::Response(res) => {
            assert_eq!(res.id, "r1");
            assert_eq!(res.error_code(), Some(ProtocolError::INVALID_REQUEST));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}
