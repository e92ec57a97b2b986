// Gateway WebSocket Server
//
// One task per connection. A connection must open with a `connect` request
// carrying a bearer token; once accepted it is registered as the user's push
// channel until the socket goes away or the gateway shuts down.

use crate::auth::{hash_token, TokenAuth, TokenInfo};
use crate::handlers::{to_protocol_error, MethodHandlers};
use crate::protocol::*;
use crate::session::GatewaySession;
use anyhow::{Context, Result};
use async_trait::async_trait;
use fleetpulse_core::GatewayConfig;
use fleetpulse_notify::{Channel, ChannelError, PushEvent};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const MAX_PAYLOAD: usize = 1024 * 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<TcpStream>;
type WsSender = SplitSink<WsStream, Message>;
type WsReceiver = SplitStream<WsStream>;

/// Push channel backed by a connection's outbound queue. Overflowing the
/// queue closes the channel, which ends the connection that owns it.
struct WsChannel {
    id: String,
    tx: mpsc::Sender<GatewayFrame>,
    closed: watch::Sender<bool>,
}

impl WsChannel {
    fn new(id: impl Into<String>, tx: mpsc::Sender<GatewayFrame>) -> Self {
        Self {
            id: id.into(),
            tx,
            closed: watch::channel(false).0,
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

#[async_trait]
impl Channel for WsChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, event: &PushEvent) -> Result<(), ChannelError> {
        let frame = GatewayFrame::Event(GatewayEvent::from(event.clone()));
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => {
                // The caller drops this channel from the registry; the
                // connection must not outlive it
                self.close();
                ChannelError::Full
            }
            TrySendError::Closed(_) => ChannelError::Closed,
        })
    }

    async fn closed(&self) {
        wait_closed(&mut self.subscribe()).await;
    }
}

#[derive(Clone)]
struct ConnectionContext {
    handlers: Arc<MethodHandlers>,
    auth: Arc<TokenAuth>,
    outbound_buffer: usize,
    handshake_timeout: Duration,
}

impl ConnectionContext {
    fn policy(&self) -> GatewayPolicy {
        GatewayPolicy {
            max_payload: MAX_PAYLOAD,
            outbound_buffer: self.outbound_buffer,
            handshake_timeout_ms: self.handshake_timeout.as_millis() as u64,
        }
    }
}

/// Gateway server
pub struct GatewayServer {
    config: GatewayConfig,
    handlers: Arc<MethodHandlers>,
    auth: Arc<TokenAuth>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, handlers: Arc<MethodHandlers>, auth: Arc<TokenAuth>) -> Self {
        Self {
            config,
            handlers,
            auth,
        }
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind gateway on {}", addr))?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already-bound listener
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tracing::info!("Gateway server listening on {}", listener.local_addr()?);

        let ctx = ConnectionContext {
            handlers: self.handlers.clone(),
            auth: self.auth.clone(),
            outbound_buffer: self.config.outbound_buffer.max(1),
            handshake_timeout: Duration::from_secs(self.config.handshake_timeout_secs.max(1)),
        };
        let (shutdown_tx, _) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let ctx = ctx.clone();
                        let shutdown_rx = shutdown_tx.subscribe();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, addr.to_string(), ctx, shutdown_rx).await {
                                tracing::warn!("Connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        tracing::info!("Gateway shutting down ({} open connections)", connections.len());
        let _ = shutdown_tx.send(true);
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("Connections did not close in time; aborting");
            connections.abort_all();
        }
        Ok(())
    }
}

enum Handshake {
    Accepted {
        request_id: String,
        info: TokenInfo,
        token_hash: String,
    },
    Rejected {
        request_id: String,
        error: ProtocolError,
    },
    Disconnected,
}

/// Read frames until the first request and authenticate it
async fn handshake(ws_receiver: &mut WsReceiver, auth: &TokenAuth) -> Handshake {
    let request = loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) if msg.is_text() => {
                let parsed = msg
                    .to_text()
                    .ok()
                    .and_then(|text| serde_json::from_str::<GatewayFrame>(text).ok());
                match parsed {
                    Some(GatewayFrame::Request(request)) => break request,
                    _ => {
                        return Handshake::Rejected {
                            request_id: "connect".to_string(),
                            error: ProtocolError::invalid_request("Expected a connect request"),
                        }
                    }
                }
            }
            Some(Ok(msg)) if msg.is_close() => return Handshake::Disconnected,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!("Socket error during handshake: {}", e);
                return Handshake::Disconnected;
            }
            None => return Handshake::Disconnected,
        }
    };

    if request.method != "connect" {
        return Handshake::Rejected {
            request_id: request.id,
            error: ProtocolError::invalid_request("First request must be 'connect'"),
        };
    }

    let Some(token) = request.params.get("token").and_then(JsonValue::as_str) else {
        return Handshake::Rejected {
            request_id: request.id,
            error: ProtocolError::unauthorized("Authentication required: missing token"),
        };
    };

    match auth.authenticate(token).await {
        Some(info) => Handshake::Accepted {
            request_id: request.id,
            info,
            token_hash: hash_token(token),
        },
        None => Handshake::Rejected {
            request_id: request.id,
            error: ProtocolError::unauthorized("Invalid or expired token"),
        },
    }
}

async fn send_frame(ws_sender: &mut WsSender, frame: &GatewayFrame) -> Result<()> {
    let text = serde_json::to_string(frame)?;
    ws_sender.send(Message::Text(text.into())).await?;
    Ok(())
}

// Handle a WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    addr: String,
    ctx: ConnectionContext,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let outcome = tokio::time::timeout(ctx.handshake_timeout, handshake(&mut ws_receiver, &ctx.auth))
        .await
        .unwrap_or_else(|_| Handshake::Rejected {
            request_id: "connect".to_string(),
            error: ProtocolError::unauthorized("Timed out waiting for connect"),
        });

    let (request_id, info, token_hash) = match outcome {
        Handshake::Accepted {
            request_id,
            info,
            token_hash,
        } => (request_id, info, token_hash),
        Handshake::Rejected { request_id, error } => {
            tracing::warn!("Rejected connection from {}: {}", addr, error);
            let response = GatewayFrame::Response(GatewayResponse::error(request_id, error));
            send_frame(&mut ws_sender, &response).await?;
            let _ = ws_sender.send(Message::Close(None)).await;
            return Ok(());
        }
        Handshake::Disconnected => return Ok(()),
    };

    let session = GatewaySession::new(info.user_id, Some(addr));
    tracing::info!(
        "Connection {} established for user {} from {}",
        session.id,
        session.user_id,
        addr_or_unknown(&session)
    );

    if let Err(e) = ctx.handlers.store().touch_token(&token_hash).await {
        tracing::debug!("Could not record token use: {}", e);
    }

    let (tx, mut rx) = mpsc::channel(ctx.outbound_buffer);
    let channel = Arc::new(WsChannel::new(session.id.clone(), tx));
    let mut closed_rx = channel.subscribe();
    let registry = ctx.handlers.registry().clone();
    registry.register(&session.user_id, channel.clone()).await;

    let result = serve_session(
        &session,
        request_id,
        &ctx,
        &mut ws_sender,
        &mut ws_receiver,
        &mut rx,
        &mut shutdown_rx,
        &mut closed_rx,
    )
    .await;

    channel.close();
    registry.release(&session.user_id, &session.id).await;
    tracing::info!("Connection {} closed", session.id);
    result
}

fn addr_or_unknown(session: &GatewaySession) -> &str {
    session.remote_addr.as_deref().unwrap_or("unknown")
}

/// Connection loop: requests in, responses and pushed events out
#[allow(clippy::too_many_arguments)]
async fn serve_session(
    session: &GatewaySession,
    connect_request_id: String,
    ctx: &ConnectionContext,
    ws_sender: &mut WsSender,
    ws_receiver: &mut WsReceiver,
    outbound: &mut mpsc::Receiver<GatewayFrame>,
    shutdown_rx: &mut watch::Receiver<bool>,
    closed_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
    let dispatcher = ctx.handlers.dispatcher();
    let unread_count = match dispatcher.unread_count(&session.user_id).await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!("Unread count unavailable for {}: {}", session.user_id, e);
            None
        }
    };
    let hello = HelloOkPayload {
        protocol: ProtocolVersion {
            min: PROTOCOL_VERSION,
            max: PROTOCOL_VERSION,
        },
        user_id: session.user_id.clone(),
        connection_id: session.id.clone(),
        unread_count,
        server_time: chrono::Utc::now().to_rfc3339(),
        policy: ctx.policy(),
    };
    let hello = GatewayFrame::Response(GatewayResponse::ok(
        connect_request_id,
        serde_json::to_value(hello)?,
    ));
    send_frame(ws_sender, &hello).await?;

    dispatcher
        .login_success(&session.user_id, session.remote_addr.as_deref())
        .await;

    if *shutdown_rx.borrow() {
        return send_shutdown(ws_sender).await;
    }

    loop {
        tokio::select! {
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(msg)) if msg.is_text() => {
                        let text = msg.to_text()?;
                        let response = if text.len() > MAX_PAYLOAD {
                            GatewayResponse::error(
                                String::new(),
                                ProtocolError::invalid_request(format!("Frame exceeds {} bytes", MAX_PAYLOAD)),
                            )
                        } else {
                            match serde_json::from_str::<GatewayFrame>(text) {
                                Ok(GatewayFrame::Request(request)) => {
                                    tracing::debug!("Request {} from {}: {}", request.id, session.user_id, request.method);
                                    handle_request(&request, session, &ctx.handlers).await
                                }
                                Ok(_) => continue,
                                Err(e) => GatewayResponse::error(
                                    String::new(),
                                    ProtocolError::invalid_request(format!("Malformed frame: {}", e)),
                                ),
                            }
                        };
                        send_frame(ws_sender, &GatewayFrame::Response(response)).await?;
                    }
                    Some(Ok(msg)) if msg.is_close() => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error on {}: {}", session.id, e);
                        break;
                    }
                    None => break,
                }
            }

            frame = outbound.recv() => {
                match frame {
                    Some(frame) => send_frame(ws_sender, &frame).await?,
                    None => break,
                }
            }

            _ = shutdown_rx.changed() => {
                return send_shutdown(ws_sender).await;
            }

            _ = wait_closed(closed_rx) => {
                tracing::warn!("Connection {} fell behind on pushes, closing", session.id);
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    Ok(())
}

/// Resolves once the channel is closed. A dropped sender counts as closed.
async fn wait_closed(closed_rx: &mut watch::Receiver<bool>) {
    let _ = closed_rx.wait_for(|closed| *closed).await;
}

async fn send_shutdown(ws_sender: &mut WsSender) -> Result<()> {
    let event = GatewayFrame::Event(GatewayEvent::Shutdown(ShutdownEvent {
        reason: "gateway shutting down".to_string(),
        restart_expected_ms: None,
    }));
    send_frame(ws_sender, &event).await?;
    let _ = ws_sender.send(Message::Close(None)).await;
    Ok(())
}

/// Route a request to its handler
pub(crate) async fn handle_request(
    request: &GatewayRequest,
    session: &GatewaySession,
    handlers: &MethodHandlers,
) -> GatewayResponse {
    if request.id.trim().is_empty() {
        return GatewayResponse::error(
            request.id.clone(),
            ProtocolError::invalid_request("Request id cannot be empty"),
        );
    }

    let result = match request.method.as_str() {
        "health" => handlers.health(session, request).await,
        "status" => handlers.status(session, request).await,
        "notifications.list" => handlers.notifications_list(session, request).await,
        "notifications.read" => handlers.notifications_read(session, request).await,
        "notifications.readAll" => handlers.notifications_read_all(session, request).await,
        "notifications.unreadCount" => handlers.notifications_unread_count(session, request).await,
        "notifications.stats" => handlers.notifications_stats(session, request).await,
        "notifications.delete" => handlers.notifications_delete(session, request).await,
        "notifications.clear" => handlers.notifications_clear(session, request).await,
        "device.list" => handlers.device_list(session, request).await,
        "device.register" => handlers.device_register(session, request).await,
        "device.rename" => handlers.device_rename(session, request).await,
        "device.delete" => handlers.device_delete(session, request).await,
        "device.bulkDelete" => handlers.device_bulk_delete(session, request).await,
        "device.status" => handlers.device_status(session, request).await,
        "device.sync" => handlers.device_sync(session, request).await,
        "telemetry.submit" => handlers.telemetry_submit(session, request).await,
        "telemetry.recent" => handlers.telemetry_recent(session, request).await,
        "command.report" => handlers.command_report(session, request).await,
        "connect" => Err(anyhow::Error::new(ProtocolError::invalid_request(
            "Connection is already authenticated",
        ))),
        _ => Err(anyhow::Error::new(ProtocolError::invalid_request(format!(
            "Unknown method: {}",
            request.method
        )))),
    };

    match result {
        Ok(payload) => GatewayResponse::ok(request.id.clone(), payload),
        Err(e) => {
            let error = to_protocol_error(e);
            if error.code == ProtocolError::INTERNAL_ERROR {
                tracing::error!("{} failed: {}", request.method, error.message);
            }
            GatewayResponse::error(request.id.clone(), error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetpulse_core::{NewNotification, NotificationRecord, NotificationsConfig};
    use fleetpulse_notify::{ConnectionRegistry, NotificationDispatcher};
    use fleetpulse_presence::{MemoryPresenceStore, PresenceReconciler, PresenceTracker};
    use fleetpulse_storage::SqliteStore;
    use serde_json::json;

    fn handlers() -> MethodHandlers {
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
        MethodHandlers::new(store, tracker, reconciler, dispatcher, NotificationsConfig::default())
    }

    #[tokio::test]
    async fn test_unknown_method_is_invalid_request() {
        let handlers = handlers();
        let session = GatewaySession::new("u1", None);
        let request = GatewayRequest::new("1", "agent", JsonValue::Null);

        let response = handle_request(&request, &session, &handlers).await;
        assert!(!response.ok);
        assert_eq!(response.error_code(), Some(ProtocolError::INVALID_REQUEST));
    }

    #[tokio::test]
    async fn test_empty_request_id_rejected() {
        let handlers = handlers();
        let session = GatewaySession::new("u1", None);
        let request = GatewayRequest::new(" ", "health", JsonValue::Null);

        let response = handle_request(&request, &session, &handlers).await;
        assert_eq!(response.error_code(), Some(ProtocolError::INVALID_REQUEST));
    }

    #[tokio::test]
    async fn test_routes_health_and_not_found() {
        let handlers = handlers();
        let session = GatewaySession::new("u1", None);

        let health = handle_request(
            &GatewayRequest::new("1", "health", JsonValue::Null),
            &session,
            &handlers,
        )
        .await;
        assert!(health.ok);
        assert_eq!(health.payload.unwrap()["status"], "ok");

        let missing = handle_request(
            &GatewayRequest::new("2", "notifications.delete", json!({"id": "nope"})),
            &session,
            &handlers,
        )
        .await;
        assert_eq!(missing.error_code(), Some(ProtocolError::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_ws_channel_queue_full_and_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let channel = WsChannel::new("c1", tx);
        let record = NotificationRecord::from_new("u1", NewNotification::new("t", "m"));
        let event = PushEvent::Notification(record.view());

        channel.send(&event).await.unwrap();
        assert!(!*channel.subscribe().borrow());
        assert!(matches!(channel.send(&event).await, Err(ChannelError::Full)));
        // Overflow closes the channel on its own
        tokio::time::timeout(Duration::from_secs(1), channel.closed())
            .await
            .unwrap();

        match rx.recv().await {
            Some(GatewayFrame::Event(GatewayEvent::Notification(view))) => {
                assert_eq!(view.id, record.id)
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        drop(rx);
        assert!(matches!(channel.send(&event).await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_overflowed_push_queue_ends_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
                .await
                .unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    return true;
                }
            }
            false
        });
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut ws_sender, mut ws_receiver) = ws.split();

        let handlers = Arc::new(handlers());
        let registry = handlers.registry().clone();
        let (tx, mut rx) = mpsc::channel(1);
        let channel = Arc::new(WsChannel::new("c1", tx));
        let mut closed_rx = channel.subscribe();
        registry.register("u1", channel.clone()).await;

        // Nothing drains the queue yet, so the second push overflows it
        let dispatcher = handlers.dispatcher();
        dispatcher
            .create_notification("u1", NewNotification::new("first", "m"))
            .await
            .unwrap();
        dispatcher
            .create_notification("u1", NewNotification::new("second", "m"))
            .await
            .unwrap();
        assert!(!registry.is_connected("u1").await);

        let ctx = ConnectionContext {
            handlers: handlers.clone(),
            auth: Arc::new(TokenAuth::new()),
            outbound_buffer: 1,
            handshake_timeout: Duration::from_secs(1),
        };
        let session = GatewaySession::new("u1", None);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let served = tokio::time::timeout(
            Duration::from_secs(5),
            serve_session(
                &session,
                "connect".to_string(),
                &ctx,
                &mut ws_sender,
                &mut ws_receiver,
                &mut rx,
                &mut shutdown_rx,
                &mut closed_rx,
            ),
        )
        .await
        .expect("session kept running after its channel was dropped");
        assert!(served.is_ok());

        let saw_close = tokio::time::timeout(Duration::from_secs(5), client)
            .await
            .unwrap()
            .unwrap();
        assert!(saw_close);
        assert!(!registry.is_connected("u1").await);
    }
}
