use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use pairlink_core::{
    ClientEvent, Coordinator, CoordinatorStats, DiscoveryProvider, PeerCandidate, StaticDiscovery,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use warp::http::StatusCode;
use warp::{Filter, Reply};

// ============================================================================
// SERVER CONTEXT: shared state for HTTP + websocket endpoints
// ============================================================================

pub struct ServerContext {
    pub coordinator: Arc<Coordinator>,
    pub discovery: Arc<dyn DiscoveryProvider>,
    pub start_time: Instant,
}

impl ServerContext {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            discovery: Arc::new(StaticDiscovery::default()),
            start_time: Instant::now(),
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn DiscoveryProvider>) -> Self {
        self.discovery = discovery;
        self
    }
}

// ============================================================================
// API RESPONSE TYPES
// ============================================================================

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    coordinator: CoordinatorStats,
}

#[derive(Serialize)]
struct CandidatesResponse {
    reachable: Vec<PeerCandidate>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// ROUTES
// ============================================================================

pub fn routes(
    ctx: Arc<ServerContext>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let ctx_filter = warp::any().map({
        let ctx = ctx.clone();
        move || ctx.clone()
    });

    // 1. Coordinator websocket at /ws
    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(ctx_filter.clone())
        .map(|ws: warp::ws::Ws, ctx: Arc<ServerContext>| {
            let coordinator = ctx.coordinator.clone();
            ws.on_upgrade(move |socket| handle_connection(socket, coordinator))
        });

    // 2. Status API
    let status_route = warp::path!("api" / "status")
        .and(warp::get())
        .and(ctx_filter.clone())
        .and_then(handle_status);

    // 3. Reachable peers from the configured discovery source
    let discover_route = warp::path!("api" / "candidates")
        .and(warp::get())
        .and(ctx_filter.clone())
        .and_then(handle_discover);

    // 4. Filter candidates supplied by the client
    let candidates_route = warp::path!("api" / "candidates")
        .and(warp::post())
        .and(warp::body::content_length_limit(64 * 1024))
        .and(warp::body::json())
        .and(ctx_filter)
        .and_then(handle_candidates);

    let cors = warp::cors().allow_any_origin();
    ws_route
        .or(status_route)
        .or(discover_route)
        .or(candidates_route)
        .with(cors)
        .with(warp::trace::request())
}

/// Bind `addr` and serve until the process is stopped
pub async fn serve(addr: SocketAddr, ctx: Arc<ServerContext>) -> Result<()> {
    let (bound, server) = warp::serve(routes(ctx))
        .try_bind_ephemeral(addr)
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Coordinator listening on ws://{}/ws", bound);
    server.await;
    Ok(())
}

// ============================================================================
// API HANDLERS
// ============================================================================

async fn handle_status(ctx: Arc<ServerContext>) -> Result<impl warp::Reply, warp::Rejection> {
    let response = StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: ctx.start_time.elapsed().as_secs(),
        coordinator: ctx.coordinator.stats(),
    };
    Ok(warp::reply::json(&response))
}

async fn handle_candidates(
    candidates: Vec<PeerCandidate>,
    ctx: Arc<ServerContext>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let reachable = ctx.coordinator.reachable_candidates(candidates);
    Ok(warp::reply::json(&CandidatesResponse { reachable }))
}

async fn handle_discover(ctx: Arc<ServerContext>) -> Result<warp::reply::Response, warp::Rejection> {
    match ctx.coordinator.discover_reachable(ctx.discovery.as_ref()).await {
        Ok(reachable) => Ok(warp::reply::json(&CandidatesResponse { reachable }).into_response()),
        Err(e) => {
            tracing::warn!("Discovery failed: {:#}", e);
            let body = warp::reply::json(&ErrorResponse {
                error: e.to_string(),
            });
            Ok(warp::reply::with_status(body, StatusCode::BAD_GATEWAY).into_response())
        }
    }
}

// ============================================================================
// WEBSOCKET HANDLER
// ============================================================================

async fn handle_connection(ws: warp::ws::WebSocket, coordinator: Arc<Coordinator>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (handle, mut outbound) = coordinator.open_handle();
    let handle_id = handle.id();
    tracing::debug!("{} opened", handle_id);

    // Outbound queue -> websocket
    let forward_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            match event.encode() {
                Ok(json) => {
                    if ws_tx.send(warp::ws::Message::text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Failed to encode {}: {}", event.event_name(), e),
            }
        }
    });

    // Websocket -> coordinator
    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("{} read error: {}", handle_id, e);
                break;
            }
        };

        if msg.is_close() {
            break;
        }
        if msg.is_ping() || msg.is_pong() {
            continue;
        }

        // Text and binary frames both carry UTF-8 JSON
        match ClientEvent::decode_bytes(msg.as_bytes()) {
            Ok(event) => coordinator.dispatch(&handle, event),
            Err(e) => coordinator.report_protocol_error(&handle, &e),
        }
    }

    if let Some(identity) = coordinator.disconnect(handle_id) {
        tracing::debug!("{} closed, {} unregistered", handle_id, identity);
    } else {
        tracing::debug!("{} closed", handle_id);
    }
    drop(handle);
    forward_task.abort();
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn test_ctx() -> Arc<ServerContext> {
        Arc::new(ServerContext::new(Arc::new(Coordinator::new())))
    }

    async fn recv_json(client: &mut warp::test::WsClient) -> Value {
        let msg = client.recv().await.expect("websocket closed");
        serde_json::from_str(msg.to_str().expect("expected text frame")).unwrap()
    }

    #[tokio::test]
    async fn test_ws_pairing_and_chat() {
        let ctx = test_ctx();
        let filter = routes(ctx.clone());

        let mut alice = warp::test::ws().path("/ws").handshake(filter.clone()).await.unwrap();
        let mut bob = warp::test::ws().path("/ws").handshake(filter).await.unwrap();

        alice.send_text(json!({"event": "register", "data": "1001"}).to_string()).await;
        bob.send_text(json!({"event": "register", "data": "2002"}).to_string()).await;

        // Registration has no reply; wait until both are visible
        for _ in 0..50 {
            if ctx.coordinator.stats().identities_registered == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        alice
            .send_text(
                json!({"event": "send-connection-request", "data": {"from": "1001", "to": "2002"}})
                    .to_string(),
            )
            .await;
        assert_eq!(
            recv_json(&mut bob).await,
            json!({"event": "connection-request", "data": {"from": "1001"}})
        );

        bob.send_text(
            json!({"event": "accept-connection", "data": {"from": "1001", "to": "2002"}})
                .to_string(),
        )
        .await;
        assert_eq!(
            recv_json(&mut alice).await,
            json!({"event": "connection-accepted", "data": {"to": "2002"}})
        );
        assert_eq!(
            recv_json(&mut bob).await,
            json!({"event": "connection-accepted", "data": {"to": "1001"}})
        );

        alice
            .send_text(
                json!({"event": "chat-message", "data": {"from": "1001", "to": "2002", "payload": "hi"}})
                    .to_string(),
            )
            .await;
        assert_eq!(
            recv_json(&mut bob).await,
            json!({"event": "chat-message", "data": {"from": "1001", "payload": "hi"}})
        );
    }

    #[tokio::test]
    async fn test_ws_malformed_frame_reports_error() {
        let mut client = warp::test::ws()
            .path("/ws")
            .handshake(routes(test_ctx()))
            .await
            .unwrap();

        client.send_text("{not json").await;

        assert_eq!(
            recv_json(&mut client).await,
            json!({"event": "request-error", "data": "MalformedEvent"})
        );
    }

    #[tokio::test]
    async fn test_ws_binary_frames_are_decoded() {
        let ctx = test_ctx();
        let mut client = warp::test::ws()
            .path("/ws")
            .handshake(routes(ctx.clone()))
            .await
            .unwrap();

        client
            .send(warp::ws::Message::binary(
                json!({"event": "register", "data": "1001"}).to_string().into_bytes(),
            ))
            .await;
        for _ in 0..50 {
            if ctx.coordinator.stats().identities_registered == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(ctx.coordinator.stats().identities_registered, 1);

        client.send(warp::ws::Message::binary(b"garbage".to_vec())).await;
        assert_eq!(
            recv_json(&mut client).await,
            json!({"event": "request-error", "data": "MalformedEvent"})
        );
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let response = warp::test::request()
            .method("GET")
            .path("/api/status")
            .reply(&routes(test_ctx()))
            .await;

        assert_eq!(response.status(), 200);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["coordinator"]["identities_registered"], 0);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_discovery_endpoint_lists_registered_peers() {
        let coordinator = Arc::new(Coordinator::new());
        let (handle, _rx) = coordinator.open_handle();
        coordinator
            .register(&handle, pairlink_core::Identity::parse("1001").unwrap())
            .unwrap();
        let discovery = StaticDiscovery::new(vec![
            PeerCandidate::new(pairlink_core::Identity::parse("1001").unwrap(), "laptop"),
            PeerCandidate::new(pairlink_core::Identity::parse("3003").unwrap(), "phone"),
        ]);
        let ctx = Arc::new(ServerContext::new(coordinator).with_discovery(Arc::new(discovery)));

        let response = warp::test::request()
            .method("GET")
            .path("/api/candidates")
            .reply(&routes(ctx))
            .await;

        assert_eq!(response.status(), 200);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(
            body,
            json!({"reachable": [{"identity": "1001", "hostname": "laptop"}]})
        );
    }

    #[tokio::test]
    async fn test_candidates_endpoint_filters_unregistered() {
        let ctx = test_ctx();
        let (handle, _rx) = ctx.coordinator.open_handle();
        ctx.coordinator
            .register(&handle, pairlink_core::Identity::parse("1001").unwrap())
            .unwrap();

        let response = warp::test::request()
            .method("POST")
            .path("/api/candidates")
            .json(&json!([
                {"identity": "1001", "hostname": "laptop"},
                {"identity": "3003", "hostname": "phone"}
            ]))
            .reply(&routes(ctx))
            .await;

        assert_eq!(response.status(), 200);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(
            body,
            json!({"reachable": [{"identity": "1001", "hostname": "laptop"}]})
        );
    }
}
