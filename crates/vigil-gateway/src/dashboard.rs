//! Dashboard HTTP surface: a single `/ws` websocket endpoint.
//!
//! Origin checking is deliberately permissive and the endpoint carries no
//! authentication; deployments front this port with their own access
//! control. Each accepted socket becomes one hub subscription: an outbound
//! pump forwarding hub frames, and an inbound read loop whose only purpose
//! is to notice the peer closing. Inbound frames are discarded.

use std::io;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::hub::TelemetryHub;

/// Builds the dashboard router.
pub fn router(hub: Arc<TelemetryHub>) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(hub)
}

/// Serves the dashboard until shutdown is requested.
///
/// # Errors
///
/// Returns the underlying I/O error if the server fails; callers treat
/// that as fatal to the process.
pub async fn serve(
    listener: TcpListener,
    hub: Arc<TelemetryHub>,
    shutdown: CancellationToken,
) -> io::Result<()> {
    axum::serve(listener, router(hub))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

async fn upgrade(State(hub): State<Arc<TelemetryHub>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| pump(socket, hub))
}

async fn pump(mut socket: WebSocket, hub: Arc<TelemetryHub>) {
    let (id, mut frames) = hub.add();
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(text) = frame else { break };
                if socket.send(Message::Text(text)).await.is_err() {
                    debug!(subscriber = id, "dashboard write failed");
                    break;
                }
            }
            inbound = socket.recv() => {
                // Inbound frames are discarded; this arm exists to detect
                // the peer closing.
                match inbound {
                    Some(Ok(_)) => {},
                    Some(Err(_)) | None => break,
                }
            }
        }
    }
    hub.remove(id);
}
