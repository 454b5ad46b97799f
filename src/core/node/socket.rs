// src/core/node/socket.rs

//! The event channel task: keeps a websocket to the node open, feeds every message into
//! the node handle and reconnects with backoff until the node is closed.

use super::NodeHandle;
use crate::core::errors::{LavalinkError, Result};
use crate::core::protocol::NodeMessage;
use futures::StreamExt;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, info, warn};

/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Identifies the client to the node.
#[derive(Debug, Clone)]
pub struct SocketIdentity {
    pub user_id: u64,
    pub client_name: String,
}

/// Spawns the event channel task for `node`.
pub fn spawn(node: Arc<NodeHandle>, identity: SocketIdentity) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(node, identity))
}

/// Runs the connect / read / reconnect loop until the node's cancellation token fires.
pub async fn run(node: Arc<NodeHandle>, identity: SocketIdentity) {
    let initial = node.config().reconnect_initial;
    let max = node.config().reconnect_max;
    let cancel = node.cancellation_token();
    let mut reconnect_delay = initial;

    loop {
        let session = tokio::select! {
            _ = cancel.cancelled() => break,
            result = read_session(&node, &identity) => result,
        };

        match session {
            // The node accepted us and later closed the channel; start over quickly.
            Ok(()) => reconnect_delay = initial,
            Err(e) => {
                warn!(node = %node.name(), "Event channel failed: {e}. Retrying in {reconnect_delay:?}...");
            }
        }

        let delay = with_jitter(reconnect_delay);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = time::sleep(delay) => {}
        }
        reconnect_delay = (reconnect_delay * 2).min(max);
    }
    debug!(node = %node.name(), "Event channel task stopped.");
}

/// Connects once and processes messages until the stream ends.
///
/// Returns `Ok` only if the connection was established.
async fn read_session(node: &Arc<NodeHandle>, identity: &SocketIdentity) -> Result<()> {
    let request = build_request(node, identity)?;
    let (ws_stream, _) = connect_async(request).await?;
    info!(node = %node.name(), "Event channel connected.");
    let (_write, mut read) = ws_stream.split();

    let mut close: Option<(u16, String)> = None;
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match NodeMessage::parse(text.as_str()) {
                Ok(message) => node.on_message(message),
                Err(e) => warn!(node = %node.name(), "Dropping malformed message: {e}"),
            },
            Ok(Message::Close(frame)) => {
                close = Some(match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                    None => (ABNORMAL_CLOSURE, String::new()),
                });
                break;
            }
            Ok(_) => {}
            Err(e) => {
                close = Some((ABNORMAL_CLOSURE, e.to_string()));
                break;
            }
        }
    }

    let (code, reason) = close.unwrap_or((ABNORMAL_CLOSURE, "stream ended".to_string()));
    if !node.is_closed() {
        node.on_socket_closed(code, &reason, true);
    }
    Ok(())
}

fn build_request(node: &NodeHandle, identity: &SocketIdentity) -> Result<Request> {
    let url = node.config().websocket_url()?;
    let mut request = url.as_str().into_client_request()?;
    let headers = request.headers_mut();
    headers.insert("Authorization", header_value(&node.config().password)?);
    headers.insert("User-Id", header_value(&identity.user_id.to_string())?);
    headers.insert("Client-Name", header_value(&identity.client_name)?);
    if let Some(session_id) = node.session_id() {
        headers.insert("Session-Id", header_value(&session_id)?);
    }
    Ok(request)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| LavalinkError::InvalidConfig(format!("invalid header value: {e}")))
}

/// Spreads reconnects of many clients by up to a quarter of the delay.
fn with_jitter(delay: Duration) -> Duration {
    let spread = delay.as_millis() as u64 / 4;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}
