//! WebSocket signaling connection handler
//!
//! One task per connection: a writer loop draining an per-connection
//! outbound channel (fed both by this connection's own request handling and,
//! asynchronously, by directives issued for other peers' requests) raced
//! against a reader loop decoding `ClientMessage` JSON text frames and
//! `frame::{REGISTER,DATA,KEEPALIVE}` binary relay frames.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMsg, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use mesh_net::coordinator::Directive;
use mesh_net::relay::frame;
use mesh_net::signaling::{ClientMessage, ServerMessage};

use crate::server::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    {
        let mut limiter = state.rate_limiter.lock().await;
        if !limiter.check(addr.ip()) {
            warn!(ip = %addr.ip(), "rate limit exceeded, rejecting upgrade");
            return axum::http::StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (relay_tx, mut relay_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let mut peer_id: Option<String> = None;
    let mut relay_token: Option<String> = None;

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                let Some(message) = outgoing else { break };
                let Ok(text) = serde_json::to_string(&message) else { continue };
                if sink.send(WsMsg::Text(text.into())).await.is_err() {
                    break;
                }
            }
            relayed = relay_rx.recv() => {
                let Some(bytes) = relayed else { continue };
                if sink.send(WsMsg::Binary(bytes.into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                let Some(incoming) = incoming else { break };
                match incoming {
                    Ok(WsMsg::Text(text)) => {
                        handle_client_message(
                            &state,
                            &mut peer_id,
                            &outbound_tx,
                            &text,
                        )
                        .await;
                    }
                    Ok(WsMsg::Binary(bytes)) => {
                        handle_relay_frame(
                            &state,
                            &peer_id,
                            &mut relay_token,
                            &relay_tx,
                            &bytes,
                        );
                    }
                    Ok(WsMsg::Ping(_)) | Ok(WsMsg::Pong(_)) => continue,
                    Ok(WsMsg::Close(_)) | Err(_) => break,
                }
            }
        }
    }

    if let Some(id) = peer_id {
        state.registry.remove(&id);
        debug!(peer_id = %id, "peer disconnected");
    }
    if let Some(token) = relay_token {
        state.relay_bridge.close(&token);
    }
}

async fn handle_client_message(
    state: &Arc<AppState>,
    peer_id: &mut Option<String>,
    outbound_tx: &mpsc::UnboundedSender<ServerMessage>,
    text: &str,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            let _ = outbound_tx.send(ServerMessage::Error {
                message: format!("malformed message: {e}"),
            });
            return;
        }
    };

    match message {
        ClientMessage::Register { peer_id: id, network_id } => {
            info!(peer_id = %id, network_id = %network_id, "peer registered");
            state.registry.register(id.clone(), outbound_tx.clone());
            *peer_id = Some(id);
            let _ = outbound_tx.send(ServerMessage::Registered { server_time: now_ms() });
        }
        ClientMessage::ReportEndpoint { endpoint, nat_type } => {
            let Some(id) = peer_id.as_deref() else { return };
            match endpoint.parse() {
                Ok(addr) => state.registry.report_endpoint(id, addr, nat_type),
                Err(_) => {
                    let _ = outbound_tx.send(ServerMessage::Error {
                        message: "invalid endpoint".to_string(),
                    });
                }
            }
        }
        ClientMessage::RequestConnection { target, my_public_key } => {
            let Some(id) = peer_id.as_deref() else { return };
            request_connection(state, id, &target, my_public_key).await;
        }
        ClientMessage::HolePunchReady => {
            debug!(peer_id = ?peer_id, "peer signaled hole-punch ready");
        }
        ClientMessage::HolePunchSent { new_endpoint } => {
            if let (Some(id), Ok(addr)) = (peer_id.as_deref(), new_endpoint.parse()) {
                let nat_type = state
                    .registry
                    .get(id)
                    .map(|r| r.nat_type)
                    .unwrap_or(mesh_net::nat::types::NatType::Unknown);
                state.registry.report_endpoint(id, addr, nat_type);
            }
        }
        ClientMessage::HolePunchResult { target, success, .. } => {
            let Some(id) = peer_id.as_deref() else { return };
            state.coordinator.handle_result(id, &target, success).await;
        }
        ClientMessage::RequestRelay { target } => {
            let Some(id) = peer_id.as_deref() else { return };
            request_relay(state, id, &target, outbound_tx).await;
        }
        ClientMessage::Ping => {
            let _ = outbound_tx.send(ServerMessage::Pong);
        }
    }
}

async fn request_connection(state: &Arc<AppState>, initiator: &str, target: &str, public_key: String) {
    let Some(initiator_record) = state.registry.get(initiator) else {
        return;
    };
    let Some(initiator_endpoint) = initiator_record.endpoint else {
        state.registry.send_to(
            initiator,
            ServerMessage::Error {
                message: "report your endpoint before requesting a connection".to_string(),
            },
        );
        return;
    };

    if let Ok(bytes) = hex_decode(&public_key) {
        state.registry.set_public_key(initiator, bytes);
    }

    let result = state
        .coordinator
        .handle_request(initiator, target, initiator_endpoint, initiator_record.nat_type)
        .await;

    match result {
        Ok(directives) => {
            for directive in directives {
                dispatch_directive(state, directive);
            }
        }
        Err(e) => {
            state.registry.send_to(
                initiator,
                ServerMessage::Error { message: e.to_string() },
            );
        }
    }
}

fn dispatch_directive(state: &Arc<AppState>, directive: Directive) {
    match directive {
        Directive::Invite { target_peer_id, from_peer_id, from_endpoint } => {
            let Some(from_record) = state.registry.get(&from_peer_id) else { return };
            state.registry.send_to(
                &target_peer_id,
                ServerMessage::PeerEndpoint {
                    peer_id: from_peer_id,
                    endpoint: from_endpoint.to_string(),
                    nat_type: from_record.nat_type,
                    public_key: from_record.public_key.map(hex_encode).unwrap_or_default(),
                },
            );
            state.registry.send_to(
                &target_peer_id,
                ServerMessage::HolePunchInitiate { target_endpoint: from_endpoint.to_string() },
            );
        }
        Directive::Execute { initiator_peer_id, target_endpoint, simultaneous } => {
            state
                .registry
                .send_to(&initiator_peer_id, ServerMessage::HolePunchStrategy { simultaneous });
            state.registry.send_to(
                &initiator_peer_id,
                ServerMessage::HolePunchNow { target_endpoint: target_endpoint.to_string() },
            );
        }
        Directive::Reject { initiator_peer_id } => {
            state.registry.send_to(
                &initiator_peer_id,
                ServerMessage::Error { message: "connection rejected".to_string() },
            );
        }
    }
}

async fn request_relay(
    state: &Arc<AppState>,
    requester: &str,
    target: &str,
    outbound_tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    let session_id = format!("{requester}->{target}");
    if state
        .relay_sessions
        .create_session(session_id, requester, target, "coordinator")
        .await
        .is_err()
    {
        let _ = outbound_tx.send(ServerMessage::Error { message: "relay at capacity".to_string() });
        return;
    }
    let token = state.relay_bridge.issue_token();
    let _ = outbound_tx.send(ServerMessage::RelayAssigned {
        endpoint: state.config.bind_addr.clone(),
        token,
    });
}

fn handle_relay_frame(
    state: &Arc<AppState>,
    peer_id: &Option<String>,
    relay_token: &mut Option<String>,
    relay_tx: &mpsc::UnboundedSender<Vec<u8>>,
    bytes: &[u8],
) {
    let Some(&msg_type) = bytes.first() else { return };
    let Some(id) = peer_id.as_deref() else { return };

    match msg_type {
        frame::REGISTER => {
            let token = String::from_utf8_lossy(&bytes[1..]).to_string();
            state.relay_bridge.join(&token, id.to_string(), relay_tx.clone());
            *relay_token = Some(token);
        }
        frame::DATA => {
            if let Some(token) = relay_token.as_deref() {
                state.relay_bridge.forward(token, id, bytes.to_vec());
            }
        }
        frame::KEEPALIVE => {}
        _ => {}
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn hex_encode(bytes: [u8; 32]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<[u8; 32], ()> {
    if s.len() != 64 {
        return Err(());
    }
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| ())?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let key = [7u8; 32];
        let encoded = hex_encode(key);
        assert_eq!(hex_decode(&encoded), Ok(key));
    }

    #[test]
    fn hex_decode_rejects_wrong_length() {
        assert!(hex_decode("abcd").is_err());
    }
}
