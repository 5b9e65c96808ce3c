//! WebSocket transport for the relay
//!
//! `GET /ws?token=...` upgrades after the origin check. Each socket is split
//! into a reader (this task) and a writer task fed by the connection's
//! outbound channel.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use super::engine::RelayEngine;
use super::protocol::{parse_client_frame, ClientEvent, ServerEvent};
use super::registry::{ConnectionHandle, Outbound};
use super::{AuthRejection, CLOSE_AUTH_FAILED};
use crate::core::config::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /ws
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = match headers.get(header::ORIGIN).map(|v| v.to_str()) {
        None => None,
        Some(Ok(origin)) => Some(origin),
        Some(Err(_)) => return (StatusCode::FORBIDDEN, "Origin not allowed").into_response(),
    };

    if !state.config.origin_policy().allows(origin) {
        warn!(origin = ?origin, "[Relay] Rejected socket from disallowed origin");
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }

    let engine = state.relay.clone();
    let handshake_timeout = state.config.handshake_timeout;
    let ping_interval = state.config.ping_interval;

    ws.on_upgrade(move |socket| {
        run_connection(socket, engine, query.token, handshake_timeout, ping_interval)
    })
}

/// Drive one socket from handshake to disconnect
pub async fn run_connection(
    socket: WebSocket,
    engine: Arc<RelayEngine>,
    token: Option<String>,
    handshake_timeout: Duration,
    ping_interval: Duration,
) {
    let (mut sink, mut stream) = socket.split();

    let handshake = timeout(handshake_timeout, async {
        let credential = match token {
            Some(token) => Some(token),
            None => read_credential(&mut stream).await,
        };
        engine.authenticate(credential.as_deref()).await
    })
    .await;

    let identity = match handshake.unwrap_or(Err(AuthRejection::Timeout)) {
        Ok(identity) => identity,
        Err(rejection) => {
            warn!(reason = %rejection, "[Relay] Handshake rejected");
            reject(&mut sink, rejection).await;
            return;
        }
    };

    let (handle, rx) = ConnectionHandle::new();
    let mut writer = tokio::spawn(write_loop(sink, rx, ping_interval));
    let ctx = engine.attach(identity, handle).await;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parse_client_frame(text.as_str()) {
                        engine.handle_event(&ctx, event).await;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(user_id = %ctx.identity.id, reason = ?frame, "[Relay] Client closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(user_id = %ctx.identity.id, error = %e, "[Relay] Receive error");
                    break;
                }
                None => break,
            },
            _ = &mut writer => {
                debug!(user_id = %ctx.identity.id, connection = %ctx.handle.id(), "[Relay] Writer finished");
                break;
            }
        }
    }

    engine.detach(&ctx).await;
    writer.abort();
    info!(user_id = %ctx.identity.id, connection = %ctx.handle.id(), "[Relay] Socket closed");
}

/// The first text frame must be `authenticate`; anything else means no
/// credential was offered.
async fn read_credential(stream: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                return match parse_client_frame(text.as_str()) {
                    Some(ClientEvent::Authenticate { token }) => Some(token),
                    _ => None,
                };
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

async fn reject(sink: &mut SplitSink<WebSocket, Message>, rejection: AuthRejection) {
    let reason = rejection.to_string();
    if let Ok(frame) = (ServerEvent::ConnectError {
        reason: reason.clone(),
    })
    .to_frame()
    {
        let _ = sink.send(Message::Text(frame.into())).await;
    }
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_AUTH_FAILED,
            reason: reason.into(),
        })))
        .await;
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: UnboundedReceiver<Outbound>,
    ping_interval: Duration,
) {
    let mut ping = interval(ping_interval.max(Duration::from_secs(1)));
    // First tick completes immediately
    ping.tick().await;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(outbound) = outbound else {
                    break;
                };
                match outbound {
                    Outbound::Event(event) => {
                        let frame = match event.to_frame() {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, "[Relay] Failed to encode frame");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }
}
