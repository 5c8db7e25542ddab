//! WebSocket channel lifecycle shared by all five endpoints.
//!
//! Every accepted socket is split; the write half goes into the registry and
//! the read half is reduced to a stream of [`Frame`]s that the per-kind
//! handler consumes. Cleanup runs once, whatever ended the handler.

use axum::extract::ws::{Message, WebSocket};
use futures::{future, Stream, StreamExt};
use jarvis_shared::protocol::{Reply, ReplyBody};
use jarvis_shared::types::{ChannelKind, ConnectionId};
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::{router, telemetry, verification, wakeword};

/// What a handler sees of the inbound side of a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Close frame, transport error, or end of stream.
    Close,
}

/// Reduce raw socket messages to frames. Ping/pong are handled by the
/// transport and never reach handlers.
pub fn frames<S, E>(stream: S) -> impl Stream<Item = Frame>
where
    S: Stream<Item = Result<Message, E>>,
    E: std::fmt::Display,
{
    stream.filter_map(|message| {
        future::ready(match message {
            Ok(Message::Text(text)) => Some(Frame::Text(text)),
            Ok(Message::Binary(data)) => Some(Frame::Binary(data)),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Ok(Message::Close(_)) => Some(Frame::Close),
            Err(e) => {
                debug!(error = %e, "WebSocket receive error");
                Some(Frame::Close)
            }
        })
    })
}

/// Run one channel of `kind` to completion.
pub async fn serve(state: AppState, socket: WebSocket, kind: ChannelKind) {
    let id = ConnectionId::new();
    let (sink, stream) = socket.split();

    if !state.registry.admit(id, kind, sink).await {
        warn!(connection = %id.short(), channel = %kind, "Duplicate connection id, closing");
        return;
    }

    let inbound = std::pin::pin!(frames(stream));

    match kind {
        ChannelKind::Command | ChannelKind::FaceModel => {
            router::serve_commands(&state.router, &state.registry, id, inbound).await
        }
        ChannelKind::Telemetry => {
            let probe = (state.probes)();
            telemetry::run(
                &state.registry,
                id,
                probe,
                state.smoother.clone(),
                state.config.telemetry_interval,
                inbound,
            )
            .await
        }
        ChannelKind::WakeWord => {
            wakeword::run(
                &state.registry,
                id,
                state.decoders.as_ref(),
                &state.config.wake_word,
                state.config.wake_threshold,
                inbound,
            )
            .await
        }
        ChannelKind::FaceVerification => {
            verification::run(
                &state.registry,
                id,
                state.matcher.clone(),
                state.store.clone(),
                inbound,
            )
            .await
        }
    }

    disconnect(&state, id, kind).await;
}

async fn disconnect(state: &AppState, id: ConnectionId, kind: ChannelKind) {
    state.registry.remove(id).await;

    if kind != ChannelKind::Command {
        info!(connection = %id.short(), channel = %kind, "Channel closed");
        return;
    }

    let notice = match Reply::new(None, ReplyBody::ClientDisconnected).to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to serialize disconnect notice");
            return;
        }
    };
    let report = state
        .registry
        .broadcast(ChannelKind::Command, Message::Text(notice), Some(id))
        .await;

    info!(
        connection = %id.short(),
        notified = report.delivered,
        dropped = report.dropped,
        "Command channel closed"
    );
}
