//! Registry of live channels.
//!
//! Each admitted channel keeps the write half of its socket here. Sending
//! never fails from the caller's point of view: a transport error removes
//! the channel and is reported as [`SendOutcome::Dropped`], so a broadcast
//! over many channels always runs to the end.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use jarvis_shared::types::{ChannelKind, ConnectionId};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

type BoxedSink = Pin<Box<dyn Sink<Message, Error = String> + Send>>;

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The channel was not (or no longer) registered; nothing was sent.
    Inactive,
    /// The transport failed; the channel has been removed.
    Dropped,
}

impl SendOutcome {
    pub fn is_delivered(self) -> bool {
        self == SendOutcome::Delivered
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

struct Entry {
    kind: ChannelKind,
    sink: Arc<Mutex<BoxedSink>>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, Entry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel. Returns `false` (and drops `sink`) if `id` is
    /// already active.
    pub async fn admit<S>(&self, id: ConnectionId, kind: ChannelKind, sink: S) -> bool
    where
        S: Sink<Message> + Send + 'static,
        S::Error: std::fmt::Display,
    {
        let mut connections = self.connections.write().await;
        if connections.contains_key(&id) {
            return false;
        }

        let sink: BoxedSink = Box::pin(sink.sink_map_err(|e| e.to_string()));
        connections.insert(
            id,
            Entry {
                kind,
                sink: Arc::new(Mutex::new(sink)),
            },
        );

        info!(
            connection = %id.short(),
            channel = %kind,
            active = connections.len(),
            "Channel admitted"
        );
        true
    }

    pub async fn send(&self, id: ConnectionId, message: Message) -> SendOutcome {
        let sink = match self.connections.read().await.get(&id) {
            Some(entry) => entry.sink.clone(),
            None => {
                debug!(connection = %id.short(), "Send to inactive channel skipped");
                return SendOutcome::Inactive;
            }
        };

        let result = sink.lock().await.send(message).await;
        match result {
            Ok(()) => SendOutcome::Delivered,
            Err(error) => {
                debug!(connection = %id.short(), %error, "Send failed, dropping channel");
                self.remove(id).await;
                SendOutcome::Dropped
            }
        }
    }

    /// Deliver `message` to every channel of `kind` except `except`.
    pub async fn broadcast(
        &self,
        kind: ChannelKind,
        message: Message,
        except: Option<ConnectionId>,
    ) -> BroadcastReport {
        let targets: Vec<ConnectionId> = self
            .connections
            .read()
            .await
            .iter()
            .filter(|(id, entry)| entry.kind == kind && Some(**id) != except)
            .map(|(id, _)| *id)
            .collect();

        let mut report = BroadcastReport::default();
        for id in targets {
            match self.send(id, message.clone()).await {
                SendOutcome::Delivered => report.delivered += 1,
                SendOutcome::Dropped => report.dropped += 1,
                SendOutcome::Inactive => {}
            }
        }
        report
    }

    /// Drop a channel. Returns whether it was present.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(&id).is_some();
        if removed {
            debug!(
                connection = %id.short(),
                active = connections.len(),
                "Channel removed"
            );
        }
        removed
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}
