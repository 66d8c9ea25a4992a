//! Live connection registry
//!
//! Maps user_id to that user's open connections behind a single mutex.
//! A user may hold several connections (mobile + web); each gets every
//! message. Every connection has a bounded outbound buffer: when it is
//! full the message is dropped for that connection and the rest still
//! receive it. Delivery is best-effort and never blocks a settlement path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::messages::WsMessage;
use crate::request::types::UserId;

/// Outbound channel of one connection
pub type WsSender = mpsc::Sender<WsMessage>;

/// Unique connection identifier
pub type ConnectionId = u64;

pub const DEFAULT_BUFFER: usize = 64;

pub struct ConnectionManager {
    /// user_id -> list of (connection_id, sender)
    connections: Mutex<HashMap<UserId, Vec<(ConnectionId, WsSender)>>>,
    next_conn_id: AtomicU64,
    buffer: usize,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    // The registry is advisory; a panic elsewhere must not stop delivery
    fn table(&self) -> MutexGuard<'_, HashMap<UserId, Vec<(ConnectionId, WsSender)>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Bounded channel sized for this registry
    pub fn channel(&self) -> (WsSender, mpsc::Receiver<WsMessage>) {
        mpsc::channel(self.buffer)
    }

    /// Register a connection; returns its id
    pub fn add_connection(&self, user_id: UserId, tx: WsSender) -> ConnectionId {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

        let mut table = self.table();
        let senders = table.entry(user_id).or_default();
        senders.push((conn_id, tx));

        tracing::info!(
            user_id,
            conn_id,
            total_connections = senders.len(),
            "Live connection added"
        );
        conn_id
    }

    /// Unregister a connection; drops the user entry when it was the last one
    pub fn remove_connection(&self, user_id: UserId, conn_id: ConnectionId) {
        let mut table = self.table();
        let Some(senders) = table.get_mut(&user_id) else {
            return;
        };
        senders.retain(|(id, _)| *id != conn_id);

        if senders.is_empty() {
            table.remove(&user_id);
            tracing::info!(user_id, conn_id, "All live connections closed");
        } else {
            tracing::info!(
                user_id,
                conn_id,
                remaining_connections = senders.len(),
                "Live connection removed"
            );
        }
    }

    /// Fan a message out to every connection of `user_id`
    ///
    /// Returns how many connections accepted it.
    pub fn send_to_user(&self, user_id: UserId, message: WsMessage) -> usize {
        let table = self.table();
        let Some(senders) = table.get(&user_id) else {
            tracing::debug!(user_id, kind = %message.kind, "No live connection, message dropped");
            return 0;
        };

        let mut delivered = 0;
        for (conn_id, tx) in senders {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(user_id, conn_id, kind = %message.kind, "Outbound buffer full, message dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    // Removal is handled by the socket task when it exits
                    tracing::debug!(user_id, conn_id, "Connection closed before delivery");
                }
            }
        }

        tracing::debug!(
            user_id,
            recipients = delivered,
            kind = %message.kind,
            "Message sent to user"
        );
        delivered
    }

    /// (number of users, total connections)
    pub fn stats(&self) -> (usize, usize) {
        let table = self.table();
        (table.len(), table.values().map(Vec::len).sum())
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
