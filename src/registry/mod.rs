use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;

const WRITE_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SendError {
    #[error("drone is not connected")]
    NotConnected,

    #[error("connection closed")]
    Closed,

    #[error("write deadline exceeded")]
    Timeout,

    #[error("write failed: {0}")]
    Write(String),

    #[error("encode failed: {0}")]
    Encode(String),
}

/// The write half of one live drone connection.
#[async_trait]
pub trait OutboundChannel: Send {
    async fn send_text(&mut self, text: String) -> Result<(), String>;
    async fn close(&mut self);
}

/// Opaque capability returned by register. Writes are serialized on the inner
/// mutex so concurrent sends never interleave on the wire; close is
/// idempotent and safe under racing writes.
pub struct ClientHandle {
    channel: Mutex<Box<dyn OutboundChannel>>,
    closed: AtomicBool,
}

impl ClientHandle {
    fn new(channel: Box<dyn OutboundChannel>) -> Self {
        Self {
            channel: Mutex::new(channel),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn send_text(&self, text: String) -> Result<(), SendError> {
        let mut channel = self.channel.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }

        match timeout(WRITE_DEADLINE, channel.send_text(text)).await {
            Err(_) => Err(SendError::Timeout),
            Ok(Err(err)) => Err(SendError::Write(err)),
            Ok(Ok(())) => Ok(()),
        }
    }

    pub async fn send<T: Serialize + Sync>(&self, payload: &T) -> Result<(), SendError> {
        let text = serde_json::to_string(payload).map_err(|err| SendError::Encode(err.to_string()))?;
        self.send_text(text).await
    }

    pub async fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let mut channel = self.channel.lock().await;
            channel.close().await;
        }
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Process-wide map from drone id to its one live outbound channel.
#[derive(Default)]
pub struct ConnectionRegistry {
    clients: DashMap<i64, Arc<ClientHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the channel for a drone. A prior entry is closed first;
    /// the most recent connection wins.
    pub async fn register(
        &self,
        drone_id: i64,
        channel: Box<dyn OutboundChannel>,
    ) -> Arc<ClientHandle> {
        let client = Arc::new(ClientHandle::new(channel));
        let previous = self.clients.insert(drone_id, client.clone());
        if let Some(previous) = previous {
            previous.close().await;
        }
        client
    }

    /// Removes the entry only if it still points at this handle, so a
    /// reconnect racing a disconnect never tears down its successor.
    pub async fn unregister(&self, drone_id: i64, client: &Arc<ClientHandle>) {
        self.clients
            .remove_if(&drone_id, |_, current| Arc::ptr_eq(current, client));
        client.close().await;
    }

    pub async fn send<T: Serialize + Sync>(
        &self,
        drone_id: i64,
        payload: &T,
    ) -> Result<(), SendError> {
        let client = self
            .clients
            .get(&drone_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(SendError::NotConnected)?;

        if let Err(err) = client.send(payload).await {
            self.unregister(drone_id, &client).await;
            return Err(err);
        }
        Ok(())
    }

    pub fn connected(&self) -> usize {
        self.clients.len()
    }
}
