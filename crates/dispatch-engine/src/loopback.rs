//! In-memory transport
//!
//! Real packet transport is a deployment concern; the engine only needs the
//! `Transport` contract. The loopback transport keeps both ends of every
//! connection inspectable, which is what the daemons ship with and what the
//! tests drive control frames through.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use swarm_core::{Connection, Endpoint, Result, SwarmError, Transport};
use tracing::debug;

/// Shared state of one loopback connection: what the agent sent, and what
/// the far side has queued for it.
#[derive(Debug, Default)]
pub struct LoopbackChannel {
    endpoint: Mutex<Option<Endpoint>>,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

impl LoopbackChannel {
    /// Queue a frame for the agent to receive on its next poll.
    pub fn push_inbound(&self, bytes: Vec<u8>) {
        self.inbound.lock().push_back(bytes);
    }

    /// Frames the agent has sent so far.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint.lock().clone()
    }
}

struct LoopbackConnection {
    channel: Arc<LoopbackChannel>,
}

#[async_trait]
impl Connection for LoopbackConnection {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        if self.channel.is_closed() {
            return Err(SwarmError::Io {
                reason: "connection closed".to_string(),
            });
        }
        self.channel.sent.lock().push(bytes.to_vec());
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Vec<u8>>> {
        if self.channel.is_closed() {
            return Err(SwarmError::Io {
                reason: "connection closed".to_string(),
            });
        }
        Ok(self.channel.inbound.lock().pop_front())
    }

    async fn close(&self) {
        self.channel.closed.store(true, Ordering::SeqCst);
        debug!("loopback connection closed");
    }
}

/// Transport producing in-memory connections. Can be flipped to refuse
/// connects, which is how unreachable endpoints are simulated.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    refuse: AtomicBool,
    channels: Mutex<Vec<Arc<LoopbackChannel>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that refuses every connect until `accept` is called.
    pub fn refusing() -> Self {
        let transport = Self::new();
        transport.refuse.store(true, Ordering::SeqCst);
        transport
    }

    pub fn refuse(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn accept(&self) {
        self.refuse.store(false, Ordering::SeqCst);
    }

    /// Channels for every connection handed out so far, oldest first.
    pub fn channels(&self) -> Vec<Arc<LoopbackChannel>> {
        self.channels.lock().clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SwarmError::Connection {
                reason: format!("{endpoint} refused the connection"),
            });
        }
        let channel = Arc::new(LoopbackChannel::default());
        *channel.endpoint.lock() = Some(endpoint.clone());
        self.channels.lock().push(channel.clone());
        debug!(%endpoint, "loopback connection established");
        Ok(Box::new(LoopbackConnection { channel }))
    }
}
