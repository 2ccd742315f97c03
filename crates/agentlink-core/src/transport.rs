//! Transport seam for the messaging channel.
//!
//! The client speaks [`Frame`]s; what carries them is injected. A
//! [`Connector`] dials the configured endpoint and hands back one
//! [`Transport`] per successful attempt. Concrete network adapters live
//! outside this crate; the in-memory pair here backs tests and in-process
//! brokers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::Frame;

/// A live, message-oriented channel carrying whole frames.
#[async_trait]
pub trait Transport: Send {
    /// Transmit one frame.
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` once the peer side is gone; whether that was a
    /// clean shutdown is decided by the connection loop from the frames
    /// that preceded it.
    async fn recv(&mut self) -> Result<Option<Frame>>;

    /// Close the channel. Idempotent.
    async fn close(&mut self);
}

/// Dials the configured endpoint and produces transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new channel to the endpoint in `config`.
    async fn connect(&self, config: &ClientConfig) -> Result<Box<dyn Transport>>;
}

/// One side of an in-process frame channel.
pub struct MemoryTransport {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
    closed: bool,
}

/// Build a connected pair of in-process transports.
pub fn memory_transport_pair(capacity: usize) -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);

    (
        MemoryTransport {
            tx: a_tx,
            rx: b_rx,
            closed: false,
        },
        MemoryTransport {
            tx: b_tx,
            rx: a_rx,
            closed: false,
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.closed {
            return Err(Error::Connection("transport closed".into()));
        }
        self.tx
            .send(frame)
            .await
            .map_err(|_| Error::Connection("peer side gone".into()))
    }

    async fn recv(&mut self) -> Result<Option<Frame>> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        self.closed = true;
        self.rx.close();
    }
}

/// In-process connector handing the remote side of each dial to an
/// acceptor channel.
///
/// Dials are counted and can be scripted to fail, which is how connection
/// and reconnection behavior gets exercised without a network.
pub struct MemoryConnector {
    acceptor: mpsc::Sender<MemoryTransport>,
    dials: AtomicU32,
    failures_remaining: AtomicU32,
}

impl MemoryConnector {
    /// Create a connector plus the receiver on which accepted transports
    /// arrive.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<MemoryTransport>) {
        let (acceptor, accepted) = mpsc::channel(8);
        (
            Arc::new(Self {
                acceptor,
                dials: AtomicU32::new(0),
                failures_remaining: AtomicU32::new(0),
            }),
            accepted,
        )
    }

    /// How many dials were attempted so far.
    pub fn dial_count(&self) -> u32 {
        self.dials.load(Ordering::SeqCst)
    }

    /// Make the next `n` dials fail with a connection error.
    pub fn fail_next_dials(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _config: &ClientConfig) -> Result<Box<dyn Transport>> {
        self.dials.fetch_add(1, Ordering::SeqCst);

        if self.failures_remaining.load(Ordering::SeqCst) > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Connection("dial refused".into()));
        }

        let (local, remote) = memory_transport_pair(64);
        self.acceptor
            .send(remote)
            .await
            .map_err(|_| Error::Connection("no acceptor listening".into()))?;

        Ok(Box::new(local))
    }
}
