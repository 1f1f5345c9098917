//! Ready handshake between ventilator and sink
//!
//! The ventilator must not emit work until the sink is collecting, or early
//! results would be lost. The handshake is a single request/acknowledge pair:
//!
//! ```text
//! Ventilator                               Sink
//!   |                                        |
//!   |------- ReadyRequest ----------------->|
//!   |                                        |  (sink starts listening)
//!   |<------ Ack ----------------------------|
//!   |                                        |
//!   |          [Handshake Complete]          |
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Handshake progress on the sink side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent or received yet
    Initial,
    /// Waiting for the ventilator's request
    Listening,
    /// Handshake complete
    Done,
}

/// A ready request carrying its reply channel
#[derive(Debug)]
pub struct ReadyRequest {
    reply: oneshot::Sender<()>,
}

/// Requesting side, held by the ventilator
#[derive(Debug, Clone)]
pub struct HandshakeEndpoint {
    tx: mpsc::Sender<ReadyRequest>,
}

/// Acknowledging side, held by the sink
#[derive(Debug)]
pub struct HandshakeListener {
    rx: mpsc::Receiver<ReadyRequest>,
    state: HandshakeState,
}

/// Create a connected endpoint/listener pair
pub fn channel() -> (HandshakeEndpoint, HandshakeListener) {
    let (tx, rx) = mpsc::channel(1);
    (
        HandshakeEndpoint { tx },
        HandshakeListener {
            rx,
            state: HandshakeState::Initial,
        },
    )
}

impl HandshakeEndpoint {
    /// Send a ready request and wait for the acknowledgement
    ///
    /// Returns the round-trip time.
    pub async fn request(&self, timeout: Duration) -> Result<Duration> {
        let started = Instant::now();
        let (reply, ack) = oneshot::channel();

        let exchange = async {
            self.tx
                .send(ReadyRequest { reply })
                .await
                .map_err(|_| Error::HandshakeTimeout)?;
            ack.await.map_err(|_| Error::HandshakeTimeout)
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| Error::HandshakeTimeout)??;

        let rtt = started.elapsed();
        tracing::debug!(rtt_us = rtt.as_micros() as u64, "Handshake acknowledged");
        Ok(rtt)
    }
}

impl HandshakeListener {
    /// Current state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Check if the handshake has completed
    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Wait for a ready request and acknowledge it
    pub async fn accept(&mut self, timeout: Duration) -> Result<()> {
        if self.is_done() {
            return Ok(());
        }

        self.state = HandshakeState::Listening;
        let request = tokio::time::timeout(timeout, self.rx.recv())
            .await
            .map_err(|_| Error::HandshakeTimeout)?
            .ok_or(Error::HandshakeTimeout)?;

        request
            .reply
            .send(())
            .map_err(|_| Error::HandshakeTimeout)?;
        self.state = HandshakeState::Done;
        Ok(())
    }
}
