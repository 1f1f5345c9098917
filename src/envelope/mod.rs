//! Envelopes: the unit of transport
//!
//! An [`Envelope`] is a topic plus a tagged payload. End-of-stream is an
//! explicit [`Payload::Stop`] variant rather than a special payload value,
//! so consumers match on it instead of inspecting data.
//!
//! Envelopes are cheap to clone: the payload is a reference-counted `Bytes`,
//! so fanning one envelope out to many subscriptions shares the same
//! allocation.

pub mod frame;
pub mod wire;

use bytes::Bytes;

pub use frame::{DType, Element, Frame, FrameShape};

/// Identifies the producer that stamped an envelope's sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerId(pub u64);

impl std::fmt::Display for ProducerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "producer-{}", self.0)
    }
}

/// Envelope payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Opaque data (usually an encoded [`Frame`])
    Data(Bytes),
    /// End of stream for the envelope's topic
    Stop,
}

/// A topic-tagged message
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Routing topic
    pub topic: String,
    /// Producer that published this envelope
    pub producer: ProducerId,
    /// Per-producer sequence number, strictly increasing
    pub sequence: u64,
    /// Payload
    pub payload: Payload,
}

impl Envelope {
    /// Create a data envelope
    pub fn data(
        topic: impl Into<String>,
        producer: ProducerId,
        sequence: u64,
        data: Bytes,
    ) -> Self {
        Self {
            topic: topic.into(),
            producer,
            sequence,
            payload: Payload::Data(data),
        }
    }

    /// Create a stop marker envelope
    pub fn stop(topic: impl Into<String>, producer: ProducerId, sequence: u64) -> Self {
        Self {
            topic: topic.into(),
            producer,
            sequence,
            payload: Payload::Stop,
        }
    }

    /// Check if this is a stop marker
    pub fn is_stop(&self) -> bool {
        matches!(self.payload, Payload::Stop)
    }

    /// Payload size in bytes (0 for stop markers)
    pub fn payload_len(&self) -> usize {
        match &self.payload {
            Payload::Data(data) => data.len(),
            Payload::Stop => 0,
        }
    }

    /// Decode the data payload as a frame
    ///
    /// Returns `None` for stop markers.
    pub fn frame(&self) -> Option<crate::Result<Frame>> {
        match &self.payload {
            Payload::Data(data) => Some(Frame::decode(data)),
            Payload::Stop => None,
        }
    }
}
