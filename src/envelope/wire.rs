//! Two-part wire encoding of envelopes
//!
//! ```text
//! +-----------+-------------+------+-------------+-------------+-------------+---------+
//! | topic_len | topic utf-8 | kind | producer    | sequence    | payload_len | payload |
//! | u16 BE    | N bytes     | u8   | u64 BE      | u64 BE      | u32 BE      | M bytes |
//! +-----------+-------------+------+-------------+-------------+-------------+---------+
//! ```
//!
//! `kind` is 0 for data and 1 for a stop marker. Stop markers carry an empty
//! payload. The topic part comes first so a receiver can filter before
//! touching the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Envelope, Payload, ProducerId};
use crate::error::{Error, Result};

const KIND_DATA: u8 = 0;
const KIND_STOP: u8 = 1;

/// Fixed bytes after the topic: kind + producer + sequence + payload length
const FIXED_TAIL: usize = 1 + 8 + 8 + 4;

/// Encode an envelope into a single buffer
pub fn encode(envelope: &Envelope) -> Result<Bytes> {
    let topic = envelope.topic.as_bytes();
    if topic.len() > u16::MAX as usize {
        return Err(Error::wire(format!("topic too long: {} bytes", topic.len())));
    }

    let payload: &[u8] = match &envelope.payload {
        Payload::Data(data) => data,
        Payload::Stop => &[],
    };
    if payload.len() > u32::MAX as usize {
        return Err(Error::wire("payload too large"));
    }

    let mut buf = BytesMut::with_capacity(2 + topic.len() + FIXED_TAIL + payload.len());
    buf.put_u16(topic.len() as u16);
    buf.put_slice(topic);
    buf.put_u8(match envelope.payload {
        Payload::Data(_) => KIND_DATA,
        Payload::Stop => KIND_STOP,
    });
    buf.put_u64(envelope.producer.0);
    buf.put_u64(envelope.sequence);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);

    Ok(buf.freeze())
}

/// Read only the topic part of an encoded envelope
pub fn peek_topic(data: &[u8]) -> Result<&str> {
    if data.len() < 2 {
        return Err(Error::wire("missing topic length"));
    }
    let len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let topic = data
        .get(2..2 + len)
        .ok_or_else(|| Error::wire("truncated topic"))?;

    std::str::from_utf8(topic).map_err(|e| Error::wire(format!("topic is not utf-8: {}", e)))
}

/// Decode an envelope
///
/// The payload is sliced out of `data` without copying.
pub fn decode(data: &Bytes) -> Result<Envelope> {
    let topic = peek_topic(data)?.to_string();
    let header_len = 2 + topic.len();

    let mut rest = data.slice(header_len..);
    if rest.len() < FIXED_TAIL {
        return Err(Error::wire("truncated envelope header"));
    }

    let kind = rest.get_u8();
    let producer = ProducerId(rest.get_u64());
    let sequence = rest.get_u64();
    let payload_len = rest.get_u32() as usize;

    if rest.len() != payload_len {
        return Err(Error::wire(format!(
            "payload length mismatch: header says {}, got {}",
            payload_len,
            rest.len()
        )));
    }

    let payload = match kind {
        KIND_DATA => Payload::Data(rest),
        KIND_STOP if payload_len == 0 => Payload::Stop,
        KIND_STOP => return Err(Error::wire("stop marker with payload")),
        other => return Err(Error::wire(format!("unknown envelope kind {}", other))),
    };

    Ok(Envelope {
        topic,
        producer,
        sequence,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_envelope() {
        let env = Envelope::data("frame", ProducerId(3), 42, Bytes::from_static(b"pixels"));
        let encoded = encode(&env).unwrap();

        assert_eq!(peek_topic(&encoded).unwrap(), "frame");
        assert_eq!(decode(&encoded).unwrap(), env);
    }

    #[test]
    fn test_stop_envelope() {
        let env = Envelope::stop("frame", ProducerId(1), 7);
        let encoded = encode(&env).unwrap();

        assert_eq!(encoded.len(), 2 + 5 + FIXED_TAIL);
        assert!(decode(&encoded).unwrap().is_stop());
    }

    #[test]
    fn test_empty_topic() {
        let env = Envelope::data("", ProducerId(0), 0, Bytes::new());
        let decoded = decode(&encode(&env).unwrap()).unwrap();

        assert_eq!(decoded.topic, "");
        assert_eq!(decoded.payload, Payload::Data(Bytes::new()));
    }

    #[test]
    fn test_truncated_payload() {
        let env = Envelope::data("t", ProducerId(0), 0, Bytes::from_static(b"abcdef"));
        let encoded = encode(&env).unwrap();
        let truncated = encoded.slice(..encoded.len() - 2);

        assert!(matches!(decode(&truncated), Err(Error::Wire(_))));
    }

    #[test]
    fn test_unknown_kind() {
        let env = Envelope::data("t", ProducerId(0), 0, Bytes::new());
        let mut raw = encode(&env).unwrap().to_vec();
        raw[3] = 9; // kind byte follows the 1-byte topic

        assert!(matches!(decode(&Bytes::from(raw)), Err(Error::Wire(_))));
    }

    #[test]
    fn test_invalid_topic_utf8() {
        let raw = [0x00, 0x02, 0xFF, 0xFE];
        assert!(peek_topic(&raw).is_err());
    }
}
