//! Wire codec: newline-delimited JSON envelope framing.
//!
//! Each message is one JSON object terminated by `\n`. The codec performs
//! structural validation only (required fields present, types match);
//! semantic checks like protocol version and timing monotonicity belong to
//! the facade. A decode failure consumes exactly one line so the caller can
//! log it and keep the connection alive.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Result, SyncError};
use crate::types::Envelope;

/// Default cap on a single wire line. FULL_STATE envelopes are the largest
/// messages the producer emits; 1 MiB leaves generous headroom.
pub const DEFAULT_MAX_LINE_LEN: usize = 1024 * 1024;

/// Decode one wire line into an envelope.
pub fn decode_line(line: &str) -> Result<Envelope> {
    serde_json::from_str(line.trim_end())
        .map_err(|e| SyncError::Decode { details: format!("envelope: {e}") })
}

/// Encode an envelope as one wire line (without the trailing newline).
pub fn encode_line(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope)
        .map_err(|e| SyncError::Decode { details: format!("encode: {e}") })
}

/// Framed codec for use with `tokio_util::codec::Framed` transports.
#[derive(Debug)]
pub struct EnvelopeCodec {
    max_line_len: usize,
    /// Scan resume point within the buffer, so repeated polls don't rescan
    next_index: usize,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self { max_line_len, next_index: 0 }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = SyncError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
            if src.len() > self.max_line_len {
                // Discard the oversized prefix so the stream can resync at
                // the next newline.
                src.clear();
                self.next_index = 0;
                return Err(SyncError::decode(format!(
                    "line exceeds {} bytes without terminator",
                    self.max_line_len
                )));
            }
            self.next_index = src.len();
            return Ok(None);
        };

        let end = self.next_index + offset;
        let line = src.split_to(end + 1);
        self.next_index = 0;

        let text = std::str::from_utf8(&line[..end])
            .map_err(|e| SyncError::decode(format!("invalid utf-8: {e}")))?;
        decode_line(text).map(Some)
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = SyncError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<()> {
        let line = encode_line(&item)?;
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelUpdate, EnvelopeKind, RateClass};
    use serde_json::json;

    fn sample_envelope() -> Envelope {
        let mut env = Envelope::new(EnvelopeKind::Data, 42, 1000, 999);
        env.channels.insert(
            "POSITIONS".to_string(),
            ChannelUpdate {
                data: json!([{"id": 1, "x": 2.5}]),
                produced_at: 1000,
                rate_class: RateClass::EveryTick,
            },
        );
        env
    }

    #[test]
    fn encode_then_decode_preserves_envelope() {
        let env = sample_envelope();
        let line = encode_line(&env).unwrap();
        assert!(!line.contains('\n'));
        let back = decode_line(&line).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn malformed_line_is_a_decode_error() {
        let err = decode_line("{\"version\": \"2.1\"").unwrap_err();
        assert!(matches!(err, SyncError::Decode { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn missing_required_field_is_a_decode_error() {
        // No sequence field.
        let line = json!({
            "version": "2.1",
            "type": "DATA",
            "sim_instant": 5,
            "prev_sim_instant": 4
        })
        .to_string();
        assert!(decode_line(&line).is_err());
    }

    #[test]
    fn framed_decoder_splits_on_newlines() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();

        let a = Envelope::new(EnvelopeKind::Event, 1, 10, 9);
        let b = Envelope::new(EnvelopeKind::Event, 2, 11, 10);
        let mut enc = EnvelopeCodec::new();
        enc.encode(a.clone(), &mut buf).unwrap();
        enc.encode(b.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(a));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn framed_decoder_waits_for_terminator() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&b"{\"version\""[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Completing the line yields the envelope in one piece.
        let rest = encode_line(&Envelope::new(EnvelopeKind::Event, 3, 7, 6)).unwrap();
        buf.clear();
        buf.extend_from_slice(rest.as_bytes());
        buf.extend_from_slice(b"\n");
        // next_index may point past the old prefix; clearing resets scanning
        codec.next_index = 0;
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn bad_line_consumes_exactly_one_message() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"not json at all\n");
        let good = Envelope::new(EnvelopeKind::Event, 9, 3, 2);
        let mut enc = EnvelopeCodec::new();
        enc.encode(good.clone(), &mut buf).unwrap();

        assert!(codec.decode(&mut buf).is_err());
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(good));
    }

    #[test]
    fn oversized_unterminated_line_errors_and_resyncs() {
        let mut codec = EnvelopeCodec::with_max_line_len(16);
        let mut buf = BytesMut::from(&b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"[..]);
        assert!(codec.decode(&mut buf).is_err());
        assert!(buf.is_empty());
    }
}
