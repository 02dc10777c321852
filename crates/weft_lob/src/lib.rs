//! Self-describing packet container.
//!
//! A packet is a JSON "head" plus an opaque binary body, serialised as:
//!
//! ```text
//! [ head_len (2 bytes, big-endian) | head | body ]
//! ```
//!
//! The head takes one of three shapes, and the shape is how the receiving
//! side classifies a packet before any crypto runs:
//!   - empty (`head_len == 0`)      — a line packet, body starts with a line ID
//!   - a single byte                — an open packet, the byte is the ciphersuite ID
//!   - a JSON object                — a channel packet
//!
//! Packets are plain values; queues of packets are `VecDeque`s owned by
//! whichever component is buffering them.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("truncated packet: head length {head} exceeds remaining {len} bytes")]
    HeadLength { head: usize, len: usize },

    #[error("head is not a JSON object")]
    HeadNotObject,

    #[error("head JSON parse error: {0}")]
    HeadJson(#[from] serde_json::Error),
}

// ── Head ─────────────────────────────────────────────────────────────────────

/// The three permitted head shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Head {
    Empty,
    Single(u8),
    Json(Map<String, Value>),
}

impl Default for Head {
    fn default() -> Self {
        Head::Empty
    }
}

// ── Packet ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Packet {
    head: Head,
    body: Vec<u8>,
}

impl Packet {
    /// A packet with an empty head and no body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse wire bytes. Fails when the head length prefix overruns the
    /// input or a multi-byte head is not a JSON object.
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < 2 {
            return Err(PacketError::HeadLength { head: 2, len: data.len() });
        }
        let head_len = u16::from_be_bytes([data[0], data[1]]) as usize;
        let rest = &data[2..];
        if head_len > rest.len() {
            return Err(PacketError::HeadLength { head: head_len, len: rest.len() });
        }
        let head = match head_len {
            0 => Head::Empty,
            1 => Head::Single(rest[0]),
            _ => {
                let value: Value = serde_json::from_slice(&rest[..head_len])?;
                match value {
                    Value::Object(map) => Head::Json(map),
                    _ => return Err(PacketError::HeadNotObject),
                }
            }
        };
        Ok(Self { head, body: rest[head_len..].to_vec() })
    }

    /// Serialise to wire bytes.
    ///
    /// JSON heads are always well under the 2-byte length limit in
    /// practice; heads are a handful of short scalar fields.
    pub fn raw(&self) -> Vec<u8> {
        let head = self.head_bytes();
        let mut out = Vec::with_capacity(2 + head.len() + self.body.len());
        out.extend_from_slice(&(head.len() as u16).to_be_bytes());
        out.extend_from_slice(&head);
        out.extend_from_slice(&self.body);
        out
    }

    /// Total encoded length.
    pub fn len(&self) -> usize {
        2 + self.head_bytes().len() + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.head, Head::Empty) && self.body.is_empty()
    }

    fn head_bytes(&self) -> Vec<u8> {
        match &self.head {
            Head::Empty => Vec::new(),
            Head::Single(b) => vec![*b],
            Head::Json(map) => {
                serde_json::to_vec(&Value::Object(map.clone())).unwrap_or_default()
            }
        }
    }

    pub fn head(&self) -> &Head {
        &self.head
    }

    /// The single head byte of an open packet, if that is the head's shape.
    pub fn head_byte(&self) -> Option<u8> {
        match self.head {
            Head::Single(b) => Some(b),
            _ => None,
        }
    }

    pub fn set_head_byte(&mut self, b: u8) {
        self.head = Head::Single(b);
    }

    // ── JSON head accessors ──────────────────────────────────────────────

    /// The head as a JSON object, if it is one.
    pub fn json(&self) -> Option<&Map<String, Value>> {
        match &self.head {
            Head::Json(map) => Some(map),
            _ => None,
        }
    }

    /// Mutable JSON head; replaces a non-object head with an empty object.
    fn json_mut(&mut self) -> &mut Map<String, Value> {
        if !matches!(self.head, Head::Json(_)) {
            self.head = Head::Json(Map::new());
        }
        match &mut self.head {
            Head::Json(map) => map,
            _ => unreachable!(),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.json().map(|m| m.contains_key(key)).unwrap_or(false)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.json()?.get(key)?.as_str()
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.json()?.get(key)?.as_i64()
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        u32::try_from(self.json()?.get(key)?.as_u64()?).ok()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.json()?.get(key)?.as_bool()
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.json_mut().insert(key.into(), Value::String(value.into()));
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.json_mut().insert(key.into(), Value::from(value));
    }

    pub fn set_u32(&mut self, key: &str, value: u32) {
        self.json_mut().insert(key.into(), Value::from(value));
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.json_mut().insert(key.into(), Value::Bool(value));
    }

    // ── Body ─────────────────────────────────────────────────────────────

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: &[u8]) {
        self.body = body.to_vec();
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_empty() {
        let p = Packet::new();
        assert_eq!(p.raw(), vec![0, 0]);
        assert_eq!(Packet::parse(&p.raw()).unwrap(), p);
    }

    #[test]
    fn roundtrip_single_byte_head() {
        let mut p = Packet::new();
        p.set_head_byte(0x1a);
        p.set_body(b"ciphertext");
        let parsed = Packet::parse(&p.raw()).unwrap();
        assert_eq!(parsed.head_byte(), Some(0x1a));
        assert_eq!(parsed.body(), b"ciphertext");
        assert_eq!(parsed, p);
    }

    #[test]
    fn roundtrip_json_head() {
        let mut p = Packet::new();
        p.set_str("type", "bulk");
        p.set_u32("c", 7);
        p.set_bool("end", true);
        p.set_body(&[0, 1, 2, 255]);
        let parsed = Packet::parse(&p.raw()).unwrap();
        assert_eq!(parsed.get_str("type"), Some("bulk"));
        assert_eq!(parsed.get_u32("c"), Some(7));
        assert_eq!(parsed.get_bool("end"), Some(true));
        assert_eq!(parsed, p);
    }

    #[test]
    fn head_length_overrun_fails() {
        // claims an 8-byte head but only 3 bytes follow
        let err = Packet::parse(&[0, 8, b'{', b'}', 0]).unwrap_err();
        assert!(matches!(err, PacketError::HeadLength { head: 8, len: 3 }));
        assert!(Packet::parse(&[0]).is_err());
    }

    #[test]
    fn non_object_head_fails() {
        let mut raw = vec![0, 4];
        raw.extend_from_slice(b"1234");
        assert!(Packet::parse(&raw).is_err());

        let mut raw = vec![0, 2];
        raw.extend_from_slice(b"[]");
        assert!(matches!(Packet::parse(&raw).unwrap_err(), PacketError::HeadNotObject));
    }

    #[test]
    fn setter_replaces_non_object_head() {
        let mut p = Packet::new();
        p.set_head_byte(0x2a);
        p.set_str("line", "abcd");
        assert_eq!(p.head_byte(), None);
        assert_eq!(p.get_str("line"), Some("abcd"));
    }

    #[test]
    fn int_accessors_reject_wrong_types() {
        let mut p = Packet::new();
        p.set_str("at", "soon");
        assert_eq!(p.get_int("at"), None);
        p.set_int("at", 1400000000);
        assert_eq!(p.get_int("at"), Some(1400000000));
        assert_eq!(p.get_u32("at"), Some(1400000000));
        p.set_int("neg", -4);
        assert_eq!(p.get_u32("neg"), None);
    }
}
