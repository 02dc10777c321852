//! Fixed-size frame transport for lossy links.
//!
//! Packets are cut into frames of exactly `size + 4` bytes: `size` payload
//! bytes and a 4-byte little-endian hash tag. The tag discipline carries
//! all reliability state — there are no sequence numbers on the wire:
//!
//! - **Meta frame**: `tag == murmur3(payload)`, self-describing. Payload is
//!   `rx_hash(4) ‖ tx_hash(4) ‖ reserved(2) ‖ opaque(size-10)`. `rx_hash`
//!   acknowledges everything up to that point of the sender's chain;
//!   `tx_hash` announces the sender's own last tag so each side knows
//!   whether it owes an ack.
//! - **Data frame** `i` of a packet: `tag == prev ⊕ murmur3(chunk) + i`,
//!   where `prev` is the previous data frame's tag (`outbase` for `i == 0`).
//!   The chain binds every frame to the whole prefix, so frames from
//!   different packets cannot be spliced and a repeated frame is detected
//!   by `tag == inlast`.
//! - **Tail frame**: a data frame whose last payload byte holds the chunk
//!   length (`< size`); it closes the packet, whose total length is then
//!   `i·size + tail`.
//!
//! Retransmission is rewind-based: a received `rx_hash` that matches the
//! chain mid-way moves the send cursor back to that frame; one that matches
//! the full chain completes the head packet. An `rx_hash` that matches
//! nowhere means the two ends have diverged — that is fatal and the window
//! must be recreated ([`Frames::clear`]).
//!
//! The window holds at most one partial inbound packet, bounded by
//! `max_frames` frames; exceeding the bound is also a sticky error.

use std::collections::VecDeque;

use tracing::{debug, warn};

use weft_lob::Packet;

use crate::error::MeshError;

/// Hash chain seed for a fresh window; both ends must agree.
const HASH_SEED: u32 = 42;

/// Offset of the opaque block in a meta frame payload.
const META_OFFSET: usize = 10;

struct Outbound {
    raw: Vec<u8>,
    /// Bytes of `raw` confirmed sent (not yet acked).
    sent: u32,
}

pub struct Frames {
    size: u8,
    max_frames: u32,
    inbox: VecDeque<Packet>,
    outbox: VecDeque<Outbound>,
    /// Partial inbound frames of the packet being reassembled, in order.
    cache: Vec<Vec<u8>>,
    /// Received data frames of the current packet; equals `cache.len()`.
    in_count: u32,
    /// Data frames of the outbox head confirmed transmitted.
    out: u32,
    /// Tag of the last accepted inbound data frame.
    inlast: u32,
    /// Chain base the peer has acknowledged.
    outbase: u32,
    /// A meta frame is due.
    flush: bool,
    /// Sticky fatal flag.
    err: bool,
    remote_meta: Option<Vec<u8>>,
}

impl Frames {
    pub fn new(size: u8, max_frames: u32) -> Result<Self, MeshError> {
        if !(16..=128).contains(&size) {
            return Err(MeshError::Config(format!("frame size {size} outside 16..=128")));
        }
        if max_frames == 0 {
            return Err(MeshError::Config("max_frames must be nonzero".into()));
        }
        Ok(Self {
            size,
            max_frames,
            inbox: VecDeque::new(),
            outbox: VecDeque::new(),
            cache: Vec::new(),
            in_count: 0,
            out: 0,
            inlast: HASH_SEED,
            outbase: HASH_SEED,
            flush: false,
            err: false,
            remote_meta: None,
        })
    }

    /// Reset hash state and drop any partial inbound packet. Queued
    /// packets survive; both ends must clear together to resynchronise.
    pub fn clear(&mut self) {
        self.err = false;
        self.inlast = HASH_SEED;
        self.outbase = HASH_SEED;
        self.in_count = 0;
        self.out = 0;
        self.cache.clear();
        self.flush = false;
    }

    pub fn is_errored(&self) -> bool {
        self.err
    }

    /// Wire frame length (`size + 4`).
    pub fn frame_len(&self) -> usize {
        self.size as usize + 4
    }

    // ── Queues ───────────────────────────────────────────────────────────

    /// Queue a packet for transmission.
    pub fn send(&mut self, packet: &Packet) -> Result<(), MeshError> {
        if self.err {
            return Err(MeshError::FrameState);
        }
        self.outbox.push_back(Outbound { raw: packet.raw(), sent: 0 });
        Ok(())
    }

    /// Request a meta frame (ack/keepalive) on the next transmit slot.
    pub fn flush(&mut self) {
        if !self.err {
            self.flush = true;
        }
    }

    /// Next reassembled inbound packet, if any.
    pub fn receive(&mut self) -> Option<Packet> {
        self.inbox.pop_front()
    }

    /// Opaque block of the most recent inbound meta frame.
    pub fn remote_meta(&self) -> Option<&[u8]> {
        self.remote_meta.as_deref()
    }

    /// Total bytes queued inbound, partial frames included.
    pub fn inbox_len(&self) -> usize {
        let queued: usize = self.inbox.iter().map(|p| p.len()).sum();
        queued + self.cache.len() * self.size as usize
    }

    /// Total bytes awaiting transmission, confirmed-sent bytes excluded.
    pub fn outbox_len(&self) -> usize {
        let queued: usize = self.outbox.iter().map(|o| o.raw.len()).sum();
        queued - self.outbox.front().map(|o| o.sent as usize).unwrap_or(0)
    }

    /// Frames of the partially reassembled inbound packet.
    pub fn pending_frames(&self) -> usize {
        self.cache.len()
    }

    // ── Transmit path ────────────────────────────────────────────────────

    /// Something is waiting for a transmit slot.
    pub fn is_ready(&self) -> bool {
        !self.err && (self.flush || !self.outbox.is_empty())
    }

    /// An inbound frame is expected (mid-packet, or all sent and
    /// awaiting the peer's ack).
    pub fn is_awaiting(&self) -> bool {
        if self.err {
            return false;
        }
        if !self.cache.is_empty() {
            return true;
        }
        let len = self.outbox.front().map(|o| o.raw.len()).unwrap_or(0);
        self.out as usize * self.size as usize > len
    }

    pub fn is_busy(&self) -> bool {
        self.is_ready() || self.is_awaiting()
    }

    /// Produce the next frame to put on the wire. Always yields: when
    /// there is no data due this is a meta frame, so calling on a timer
    /// doubles as the keepalive/ack path. Call [`Frames::sent`] once the
    /// frame is actually away; until then repeated calls return the same
    /// frame.
    pub fn next_outbound(&mut self, meta: Option<&[u8]>) -> Result<Vec<u8>, MeshError> {
        if self.err {
            return Err(MeshError::FrameState);
        }
        let size = self.size as usize;
        let len = self.outbox.front().map(|o| o.raw.len()).unwrap_or(0);
        let mut frame = vec![0u8; size + 4];

        // meta frame when flushing, idle, or all data frames are out
        if self.flush || self.outbox.is_empty() || self.out as usize * size > len {
            self.flush = true; // so sent() accounts for a meta frame
            frame[0..4].copy_from_slice(&self.inlast.to_le_bytes());
            frame[4..8].copy_from_slice(&self.tx_hash().to_le_bytes());
            if let Some(block) = meta {
                let n = block.len().min(size - META_OFFSET);
                frame[META_OFFSET..META_OFFSET + n].copy_from_slice(&block[..n]);
            }
            let tag = murmur(&frame[..size]);
            frame[size..].copy_from_slice(&tag.to_le_bytes());
            return Ok(frame);
        }

        // next data frame of the head packet
        let base = self.tx_hash();
        let head = self.outbox.front().ok_or(MeshError::FrameState)?;
        let at = self.out as usize * size;
        let chunk = size.min(len - at);
        if chunk < size {
            frame[size - 1] = chunk as u8;
        }
        frame[..chunk].copy_from_slice(&head.raw[at..at + chunk]);
        let tag = (base ^ murmur(&frame[..chunk])).wrapping_add(self.out);
        frame[size..].copy_from_slice(&tag.to_le_bytes());
        Ok(frame)
    }

    /// Confirm the frame from [`Frames::next_outbound`] left the machine.
    pub fn sent(&mut self) -> Result<(), MeshError> {
        if self.err {
            return Err(MeshError::FrameState);
        }
        let size = self.size as usize;
        let len = self.outbox.front().map(|o| o.raw.len()).unwrap_or(0);
        let at = self.out as usize * size;

        if self.flush || len == 0 || at > len {
            self.flush = false;
        } else if let Some(head) = self.outbox.front_mut() {
            let chunk = size.min(len - at);
            head.sent = (at + chunk) as u32;
            self.out += 1;
        }
        Ok(())
    }

    /// Rolling hash over the data frames of the head packet sent so far.
    fn tx_hash(&self) -> u32 {
        let size = self.size as usize;
        let mut hash = self.outbase;
        if let Some(head) = self.outbox.front() {
            let len = head.raw.len();
            let mut at = 0usize;
            for i in 0..self.out {
                if at >= len {
                    break;
                }
                let chunk = size.min(len.saturating_sub(at));
                hash = (hash ^ murmur(&head.raw[at..at + chunk])).wrapping_add(i);
                at += size;
            }
        }
        hash
    }

    // ── Receive path ─────────────────────────────────────────────────────

    /// Process one inbound wire frame.
    ///
    /// Invalid frames are dropped (logged, an ack is scheduled so the
    /// sender resynchronises). The two sticky failures — an
    /// unverifiable ack and the reassembly ceiling — return an error and
    /// poison the window.
    pub fn receive_frame(&mut self, frame: &[u8]) -> Result<(), MeshError> {
        if self.err {
            return Err(MeshError::FrameState);
        }
        let size = self.size as usize;
        if frame.len() != size + 4 {
            debug!(len = frame.len(), "dropping frame of wrong length");
            return Ok(());
        }
        let (payload, tag) = frame.split_at(size);
        let hash1 = u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]]);
        let whole = murmur(payload);

        // self-describing hash: meta frame
        if hash1 == whole {
            return self.receive_meta(payload);
        }

        // duplicate of the last accepted data frame
        if hash1 == self.inlast {
            return Ok(());
        }

        // full data frame must chain onto the previous tag
        if hash1 == (whole ^ self.inlast).wrapping_add(self.in_count) {
            if self.cache.len() as u32 >= self.max_frames {
                warn!(max = self.max_frames, "inbound reassembly ceiling reached");
                self.err = true;
                return Err(MeshError::Exhausted);
            }
            self.cache.push(payload.to_vec());
            self.in_count += 1;
            self.inlast = hash1;
            self.flush = false;
            return Ok(());
        }

        // tail frame: last byte is the chunk length
        let tail = payload[size - 1] as usize;
        if tail >= size {
            debug!(frame = self.in_count, tail, "invalid frame, scheduling ack");
            self.flush = true;
            return Ok(());
        }
        if hash1 != (murmur(&payload[..tail]) ^ self.inlast).wrapping_add(self.in_count) {
            debug!(frame = self.in_count, tail, "tail hash mismatch, scheduling ack");
            self.flush = true;
            return Ok(());
        }

        // packet complete: reassemble cache + tail
        self.inlast = hash1;
        self.flush = true;
        let mut buf = Vec::with_capacity(self.cache.len() * size + tail);
        for cached in &self.cache {
            buf.extend_from_slice(cached);
        }
        buf.extend_from_slice(&payload[..tail]);
        self.cache.clear();
        self.in_count = 0;
        match Packet::parse(&buf) {
            Ok(packet) => self.inbox.push_back(packet),
            Err(err) => warn!(%err, "reassembled packet failed to parse"),
        }
        Ok(())
    }

    fn receive_meta(&mut self, payload: &[u8]) -> Result<(), MeshError> {
        let size = self.size as usize;
        self.remote_meta = Some(payload[META_OFFSET..].to_vec());

        // verify the peer's rx hash against our own chain
        let rxd = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let len = self.outbox.front().map(|o| o.raw.len()).unwrap_or(0);
        let mut rxs = self.outbase;
        let mut matched = false;
        for i in 0..self.out {
            if rxd == rxs {
                // peer is behind: rewind and resend from frame i
                self.out = i;
                matched = true;
                break;
            }
            let at = i as usize * size;
            let chunk = size.min(len.saturating_sub(at));
            if let Some(head) = self.outbox.front() {
                rxs = (rxs ^ murmur(&head.raw[at..at + chunk])).wrapping_add(i);
            }
        }
        if !matched && rxd != rxs {
            warn!(rxd, check = rxs, "unverifiable ack hash, window poisoned");
            self.err = true;
            return Err(MeshError::Desync);
        }

        // whole packet confirmed: advance the chain base, drop the head
        if self.out as usize * size > len {
            self.out = 0;
            self.outbase = rxd;
            self.outbox.pop_front();
        }

        // the peer's last tx tag tells us whether we owe an ack
        if payload[4..8] == self.inlast.to_le_bytes() {
            self.flush = false;
        } else {
            self.flush = true;
        }
        Ok(())
    }
}

/// murmur3-32, seed 0. Private reference implementation; the tag scheme
/// needs a fast non-cryptographic hash and the corpus carries none.
fn murmur(data: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;
    let mut h: u32 = 0;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let mut k: u32 = 0;
        for (i, b) in rem.iter().enumerate() {
            k |= u32::from(*b) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
    }
    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}
