//! Channel multiplexing over an established line.
//!
//! Every channel packet carries a `c` head field (u32). A packet with an
//! unseen `c` *and* a `type` field opens a channel; an unseen `c` without
//! `type` is dropped. Delivery order per channel equals arrival order of
//! validated packets, and handlers run synchronously to preserve it.

use std::collections::VecDeque;

use weft_lob::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created by an opening packet; not yet confirmed by further traffic.
    Opening,
    Open,
    /// We queued an `end` packet that is not yet on the wire.
    Ending,
    Ended,
    Errored,
}

pub struct Channel {
    id: u32,
    kind: String,
    state: ChannelState,
    inbox: VecDeque<Packet>,
    outbox: VecDeque<Packet>,
    /// Packets sent on this channel.
    seq: u32,
    /// Highest `ack` the peer has reported.
    acked: u32,
}

impl Channel {
    pub(crate) fn new(id: u32, kind: &str) -> Self {
        Self {
            id,
            kind: kind.to_string(),
            state: ChannelState::Opening,
            inbox: VecDeque::new(),
            outbox: VecDeque::new(),
            seq: 0,
            acked: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// The `type` of the opening packet.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn sent(&self) -> u32 {
        self.seq
    }

    pub fn acked(&self) -> u32 {
        self.acked
    }

    /// Queue a packet; the owning link encrypts and transmits it. Returns
    /// `None` once the channel is ended or errored.
    pub fn send(&mut self, mut packet: Packet) -> Option<()> {
        if matches!(self.state, ChannelState::Ended | ChannelState::Errored) {
            return None;
        }
        packet.set_u32("c", self.id);
        if packet.get_bool("end") == Some(true) {
            self.state = ChannelState::Ending;
        }
        self.seq += 1;
        self.outbox.push_back(packet);
        Some(())
    }

    /// Next delivered packet, if any.
    pub fn receive(&mut self) -> Option<Packet> {
        self.inbox.pop_front()
    }

    /// Close gracefully: queue an `end: true` packet.
    pub fn end(&mut self) -> Option<()> {
        let mut p = Packet::new();
        p.set_bool("end", true);
        self.send(p)
    }

    /// Accept a validated inbound packet and advance the lifecycle.
    pub(crate) fn deliver(&mut self, packet: Packet) {
        if let Some(ack) = packet.get_u32("ack") {
            self.acked = self.acked.max(ack);
        }
        if packet.get_str("err").is_some() {
            self.state = ChannelState::Errored;
        } else if packet.get_bool("end") == Some(true) {
            self.state = ChannelState::Ended;
        } else if self.state == ChannelState::Opening && !packet.has("type") {
            self.state = ChannelState::Open;
        }
        self.inbox.push_back(packet);
    }

    /// Next queued outbound packet, for the link to encrypt.
    pub(crate) fn take_outbound(&mut self) -> Option<Packet> {
        let packet = self.outbox.pop_front()?;
        if self.state == ChannelState::Ending && packet.get_bool("end") == Some(true) {
            self.state = ChannelState::Ended;
        }
        Some(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(body: &[u8]) -> Packet {
        let mut p = Packet::new();
        p.set_body(body);
        p
    }

    #[test]
    fn send_stamps_channel_id() {
        let mut ch = Channel::new(3, "bulk");
        ch.send(data(b"x")).unwrap();
        let out = ch.take_outbound().unwrap();
        assert_eq!(out.get_u32("c"), Some(3));
        assert_eq!(ch.sent(), 1);
    }

    #[test]
    fn opening_becomes_open_on_plain_delivery() {
        let mut ch = Channel::new(1, "bulk");
        let mut open = data(b"");
        open.set_str("type", "bulk");
        ch.deliver(open);
        assert_eq!(ch.state(), ChannelState::Opening);

        ch.deliver(data(b"more"));
        assert_eq!(ch.state(), ChannelState::Open);
        assert_eq!(ch.receive().unwrap().get_str("type"), Some("bulk"));
        assert!(ch.receive().is_some());
        assert!(ch.receive().is_none());
    }

    #[test]
    fn end_packet_is_delivered_then_terminal() {
        let mut ch = Channel::new(1, "bulk");
        ch.deliver(data(b"a"));
        let mut end = Packet::new();
        end.set_bool("end", true);
        ch.deliver(end);
        assert_eq!(ch.state(), ChannelState::Ended);
        // both packets still readable
        assert!(ch.receive().is_some());
        assert_eq!(ch.receive().unwrap().get_bool("end"), Some(true));
        // sends refused in a terminal state
        assert!(ch.send(data(b"late")).is_none());
    }

    #[test]
    fn err_packet_is_delivered_then_terminal() {
        let mut ch = Channel::new(1, "bulk");
        let mut err = Packet::new();
        err.set_str("err", "timeout");
        ch.deliver(err);
        assert_eq!(ch.state(), ChannelState::Errored);
        assert_eq!(ch.receive().unwrap().get_str("err"), Some("timeout"));
        assert!(ch.send(data(b"late")).is_none());
    }

    #[test]
    fn local_end_transitions_through_ending() {
        let mut ch = Channel::new(1, "bulk");
        ch.end().unwrap();
        assert_eq!(ch.state(), ChannelState::Ending);
        let out = ch.take_outbound().unwrap();
        assert_eq!(out.get_bool("end"), Some(true));
        assert_eq!(ch.state(), ChannelState::Ended);
    }

    #[test]
    fn acks_update_watermark() {
        let mut ch = Channel::new(1, "bulk");
        let mut p = data(b"");
        p.set_u32("ack", 5);
        ch.deliver(p);
        assert_eq!(ch.acked(), 5);
        let mut stale = data(b"");
        stale.set_u32("ack", 2);
        ch.deliver(stale);
        assert_eq!(ch.acked(), 5);
    }
}
