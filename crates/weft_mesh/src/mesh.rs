//! The mesh: one local identity, links keyed by remote hashname, and the
//! routing of raw transport bytes to sessions and channels.
//!
//! Inbound classification is by head shape: a single-byte head is an open
//! packet for the ciphersuite that byte names; an empty head over a body
//! of at least 16 bytes is a line packet routed by its line-ID prefix;
//! anything else is dropped.
//!
//! The core is single-threaded and non-blocking: `receive` runs every
//! synchronous channel handler before returning, and everything destined
//! for the wire accumulates in an outgoing queue the transport driver
//! drains with [`Mesh::outgoing`].

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use tracing::debug;

use weft_crypt::error::CryptoError;
use weft_crypt::{Hashname, Host, Identity, LineState, SelfIdentity, Session};
use weft_lob::{Head, Packet};

use crate::channel::{Channel, ChannelState};
use crate::config::MeshConfig;
use crate::error::MeshError;
use crate::exchange::Exchange;
use crate::frames::Frames;
use crate::link::{Link, MAX_OPEN_FAILURES};

pub type OpenHandler = Box<dyn FnMut(&mut Channel)>;

pub struct Mesh {
    identity: SelfIdentity,
    hashname: Hashname,
    config: MeshConfig,
    force: Option<weft_crypt::CsId>,
    host: Rc<dyn Host>,
    links: HashMap<Hashname, Link>,
    /// Local line ID → owning link, for routing inbound line packets.
    lines: HashMap<[u8; 16], Hashname>,
    /// Published identity key → owning link, for attributing inbound opens.
    keys: HashMap<Vec<u8>, Hashname>,
    handlers: HashMap<String, OpenHandler>,
    outgoing: VecDeque<(Hashname, Vec<u8>)>,
}

impl Mesh {
    pub fn new(
        identity: SelfIdentity,
        config: MeshConfig,
        host: Rc<dyn Host>,
    ) -> Result<Self, MeshError> {
        config.validate()?;
        let force = config.forced_suite()?;
        Ok(Self {
            hashname: identity.hashname(),
            identity,
            config,
            force,
            host,
            links: HashMap::new(),
            lines: HashMap::new(),
            keys: HashMap::new(),
            handlers: HashMap::new(),
            outgoing: VecDeque::new(),
        })
    }

    /// Fresh mesh with newly generated identity keys.
    pub fn generate(config: MeshConfig, host: Rc<dyn Host>) -> Result<Self, MeshError> {
        let identity = SelfIdentity::generate(host.as_ref());
        Self::new(identity, config, host)
    }

    pub fn hashname(&self) -> Hashname {
        self.hashname
    }

    /// Our shareable identity (public keys only).
    pub fn public_identity(&self) -> Identity {
        self.identity.public_identity()
    }

    /// Register the handler invoked for channels of `kind`; called
    /// synchronously from [`Mesh::receive`] for the opening packet and
    /// every delivery after it.
    pub fn on_open(&mut self, kind: &str, handler: impl FnMut(&mut Channel) + 'static) {
        self.handlers.insert(kind.to_string(), Box::new(handler));
    }

    /// A frame window sized per this mesh's configuration, one per framed
    /// transport. A window reporting a fatal error closes its link.
    pub fn make_frames(&self) -> Result<Frames, MeshError> {
        Frames::new(self.config.size, self.config.max_frames)
    }

    /// Next wire packet to deliver, with the peer it addresses.
    pub fn outgoing(&mut self) -> Option<(Hashname, Vec<u8>)> {
        self.outgoing.pop_front()
    }

    // ── Links ────────────────────────────────────────────────────────────

    /// Create (or return) the link to a peer. The exchange's ciphersuite
    /// is negotiated now, and the session's line ID is registered for
    /// inbound routing.
    pub fn link(&mut self, remote: Identity) -> Result<Hashname, MeshError> {
        let hashname = remote.hashname();
        if self.links.contains_key(&hashname) {
            return Ok(hashname);
        }
        let exchange = Exchange::new(&self.identity, &remote, self.force, self.host.as_ref())?;
        self.lines.insert(*exchange.session().local_line_id(), hashname);
        for cs in remote.suites() {
            if let Some(key) = remote.key(cs) {
                self.keys.insert(key.to_vec(), hashname);
            }
        }
        self.links.insert(hashname, Link::new(remote, hashname, exchange));
        Ok(hashname)
    }

    pub fn link_ref(&self, hashname: &Hashname) -> Option<&Link> {
        self.links.get(hashname)
    }

    /// The link's line state, if it has a live exchange.
    pub fn line_state(&self, hashname: &Hashname) -> Option<LineState> {
        Some(self.links.get(hashname)?.exchange.as_ref()?.session().lined())
    }

    /// Emit a fresh open toward the peer. On an established line this
    /// starts a re-key: new ephemeral, same line ID.
    pub fn resync(&mut self, hashname: &Hashname) -> Result<(), MeshError> {
        let link = self.links.get_mut(hashname).ok_or(MeshError::LinkClosed)?;
        if link.closed {
            return Err(MeshError::LinkClosed);
        }
        let exchange = link.exchange.as_mut().ok_or(MeshError::LinkClosed)?;
        let session = exchange.session_mut();
        if session.lined() != LineState::Pending {
            session.rekey(self.host.as_ref())?;
        }
        let open = session.openize(&self.identity, Packet::new())?;
        self.outgoing.push_back((*hashname, open.raw()));
        Ok(())
    }

    /// Drop a link outright: session keys zeroised, queues freed. Also the
    /// required response to a fatal frame-window error on its transport.
    pub fn drop_link(&mut self, hashname: &Hashname) {
        self.close_link(hashname);
    }

    fn close_link(&mut self, hashname: &Hashname) {
        if let Some(link) = self.links.get_mut(hashname) {
            if let Some(exchange) = link.exchange.as_ref() {
                self.lines.remove(exchange.session().local_line_id());
            }
            link.close();
            debug!(%hashname, "link closed");
        }
    }

    // ── Channels ─────────────────────────────────────────────────────────

    /// Open a channel of `kind` toward a linked peer; `first` becomes the
    /// opening packet (its `type` and `c` are stamped here). Before the
    /// line is up the packet waits in the link's pending queue.
    pub fn open_channel(
        &mut self,
        hashname: &Hashname,
        kind: &str,
        mut first: Packet,
    ) -> Result<u32, MeshError> {
        let link = self.links.get_mut(hashname).ok_or(MeshError::LinkClosed)?;
        if link.closed {
            return Err(MeshError::LinkClosed);
        }
        let Link { exchange, channels, pending, .. } = link;
        let exchange = exchange.as_mut().ok_or(MeshError::LinkClosed)?;

        let id = exchange.next_channel_id();
        let mut channel = Channel::new(id, kind);
        first.set_str("type", kind);
        let _ = channel.send(first);
        drain_channel(&mut channel, exchange, pending, &mut self.outgoing, *hashname);
        channels.insert(id, channel);
        Ok(id)
    }

    /// Send on an existing channel.
    pub fn channel_send(
        &mut self,
        hashname: &Hashname,
        id: u32,
        packet: Packet,
    ) -> Result<(), MeshError> {
        let link = self.links.get_mut(hashname).ok_or(MeshError::LinkClosed)?;
        if link.closed {
            return Err(MeshError::LinkClosed);
        }
        let Link { exchange, channels, pending, .. } = link;
        let exchange = exchange.as_mut().ok_or(MeshError::LinkClosed)?;
        let channel = channels.get_mut(&id).ok_or(MeshError::UnknownChannel)?;
        channel.send(packet).ok_or(MeshError::ChannelClosed)?;
        drain_channel(channel, exchange, pending, &mut self.outgoing, *hashname);
        Ok(())
    }

    pub fn channel_state(&self, hashname: &Hashname, id: u32) -> Option<ChannelState> {
        Some(self.links.get(hashname)?.channels.get(&id)?.state())
    }

    /// Direct access for polling deliveries outside a handler.
    pub fn channel_mut(&mut self, hashname: &Hashname, id: u32) -> Option<&mut Channel> {
        self.links.get_mut(hashname)?.channels.get_mut(&id)
    }

    // ── Inbound routing ──────────────────────────────────────────────────

    /// Feed one inbound wire packet. All failures are local: bad packets
    /// are logged and dropped, handlers for valid channel traffic run
    /// before this returns.
    pub fn receive(&mut self, bytes: &[u8]) {
        let packet = match Packet::parse(bytes) {
            Ok(p) => p,
            Err(err) => {
                debug!(%err, "dropping undecodable datagram");
                return;
            }
        };
        match packet.head() {
            Head::Single(_) => self.handle_open(&packet),
            Head::Empty if packet.body().len() >= 16 => self.handle_line(&packet),
            _ => debug!("dropping packet with unexpected head shape"),
        }
    }

    fn handle_open(&mut self, packet: &Packet) {
        let inner = match Session::deopenize(&self.identity, packet) {
            Ok(inner) => inner,
            Err(err) => {
                debug!(%err, "discarding open packet");
                return;
            }
        };
        if let Some(force) = self.force {
            if force != inner.cs {
                debug!(cs = %inner.cs, "open for a ciphersuite this mesh does not accept");
                return;
            }
        }

        // attribute the open to a link, creating one for first contact
        let hashname = match self.keys.get(&inner.sender_key) {
            Some(hashname) => *hashname,
            None => {
                let identity = match Identity::single(inner.cs, &inner.sender_key) {
                    Ok(id) => id,
                    Err(err) => {
                        debug!(%err, "open carries an unusable identity key");
                        return;
                    }
                };
                match self.link(identity) {
                    Ok(hashname) => hashname,
                    Err(err) => {
                        debug!(%err, "refusing link for inbound open");
                        return;
                    }
                }
            }
        };

        let mut close_now = false;
        {
            let Self { links, identity, outgoing, .. } = self;
            let Some(link) = links.get_mut(&hashname) else { return };
            if link.closed {
                debug!(%hashname, "open for a closed link");
                return;
            }
            let Link { exchange, channels, pending, open_failures, .. } = link;
            let Some(exchange) = exchange.as_mut() else { return };

            if exchange.cs() != inner.cs {
                debug!(got = %inner.cs, want = %exchange.cs(), "open on unexpected ciphersuite");
                *open_failures += 1;
                close_now = *open_failures >= MAX_OPEN_FAILURES;
            } else {
                let was_lined = exchange.session().lined() != LineState::Pending;
                match exchange.session_mut().line(&inner) {
                    Err(CryptoError::Replay) => {
                        debug!(%hashname, "replayed open dropped");
                    }
                    Err(err) => {
                        debug!(%err, %hashname, "open processing failed");
                        *open_failures += 1;
                        close_now = *open_failures >= MAX_OPEN_FAILURES;
                    }
                    Ok(state) => {
                        *open_failures = 0;
                        // a new line ID while one was live kills the
                        // multiplexer state; a re-key in place keeps it
                        if was_lined && state == LineState::Lined {
                            channels.clear();
                            pending.clear();
                        }
                        // a fresh line gets our open in reply; the peer's
                        // `at` guard discards it when it was the reply to
                        // ours already. A re-key in place needs no answer.
                        if state == LineState::Lined {
                            match exchange.session_mut().openize(identity, Packet::new()) {
                                Ok(open) => outgoing.push_back((hashname, open.raw())),
                                Err(err) => debug!(%err, "open reply failed"),
                            }
                        }
                        while let Some(queued) = pending.pop_front() {
                            match exchange.session_mut().lineize(&queued) {
                                Ok(wire) => outgoing.push_back((hashname, wire.raw())),
                                Err(err) => debug!(%err, "queued channel packet dropped"),
                            }
                        }
                    }
                }
            }
        }
        if close_now {
            self.close_link(&hashname);
        }
    }

    fn handle_line(&mut self, packet: &Packet) {
        let mut line_id = [0u8; 16];
        line_id.copy_from_slice(&packet.body()[..16]);
        let Some(&hashname) = self.lines.get(&line_id) else {
            debug!("line packet for an unknown line");
            return;
        };

        let inner = {
            let Some(link) = self.links.get_mut(&hashname) else { return };
            if link.closed {
                return;
            }
            let Some(exchange) = link.exchange.as_mut() else { return };
            // failures are logged in delineize; nothing is delivered
            match exchange.session_mut().delineize(packet) {
                Some(inner) => inner,
                None => return,
            }
        };
        self.dispatch_channel(hashname, inner);
    }

    fn dispatch_channel(&mut self, hashname: Hashname, packet: Packet) {
        let Some(c) = packet.get_u32("c") else {
            debug!("channel packet without a `c` id");
            return;
        };
        let kind_field = packet.get_str("type").map(str::to_string);

        let Self { links, handlers, outgoing, .. } = self;
        let Some(link) = links.get_mut(&hashname) else { return };
        let Link { channels, exchange, pending, .. } = link;

        let channel = match channels.entry(c) {
            Entry::Occupied(entry) => {
                let channel = entry.into_mut();
                channel.deliver(packet);
                channel
            }
            Entry::Vacant(entry) => {
                let Some(kind) = kind_field else {
                    debug!(c, "packet for unknown channel without a type");
                    return;
                };
                let mut channel = Channel::new(c, &kind);
                channel.deliver(packet);
                entry.insert(channel)
            }
        };

        // per-channel ordering: the handler runs before receive() returns
        if let Some(handler) = handlers.get_mut(channel.kind()) {
            handler(&mut *channel);
        }

        let done = matches!(channel.state(), ChannelState::Ended | ChannelState::Errored);
        let id = channel.id();
        if let Some(exchange) = exchange.as_mut() {
            drain_channel(channel, exchange, pending, outgoing, hashname);
        }
        if done {
            channels.remove(&id);
        }
    }
}

/// Encrypt a channel's queued sends, or park them until the line is up.
fn drain_channel(
    channel: &mut Channel,
    exchange: &mut Exchange,
    pending: &mut VecDeque<Packet>,
    outgoing: &mut VecDeque<(Hashname, Vec<u8>)>,
    hashname: Hashname,
) {
    let lined = exchange.session().lined() != LineState::Pending;
    while let Some(out) = channel.take_outbound() {
        if lined {
            match exchange.session_mut().lineize(&out) {
                Ok(wire) => outgoing.push_back((hashname, wire.raw())),
                Err(err) => debug!(%err, "channel packet dropped"),
            }
        } else {
            pending.push_back(out);
        }
    }
}
