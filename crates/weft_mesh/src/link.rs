//! A link: one remote peer, its exchange, and the channels riding on it.

use std::collections::{HashMap, VecDeque};

use weft_crypt::{Hashname, Identity};
use weft_lob::Packet;

use crate::channel::Channel;
use crate::exchange::Exchange;

/// Consecutive open-processing failures tolerated before the link closes.
pub(crate) const MAX_OPEN_FAILURES: u8 = 3;

pub struct Link {
    remote: Identity,
    hashname: Hashname,
    pub(crate) exchange: Option<Exchange>,
    pub(crate) channels: HashMap<u32, Channel>,
    /// Channel packets queued while no line is established.
    pub(crate) pending: VecDeque<Packet>,
    pub(crate) open_failures: u8,
    pub(crate) closed: bool,
}

impl Link {
    pub(crate) fn new(remote: Identity, hashname: Hashname, exchange: Exchange) -> Self {
        Self {
            remote,
            hashname,
            exchange: Some(exchange),
            channels: HashMap::new(),
            pending: VecDeque::new(),
            open_failures: 0,
            closed: false,
        }
    }

    pub fn hashname(&self) -> Hashname {
        self.hashname
    }

    pub fn remote(&self) -> &Identity {
        &self.remote
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The negotiated ciphersuite, while the exchange is live.
    pub fn suite(&self) -> Option<weft_crypt::CsId> {
        self.exchange.as_ref().map(|x| x.cs())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Tear the link down: session keys are zeroised (the session owns its
    /// secrets in zeroizing buffers) and every queue is freed.
    pub(crate) fn close(&mut self) {
        self.exchange = None;
        self.channels.clear();
        self.pending.clear();
        self.closed = true;
    }
}
