//! Line sessions: the per-peer, per-ciphersuite cryptographic state.
//!
//! # Handshake
//!
//! Each side generates a random 16-byte line ID and an ephemeral keypair,
//! then sends an *open* packet:
//!
//! ```text
//! head:  [ cs ]                         (single ciphersuite byte)
//! body:  [ MAC | ephemeral_public | AES-CTR(inner) ]
//! ```
//!
//! The inner packet's head carries `line` (our line ID, hex) and `at`
//! (our clock seconds); its body is our long-term public key. The AES key
//! is the suite hash of ECDH(ephemeral_secret, peer_identity) and the MAC
//! key is ECDH(identity_secret, peer_identity), so a valid open proves
//! possession of the long-term key while the session keys stay ephemeral.
//!
//! Accepting an open with `at` greater than any seen before derives the
//! directional line keys:
//!
//! ```text
//! key_out = H(dh_secret ‖ local_line_id ‖ remote_line_id)
//! key_in  = H(dh_secret ‖ remote_line_id ‖ local_line_id)
//! ```
//!
//! A repeat open carrying the *same* line ID re-keys the session in place
//! ([`LineState::Relined`]) — multiplexer state survives; a *new* line ID
//! is a fresh line and the caller must tear channels down.
//!
//! # Line packets
//!
//! ```text
//! head:  (empty)
//! body:  [ remote_line_id (16) | MAC (4 or 32) | seq (4, LE) | AES-CTR(inner) ]
//! ```
//!
//! The 16-byte prefix is the ID the *receiver* generated, so it routes and
//! validates inbound traffic against `local_line_id` with no further state.

use tracing::debug;
use zeroize::Zeroizing;

use weft_lob::{Head, Packet};

use crate::error::CryptoError;
use crate::host::Host;
use crate::identity::SelfIdentity;
use crate::suite::{verify_mac, CsId};

/// Handshake progress, the `lined` flag of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    /// No open accepted yet.
    Pending,
    /// Fresh line: a new remote line ID. Existing channels are dead.
    Lined,
    /// Re-key in place: same remote line ID, new keys. Channels survive.
    Relined,
}

/// A validated open packet, decrypted and ready for [`Session::line`].
pub struct OpenInner {
    pub cs: CsId,
    /// Decrypted inner packet (`line`/`at` head, identity-key body).
    pub inner: Packet,
    /// Sender's ephemeral line public key.
    pub ephemeral: Vec<u8>,
    /// Sender's long-term public key (the inner body).
    pub sender_key: Vec<u8>,
}

pub struct Session {
    cs: CsId,
    remote_identity_key: Vec<u8>,
    local_line_id: [u8; 16],
    remote_line_id: Option<[u8; 16]>,
    line_secret: Zeroizing<Vec<u8>>,
    line_public: Vec<u8>,
    remote_ephemeral: Option<Vec<u8>>,
    key_out: Zeroizing<Vec<u8>>,
    key_in: Zeroizing<Vec<u8>>,
    seq: u32,
    at_out: u32,
    at_in: u32,
    lined: LineState,
}

impl Session {
    /// New session toward a peer's long-term key (raw or base64).
    pub fn new(cs: CsId, remote_identity_key: &[u8], host: &dyn Host) -> Result<Self, CryptoError> {
        let ops = cs.ops();
        let remote_identity_key = crate::identity::decode_key(remote_identity_key, ops.public_len())?;
        let mut local_line_id = [0u8; 16];
        host.fill_random(&mut local_line_id);
        let (line_secret, line_public) = ops.keypair(host);
        Ok(Self {
            cs,
            remote_identity_key,
            local_line_id,
            remote_line_id: None,
            line_secret,
            line_public,
            remote_ephemeral: None,
            key_out: Zeroizing::new(Vec::new()),
            key_in: Zeroizing::new(Vec::new()),
            seq: 0,
            at_out: host.now_seconds(),
            at_in: 0,
            lined: LineState::Pending,
        })
    }

    pub fn cs(&self) -> CsId {
        self.cs
    }

    /// The line ID we generated; inbound line packets must carry it.
    pub fn local_line_id(&self) -> &[u8; 16] {
        &self.local_line_id
    }

    pub fn lined(&self) -> LineState {
        self.lined
    }

    pub fn at_in(&self) -> u32 {
        self.at_in
    }

    /// Start a re-key: fresh ephemeral keypair and a strictly later `at`,
    /// same line ID. If the peer's ephemeral is already known, the line
    /// keys roll forward immediately so traffic can continue as soon as
    /// the new open is on the wire.
    pub fn rekey(&mut self, host: &dyn Host) -> Result<(), CryptoError> {
        let (secret, public) = self.cs.ops().keypair(host);
        self.line_secret = secret;
        self.line_public = public;
        self.at_out = std::cmp::max(host.now_seconds(), self.at_out + 1);
        if let Some(eph) = self.remote_ephemeral.clone() {
            let dh = self.cs.ops().shared_secret(&self.line_secret, &eph)?;
            self.derive_keys(&dh)?;
        }
        Ok(())
    }

    // ── Open packets ─────────────────────────────────────────────────────

    /// Build our open packet around `inner`, injecting `line`, `at` and
    /// our long-term public key.
    pub fn openize(&mut self, me: &SelfIdentity, mut inner: Packet) -> Result<Packet, CryptoError> {
        let ops = self.cs.ops();
        let identity_secret = me.secret_key(self.cs).ok_or(CryptoError::MissingKey)?;
        let identity_public = me.public_key(self.cs).ok_or(CryptoError::MissingKey)?;

        inner.set_str("line", &hex::encode(self.local_line_id));
        inner.set_int("at", i64::from(self.at_out));
        inner.set_body(identity_public);
        let mut ciphertext = inner.raw();

        let dh = ops.shared_secret(&self.line_secret, &self.remote_identity_key)?;
        let aes_key = ops.hash(&dh);
        let mut iv = [0u8; 16];
        iv[15] = 1;
        ops.ctr(&aes_key[..ops.key_len()], &iv, &mut ciphertext);

        let mut body = Vec::with_capacity(ops.open_mac_len() + self.line_public.len() + ciphertext.len());
        body.extend_from_slice(&self.line_public);
        body.extend_from_slice(&ciphertext);

        let mac_key = ops.shared_secret(identity_secret, &self.remote_identity_key)?;
        let mac = ops.hmac(&mac_key, &body);

        let mut open = Packet::new();
        open.set_head_byte(self.cs.as_byte());
        let mut full = Vec::with_capacity(ops.open_mac_len() + body.len());
        full.extend_from_slice(&mac[..ops.open_mac_len()]);
        full.extend_from_slice(&body);
        open.set_body(&full);
        Ok(open)
    }

    /// Decrypt and authenticate a received open packet. Stateless: the
    /// caller locates (or creates) the session from the recovered sender
    /// key, then applies [`Session::line`].
    pub fn deopenize(me: &SelfIdentity, open: &Packet) -> Result<OpenInner, CryptoError> {
        let cs = CsId::from_byte(
            open.head_byte()
                .ok_or_else(|| CryptoError::Malformed("open head is not a single byte".into()))?,
        )?;
        let ops = cs.ops();
        let body = open.body();
        if body.len() <= ops.open_mac_len() + ops.public_len() {
            return Err(CryptoError::Malformed("open body too short".into()));
        }
        let identity_secret = me.secret_key(cs).ok_or(CryptoError::MissingKey)?;

        let (mac_rx, signed) = body.split_at(ops.open_mac_len());
        let (ephemeral, ciphertext) = signed.split_at(ops.public_len());

        let dh = ops.shared_secret(identity_secret, ephemeral)?;
        let aes_key = ops.hash(&dh);
        let mut iv = [0u8; 16];
        iv[15] = 1;
        let mut plaintext = ciphertext.to_vec();
        ops.ctr(&aes_key[..ops.key_len()], &iv, &mut plaintext);

        let inner = Packet::parse(&plaintext)?;
        if inner.body().len() != ops.public_len() {
            return Err(CryptoError::Malformed("inner body is not an identity key".into()));
        }

        let mac_key = ops.shared_secret(identity_secret, inner.body())?;
        let mac = ops.hmac(&mac_key, signed);
        verify_mac(&mac, mac_rx)?;

        Ok(OpenInner {
            cs,
            ephemeral: ephemeral.to_vec(),
            sender_key: inner.body().to_vec(),
            inner,
        })
    }

    /// Accept a validated open: replay-guard `at`, store the remote line
    /// ID, derive line keys. Returns the resulting state — `Relined` when
    /// the peer kept its line ID (re-key in place).
    pub fn line(&mut self, open: &OpenInner) -> Result<LineState, CryptoError> {
        if open.cs != self.cs || open.sender_key != self.remote_identity_key {
            return Err(CryptoError::State);
        }
        let at = open
            .inner
            .get_int("at")
            .and_then(|a| u32::try_from(a).ok())
            .filter(|a| *a > 0)
            .ok_or_else(|| CryptoError::Malformed("open `at` missing or invalid".into()))?;
        let line_hex = open
            .inner
            .get_str("line")
            .ok_or_else(|| CryptoError::Malformed("open `line` missing".into()))?;
        let mut remote_line_id = [0u8; 16];
        hex::decode_to_slice(line_hex, &mut remote_line_id)?;

        if at <= self.at_in {
            return Err(CryptoError::Replay);
        }

        let state = if self.remote_line_id == Some(remote_line_id) {
            LineState::Relined
        } else {
            LineState::Lined
        };
        self.remote_line_id = Some(remote_line_id);

        let dh = self.cs.ops().shared_secret(&self.line_secret, &open.ephemeral)?;
        self.derive_keys(&dh)?;
        self.remote_ephemeral = Some(open.ephemeral.clone());
        self.at_in = at;
        self.lined = state;
        Ok(state)
    }

    fn derive_keys(&mut self, dh: &[u8]) -> Result<(), CryptoError> {
        let ops = self.cs.ops();
        let remote = self.remote_line_id.ok_or(CryptoError::State)?;

        let mut input = Zeroizing::new(Vec::with_capacity(dh.len() + 32));
        input.extend_from_slice(dh);
        input.extend_from_slice(&self.local_line_id);
        input.extend_from_slice(&remote);
        self.key_out = Zeroizing::new(ops.hash(&input)[..ops.key_len()].to_vec());

        input.clear();
        input.extend_from_slice(dh);
        input.extend_from_slice(&remote);
        input.extend_from_slice(&self.local_line_id);
        self.key_in = Zeroizing::new(ops.hash(&input)[..ops.key_len()].to_vec());
        Ok(())
    }

    // ── Line packets ─────────────────────────────────────────────────────

    /// Encrypt `inner` for the established line.
    pub fn lineize(&mut self, inner: &Packet) -> Result<Packet, CryptoError> {
        if self.lined == LineState::Pending {
            return Err(CryptoError::State);
        }
        let ops = self.cs.ops();
        let remote = self.remote_line_id.ok_or(CryptoError::State)?;

        let seq = self.seq.to_le_bytes();
        self.seq += 1;

        let mut ciphertext = inner.raw();
        let mut iv = [0u8; 16];
        iv[12..].copy_from_slice(&seq);
        ops.ctr(&self.key_out, &iv, &mut ciphertext);

        let mut signed = Vec::with_capacity(4 + ciphertext.len());
        signed.extend_from_slice(&seq);
        signed.extend_from_slice(&ciphertext);
        let mac = ops.hmac(&self.key_out, &signed);

        let mut body = Vec::with_capacity(16 + ops.line_mac_len() + signed.len());
        body.extend_from_slice(&remote);
        body.extend_from_slice(&mac[..ops.line_mac_len()]);
        body.extend_from_slice(&signed);

        let mut line = Packet::new();
        line.set_body(&body);
        Ok(line)
    }

    /// Authenticate and decrypt a line packet. Any failure returns `None`
    /// with no state change; the packet is simply not delivered.
    pub fn delineize(&mut self, line: &Packet) -> Option<Packet> {
        if self.lined == LineState::Pending {
            debug!("line packet before handshake completed");
            return None;
        }
        let ops = self.cs.ops();
        let body = line.body();
        if !matches!(line.head(), Head::Empty) || body.len() < 16 + ops.line_mac_len() + 4 {
            debug!(len = body.len(), "malformed line packet");
            return None;
        }
        if body[..16] != self.local_line_id {
            debug!("line packet for a different line");
            return None;
        }
        let (mac_rx, signed) = body[16..].split_at(ops.line_mac_len());
        let mac = ops.hmac(&self.key_in, signed);
        if verify_mac(&mac, mac_rx).is_err() {
            debug!("line packet MAC mismatch");
            return None;
        }

        let (seq, ciphertext) = signed.split_at(4);
        let mut iv = [0u8; 16];
        iv[12..].copy_from_slice(seq);
        let mut plaintext = ciphertext.to_vec();
        ops.ctr(&self.key_in, &iv, &mut plaintext);

        match Packet::parse(&plaintext) {
            Ok(inner) => Some(inner),
            Err(err) => {
                debug!(%err, "line packet decrypted to garbage");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SelfIdentity;
    use crate::suite::CIPHERSUITES;
    use std::cell::Cell;

    /// Deterministic host: xorshift RNG, manually advanced clock.
    struct TestHost {
        state: Cell<u64>,
        now: Cell<u32>,
    }

    impl TestHost {
        fn new(seed: u64) -> Self {
            Self { state: Cell::new(seed.max(1)), now: Cell::new(1_400_000_000) }
        }

        fn tick(&self) {
            self.now.set(self.now.get() + 10);
        }
    }

    impl Host for TestHost {
        fn fill_random(&self, buf: &mut [u8]) {
            for b in buf {
                let mut x = self.state.get();
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                self.state.set(x);
                *b = x as u8;
            }
        }

        fn now_seconds(&self) -> u32 {
            self.now.get()
        }
    }

    struct Pair {
        a_id: SelfIdentity,
        b_id: SelfIdentity,
        a: Session,
        b: Session,
    }

    /// Complete a two-sided handshake over `cs`.
    fn handshake(cs: CsId, host: &TestHost) -> Pair {
        let a_id = SelfIdentity::generate_suites(&[cs], host);
        let b_id = SelfIdentity::generate_suites(&[cs], host);

        let mut a = Session::new(cs, b_id.public_key(cs).unwrap(), host).unwrap();
        let mut b = Session::new(cs, a_id.public_key(cs).unwrap(), host).unwrap();

        let open_a = a.openize(&a_id, Packet::new()).unwrap();
        let inner_a = Session::deopenize(&b_id, &open_a).unwrap();
        assert_eq!(b.line(&inner_a).unwrap(), LineState::Lined);

        let open_b = b.openize(&b_id, Packet::new()).unwrap();
        let inner_b = Session::deopenize(&a_id, &open_b).unwrap();
        assert_eq!(a.line(&inner_b).unwrap(), LineState::Lined);

        Pair { a_id, b_id, a, b }
    }

    fn channel_packet() -> Packet {
        let mut p = Packet::new();
        p.set_u32("c", 1);
        p.set_str("type", "bulk");
        p.set_body(b"payload bytes");
        p
    }

    #[test]
    fn open_recovers_line_and_at() {
        // S1: the recovered inner's `line` equals the sender's line ID.
        let host = TestHost::new(7);
        let a_id = SelfIdentity::generate_suites(&[CsId::Cs1a], &host);
        let b_id = SelfIdentity::generate_suites(&[CsId::Cs1a], &host);

        let mut a = Session::new(CsId::Cs1a, b_id.public_key(CsId::Cs1a).unwrap(), &host).unwrap();
        let open = a.openize(&a_id, Packet::new()).unwrap();
        assert_eq!(open.head_byte(), Some(0x1a));

        let recovered = Session::deopenize(&b_id, &open).unwrap();
        assert_eq!(recovered.inner.get_str("line").unwrap(), hex::encode(a.local_line_id()));
        assert_eq!(recovered.inner.get_int("at"), Some(1_400_000_000));
        assert_eq!(recovered.sender_key, a_id.public_key(CsId::Cs1a).unwrap());
    }

    #[test]
    fn line_roundtrip_every_suite() {
        // P2 across all three suites, both directions.
        for (i, cs) in CIPHERSUITES.into_iter().enumerate() {
            let host = TestHost::new(100 + i as u64);
            let mut pair = handshake(cs, &host);

            let inner = channel_packet();
            let wire = pair.a.lineize(&inner).unwrap();
            assert_eq!(pair.b.delineize(&wire).unwrap(), inner, "suite {cs}");

            let reply = pair.b.lineize(&inner).unwrap();
            assert_eq!(pair.a.delineize(&reply).unwrap(), inner, "suite {cs}");
        }
    }

    #[test]
    fn line_packets_are_sequenced() {
        let host = TestHost::new(3);
        let mut pair = handshake(CsId::Cs1a, &host);
        let w1 = pair.a.lineize(&Packet::new()).unwrap();
        let w2 = pair.a.lineize(&Packet::new()).unwrap();
        assert_eq!(&w1.body()[..16], &w2.body()[..16]);
        // seq field differs, so ciphertexts of equal plaintexts differ
        assert_ne!(&w1.body()[16..], &w2.body()[16..]);
        assert!(pair.b.delineize(&w1).is_some());
        assert!(pair.b.delineize(&w2).is_some());
    }

    #[test]
    fn bit_flips_are_rejected_without_state_change() {
        // P4: flip every region of a line packet; delivery must fail and
        // the session must keep working afterwards.
        let host = TestHost::new(11);
        let mut pair = handshake(CsId::Cs2a, &host);

        let inner = channel_packet();
        let wire = pair.a.lineize(&inner).unwrap();
        for at in [0usize, 8, 16, 40, 52, wire.body().len() - 1] {
            let mut raw = wire.clone();
            let mut body = raw.body().to_vec();
            body[at] ^= 0x01;
            raw.set_body(&body);
            assert!(pair.b.delineize(&raw).is_none(), "flip at {at} accepted");
        }
        assert_eq!(pair.b.delineize(&wire).unwrap(), inner);
    }

    #[test]
    fn replayed_open_is_dropped() {
        // P5: a second delivery of an accepted open changes nothing.
        let host = TestHost::new(13);
        let mut pair = handshake(CsId::Cs1a, &host);

        let open_a = pair.a.openize(&pair.a_id, Packet::new()).unwrap();
        // same `at` as the original open: replay
        let replay = Session::deopenize(&pair.b_id, &open_a).unwrap();
        let at_before = pair.b.at_in();
        assert!(matches!(pair.b.line(&replay), Err(CryptoError::Replay)));
        assert_eq!(pair.b.at_in(), at_before);

        // traffic still flows on the existing keys
        let wire = pair.a.lineize(&Packet::new()).unwrap();
        assert!(pair.b.delineize(&wire).is_some());
    }

    #[test]
    fn rekey_keeps_line_id_and_relines() {
        // S5: new ephemeral + later `at`, same line ID → Relined.
        let host = TestHost::new(17);
        let mut pair = handshake(CsId::Cs3a, &host);

        host.tick();
        pair.a.rekey(&host).unwrap();
        let open = pair.a.openize(&pair.a_id, Packet::new()).unwrap();
        let inner = Session::deopenize(&pair.b_id, &open).unwrap();
        assert_eq!(pair.b.line(&inner).unwrap(), LineState::Relined);

        let p = channel_packet();
        let wire = pair.a.lineize(&p).unwrap();
        assert_eq!(pair.b.delineize(&wire).unwrap(), p);
        let back = pair.b.lineize(&p).unwrap();
        assert_eq!(pair.a.delineize(&back).unwrap(), p);
    }

    #[test]
    fn open_mac_is_bound_to_sender_identity() {
        let host = TestHost::new(23);
        let a_id = SelfIdentity::generate_suites(&[CsId::Cs1a], &host);
        let b_id = SelfIdentity::generate_suites(&[CsId::Cs1a], &host);
        let mut a = Session::new(CsId::Cs1a, b_id.public_key(CsId::Cs1a).unwrap(), &host).unwrap();

        let open = a.openize(&a_id, Packet::new()).unwrap();
        let mut tampered = open.clone();
        let mut body = tampered.body().to_vec();
        let last = body.len() - 1;
        body[last] ^= 0x80;
        tampered.set_body(&body);
        assert!(Session::deopenize(&b_id, &tampered).is_err());
    }

    #[test]
    fn lineize_before_handshake_is_a_state_error() {
        let host = TestHost::new(29);
        let b_id = SelfIdentity::generate_suites(&[CsId::Cs1a], &host);
        let mut a = Session::new(CsId::Cs1a, b_id.public_key(CsId::Cs1a).unwrap(), &host).unwrap();
        assert!(matches!(a.lineize(&Packet::new()), Err(CryptoError::State)));
    }
}
