//! Long-term identities and hashnames.
//!
//! An identity maps ciphersuite IDs to long-term public keys (plus the
//! secret halves for our own). The hashname — SHA-256 over the canonical
//! ordering of the published keys, rendered as lowercase hex — is a peer's
//! stable name and comparison key everywhere else in the stack.
//!
//! Identities persist as a packet whose head carries base64 key material
//! under `"<cs-hex>"` / `"<cs-hex>_secret"` members, e.g.
//! `{ "1a": "qfbZ…", "1a_secret": "Fmd0…" }`.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use weft_lob::Packet;

use crate::error::CryptoError;
use crate::host::Host;
use crate::suite::{CsId, CIPHERSUITES};

// ── Hashname ─────────────────────────────────────────────────────────────────

/// SHA-256 over a peer's published keys, compared and displayed as
/// lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hashname([u8; 32]);

impl Hashname {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(CryptoError::HexDecode)?;
        Ok(Self(out))
    }
}

impl std::fmt::Display for Hashname {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ── Remote identity ──────────────────────────────────────────────────────────

/// A peer's published public keys, one per ciphersuite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    keys: BTreeMap<CsId, Vec<u8>>,
}

impl Identity {
    /// Identity with a single published key, as recovered from an open
    /// packet's inner body.
    pub fn single(cs: CsId, public: &[u8]) -> Result<Self, CryptoError> {
        let mut id = Self::default();
        id.insert(cs, public)?;
        Ok(id)
    }

    /// Load the public halves from a persisted identity packet; `_secret`
    /// members are ignored.
    pub fn from_packet(packet: &Packet) -> Result<Self, CryptoError> {
        let mut id = Self::default();
        for cs in CIPHERSUITES {
            if let Some(b64) = packet.get_str(&cs.as_hex()) {
                let raw = URL_SAFE_NO_PAD.decode(b64)?;
                id.insert(cs, &raw)?;
            }
        }
        if id.keys.is_empty() {
            return Err(CryptoError::MissingKey);
        }
        Ok(id)
    }

    pub fn to_packet(&self) -> Packet {
        let mut p = Packet::new();
        for (cs, key) in &self.keys {
            p.set_str(&cs.as_hex(), &URL_SAFE_NO_PAD.encode(key));
        }
        p
    }

    /// Install a public key, accepted raw or base64-encoded.
    pub fn insert(&mut self, cs: CsId, public: &[u8]) -> Result<(), CryptoError> {
        let raw = decode_key(public, cs.ops().public_len())?;
        self.keys.insert(cs, raw);
        Ok(())
    }

    pub fn suites(&self) -> Vec<CsId> {
        self.keys.keys().copied().collect()
    }

    pub fn key(&self, cs: CsId) -> Option<&[u8]> {
        self.keys.get(&cs).map(|k| k.as_slice())
    }

    pub fn hashname(&self) -> Hashname {
        let mut hasher = Sha256::new();
        for (cs, key) in &self.keys {
            hasher.update([cs.as_byte()]);
            hasher.update(key);
        }
        Hashname(hasher.finalize().into())
    }
}

// ── Self identity ────────────────────────────────────────────────────────────

#[derive(ZeroizeOnDrop)]
struct Keypair {
    #[zeroize(skip)]
    public: Vec<u8>,
    secret: Zeroizing<Vec<u8>>,
}

/// Our own identity: public keys plus their secret halves.
/// Valid iff at least one ciphersuite has a complete keypair.
#[derive(Default)]
pub struct SelfIdentity {
    keys: BTreeMap<CsId, Keypair>,
}

impl SelfIdentity {
    /// Fresh keypairs for every supported ciphersuite.
    pub fn generate(host: &dyn Host) -> Self {
        Self::generate_suites(&CIPHERSUITES, host)
    }

    pub fn generate_suites(suites: &[CsId], host: &dyn Host) -> Self {
        let mut id = Self::default();
        for cs in suites {
            let (secret, public) = cs.ops().keypair(host);
            id.keys.insert(*cs, Keypair { public, secret });
        }
        id
    }

    /// Load keypairs from a persisted identity packet (§ format above).
    pub fn from_packet(packet: &Packet) -> Result<Self, CryptoError> {
        let mut id = Self::default();
        for cs in CIPHERSUITES {
            let (Some(pub_b64), Some(sec_b64)) = (
                packet.get_str(&cs.as_hex()),
                packet.get_str(&format!("{}_secret", cs.as_hex())),
            ) else {
                continue;
            };
            let public = URL_SAFE_NO_PAD.decode(pub_b64)?;
            let secret = URL_SAFE_NO_PAD.decode(sec_b64)?;
            id.insert(cs, &public, &secret)?;
        }
        if id.keys.is_empty() {
            return Err(CryptoError::MissingKey);
        }
        Ok(id)
    }

    /// Persist as an identity packet with public and secret members.
    pub fn to_packet(&self) -> Packet {
        let mut p = Packet::new();
        for (cs, pair) in &self.keys {
            p.set_str(&cs.as_hex(), &URL_SAFE_NO_PAD.encode(&pair.public));
            p.set_str(
                &format!("{}_secret", cs.as_hex()),
                &URL_SAFE_NO_PAD.encode(pair.secret.as_slice()),
            );
        }
        p
    }

    /// Install a keypair; both halves accepted raw or base64-encoded.
    pub fn insert(&mut self, cs: CsId, public: &[u8], secret: &[u8]) -> Result<(), CryptoError> {
        let ops = cs.ops();
        let public = decode_key(public, ops.public_len())?;
        let secret = Zeroizing::new(decode_key(secret, ops.secret_len())?);
        self.keys.insert(cs, Keypair { public, secret });
        Ok(())
    }

    pub fn suites(&self) -> Vec<CsId> {
        self.keys.keys().copied().collect()
    }

    pub fn public_key(&self, cs: CsId) -> Option<&[u8]> {
        self.keys.get(&cs).map(|p| p.public.as_slice())
    }

    pub(crate) fn secret_key(&self, cs: CsId) -> Option<&[u8]> {
        self.keys.get(&cs).map(|p| p.secret.as_slice())
    }

    /// The shareable half of this identity.
    pub fn public_identity(&self) -> Identity {
        let mut id = Identity::default();
        for (cs, pair) in &self.keys {
            id.keys.insert(*cs, pair.public.clone());
        }
        id
    }

    pub fn hashname(&self) -> Hashname {
        self.public_identity().hashname()
    }
}

/// Generate one suite's keypair as a persisted identity packet.
pub fn keygen(cs: CsId, host: &dyn Host) -> Packet {
    let (secret, public) = cs.ops().keypair(host);
    let mut p = Packet::new();
    p.set_str(&cs.as_hex(), &URL_SAFE_NO_PAD.encode(&public));
    p.set_str(
        &format!("{}_secret", cs.as_hex()),
        &URL_SAFE_NO_PAD.encode(secret.as_slice()),
    );
    p
}

/// Key material arrives either as raw bytes of the suite's length or as
/// base64 text; normalise to raw.
pub(crate) fn decode_key(input: &[u8], expected: usize) -> Result<Vec<u8>, CryptoError> {
    if input.len() == expected {
        return Ok(input.to_vec());
    }
    let text = std::str::from_utf8(input)
        .map_err(|_| CryptoError::InvalidKey(format!("expected {expected} bytes or base64")))?;
    let raw = URL_SAFE_NO_PAD.decode(text.trim_end_matches(['\0', '\n']))?;
    if raw.len() != expected {
        return Err(CryptoError::InvalidKey(format!(
            "decoded key is {} bytes, expected {expected}",
            raw.len()
        )));
    }
    Ok(raw)
}
