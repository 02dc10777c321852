//! Ciphersuite registry.
//!
//! Each suite is one byte on the wire and bundles a key-agreement curve, an
//! AES-CTR width and an HMAC. Dispatch is a runtime table keyed by [`CsId`]
//! (the original engine selected suites with chained conditional
//! compilation); the open/line packet layouts are shared across suites, so
//! a suite only supplies primitives and lengths.
//!
//! Ordering matters: IDs sort by strength, and negotiation between two
//! identities picks the highest byte both sides publish.

use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::host::Host;

/// Supported ciphersuite IDs, ascending.
pub const CIPHERSUITES: [CsId; 3] = [CsId::Cs1a, CsId::Cs2a, CsId::Cs3a];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CsId {
    /// X25519 + AES-128-CTR + HMAC-SHA1, 4-byte line tags. For constrained
    /// links; see the warning in [`crate::cs1a`].
    Cs1a = 0x1a,
    /// X25519 + AES-256-CTR + HMAC-SHA256.
    Cs2a = 0x2a,
    /// NIST P-256 + AES-128-CTR + HMAC-SHA256.
    Cs3a = 0x3a,
}

impl CsId {
    pub fn from_byte(b: u8) -> Result<Self, CryptoError> {
        match b {
            0x1a => Ok(CsId::Cs1a),
            0x2a => Ok(CsId::Cs2a),
            0x3a => Ok(CsId::Cs3a),
            other => Err(CryptoError::UnsupportedSuite(other)),
        }
    }

    /// Parse the two-character hex form used in identity packets ("1a").
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut byte = [0u8; 1];
        hex::decode_to_slice(s, &mut byte).map_err(CryptoError::HexDecode)?;
        Self::from_byte(byte[0])
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Lowercase hex, the identity-packet key for this suite.
    pub fn as_hex(self) -> String {
        hex::encode([self.as_byte()])
    }

    pub(crate) fn ops(self) -> &'static dyn SuiteOps {
        match self {
            CsId::Cs1a => &crate::cs1a::Cs1a,
            CsId::Cs2a => &crate::cs2a::Cs2a,
            CsId::Cs3a => &crate::cs3a::Cs3a,
        }
    }
}

impl std::fmt::Display for CsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_hex())
    }
}

/// Highest suite published by both identities, if any.
pub fn negotiate(ours: &[CsId], theirs: &[CsId]) -> Option<CsId> {
    ours.iter()
        .filter(|cs| theirs.contains(cs))
        .max()
        .copied()
}

// ── Per-suite primitive set ──────────────────────────────────────────────────

/// The capability set a suite contributes to the shared packet transforms.
///
/// Keys are raw byte strings here; the typed curve objects stay private to
/// each suite module. Secrets travel in `Zeroizing` buffers.
pub(crate) trait SuiteOps: Sync {
    /// Public key length on the wire (identity and ephemeral alike).
    fn public_len(&self) -> usize;
    fn secret_len(&self) -> usize;
    /// HMAC tag length on an open packet.
    fn open_mac_len(&self) -> usize;
    /// HMAC tag length on a line packet (truncated for 0x1a).
    fn line_mac_len(&self) -> usize;
    /// Derived AES key length.
    fn key_len(&self) -> usize;

    /// Fresh keypair as (secret, public).
    fn keypair(&self, host: &dyn Host) -> (Zeroizing<Vec<u8>>, Vec<u8>);

    /// ECDH between one of our secrets and a peer public key.
    fn shared_secret(
        &self,
        secret: &[u8],
        public: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// The suite hash, used to reduce ECDH output to AES keys.
    fn hash(&self, data: &[u8]) -> Vec<u8>;

    /// Full-width HMAC tag under `key`.
    fn hmac(&self, key: &[u8], data: &[u8]) -> Vec<u8>;

    /// AES-CTR in place; the full 16-byte IV is the initial counter block.
    fn ctr(&self, key: &[u8], iv: &[u8; 16], data: &mut [u8]);
}

/// Constant-time tag check against a possibly truncated received tag.
pub(crate) fn verify_mac(full: &[u8], received: &[u8]) -> Result<(), CryptoError> {
    if received.is_empty() || received.len() > full.len() {
        return Err(CryptoError::MacMismatch);
    }
    let mut diff = 0u8;
    for (a, b) in full[..received.len()].iter().zip(received) {
        diff |= a ^ b;
    }
    if diff == 0 {
        Ok(())
    } else {
        Err(CryptoError::MacMismatch)
    }
}
