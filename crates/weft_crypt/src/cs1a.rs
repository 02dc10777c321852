//! Ciphersuite 0x1a — X25519, AES-128-CTR, HMAC-SHA1.
//!
//! The weakest suite, kept for constrained links. Line packet MACs are
//! truncated to 4 bytes, i.e. 32 bits of authentication; hosts facing
//! adversarial traffic should publish 0x2a or 0x3a as well and let
//! negotiation take the stronger suite.

use cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::host::{Host, HostRng};
use crate::suite::SuiteOps;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type HmacSha1 = Hmac<Sha1>;

pub(crate) struct Cs1a;

impl SuiteOps for Cs1a {
    fn public_len(&self) -> usize {
        32
    }

    fn secret_len(&self) -> usize {
        32
    }

    fn open_mac_len(&self) -> usize {
        20
    }

    fn line_mac_len(&self) -> usize {
        4
    }

    fn key_len(&self) -> usize {
        16
    }

    fn keypair(&self, host: &dyn Host) -> (Zeroizing<Vec<u8>>, Vec<u8>) {
        let secret = StaticSecret::random_from_rng(HostRng(host));
        let public = PublicKey::from(&secret);
        (Zeroizing::new(secret.to_bytes().to_vec()), public.as_bytes().to_vec())
    }

    fn shared_secret(
        &self,
        secret: &[u8],
        public: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        x25519_shared(secret, public)
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        Sha1::digest(data).to_vec()
    }

    fn hmac(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    fn ctr(&self, key: &[u8], iv: &[u8; 16], data: &mut [u8]) {
        let mut cipher = Aes128Ctr::new_from_slices(key, iv).expect("fixed-width key and IV");
        cipher.apply_keystream(data);
    }
}

/// X25519 between raw 32-byte keys; shared by suites 0x1a and 0x2a.
pub(crate) fn x25519_shared(
    secret: &[u8],
    public: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let secret: [u8; 32] = secret
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("expected 32-byte X25519 secret".into()))?;
    let public: [u8; 32] = public
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("expected 32-byte X25519 public".into()))?;
    let shared = StaticSecret::from(secret).diffie_hellman(&PublicKey::from(public));
    if !shared.was_contributory() {
        return Err(CryptoError::Ecdh);
    }
    Ok(Zeroizing::new(shared.as_bytes().to_vec()))
}
