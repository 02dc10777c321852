//! Ciphersuite 0x3a — NIST P-256, AES-128-CTR, HMAC-SHA256.
//!
//! Public keys travel as uncompressed SEC1 points (65 bytes).

use cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::host::{Host, HostRng};
use crate::suite::SuiteOps;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

pub(crate) struct Cs3a;

impl SuiteOps for Cs3a {
    fn public_len(&self) -> usize {
        65
    }

    fn secret_len(&self) -> usize {
        32
    }

    fn open_mac_len(&self) -> usize {
        32
    }

    fn line_mac_len(&self) -> usize {
        32
    }

    fn key_len(&self) -> usize {
        16
    }

    fn keypair(&self, host: &dyn Host) -> (Zeroizing<Vec<u8>>, Vec<u8>) {
        let secret = SecretKey::random(&mut HostRng(host));
        let public = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
        (Zeroizing::new(secret.to_bytes().to_vec()), public)
    }

    fn shared_secret(
        &self,
        secret: &[u8],
        public: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let secret = SecretKey::from_slice(secret)
            .map_err(|_| CryptoError::InvalidKey("expected 32-byte P-256 secret".into()))?;
        let public = PublicKey::from_sec1_bytes(public)
            .map_err(|_| CryptoError::InvalidKey("invalid SEC1 P-256 point".into()))?;
        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
        Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }

    fn hmac(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    fn ctr(&self, key: &[u8], iv: &[u8; 16], data: &mut [u8]) {
        let mut cipher = Aes128Ctr::new_from_slices(key, iv).expect("fixed-width key and IV");
        cipher.apply_keystream(data);
    }
}
