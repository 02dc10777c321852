//! Ciphersuite 0x2a — X25519, AES-256-CTR, HMAC-SHA256. Full-width tags.

use cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::cs1a::x25519_shared;
use crate::error::CryptoError;
use crate::host::Host;
use crate::suite::SuiteOps;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub(crate) struct Cs2a;

impl SuiteOps for Cs2a {
    fn public_len(&self) -> usize {
        32
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
        32
    }

    fn keypair(&self, host: &dyn Host) -> (Zeroizing<Vec<u8>>, Vec<u8>) {
        crate::cs1a::Cs1a.keypair(host)
    }

    fn shared_secret(
        &self,
        secret: &[u8],
        public: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        x25519_shared(secret, public)
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
        let mut cipher = Aes256Ctr::new_from_slices(key, iv).expect("fixed-width key and IV");
        cipher.apply_keystream(data);
    }
}
