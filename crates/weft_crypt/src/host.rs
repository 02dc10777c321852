//! Host-supplied capabilities.
//!
//! The core never opens `/dev/urandom` or reads the system clock itself;
//! randomness and time arrive through this trait so embedders control both
//! and tests run deterministically.

use rand::rngs::OsRng;
use rand_core::{CryptoRng, RngCore};

pub trait Host {
    /// Fill `buf` with cryptographically strong random bytes.
    fn fill_random(&self, buf: &mut [u8]);

    /// Wall-clock seconds; only ever compared for monotonicity.
    fn now_seconds(&self) -> u32;
}

/// Default host backed by the OS RNG and system clock.
pub struct SystemHost;

impl Host for SystemHost {
    fn fill_random(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }

    fn now_seconds(&self) -> u32 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

/// `RngCore` adapter so dalek/p256 key generation can draw from a `Host`.
pub(crate) struct HostRng<'a>(pub &'a dyn Host);

impl RngCore for HostRng<'_> {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_random(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.0.fill_random(dest);
        Ok(())
    }
}

// The Host contract requires cryptographic quality.
impl CryptoRng for HostRng<'_> {}
