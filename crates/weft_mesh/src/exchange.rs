//! Per-peer exchange: the pairing of our identity with a remote identity
//! under one negotiated ciphersuite, owning the line session and the
//! channel-ID allocator.
//!
//! Channel IDs are 32-bit and parity-partitioned so both ends can open
//! channels without coordination: the side whose hashname sorts lower
//! allocates even IDs, the other odd.

use weft_crypt::{negotiate, CsId, Host, Identity, SelfIdentity, Session};

use crate::error::MeshError;

pub struct Exchange {
    cs: CsId,
    session: Session,
    next_channel_id: u32,
}

impl Exchange {
    pub fn new(
        local: &SelfIdentity,
        remote: &Identity,
        force: Option<CsId>,
        host: &dyn Host,
    ) -> Result<Self, MeshError> {
        let local_hashname = local.hashname();
        let remote_hashname = remote.hashname();
        if local_hashname == remote_hashname {
            return Err(MeshError::SelfLink);
        }

        let cs = match force {
            Some(cs) => {
                if local.public_key(cs).is_none() || remote.key(cs).is_none() {
                    return Err(MeshError::NoSharedSuite);
                }
                cs
            }
            None => negotiate(&local.suites(), &remote.suites())
                .ok_or(MeshError::NoSharedSuite)?,
        };
        let remote_key = remote.key(cs).ok_or(MeshError::NoSharedSuite)?;
        let session = Session::new(cs, remote_key, host)?;

        // even IDs iff our hashname sorts lower; 0 is never allocated
        let next_channel_id = if local_hashname < remote_hashname { 2 } else { 1 };
        Ok(Self { cs, session, next_channel_id })
    }

    pub fn cs(&self) -> CsId {
        self.cs
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Allocate the next channel ID from our parity space.
    pub fn next_channel_id(&mut self) -> u32 {
        let id = self.next_channel_id;
        self.next_channel_id += 2;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_crypt::SystemHost;

    #[test]
    fn channel_id_parity_follows_hashname_order() {
        let a = SelfIdentity::generate_suites(&[CsId::Cs1a], &SystemHost);
        let b = SelfIdentity::generate_suites(&[CsId::Cs1a], &SystemHost);

        let mut xa =
            Exchange::new(&a, &b.public_identity(), None, &SystemHost).unwrap();
        let mut xb =
            Exchange::new(&b, &a.public_identity(), None, &SystemHost).unwrap();

        let (low, high) = if a.hashname() < b.hashname() {
            (&mut xa, &mut xb)
        } else {
            (&mut xb, &mut xa)
        };
        assert_eq!(low.next_channel_id() % 2, 0);
        assert_eq!(low.next_channel_id(), 4);
        assert_eq!(high.next_channel_id() % 2, 1);
        assert_eq!(high.next_channel_id(), 3);
    }

    #[test]
    fn negotiation_picks_strongest_shared_suite() {
        let a = SelfIdentity::generate_suites(&[CsId::Cs1a, CsId::Cs3a], &SystemHost);
        let b = SelfIdentity::generate(&SystemHost);
        let x = Exchange::new(&a, &b.public_identity(), None, &SystemHost).unwrap();
        assert_eq!(x.cs(), CsId::Cs3a);
    }

    #[test]
    fn forced_suite_must_be_shared() {
        let a = SelfIdentity::generate_suites(&[CsId::Cs1a], &SystemHost);
        let b = SelfIdentity::generate_suites(&[CsId::Cs2a], &SystemHost);
        assert!(matches!(
            Exchange::new(&a, &b.public_identity(), Some(CsId::Cs2a), &SystemHost),
            Err(MeshError::NoSharedSuite)
        ));
        assert!(matches!(
            Exchange::new(&a, &b.public_identity(), None, &SystemHost),
            Err(MeshError::NoSharedSuite)
        ));
    }

    #[test]
    fn linking_to_self_is_refused() {
        let a = SelfIdentity::generate_suites(&[CsId::Cs1a], &SystemHost);
        assert!(matches!(
            Exchange::new(&a, &a.public_identity(), None, &SystemHost),
            Err(MeshError::SelfLink)
        ));
    }
}
