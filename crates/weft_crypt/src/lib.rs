//! weft_crypt — ciphersuites, identities and line sessions for the weft
//! mesh.
//!
//! # Design principles
//! - No custom primitives; curves, ciphers and MACs come from audited
//!   RustCrypto/dalek crates.
//! - Secret material is zeroised on drop.
//! - Randomness and time are host capabilities, never read directly.
//!
//! # Module layout
//! - `suite`    — ciphersuite IDs, negotiation, the per-suite primitive table
//! - `cs1a`/`cs2a`/`cs3a` — the three suites
//! - `identity` — long-term keys, persisted identity packets, hashnames
//! - `session`  — open handshake and line packet encrypt/decrypt
//! - `host`     — injected RNG + clock
//! - `error`    — unified error type

pub mod cs1a;
pub mod cs2a;
pub mod cs3a;
pub mod error;
pub mod host;
pub mod identity;
pub mod session;
pub mod suite;

pub use error::CryptoError;
pub use host::{Host, SystemHost};
pub use identity::{keygen, Hashname, Identity, SelfIdentity};
pub use session::{LineState, OpenInner, Session};
pub use suite::{negotiate, CsId, CIPHERSUITES};
