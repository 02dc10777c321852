//! weft_mesh — the stateful engine of the weft overlay: frame transport
//! for lossy links, per-peer exchanges, channel multiplexing and the mesh
//! router binding a local identity to its links.
//!
//! The whole crate is single-threaded and non-blocking; an outer event
//! loop feeds bytes in with [`Mesh::receive`] / [`Frames::receive_frame`]
//! and drains [`Mesh::outgoing`] / [`Frames::next_outbound`].

pub mod channel;
pub mod config;
pub mod error;
pub mod exchange;
pub mod frames;
pub mod link;
pub mod mesh;

pub use channel::{Channel, ChannelState};
pub use config::MeshConfig;
pub use error::MeshError;
pub use exchange::Exchange;
pub use frames::Frames;
pub use link::Link;
pub use mesh::Mesh;

pub use weft_crypt::{CsId, Hashname, Host, Identity, LineState, SelfIdentity, SystemHost};
pub use weft_lob::Packet;
