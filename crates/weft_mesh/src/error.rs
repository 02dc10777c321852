use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("frame state error; window must be recreated")]
    FrameState,

    #[error("frame reassembly ceiling reached")]
    Exhausted,

    #[error("frame hash chain desynchronised")]
    Desync,

    #[error("link is closed")]
    LinkClosed,

    #[error("no such channel on this link")]
    UnknownChannel,

    #[error("channel is ended or errored")]
    ChannelClosed,

    #[error("no shared ciphersuite with peer")]
    NoSharedSuite,

    #[error("link to own hashname refused")]
    SelfLink,

    #[error("crypto error: {0}")]
    Crypto(#[from] weft_crypt::CryptoError),

    #[error("packet container error: {0}")]
    Packet(#[from] weft_lob::PacketError),
}
