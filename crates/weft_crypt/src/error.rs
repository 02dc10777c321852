use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unsupported ciphersuite 0x{0:02x}")]
    UnsupportedSuite(u8),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("no keypair loaded for the selected ciphersuite")]
    MissingKey,

    #[error("MAC verification failed")]
    MacMismatch,

    #[error("key agreement failed")]
    Ecdh,

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("handshake `at` did not increase")]
    Replay,

    #[error("operation inconsistent with session state")]
    State,

    #[error("packet container error: {0}")]
    Packet(#[from] weft_lob::PacketError),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
