use thiserror::Error;

/// Failures raised while parsing and validating the HTTP Upgrade handshake.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("handshake request exceeded {cap} bytes without a terminating CRLFCRLF")]
    TooLarge { cap: usize },
    #[error("malformed HTTP request line")]
    MalformedRequestLine,
    #[error("missing or malformed Sec-WebSocket-Key header")]
    MissingKey,
    #[error("request did not ask for a websocket upgrade")]
    NotAnUpgrade,
    #[error("missing or unsupported Sec-WebSocket-Version (only 13 is supported)")]
    UnsupportedVersion,
}

/// Failures raised while parsing a WebSocket frame off the wire.
///
/// Every variant carries enough information to pick a close status code per
/// RFC 6455 §7.4.1.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("reserved bits set in frame header")]
    ReservedBitsSet,
    #[error("64-bit extended payload length had its most significant bit set")]
    InvalidExtendedLength,
    #[error("client frame was not masked")]
    NotMasked,
    #[error("control frame payload exceeded 125 bytes")]
    ControlFrameTooLarge,
    #[error("control frame was fragmented")]
    FragmentedControlFrame,
    #[error("continuation frame received with no message in progress")]
    UnexpectedContinuation,
    #[error("new data frame started before previous fragmented message finished")]
    InterleavedDataFrame,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("message size {size} exceeded the configured cap of {cap} bytes")]
    MessageTooLarge { size: usize, cap: usize },
    #[error("close frame carried an invalid status code {0}")]
    InvalidCloseCode(u16),
}

impl FrameError {
    /// The RFC 6455 status code a server should send back in its own Close
    /// frame before dropping the connection, given this failure.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::MessageTooLarge { .. } => 1009,
            _ => 1002,
        }
    }
}
