use crate::pool::{DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAP};

/// Default capacity reserved for accumulating the HTTP handshake request
/// line and headers before the upgrade completes.
pub const DEFAULT_HANDSHAKE_CAP: usize = 8 * 1024;

/// Default cap on a single, possibly-fragmented, WebSocket message, applied
/// before any payload allocation happens.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Tunables for a [`crate::registry::ConnectionRegistry`] and the
/// [`crate::pool::BufferPool`] it owns.
///
/// Cloned cheaply (it's all `Copy` fields) so a caller can build one config
/// and hand it to however many registries a process runs.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Size in bytes of each slab handed out by the buffer pool.
    pub buffer_size: usize,
    /// Number of slabs the buffer pool keeps on its free list.
    pub pool_cap: usize,
    /// Upper bound on bytes buffered while parsing a handshake request.
    pub handshake_cap: usize,
    /// Upper bound on the total payload size of one (possibly fragmented)
    /// WebSocket message. Exceeding it closes the connection with code 1009.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            pool_cap: DEFAULT_POOL_CAP,
            handshake_cap: DEFAULT_HANDSHAKE_CAP,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.buffer_size, 4096);
        assert_eq!(cfg.pool_cap, 1000);
        assert_eq!(cfg.handshake_cap, 8192);
        assert_eq!(cfg.max_message_size, 16 * 1024 * 1024);
    }
}
