//! Token-indexed connection table and the dispatch entry point an event
//! loop adapter drives on every readiness batch.

use mio::net::TcpStream;
use mio::{Registry, Token, event::Event};

use crate::conn::{Connection, ConnOutcome};
use crate::config::ServerConfig;
use crate::frame::OpCode;
use crate::pool::BufferPool;

/// Owns every live [`Connection`] plus the buffer pool they share, indexed
/// by the low bits of their `mio::Token`.
///
/// Slots are never removed once grown: a closed connection's slot is reset
/// to `None` and reused by a later `add()` rather than shifting the vector,
/// so existing tokens never change meaning underneath an in-flight event
/// batch.
pub struct ConnectionRegistry {
    conns: Vec<Option<Connection>>,
    pool: BufferPool,
    cfg: ServerConfig,
}

impl ConnectionRegistry {
    pub fn new(cfg: ServerConfig) -> Self {
        let pool = BufferPool::new(cfg.buffer_size, cfg.pool_cap);
        Self { conns: Vec::new(), pool, cfg }
    }

    fn slot_index(token: Token) -> usize {
        token.0
    }

    /// Registers a newly accepted socket under `token`. `token` is expected
    /// to have been assigned by the caller (typically a small incrementing
    /// counter wrapping the listener's own token) before the socket is
    /// registered with the event loop's `Registry`.
    ///
    /// If `token` is still occupied by a live connection -- the kernel
    /// reused a descriptor faster than the registry observed its close --
    /// that stale occupant is torn down through `force_close` first, so its
    /// buffers return to `pool` and its socket is deregistered/shut down
    /// rather than silently dropped.
    pub fn add(&mut self, token: Token, sock: TcpStream, registry: &Registry) {
        let idx = Self::slot_index(token);
        if idx >= self.conns.len() {
            self.conns.resize_with(idx + 1, || None);
        }
        if let Some(mut stale) = self.conns[idx].take() {
            stale.force_close(&mut self.pool, registry);
        }
        self.conns[idx] = Some(Connection::new(token, sock));
    }

    pub fn get(&self, token: Token) -> Option<&Connection> {
        self.conns.get(Self::slot_index(token)).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Connection> {
        self.conns.get_mut(Self::slot_index(token)).and_then(Option::as_mut)
    }

    /// Drives one connection's handling of a single `mio::event::Event`,
    /// invoking `on_message` for every WebSocket message completed while
    /// processing it. Removes (resets) the connection's slot if the event
    /// left it ready to disconnect.
    pub fn dispatch(&mut self, event: &Event, registry: &Registry, on_message: &mut dyn FnMut(Token, OpCode, &[u8])) {
        let token = event.token();
        let idx = Self::slot_index(token);
        let Some(slot) = self.conns.get_mut(idx) else { return };
        let Some(conn) = slot.as_mut() else { return };

        let mut disconnect = false;

        if event.is_error() || event.is_read_closed() {
            conn.force_close(&mut self.pool, registry);
            disconnect = true;
        }

        if !disconnect && event.is_readable() {
            if conn.on_readable(&mut self.pool, &self.cfg, registry, on_message) == ConnOutcome::Disconnect {
                disconnect = true;
            }
        }

        // Runs after on_readable so a response enqueued while handling this
        // same readiness batch (handshake accept, echoed frame, close) gets
        // a chance to flush immediately rather than waiting on a separate
        // writable event.
        if !disconnect && event.is_writable() {
            if conn.on_writable(&mut self.pool, registry) == ConnOutcome::Disconnect {
                disconnect = true;
            }
        }

        if disconnect {
            self.conns[idx] = None;
        }
    }

    /// Queues `payload` for send on `token`'s connection, if it is open.
    /// Silently drops the send if the token no longer maps to a live
    /// connection — the caller is racing a disconnect it hasn't observed
    /// yet, which is expected under a readiness-driven loop.
    pub fn send(&mut self, token: Token, opcode: OpCode, payload: &[u8], registry: &Registry) {
        let idx = Self::slot_index(token);
        if let Some(Some(conn)) = self.conns.get_mut(idx) {
            conn.send(opcode, payload, &mut self.pool, registry);
        }
    }

    /// Requests an orderly close of `token`'s connection.
    pub fn close(&mut self, token: Token, code: u16, reason: &str, registry: &Registry) {
        let idx = Self::slot_index(token);
        if let Some(Some(conn)) = self.conns.get_mut(idx) {
            conn.initiate_close(code, reason, &mut self.pool, registry);
        }
    }

    /// Forcibly tears down every live connection, e.g. on shutdown.
    pub fn close_all(&mut self, registry: &Registry) {
        for slot in &mut self.conns {
            if let Some(conn) = slot {
                conn.force_close(&mut self.pool, registry);
            }
            *slot = None;
        }
    }

    pub fn buffer_pool_len(&self) -> usize {
        self.pool.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_registry_has_empty_pool() {
        let registry = ConnectionRegistry::new(ServerConfig::default());
        assert_eq!(registry.buffer_pool_len(), 0);
    }

    #[test]
    fn get_on_unknown_token_is_none() {
        let registry = ConnectionRegistry::new(ServerConfig::default());
        assert!(registry.get(Token(42)).is_none());
    }
}
