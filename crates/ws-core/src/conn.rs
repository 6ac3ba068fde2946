//! Per-connection state machine: CONNECTING -> OPEN -> CLOSING -> CLOSED.

use std::io;
use std::net::Shutdown;

use mio::Interest;
use mio::Registry;
use mio::Token;
use mio::net::TcpStream;

use crate::config::ServerConfig;
use crate::error::HandshakeError;
use crate::frame::{OpCode, encode_close};
use crate::handler::{MessageHandler, ProcessResult};
use crate::pool::BufferPool;
use crate::stream::{FlushOutcome, InputStream, OutputStream, RecvOutcome};

/// Where a connection sits in its lifecycle. Transitions are one-way:
/// nothing re-enters `Connecting`, and nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// What a caller driving a connection's readiness events should do next.
#[derive(Debug, PartialEq, Eq)]
pub enum ConnOutcome {
    /// The connection is still usable; keep it registered.
    Continue,
    /// The connection is done; the caller should tear it down and release
    /// its token.
    Disconnect,
}

/// One accepted socket plus everything needed to drive it through the
/// handshake and frame protocol.
pub struct Connection {
    token: Token,
    sock: TcpStream,
    state: ConnState,
    input: InputStream,
    output: OutputStream,
    handler: MessageHandler,
    /// True if WRITABLE interest is currently registered for `sock`.
    /// Invariant: `writable_armed == !output.is_empty()` once a given
    /// readable/writable/send call returns, mirroring
    /// `flux-network::tcp::TcpStream`'s `writable_armed` field.
    writable_armed: bool,
}

impl Connection {
    /// Registers `sock` under `token` with READABLE interest only: a fresh
    /// connection has nothing queued to write, so WRITABLE interest is
    /// armed lazily the first time a send doesn't drain immediately.
    pub fn new(token: Token, sock: TcpStream) -> Self {
        Self {
            token,
            sock,
            state: ConnState::Connecting,
            input: InputStream::new(),
            output: OutputStream::new(),
            handler: MessageHandler::default(),
            writable_armed: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    fn set_state(&mut self, next: ConnState) {
        ws_utils::safe_assert!(self.state != ConnState::Closed, "attempted to transition out of Closed");
        ws_utils::safe_assert!(next != ConnState::Connecting, "attempted to re-enter Connecting");
        self.state = next;
    }

    /// Handles a readable event: reads whatever the socket offers, feeds it
    /// through the handshake/frame handler, and enqueues any resulting
    /// frames onto the output stream.
    pub fn on_readable(
        &mut self,
        pool: &mut BufferPool,
        cfg: &ServerConfig,
        registry: &Registry,
        on_message: &mut dyn FnMut(Token, OpCode, &[u8]),
    ) -> ConnOutcome {
        if self.state == ConnState::Closed {
            return ConnOutcome::Disconnect;
        }
        // A CLOSING connection is only waiting for its output to drain; any
        // further input is unexpected from a peer that has already received
        // our close frame, so tear down immediately rather than handing more
        // bytes to a handler that has no notion of the connection lifecycle.
        if self.state == ConnState::Closing {
            self.force_close(pool, registry);
            return ConnOutcome::Disconnect;
        }
        loop {
            match self.input.recv(&mut self.sock, pool) {
                Ok(RecvOutcome::WouldBlock) => break,
                Ok(RecvOutcome::Closed) => {
                    // A 0-byte read is the peer's FIN: treat it exactly like
                    // the negative-return close-path the recv contract
                    // specifies, after delivering whatever was already
                    // buffered before the peer went away.
                    self.process_buffered(pool, cfg, registry, on_message);
                    self.force_close(pool, registry);
                    return ConnOutcome::Disconnect;
                }
                Ok(RecvOutcome::Filled { .. }) => {
                    match self.process_buffered(pool, cfg, registry, on_message) {
                        // Once this batch has pushed the connection into
                        // Closing, stop reading further bytes off the wire
                        // and fall through to draining the close frame.
                        ConnOutcome::Continue if self.state == ConnState::Closing => break,
                        ConnOutcome::Continue => continue,
                        ConnOutcome::Disconnect => return ConnOutcome::Disconnect,
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.force_close(pool, registry);
                    return ConnOutcome::Disconnect;
                }
            }
        }
        self.sync_flush(pool, registry)
    }

    fn process_buffered(
        &mut self,
        pool: &mut BufferPool,
        cfg: &ServerConfig,
        registry: &Registry,
        on_message: &mut dyn FnMut(Token, OpCode, &[u8]),
    ) -> ConnOutcome {
        let token = self.token;
        loop {
            let mut forward = |op: OpCode, payload: &[u8]| on_message(token, op, payload);
            let result = match self.handler.process(&mut self.input, pool, cfg, &mut self.output, &mut forward) {
                Ok(r) => r,
                Err(e) => {
                    self.abort_handshake(e, pool, registry);
                    return ConnOutcome::Disconnect;
                }
            };
            match result {
                ProcessResult::Progress => return ConnOutcome::Continue,
                ProcessResult::HandshakeComplete { accept_response } => {
                    self.output.enqueue(&accept_response, pool);
                    self.handler = MessageHandler::Frame(crate::handler::FrameAssembler::default());
                    self.set_state(ConnState::Open);
                    continue;
                }
                ProcessResult::PeerClose { code, close_frame } => {
                    self.begin_close(code, "");
                    self.output.enqueue(&close_frame, pool);
                    return ConnOutcome::Continue;
                }
                ProcessResult::ProtocolError(err) => {
                    let code = err.close_code();
                    tracing::warn!(token = ?self.token, error = %err, "protocol error, closing connection");
                    self.begin_close(code, "");
                    self.output.enqueue(&encode_close(code, ""), pool);
                    return ConnOutcome::Continue;
                }
            }
        }
    }

    fn abort_handshake(&mut self, err: HandshakeError, pool: &mut BufferPool, registry: &Registry) {
        tracing::warn!(token = ?self.token, error = %err, "handshake failed");
        self.force_close(pool, registry);
    }

    /// Marks the connection as closing and worth draining, without tearing
    /// down the socket yet: the caller still needs the writable side to
    /// flush the close frame.
    fn begin_close(&mut self, code: u16, reason: &str) {
        tracing::debug!(token = ?self.token, code, reason, "closing connection");
        if self.state != ConnState::Closed {
            self.set_state(ConnState::Closing);
        }
    }

    /// Tears down the connection immediately, discarding anything still
    /// queued: deregisters the socket from `registry`, shuts it down, and
    /// releases both buffers' slabs back to `pool`. Idempotent: calling it
    /// on an already-closed connection is a no-op, mirroring the original
    /// handler's `close()` being safe to call from multiple error paths.
    pub fn force_close(&mut self, pool: &mut BufferPool, registry: &Registry) {
        if self.state == ConnState::Closed {
            return;
        }
        let _ = registry.deregister(&mut self.sock);
        let _ = self.sock.shutdown(Shutdown::Both);
        self.input.clear(pool);
        self.output.clear(pool);
        self.writable_armed = false;
        self.state = ConnState::Closed;
    }

    /// Handles a writable event: flushes the output backlog, re-arming or
    /// dropping WRITABLE interest as the backlog empties or refills. If the
    /// connection was `Closing` and the backlog has drained, reports that
    /// the caller should disconnect.
    pub fn on_writable(&mut self, pool: &mut BufferPool, registry: &Registry) -> ConnOutcome {
        if self.state == ConnState::Closed {
            return ConnOutcome::Disconnect;
        }
        self.sync_flush(pool, registry)
    }

    /// Queues an application message for send and makes a synchronous
    /// attempt to write it straight away. No-ops once the connection is
    /// closing or closed.
    pub fn send(&mut self, opcode: OpCode, payload: &[u8], pool: &mut BufferPool, registry: &Registry) {
        if self.state != ConnState::Open {
            return;
        }
        self.output.enqueue(&crate::frame::encode_frame(opcode, payload), pool);
        self.sync_flush(pool, registry);
    }

    /// Initiates an application-requested close: queues a Close frame,
    /// moves to `Closing`, and attempts a synchronous flush. The connection
    /// fully tears down once the frame drains via [`Connection::on_writable`]
    /// (or immediately, if it drains right here).
    pub fn initiate_close(&mut self, code: u16, reason: &str, pool: &mut BufferPool, registry: &Registry) {
        if self.state != ConnState::Open {
            return;
        }
        self.output.enqueue(&encode_close(code, reason), pool);
        self.set_state(ConnState::Closing);
        self.sync_flush(pool, registry);
    }

    /// Attempts to drain the output backlog without waiting for a writable
    /// readiness event, per the "synchronous send" step both on-recv and
    /// on-send perform. Arms WRITABLE interest when bytes remain queued,
    /// drops it once drained, and runs close-path on a drained `Closing`
    /// backlog or a transport error -- mirroring
    /// `flux-network::tcp::TcpStream::drain_backlog`'s arm/disarm discipline.
    fn sync_flush(&mut self, pool: &mut BufferPool, registry: &Registry) -> ConnOutcome {
        match self.output.flush(&mut self.sock, pool) {
            Ok(FlushOutcome::Drained) => {
                self.disarm_writable(registry);
                if self.state == ConnState::Closing {
                    self.force_close(pool, registry);
                    return ConnOutcome::Disconnect;
                }
                ConnOutcome::Continue
            }
            Ok(FlushOutcome::WouldBlock { .. }) => {
                self.arm_writable(registry);
                ConnOutcome::Continue
            }
            Err(_) => {
                self.force_close(pool, registry);
                ConnOutcome::Disconnect
            }
        }
    }

    /// Registers WRITABLE interest alongside READABLE, only when it isn't
    /// already armed (transitioning an empty output queue to non-empty).
    fn arm_writable(&mut self, registry: &Registry) {
        if !self.writable_armed {
            if registry.reregister(&mut self.sock, self.token, Interest::READABLE | Interest::WRITABLE).is_ok() {
                self.writable_armed = true;
            }
        }
    }

    /// Drops WRITABLE interest back to READABLE-only once the output queue
    /// is fully drained, so an idle connection isn't woken on every
    /// level-triggered writable readiness cycle.
    fn disarm_writable(&mut self, registry: &Registry) {
        if self.writable_armed {
            if registry.reregister(&mut self.sock, self.token, Interest::READABLE).is_ok() {
                self.writable_armed = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_never_reenter_connecting() {
        assert_ne!(ConnState::Open, ConnState::Connecting);
    }
}
