//! Assembles complete WebSocket messages out of the frame stream, and the
//! small state machine that lets a connection start out parsing an HTTP
//! handshake and switch over to frame parsing once it completes.

use crate::config::ServerConfig;
use crate::error::{FrameError, HandshakeError};
use crate::frame::{FrameHeader, OpCode};
use crate::handshake;
use crate::pool::BufferPool;
use crate::stream::{InputStream, OutputStream};

/// Result of feeding newly available bytes through a handler.
pub enum ProcessResult {
    /// Consumed everything currently available; nothing more to do until
    /// the next readiness event.
    Progress,
    /// The handshake completed; the accept response has been queued on the
    /// caller's output stream and the connection should switch to frame
    /// parsing.
    HandshakeComplete { accept_response: Vec<u8> },
    /// A close frame was received (or synthesized for a protocol error);
    /// `close_frame` should be queued for send and the connection closed
    /// once it drains.
    PeerClose { code: u16, close_frame: Vec<u8> },
    /// The frame stream is malformed beyond recovery.
    ProtocolError(FrameError),
}

/// Accumulates bytes of an in-flight HTTP Upgrade request.
#[derive(Default)]
pub struct HandshakeState {
    buf: Vec<u8>,
}

impl HandshakeState {
    fn feed(&mut self, input: &mut InputStream, pool: &mut BufferPool, cap: usize) -> Result<ProcessResult, HandshakeError> {
        let pending = input.len();
        if pending > 0 {
            let chunk = input.extract(pending, pool);
            self.buf.extend_from_slice(&chunk);
        }
        if self.buf.len() > cap {
            return Err(HandshakeError::TooLarge { cap });
        }
        match handshake::parse_request(&self.buf)? {
            None => Ok(ProcessResult::Progress),
            Some(key) => {
                let accept = handshake::compute_accept(&key);
                let response = handshake::build_response(&accept);
                Ok(ProcessResult::HandshakeComplete { accept_response: response })
            }
        }
    }
}

/// In-progress fragmented message assembly: the opcode of the first
/// fragment and payload accumulated so far.
struct InProgressMessage {
    opcode: OpCode,
    payload: Vec<u8>,
}

/// Parses RFC 6455 frames out of the input stream and reassembles
/// fragmented messages, invoking `on_message` once per completed message
/// (control frames included).
#[derive(Default)]
pub struct FrameAssembler {
    header: Option<FrameHeader>,
    in_progress: Option<InProgressMessage>,
}

impl FrameAssembler {
    pub fn process(
        &mut self,
        input: &mut InputStream,
        pool: &mut BufferPool,
        cfg: &ServerConfig,
        output: &mut OutputStream,
        on_message: &mut dyn FnMut(OpCode, &[u8]),
    ) -> ProcessResult {
        loop {
            if self.header.is_none() {
                let mut scratch = [0u8; FrameHeader::MAX_LEN];
                let n = input.peek(&mut scratch);
                match FrameHeader::parse(&scratch[..n]) {
                    Ok(None) => return ProcessResult::Progress,
                    Ok(Some(header)) => {
                        input.pop_front(header.header_len, pool);
                        self.header = Some(header);
                    }
                    Err(e) => return self.abort(e),
                }
            }
            let header = self.header.expect("checked above");
            let payload_len = header.payload_len as usize;

            // Reject before waiting for the full payload to arrive: an
            // attacker should not be able to hold a connection open by
            // trickling bytes toward a length that will never be allowed.
            let current_len = self.in_progress.as_ref().map_or(0, |m| m.payload.len());
            if current_len.saturating_add(payload_len) > cfg.max_message_size {
                return self.abort(FrameError::MessageTooLarge {
                    size: current_len + payload_len,
                    cap: cfg.max_message_size,
                });
            }

            if input.len() < payload_len {
                return ProcessResult::Progress;
            }

            let mut payload = Vec::with_capacity(payload_len);
            input.masked_extract_into(&mut payload, payload_len, header.mask_key, 0, pool);
            self.header = None;

            if header.opcode.is_control() {
                match self.dispatch_control(header.opcode, &payload, output, pool) {
                    ControlOutcome::Continue => continue,
                    ControlOutcome::Close { code } => {
                        let frame = crate::frame::encode_close(code, "");
                        return ProcessResult::PeerClose { code, close_frame: frame };
                    }
                    ControlOutcome::Abort(err) => return self.abort(err),
                }
            }

            match (header.opcode, header.fin, &mut self.in_progress) {
                (OpCode::Continuation, _, None) => {
                    return self.abort(FrameError::UnexpectedContinuation);
                }
                (op, _, Some(_)) if op != OpCode::Continuation => {
                    return self.abort(FrameError::InterleavedDataFrame);
                }
                (OpCode::Continuation, fin, Some(msg)) => {
                    msg.payload.extend_from_slice(&payload);
                    if fin {
                        let msg = self.in_progress.take().expect("checked above");
                        on_message(msg.opcode, &msg.payload);
                    }
                }
                (op, true, None) => {
                    on_message(op, &payload);
                }
                (op, false, None) => {
                    self.in_progress = Some(InProgressMessage { opcode: op, payload });
                }
            }
        }
    }

    fn dispatch_control(
        &self,
        opcode: OpCode,
        payload: &[u8],
        output: &mut OutputStream,
        pool: &mut BufferPool,
    ) -> ControlOutcome {
        match opcode {
            OpCode::Close => match payload.len() {
                0 => ControlOutcome::Close { code: 1000 },
                1 => ControlOutcome::Abort(FrameError::InvalidCloseCode(0)),
                _ => {
                    let code = u16::from_be_bytes([payload[0], payload[1]]);
                    if is_valid_close_code(code) {
                        ControlOutcome::Close { code }
                    } else {
                        ControlOutcome::Abort(FrameError::InvalidCloseCode(code))
                    }
                }
            },
            OpCode::Ping => {
                output.enqueue(&crate::frame::encode_frame(OpCode::Pong, payload), pool);
                ControlOutcome::Continue
            }
            OpCode::Pong => ControlOutcome::Continue,
            _ => {
                ws_utils::safe_panic!("non-control opcode {opcode:?} routed to dispatch_control");
                ControlOutcome::Continue
            }
        }
    }

    fn abort(&mut self, err: FrameError) -> ProcessResult {
        ProcessResult::ProtocolError(err)
    }
}

enum ControlOutcome {
    Continue,
    Close { code: u16 },
    Abort(FrameError),
}

/// RFC 6455 §7.4.1: codes 1004-1006 and 1015 are reserved and must never
/// appear on the wire; 1012-2999 are unassigned. Everything else in the
/// defined ranges (or the 3000-4999 application/private-use bands) is ok.
fn is_valid_close_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}

/// Per-connection message handler: starts out parsing the handshake, then
/// becomes a frame assembler once the upgrade completes. Implemented as an
/// enum rather than a trait object, since the only "subclasses" are these
/// two fixed phases and the transition is a one-way value replacement.
pub enum MessageHandler {
    Handshake(HandshakeState),
    Frame(FrameAssembler),
}

impl Default for MessageHandler {
    fn default() -> Self {
        Self::Handshake(HandshakeState::default())
    }
}

impl MessageHandler {
    pub fn process(
        &mut self,
        input: &mut InputStream,
        pool: &mut BufferPool,
        cfg: &ServerConfig,
        output: &mut OutputStream,
        on_message: &mut dyn FnMut(OpCode, &[u8]),
    ) -> Result<ProcessResult, HandshakeError> {
        match self {
            Self::Handshake(state) => state.feed(input, pool, cfg.handshake_cap),
            Self::Frame(assembler) => Ok(assembler.process(input, pool, cfg, output, on_message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;

    fn push(input: &mut InputStream, pool: &mut BufferPool, bytes: &[u8]) {
        use std::io::Cursor;
        let mut cursor = Cursor::new(bytes.to_vec());
        input.recv(&mut cursor, pool).unwrap();
    }

    fn masked(opcode: OpCode, fin: bool, key: [u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.push((if fin { 0x80 } else { 0 }) | opcode as u8);
        let len = payload.len();
        assert!(len <= 125);
        out.push(0x80 | len as u8);
        out.extend_from_slice(&key);
        let mut masked_payload = payload.to_vec();
        crate::frame::apply_mask(&mut masked_payload, key, 0);
        out.extend_from_slice(&masked_payload);
        out
    }

    #[test]
    fn handshake_then_single_frame() {
        let mut pool = BufferPool::new(64, 8);
        let mut input = InputStream::new();
        let mut output = OutputStream::new();
        let mut handler = MessageHandler::default();
        let cfg = ServerConfig::default();

        let req = b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        push(&mut input, &mut pool, req);
        let mut noop = |_op: OpCode, _payload: &[u8]| {};
        let result = handler.process(&mut input, &mut pool, &cfg, &mut output, &mut noop).unwrap();
        assert!(matches!(result, ProcessResult::HandshakeComplete { .. }));
        handler = MessageHandler::Frame(FrameAssembler::default());

        let wire = masked(OpCode::Text, true, [1, 2, 3, 4], b"hi");
        push(&mut input, &mut pool, &wire);
        let mut received = Vec::new();
        let mut capture = |op: OpCode, payload: &[u8]| received.push((op, payload.to_vec()));
        let result = handler.process(&mut input, &mut pool, &cfg, &mut output, &mut capture).unwrap();
        assert!(matches!(result, ProcessResult::Progress));
        assert_eq!(received, vec![(OpCode::Text, b"hi".to_vec())]);
    }

    #[test]
    fn fragmented_message_reassembles() {
        let mut pool = BufferPool::new(64, 8);
        let mut input = InputStream::new();
        let mut output = OutputStream::new();
        let mut assembler = FrameAssembler::default();
        let cfg = ServerConfig::default();

        push(&mut input, &mut pool, &masked(OpCode::Text, false, [1, 1, 1, 1], b"hel"));
        push(&mut input, &mut pool, &masked(OpCode::Continuation, true, [2, 2, 2, 2], b"lo"));

        let mut received = Vec::new();
        let mut capture = |op: OpCode, payload: &[u8]| received.push((op, payload.to_vec()));
        assembler.process(&mut input, &mut pool, &cfg, &mut output, &mut capture);
        assert_eq!(received, vec![(OpCode::Text, b"hello".to_vec())]);
    }

    #[test]
    fn ping_does_not_surface_as_message() {
        let mut pool = BufferPool::new(64, 8);
        let mut input = InputStream::new();
        let mut output = OutputStream::new();
        let mut assembler = FrameAssembler::default();
        let cfg = ServerConfig::default();

        push(&mut input, &mut pool, &masked(OpCode::Ping, true, [3, 3, 3, 3], b"ping"));
        let mut received = Vec::new();
        let mut capture = |op: OpCode, payload: &[u8]| received.push((op, payload.to_vec()));
        let result = assembler.process(&mut input, &mut pool, &cfg, &mut output, &mut capture);
        assert!(matches!(result, ProcessResult::Progress));
        assert!(received.is_empty());
    }

    #[test]
    fn ping_queues_a_pong_with_identical_payload() {
        let mut pool = BufferPool::new(64, 8);
        let mut input = InputStream::new();
        let mut output = OutputStream::new();
        let mut assembler = FrameAssembler::default();
        let cfg = ServerConfig::default();

        push(&mut input, &mut pool, &masked(OpCode::Ping, true, [3, 3, 3, 3], b"ping"));
        let mut noop = |_: OpCode, _: &[u8]| {};
        assembler.process(&mut input, &mut pool, &cfg, &mut output, &mut noop);
        assert_eq!(output.pending_bytes(), encode_frame(OpCode::Pong, b"ping").len());
    }

    #[test]
    fn close_frame_reports_code() {
        let mut pool = BufferPool::new(64, 8);
        let mut input = InputStream::new();
        let mut output = OutputStream::new();
        let mut assembler = FrameAssembler::default();
        let cfg = ServerConfig::default();

        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"bye");
        push(&mut input, &mut pool, &masked(OpCode::Close, true, [4, 4, 4, 4], &payload));
        let mut noop = |_: OpCode, _: &[u8]| {};
        let result = assembler.process(&mut input, &mut pool, &cfg, &mut output, &mut noop);
        match result {
            ProcessResult::PeerClose { code, .. } => assert_eq!(code, 1000),
            _ => panic!("expected PeerClose"),
        }
    }

    #[test]
    fn close_frame_with_empty_payload_defaults_to_1000() {
        let mut pool = BufferPool::new(64, 8);
        let mut input = InputStream::new();
        let mut output = OutputStream::new();
        let mut assembler = FrameAssembler::default();
        let cfg = ServerConfig::default();

        push(&mut input, &mut pool, &masked(OpCode::Close, true, [4, 4, 4, 4], b""));
        let mut noop = |_: OpCode, _: &[u8]| {};
        let result = assembler.process(&mut input, &mut pool, &cfg, &mut output, &mut noop);
        match result {
            ProcessResult::PeerClose { code, .. } => assert_eq!(code, 1000),
            _ => panic!("expected PeerClose"),
        }
    }

    #[test]
    fn close_frame_with_reserved_code_is_rejected() {
        let mut pool = BufferPool::new(64, 8);
        let mut input = InputStream::new();
        let mut output = OutputStream::new();
        let mut assembler = FrameAssembler::default();
        let cfg = ServerConfig::default();

        let payload = 1005u16.to_be_bytes().to_vec();
        push(&mut input, &mut pool, &masked(OpCode::Close, true, [4, 4, 4, 4], &payload));
        let mut noop = |_: OpCode, _: &[u8]| {};
        let result = assembler.process(&mut input, &mut pool, &cfg, &mut output, &mut noop);
        assert!(matches!(result, ProcessResult::ProtocolError(FrameError::InvalidCloseCode(1005))));
    }

    #[test]
    fn oversized_message_is_rejected_before_allocation() {
        let mut pool = BufferPool::new(64, 8);
        let mut input = InputStream::new();
        let mut output = OutputStream::new();
        let mut assembler = FrameAssembler::default();
        let cfg = ServerConfig { max_message_size: 3, ..ServerConfig::default() };

        push(&mut input, &mut pool, &masked(OpCode::Text, true, [1, 2, 3, 4], b"hello"));
        let mut noop = |_: OpCode, _: &[u8]| {};
        let result = assembler.process(&mut input, &mut pool, &cfg, &mut output, &mut noop);
        assert!(matches!(result, ProcessResult::ProtocolError(FrameError::MessageTooLarge { .. })));
    }

    #[test]
    fn interleaved_data_frame_rejected() {
        let mut pool = BufferPool::new(64, 8);
        let mut input = InputStream::new();
        let mut output = OutputStream::new();
        let mut assembler = FrameAssembler::default();
        let cfg = ServerConfig::default();

        push(&mut input, &mut pool, &masked(OpCode::Text, false, [1, 1, 1, 1], b"hel"));
        push(&mut input, &mut pool, &masked(OpCode::Binary, true, [2, 2, 2, 2], b"oops"));
        let mut noop = |_: OpCode, _: &[u8]| {};
        let result = assembler.process(&mut input, &mut pool, &cfg, &mut output, &mut noop);
        assert!(matches!(result, ProcessResult::ProtocolError(FrameError::InterleavedDataFrame)));
    }
}
