//! Minimal echo server demonstrating `ws-core` driven directly off a
//! `mio::Poll` loop: accept connections on a listener token, hand every
//! other readiness event to `ConnectionRegistry::dispatch`, echo back
//! whatever text or binary messages arrive.

use std::net::SocketAddr;

use clap::Parser;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};

use ws_core::{ConnectionRegistry, OpCode, ServerConfig};

const LISTENER: Token = Token(0);
const FIRST_CONN: usize = 1;

#[derive(Parser, Debug)]
#[command(about = "Echoes back every WebSocket message it receives")]
struct Args {
    /// Address to bind the listener on.
    #[arg(long, default_value = "127.0.0.1:9001")]
    bind: SocketAddr,

    /// Bytes per pooled buffer slab.
    #[arg(long, default_value_t = 4096)]
    buffer_size: usize,

    /// Max slabs the buffer pool keeps on its free list.
    #[arg(long, default_value_t = 1000)]
    pool_cap: usize,
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let cfg = ServerConfig {
        buffer_size: args.buffer_size,
        pool_cap: args.pool_cap,
        ..ServerConfig::default()
    };

    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(1024);
    let mut listener = TcpListener::bind(args.bind)?;
    poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;

    let mut registry = ConnectionRegistry::new(cfg);
    let mut next_token = FIRST_CONN;

    tracing::info!(addr = %args.bind, "echo server listening");

    loop {
        poll.poll(&mut events, None)?;
        for event in &events {
            if event.token() == LISTENER {
                loop {
                    match listener.accept() {
                        Ok((mut sock, peer)) => {
                            let token = Token(next_token);
                            next_token += 1;
                            poll.registry().register(&mut sock, token, Interest::READABLE)?;
                            registry.add(token, sock, poll.registry());
                            tracing::debug!(?token, %peer, "accepted connection");
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            break;
                        }
                    }
                }
                continue;
            }

            // `dispatch` already holds `registry` mutably for its duration,
            // so the callback only records what to echo; the actual sends
            // happen once dispatch has returned.
            let mut to_echo: Vec<(Token, OpCode, Vec<u8>)> = Vec::new();
            registry.dispatch(event, poll.registry(), &mut |from, op, payload| {
                if matches!(op, OpCode::Text | OpCode::Binary) {
                    to_echo.push((from, op, payload.to_vec()));
                }
            });
            for (token, op, payload) in to_echo {
                registry.send(token, op, &payload, poll.registry());
            }
        }
    }
}
