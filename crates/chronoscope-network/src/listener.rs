//! Control/streaming server a GUI connects to (spec §4.8, C8).
//!
//! Thin wrapper over [`TcpConnector`] that frames raw bytes into
//! [`ClientRequest`]/[`ServerMessage`] values; connection lifecycle
//! (accept, disconnect, reconnect) is entirely the connector's concern.

use std::io;
use std::net::SocketAddr;

use mio::Token;
use tracing::warn;

use crate::protocol::{ClientRequest, ProtocolError, ServerMessage};
use crate::tcp::{PollEvent, SendBehavior, TcpConnector};

pub struct NetworkListener {
    connector: TcpConnector,
    listen_token: Token,
}

impl NetworkListener {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let mut connector = TcpConnector::default();
        let listen_token = connector
            .listen_at(addr)
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, format!("could not bind {addr}")))?;
        Ok(Self { connector, listen_token })
    }

    pub fn listen_token(&self) -> Token {
        self.listen_token
    }

    /// Polls once, dispatching every accepted connection, disconnect, and
    /// well-formed request to `on_event`. A malformed frame is logged and
    /// dropped rather than tearing down the connection (spec §7: a bad
    /// control message is a client bug, not a reason to drop capture data
    /// already in flight).
    pub fn poll_with(&mut self, mut on_event: impl FnMut(ListenerEvent)) -> bool {
        self.connector.poll_with(|event| match event {
            PollEvent::Accept { listener, stream, peer_addr } => {
                on_event(ListenerEvent::Connected { listener, stream, peer_addr })
            }
            PollEvent::Disconnect { token } => on_event(ListenerEvent::Disconnected { token }),
            PollEvent::Message { token, payload } => match ClientRequest::decode(payload) {
                Ok(request) => on_event(ListenerEvent::Request { token, request }),
                Err(ProtocolError::UnknownTag(tag)) => {
                    warn!(token = ?token, tag, "ignoring request with an unrecognized tag")
                }
                Err(ProtocolError::Truncated) => {
                    warn!(token = ?token, "ignoring truncated request")
                }
            },
        })
    }

    pub fn send(&mut self, to: Token, message: &ServerMessage) {
        let mut bytes = Vec::new();
        message.encode(&mut bytes);
        self.connector.write_or_enqueue_with(SendBehavior::Single(to), |buf| buf.extend_from_slice(&bytes));
    }

    pub fn broadcast(&mut self, message: &ServerMessage) {
        let mut bytes = Vec::new();
        message.encode(&mut bytes);
        self.connector.write_or_enqueue_with(SendBehavior::Broadcast, |buf| buf.extend_from_slice(&bytes));
    }

    pub fn disconnect(&mut self, token: Token) {
        self.connector.disconnect(token);
    }
}

pub enum ListenerEvent {
    Connected { listener: Token, stream: Token, peer_addr: SocketAddr },
    Disconnected { token: Token },
    Request { token: Token, request: ClientRequest },
}
