use std::{
    collections::VecDeque,
    io::{self, IoSlice, Read, Write},
    net::SocketAddr,
};

use mio::{event::Event, Interest, Registry, Token};
use tracing::{debug, warn};

/// Frame length prefix; the only framing metadata this wire protocol needs
/// (spec §6.2 control messages are short enough that a latency/alloc
/// telemetry header, which this crate's teacher carried, has no use here).
const LEN_HEADER_SIZE: usize = core::mem::size_of::<u32>();
const RX_BUF_SIZE: usize = 32 * 1024;

/// Response type for all external calls.
///
/// `Alive` means the connection is still usable.
/// `Disconnected` means the peer is gone and the connection must be rebuilt.
#[derive(Debug, PartialEq, Eq)]
pub enum ConnState {
    Alive,
    Disconnected,
}

enum ReadOutcome<'a> {
    PayloadDone { frame: &'a [u8] },
    WouldBlock,
    Disconnected,
}

#[derive(Clone, Copy)]
enum RxState {
    ReadingHeader { buf: [u8; LEN_HEADER_SIZE], have: usize },
    ReadingPayload { msg_len: usize, offset: usize },
}

/// Single mio-backed TCP connection.
///
/// Frames are length-prefixed: a 4-byte LE length header followed by that
/// many payload bytes.
///
/// Outbound:
///   - `write_or_enqueue_with(msg)` serialises `msg` into an internal
///     staging buffer and attempts a non-blocking write; any unwritten
///     remainder is queued and flushed on the next writable event.
///
/// Inbound:
///   - Reads the 4-byte length prefix, then reads exactly that many bytes.
///     `poll_with` invokes the caller's callback with each fully assembled
///     frame, then keeps reading until the socket would block.
pub struct TcpStream {
    stream: mio::net::TcpStream,
    token: Token,
    peer_addr: SocketAddr,

    rx_state: RxState,
    rx_buf: Vec<u8>,
    header_buf: [u8; LEN_HEADER_SIZE],
    send_buf: Vec<u8>,
    send_backlog: VecDeque<Vec<u8>>,

    /// Invariant: `writable_armed == !send_backlog.is_empty()`.
    writable_armed: bool,
}

impl TcpStream {
    pub const SEND_BUF_SIZE: usize = 32 * 1024;

    pub(crate) fn from_stream(
        stream: mio::net::TcpStream,
        token: Token,
        peer_addr: SocketAddr,
    ) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            token,
            peer_addr,
            rx_state: RxState::ReadingHeader { buf: [0; LEN_HEADER_SIZE], have: 0 },
            rx_buf: vec![0; RX_BUF_SIZE],
            header_buf: [0; LEN_HEADER_SIZE],
            send_buf: vec![0; Self::SEND_BUF_SIZE],
            send_backlog: VecDeque::with_capacity(16),
            writable_armed: false,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Polls the socket and calls `on_msg` for every fully assembled frame.
    /// Frame data is only valid for the duration of the callback.
    pub fn poll_with<F>(&mut self, registry: &Registry, ev: &Event, on_msg: &mut F) -> ConnState
    where
        F: for<'a> FnMut(Token, &'a [u8]),
    {
        if ev.is_readable() {
            loop {
                match self.read_frame() {
                    ReadOutcome::PayloadDone { frame } => on_msg(self.token, frame),
                    ReadOutcome::WouldBlock => break,
                    ReadOutcome::Disconnected => return ConnState::Disconnected,
                }
            }
        }

        if ev.is_writable() && self.drain_backlog(registry) == ConnState::Disconnected {
            return ConnState::Disconnected;
        }

        ConnState::Alive
    }

    /// Serialises via `serialise` and writes, queueing any unwritten
    /// remainder for the next writable event.
    pub fn write_or_enqueue_with<F>(&mut self, registry: &Registry, serialise: F) -> ConnState
    where
        F: Fn(&mut Vec<u8>),
    {
        self.serialise_frame(serialise);
        let len = self.send_buf.len();

        if !self.send_backlog.is_empty() {
            self.enqueue_back(registry, self.header_buf.to_vec());
            let data = self.send_buf[..len].to_vec();
            return self.enqueue_back(registry, data);
        }

        match self
            .stream
            .write_vectored(&[IoSlice::new(self.header_buf.as_slice()), IoSlice::new(&self.send_buf[..len])])
        {
            Ok(0) => {
                warn!("tcp: stream failed to write, disconnecting");
                ConnState::Disconnected
            }
            Ok(n) if n == len + LEN_HEADER_SIZE => ConnState::Alive,
            Ok(n) if n < LEN_HEADER_SIZE => {
                let data = self.send_buf[..len].to_vec();
                self.enqueue_front(registry, data);
                let header_data = self.header_buf[n..LEN_HEADER_SIZE].to_vec();
                self.enqueue_front(registry, header_data)
            }
            Ok(n) => {
                let data = self.send_buf[n.saturating_sub(LEN_HEADER_SIZE)..len].to_vec();
                self.enqueue_front(registry, data)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.enqueue_back(registry, self.header_buf.to_vec());
                let data = self.send_buf[..len].to_vec();
                self.enqueue_back(registry, data)
            }
            Err(err) => {
                warn!(?err, "tcp: stream write fail");
                ConnState::Disconnected
            }
        }
    }

    fn drain_backlog(&mut self, registry: &Registry) -> ConnState {
        while let Some(front) = self.send_backlog.front_mut() {
            match self.stream.write(front) {
                Ok(0) => return ConnState::Disconnected,
                Ok(n) => {
                    if n == front.len() {
                        self.send_backlog.pop_front();
                    } else {
                        front.drain(..n);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    debug!(?err, "tcp: write from backlog");
                    return ConnState::Disconnected;
                }
            }
        }

        if self.send_backlog.is_empty() && self.writable_armed {
            if let Err(err) = registry.reregister(&mut self.stream, self.token, Interest::READABLE) {
                debug!(?err, "tcp: reregister drop writable");
                return ConnState::Disconnected;
            }
            self.writable_armed = false;
        }
        ConnState::Alive
    }

    fn read_frame(&mut self) -> ReadOutcome<'_> {
        loop {
            match self.rx_state {
                RxState::ReadingHeader { mut buf, mut have } => {
                    while have < LEN_HEADER_SIZE {
                        match self.stream.read(&mut buf[have..]) {
                            Ok(0) => return ReadOutcome::Disconnected,
                            Ok(n) => {
                                have += n;
                                if have == LEN_HEADER_SIZE {
                                    let msg_len = u32::from_le_bytes(buf) as usize;
                                    if msg_len > self.rx_buf.len() {
                                        debug!(
                                            buf_len = self.rx_buf.len(),
                                            need_len = msg_len,
                                            "tcp: buffer resized"
                                        );
                                        self.rx_buf.resize(msg_len, 0);
                                    }
                                    self.rx_state = RxState::ReadingPayload { msg_len, offset: 0 };
                                }
                            }
                            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                                self.rx_state = RxState::ReadingHeader { buf, have };
                                return ReadOutcome::WouldBlock;
                            }
                            Err(err) => {
                                debug!(?err, "tcp: read header");
                                return ReadOutcome::Disconnected;
                            }
                        }
                    }
                }
                RxState::ReadingPayload { msg_len, mut offset } => {
                    while offset < msg_len {
                        match self.stream.read(&mut self.rx_buf[offset..msg_len]) {
                            Ok(0) => return ReadOutcome::Disconnected,
                            Ok(n) => {
                                offset += n;
                                if offset == msg_len {
                                    self.rx_state =
                                        RxState::ReadingHeader { buf: [0; LEN_HEADER_SIZE], have: 0 };
                                    return ReadOutcome::PayloadDone { frame: &self.rx_buf[..msg_len] };
                                }
                            }
                            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                                self.rx_state = RxState::ReadingPayload { msg_len, offset };
                                return ReadOutcome::WouldBlock;
                            }
                            Err(err) => {
                                debug!(?err, "tcp: read payload");
                                return ReadOutcome::Disconnected;
                            }
                        }
                    }
                }
            }
        }
    }

    fn enqueue_front(&mut self, registry: &Registry, data: Vec<u8>) -> ConnState {
        self.send_backlog.push_front(data);
        self.arm_writable(registry)
    }

    fn enqueue_back(&mut self, registry: &Registry, data: Vec<u8>) -> ConnState {
        self.send_backlog.push_back(data);
        self.arm_writable(registry)
    }

    fn arm_writable(&mut self, registry: &Registry) -> ConnState {
        if !self.writable_armed {
            if let Err(err) =
                registry.reregister(&mut self.stream, self.token, Interest::READABLE | Interest::WRITABLE)
            {
                debug!(?err, "tcp: poll reregister");
                return ConnState::Disconnected;
            }
            self.writable_armed = true;
        }
        ConnState::Alive
    }

    fn serialise_frame<F>(&mut self, serialise: F)
    where
        F: Fn(&mut Vec<u8>),
    {
        self.send_buf.clear();
        serialise(&mut self.send_buf);
        self.header_buf.copy_from_slice(&(self.send_buf.len() as u32).to_le_bytes());
    }

    pub fn close(&mut self, registry: &Registry) -> SocketAddr {
        debug!("terminating connection");
        let _ = registry.deregister(&mut self.stream);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.peer_addr
    }
}
