use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::{event::Event, net::TcpListener, Events, Interest, Poll, Token};
use tracing::{debug, error, warn};

use crate::tcp::{stream::TcpStream, ConnState};

#[derive(Clone, Copy, Debug)]
pub enum SendBehavior {
    Broadcast,
    Single(Token),
}

enum ConnectionVariant {
    /// Connections this process initiated; retried on disconnect.
    Outbound(TcpStream),
    /// Connections accepted from one of the listeners; not retried.
    Inbound(TcpStream),
    /// Listens for new connections and turns them into `Inbound`.
    Listener(TcpListener),
}

/// Event emitted by [`TcpConnector::poll_with`] for each notable IO
/// occurrence.
pub enum PollEvent<'a> {
    Accept { listener: Token, stream: Token, peer_addr: SocketAddr },
    Disconnect { token: Token },
    Message { token: Token, payload: &'a [u8] },
}

/// Fires at most once per `interval`, the way a periodic reconnect check
/// needs to without pulling in a full scheduling type for a single timer.
struct ReconnectTimer {
    interval: Duration,
    last_fired: Instant,
}

impl ReconnectTimer {
    fn every(interval: Duration) -> Self {
        Self { interval, last_fired: Instant::now() - interval }
    }

    fn fired(&mut self) -> bool {
        if self.last_fired.elapsed() >= self.interval {
            self.last_fired = Instant::now();
            true
        } else {
            false
        }
    }

    fn force_fire(&mut self) {
        self.last_fired = Instant::now() - self.interval;
    }

    fn reset(&mut self) {
        self.last_fired = Instant::now() - self.interval;
    }
}

struct ConnectionManager {
    poll: Poll,
    conns: Vec<(Token, ConnectionVariant)>,
    reconnector: ReconnectTimer,
    on_connect_msg: Option<Vec<u8>>,

    to_be_reconnected: Vec<(Token, SocketAddr)>,
    newly_connected: Vec<(Token, SocketAddr)>,
    next_token: usize,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self {
            conns: Vec::with_capacity(5),
            reconnector: ReconnectTimer::every(Duration::from_secs(2)),
            on_connect_msg: None,
            to_be_reconnected: Vec::with_capacity(10),
            newly_connected: Vec::with_capacity(10),
            poll: Poll::new().expect("couldn't set up a poll for tcp connector"),
            next_token: 0,
        }
    }
}

impl ConnectionManager {
    fn disconnect_all_outbound(&mut self) {
        let mut i = self.conns.len();
        while i != 0 {
            i -= 1;
            if matches!(self.conns[i].1, ConnectionVariant::Outbound(_)) {
                self.disconnect_at_index(i);
            }
        }
    }

    fn disconnect_at_index(&mut self, index: usize) {
        let (token, conn) = self.conns.swap_remove(index);
        match conn {
            ConnectionVariant::Outbound(mut stream) => {
                let addr = stream.close(self.poll.registry());
                self.to_be_reconnected.push((token, addr));
            }
            ConnectionVariant::Inbound(mut stream) => {
                let _ = stream.close(self.poll.registry());
            }
            ConnectionVariant::Listener(mut listener) => {
                let _ = self.poll.registry().deregister(&mut listener);
            }
        }
    }

    fn disconnect_token(&mut self, token: Token) {
        if let Some(i) = self.conns.iter().position(|(t, _)| *t == token) {
            self.disconnect_at_index(i);
        }
    }

    fn broadcast<F: Fn(&mut Vec<u8>)>(&mut self, serialise: &F) {
        let mut i = self.conns.len();
        while i != 0 {
            i -= 1;
            match &mut self.conns[i].1 {
                ConnectionVariant::Outbound(stream) | ConnectionVariant::Inbound(stream) => {
                    if stream.write_or_enqueue_with(self.poll.registry(), serialise) == ConnState::Disconnected {
                        self.disconnect_at_index(i);
                    }
                }
                ConnectionVariant::Listener(_) => {}
            }
        }
    }

    fn write_or_enqueue_with<F: Fn(&mut Vec<u8>)>(&mut self, serialise: F, where_to: SendBehavior) {
        match where_to {
            SendBehavior::Broadcast => self.broadcast(&serialise),
            SendBehavior::Single(token) => {
                if let Some(i) = self.conns.iter().position(|(t, _)| *t == token) {
                    match &mut self.conns[i].1 {
                        ConnectionVariant::Outbound(stream) | ConnectionVariant::Inbound(stream) => {
                            if stream.write_or_enqueue_with(self.poll.registry(), serialise)
                                == ConnState::Disconnected
                            {
                                warn!("issue when writing to {token:?}, disconnecting");
                                self.disconnect_at_index(i);
                            }
                        }
                        ConnectionVariant::Listener(_) => {
                            error!("cannot write to listener bound to token {token:?}")
                        }
                    }
                } else {
                    error!("tcp sending: unknown token {token:?}");
                }
            }
        }
    }

    fn connect(&mut self, addr: SocketAddr) -> Option<Token> {
        let token = Token(self.next_token);
        self.to_be_reconnected.push((token, addr));
        self.reconnector.force_fire();
        self.maybe_reconnect();
        if self.conns.iter().any(|(t, _)| t == &token) {
            self.next_token += 1;
            Some(token)
        } else {
            None
        }
    }

    fn listen_at(&mut self, addr: SocketAddr) -> Option<Token> {
        let mut listener = TcpListener::bind(addr)
            .inspect_err(|e| warn!("couldn't start listening at {addr:?}: {e}"))
            .ok()?;
        let token = Token(self.next_token);
        self.poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)
            .inspect_err(|err| warn!("couldn't register listening addr {addr:?}: {err}"))
            .ok()?;
        self.conns.push((token, ConnectionVariant::Listener(listener)));
        self.next_token += 1;
        Some(token)
    }

    fn maybe_reconnect(&mut self) {
        if !self.reconnector.fired() {
            return;
        }

        let mut i = self.to_be_reconnected.len();
        while i != 0 {
            i -= 1;
            let (token, addr) = self.to_be_reconnected[i];
            let Ok(mut stream) =
                mio::net::TcpStream::connect(addr).inspect_err(|e| warn!("couldn't connect to {addr}: {e}"))
            else {
                continue;
            };
            let Ok(err) = stream.take_error().inspect_err(|e| error!("couldn't take error on stream: {e}"))
            else {
                continue;
            };
            if let Some(err) = err {
                warn!("got error while connecting to {addr}: {err}");
                continue;
            }
            if let Err(e) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
                error!("couldn't register tcp stream for {addr}: {e}");
                continue;
            };
            let Ok(mut stream) = TcpStream::from_stream(stream, token, addr)
                .inspect_err(|e| error!("couldn't construct tcp stream for {addr}: {e}"))
            else {
                continue;
            };
            if let Some(msg) = &self.on_connect_msg
                && stream.write_or_enqueue_with(self.poll.registry(), |buf: &mut Vec<u8>| {
                    buf.extend_from_slice(msg);
                }) == ConnState::Disconnected
            {
                warn!(?addr, "on_connect_msg send failed");
                return;
            }

            self.newly_connected.push(self.to_be_reconnected.swap_remove(i));
            self.conns.push((token, ConnectionVariant::Outbound(stream)));
            debug!(?addr, "connected");
        }
    }

    fn currently_disconnected(&self) -> impl Iterator<Item = Token> + '_ {
        self.to_be_reconnected.iter().map(|(t, _)| *t)
    }

    fn force_reconnect(&mut self) {
        self.reconnector.reset();
        self.maybe_reconnect();
    }

    fn handle_event<F>(&mut self, e: &Event, handler: &mut F)
    where
        F: for<'a> FnMut(PollEvent<'a>),
    {
        let event_token = e.token();
        let Some(stream_id) = self.conns.iter().position(|(t, _)| t == &event_token) else {
            warn!(?event_token, "got event for unknown token");
            return;
        };

        loop {
            match &mut self.conns[stream_id].1 {
                ConnectionVariant::Outbound(stream) | ConnectionVariant::Inbound(stream) => {
                    if stream.poll_with(self.poll.registry(), e, &mut |token, payload| {
                        handler(PollEvent::Message { token, payload });
                    }) == ConnState::Disconnected
                    {
                        handler(PollEvent::Disconnect { token: event_token });
                        self.disconnect_at_index(stream_id);
                    }
                    return;
                }
                ConnectionVariant::Listener(listener) => {
                    if let Ok((mut stream, addr)) = listener.accept() {
                        tracing::info!(?addr, "client connected");
                        let token = Token(self.next_token);
                        if let Err(e) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
                            error!("couldn't register client {e}");
                            let _ = stream.shutdown(std::net::Shutdown::Both);
                            continue;
                        };
                        let Ok(mut conn) = TcpStream::from_stream(stream, token, addr) else { continue };

                        if let Some(msg) = &self.on_connect_msg
                            && conn.write_or_enqueue_with(self.poll.registry(), |buf: &mut Vec<u8>| {
                                buf.extend_from_slice(msg);
                            }) == ConnState::Disconnected
                        {
                            continue;
                        }
                        handler(PollEvent::Accept { listener: event_token, stream: token, peer_addr: addr });
                        self.conns.push((token, ConnectionVariant::Inbound(conn)));
                        self.next_token += 1;
                    } else {
                        return;
                    }
                }
            }
        }
    }
}

/// Non-blocking TCP connector/acceptor built on `mio`, driving the control
/// and streaming protocol of spec §4.8/§6.2.
///
/// Manages outbound (client) connections created via [`TcpConnector::connect`],
/// auto-retried on failure, and listeners/inbound connections created via
/// [`TcpConnector::listen_at`], which are not retried.
pub struct TcpConnector {
    events: Events,
    conn_mgr: ConnectionManager,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self { events: Events::with_capacity(128), conn_mgr: ConnectionManager::default() }
    }
}

impl TcpConnector {
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.conn_mgr.reconnector = ReconnectTimer::every(interval);
        self
    }

    /// Sent once immediately after a connection becomes usable, to both
    /// outbound connections after a successful (re)connect and inbound
    /// connections right after accept.
    pub fn with_on_connect_msg(mut self, msg: Vec<u8>) -> Self {
        assert!(msg.len() <= TcpStream::SEND_BUF_SIZE, "on_connect_msg exceeds send buffer size");
        self.conn_mgr.on_connect_msg = Some(msg);
        self
    }

    /// Polls sockets once (non-blocking) and dispatches events via
    /// `handler`. Returns whether any IO events were processed.
    pub fn poll_with<F>(&mut self, mut handler: F) -> bool
    where
        F: for<'a> FnMut(PollEvent<'a>),
    {
        self.conn_mgr.maybe_reconnect();
        for (token, peer_addr) in self.conn_mgr.newly_connected.drain(..) {
            handler(PollEvent::Accept { listener: token, stream: token, peer_addr });
        }
        if let Err(e) = self.conn_mgr.poll.poll(&mut self.events, Some(Duration::ZERO)) {
            error!("got error polling: {e}");
            return false;
        }

        let mut any = false;
        for e in self.events.iter() {
            any = true;
            self.conn_mgr.handle_event(e, &mut handler);
        }
        any
    }

    pub fn write_or_enqueue_with<F: Fn(&mut Vec<u8>)>(&mut self, where_to: SendBehavior, serialise: F) {
        self.conn_mgr.write_or_enqueue_with(serialise, where_to);
    }

    pub fn disconnect_outbound(&mut self) {
        self.conn_mgr.disconnect_all_outbound();
    }

    pub fn disconnect(&mut self, token: Token) {
        self.conn_mgr.disconnect_token(token);
    }

    pub fn connect(&mut self, addr: SocketAddr) -> Option<Token> {
        self.conn_mgr.connect(addr)
    }

    pub fn listen_at(&mut self, addr: SocketAddr) -> Option<Token> {
        self.conn_mgr.listen_at(addr)
    }

    pub fn currently_disconnected(&self) -> impl Iterator<Item = Token> + '_ {
        self.conn_mgr.currently_disconnected()
    }

    pub fn force_reconnect(&mut self) {
        self.conn_mgr.force_reconnect();
    }
}
