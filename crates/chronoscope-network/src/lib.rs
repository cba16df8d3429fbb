//! TCP control/streaming transport for the profiler's GUI protocol (spec
//! §4.8, §6.2, C8).
//!
//! [`tcp`] is a general-purpose non-blocking connector built on `mio`,
//! carried over unchanged from this workspace's networking layer; [`protocol`]
//! defines the profiler-specific request/response wire messages framed over
//! it, and [`listener`] ties the two together into the server a GUI
//! connects to.

pub mod listener;
pub mod protocol;
pub mod tcp;

pub use listener::{ListenerEvent, NetworkListener};
pub use protocol::{ClientRequest, ProtocolError, ServerMessage};
pub use tcp::{ConnState, PollEvent, SendBehavior, TcpConnector, TcpStream};
