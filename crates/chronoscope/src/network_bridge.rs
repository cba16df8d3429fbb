//! Bridges TCP control requests to [`ProfileManager`] operations (spec
//! §4.8, §6.2, C8).
//!
//! `chronoscope-network` cannot depend on this crate (this crate already
//! depends on it for its wire types), so the request/response translation
//! has to live here instead of there: this is the only side that can see
//! both a live `ProfileManager` and `chronoscope_network`'s connector.

use std::net::SocketAddr;

use chronoscope_network::{ClientRequest, ListenerEvent, NetworkListener, ServerMessage};
use mio::Token;
use tracing::{info, warn};

use crate::descriptor::{BlockStatus, DescriptorId};
use crate::format;
use crate::manager::ProfileManager;

/// Owns the listening socket and dispatches accepted requests against a
/// `ProfileManager`. Callers drive it by calling [`poll`](Self::poll) from
/// whatever loop already polls other I/O (spec §9 Design Notes: no
/// dedicated collector thread is mandated, only that one exists).
pub struct NetworkBridge {
    listener: NetworkListener,
}

impl NetworkBridge {
    pub fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        Ok(Self { listener: NetworkListener::bind(addr)? })
    }

    /// Polls the socket once, handling every accepted connection and
    /// request against `manager`. Returns whether any I/O happened.
    pub fn poll(&mut self, manager: &ProfileManager) -> bool {
        let listener = &mut self.listener;
        let mut to_greet: Vec<Token> = Vec::new();
        let mut to_answer: Vec<(Token, ServerMessage)> = Vec::new();

        let did_work = listener.poll_with(|event| match event {
            ListenerEvent::Connected { stream, peer_addr, .. } => {
                info!(?peer_addr, "gui connected");
                to_greet.push(stream);
            }
            ListenerEvent::Disconnected { token } => {
                info!(?token, "gui disconnected");
            }
            ListenerEvent::Request { token, request } => {
                if let Some(response) = handle_request(manager, request) {
                    to_answer.push((token, response));
                }
            }
        });

        for token in to_greet {
            listener.send(token, &status_message(manager));
        }
        for (token, response) in to_answer {
            listener.send(token, &response);
        }
        did_work
    }
}

fn status_message(manager: &ProfileManager) -> ServerMessage {
    ServerMessage::Status {
        process_id: std::process::id() as u64,
        is_enabled: manager.is_enabled(),
        is_event_tracing_enabled: manager.is_event_tracing_enabled(),
    }
}

/// Translates one request into a manager operation, returning the response
/// to send back, if any (spec §6.2 request/response table).
fn handle_request(manager: &ProfileManager, request: ClientRequest) -> Option<ServerMessage> {
    match request {
        ClientRequest::Ping => Some(ServerMessage::Pong),
        ClientRequest::RequestMainThreadFps => Some(ServerMessage::MainThreadFps { fps: manager.main_thread_fps() }),
        ClientRequest::RequestStartCapture => {
            match manager.enable() {
                Ok(()) => {
                    manager.emit_start_capture_event();
                    if let Err(err) = manager.set_event_tracing_enabled(true) {
                        warn!(%err, "failed to start context-switch tracing for capture");
                    }
                }
                Err(err) => warn!(%err, "ignoring start-capture request"),
            }
            None
        }
        ClientRequest::RequestStopCapture => {
            if let Err(err) = manager.set_event_tracing_enabled(false) {
                warn!(%err, "failed to stop context-switch tracing for capture");
            }
            manager.emit_stop_capture_event();
            if let Err(err) = manager.disable() {
                warn!(%err, "ignoring stop-capture request");
            }
            let mut bytes = Vec::new();
            match manager.dump(&mut bytes) {
                Ok(()) => Some(ServerMessage::CaptureData { bytes }),
                Err(err) => {
                    warn!(%err, "dump requested over the network failed");
                    Some(ServerMessage::CaptureFinished)
                }
            }
        }
        ClientRequest::RequestBlocksDescription => {
            let mut bytes = Vec::new();
            match format::write_descriptor_table(&mut bytes, &manager.descriptors.snapshot()) {
                Ok(()) => Some(ServerMessage::BlocksDescription { bytes }),
                Err(err) => {
                    warn!(%err, "failed to encode descriptor table");
                    None
                }
            }
        }
        ClientRequest::ChangeBlockStatus { descriptor_id, status } => {
            manager.descriptors.set_status(DescriptorId(descriptor_id), BlockStatus::from_bits_truncate(status));
            None
        }
        ClientRequest::ChangeEventTracingStatus { enabled } => {
            if let Err(err) = manager.set_event_tracing_enabled(enabled) {
                warn!(%err, "failed to change event tracing status");
            }
            None
        }
        ClientRequest::ChangeEventTracingPriority { low_priority } => {
            manager.set_event_tracing_low_priority(low_priority);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfilerConfig;
    use crate::descriptor::{BlockType, Color};

    #[test]
    fn ping_is_answered_with_pong() {
        let manager = ProfileManager::new(ProfilerConfig::default());
        assert!(matches!(handle_request(&manager, ClientRequest::Ping), Some(ServerMessage::Pong)));
    }

    #[test]
    fn request_blocks_description_encodes_the_current_descriptor_table() {
        let manager = ProfileManager::new(ProfilerConfig::default());
        manager.descriptors.register("work", "f.rs", 1, Color::DEFAULT, BlockType::Block, BlockStatus::ON, false);
        match handle_request(&manager, ClientRequest::RequestBlocksDescription) {
            Some(ServerMessage::BlocksDescription { bytes }) => {
                assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), manager.descriptors.len() as u32);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn change_block_status_updates_the_registry() {
        let manager = ProfileManager::new(ProfilerConfig::default());
        let descriptor =
            manager.descriptors.register("work", "f.rs", 1, Color::DEFAULT, BlockType::Block, BlockStatus::ON, false);
        handle_request(
            &manager,
            ClientRequest::ChangeBlockStatus { descriptor_id: descriptor.id.0, status: BlockStatus::OFF.bits() },
        );
        assert_eq!(descriptor.status(), BlockStatus::OFF);
    }

    #[test]
    fn start_capture_enables_the_manager() {
        let manager = ProfileManager::new(ProfilerConfig::default());
        assert!(!manager.is_enabled());
        handle_request(&manager, ClientRequest::RequestStartCapture);
        assert!(manager.is_enabled());
    }
}
