//! Wire messages exchanged with a connected GUI (spec §4.8, §6.2, C8).
//!
//! Each message is a single tag byte followed by its fields, little-endian,
//! the same hand-rolled style as the capture format (`chronoscope::format`)
//! rather than a general-purpose serde wire format: these messages are few,
//! fixed, and change rarely enough that a schema-driven encoder would be
//! more machinery than the problem needs.

use std::io::{self, Read, Write};

/// A request sent by a connected GUI.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientRequest {
    Ping,
    RequestMainThreadFps,
    RequestStartCapture,
    RequestStopCapture,
    RequestBlocksDescription,
    ChangeBlockStatus { descriptor_id: u32, status: u8 },
    ChangeEventTracingStatus { enabled: bool },
    ChangeEventTracingPriority { low_priority: bool },
}

/// A message sent by the profiled process to a connected GUI.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    /// Sent immediately after accept (spec §4.8 connection handshake).
    Status { process_id: u64, is_enabled: bool, is_event_tracing_enabled: bool },
    Pong,
    MainThreadFps { fps: f32 },
    /// Opaque capture-format bytes; `chronoscope-network` frames and
    /// transports them but does not interpret their contents.
    BlocksDescription { bytes: Vec<u8> },
    CaptureData { bytes: Vec<u8> },
    CaptureFinished,
}

const REQ_PING: u8 = 0;
const REQ_MAIN_THREAD_FPS: u8 = 1;
const REQ_START_CAPTURE: u8 = 2;
const REQ_STOP_CAPTURE: u8 = 3;
const REQ_BLOCKS_DESCRIPTION: u8 = 4;
const REQ_CHANGE_BLOCK_STATUS: u8 = 5;
const REQ_CHANGE_EVENT_TRACING_STATUS: u8 = 6;
const REQ_CHANGE_EVENT_TRACING_PRIORITY: u8 = 7;

const MSG_STATUS: u8 = 0;
const MSG_PONG: u8 = 1;
const MSG_MAIN_THREAD_FPS: u8 = 2;
const MSG_BLOCKS_DESCRIPTION: u8 = 3;
const MSG_CAPTURE_DATA: u8 = 4;
const MSG_CAPTURE_FINISHED: u8 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unrecognized message tag {0}")]
    UnknownTag(u8),
    #[error("truncated message")]
    Truncated,
}

impl From<io::Error> for ProtocolError {
    fn from(_: io::Error) -> Self {
        ProtocolError::Truncated
    }
}

impl ClientRequest {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            ClientRequest::Ping => out.push(REQ_PING),
            ClientRequest::RequestMainThreadFps => out.push(REQ_MAIN_THREAD_FPS),
            ClientRequest::RequestStartCapture => out.push(REQ_START_CAPTURE),
            ClientRequest::RequestStopCapture => out.push(REQ_STOP_CAPTURE),
            ClientRequest::RequestBlocksDescription => out.push(REQ_BLOCKS_DESCRIPTION),
            ClientRequest::ChangeBlockStatus { descriptor_id, status } => {
                out.push(REQ_CHANGE_BLOCK_STATUS);
                out.extend_from_slice(&descriptor_id.to_le_bytes());
                out.push(*status);
            }
            ClientRequest::ChangeEventTracingStatus { enabled } => {
                out.push(REQ_CHANGE_EVENT_TRACING_STATUS);
                out.push(*enabled as u8);
            }
            ClientRequest::ChangeEventTracingPriority { low_priority } => {
                out.push(REQ_CHANGE_EVENT_TRACING_PRIORITY);
                out.push(*low_priority as u8);
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = io::Cursor::new(bytes);
        let tag = read_u8(&mut cursor)?;
        Ok(match tag {
            REQ_PING => ClientRequest::Ping,
            REQ_MAIN_THREAD_FPS => ClientRequest::RequestMainThreadFps,
            REQ_START_CAPTURE => ClientRequest::RequestStartCapture,
            REQ_STOP_CAPTURE => ClientRequest::RequestStopCapture,
            REQ_BLOCKS_DESCRIPTION => ClientRequest::RequestBlocksDescription,
            REQ_CHANGE_BLOCK_STATUS => ClientRequest::ChangeBlockStatus {
                descriptor_id: read_u32(&mut cursor)?,
                status: read_u8(&mut cursor)?,
            },
            REQ_CHANGE_EVENT_TRACING_STATUS => {
                ClientRequest::ChangeEventTracingStatus { enabled: read_u8(&mut cursor)? != 0 }
            }
            REQ_CHANGE_EVENT_TRACING_PRIORITY => {
                ClientRequest::ChangeEventTracingPriority { low_priority: read_u8(&mut cursor)? != 0 }
            }
            other => return Err(ProtocolError::UnknownTag(other)),
        })
    }
}

impl ServerMessage {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            ServerMessage::Status { process_id, is_enabled, is_event_tracing_enabled } => {
                out.push(MSG_STATUS);
                out.extend_from_slice(&process_id.to_le_bytes());
                out.push(*is_enabled as u8);
                out.push(*is_event_tracing_enabled as u8);
            }
            ServerMessage::Pong => out.push(MSG_PONG),
            ServerMessage::MainThreadFps { fps } => {
                out.push(MSG_MAIN_THREAD_FPS);
                out.extend_from_slice(&fps.to_le_bytes());
            }
            ServerMessage::BlocksDescription { bytes } => {
                out.push(MSG_BLOCKS_DESCRIPTION);
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
            ServerMessage::CaptureData { bytes } => {
                out.push(MSG_CAPTURE_DATA);
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
            ServerMessage::CaptureFinished => out.push(MSG_CAPTURE_FINISHED),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = io::Cursor::new(bytes);
        let tag = read_u8(&mut cursor)?;
        Ok(match tag {
            MSG_STATUS => ServerMessage::Status {
                process_id: read_u64(&mut cursor)?,
                is_enabled: read_u8(&mut cursor)? != 0,
                is_event_tracing_enabled: read_u8(&mut cursor)? != 0,
            },
            MSG_PONG => ServerMessage::Pong,
            MSG_MAIN_THREAD_FPS => ServerMessage::MainThreadFps { fps: read_f32(&mut cursor)? },
            MSG_BLOCKS_DESCRIPTION => ServerMessage::BlocksDescription { bytes: read_blob(&mut cursor)? },
            MSG_CAPTURE_DATA => ServerMessage::CaptureData { bytes: read_blob(&mut cursor)? },
            MSG_CAPTURE_FINISHED => ServerMessage::CaptureFinished,
            other => return Err(ProtocolError::UnknownTag(other)),
        })
    }
}

fn read_u8(cursor: &mut io::Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    let mut buf = [0u8; 1];
    cursor.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32(cursor: &mut io::Cursor<&[u8]>) -> Result<u32, ProtocolError> {
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(cursor: &mut io::Cursor<&[u8]>) -> Result<u64, ProtocolError> {
    let mut buf = [0u8; 8];
    cursor.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f32(cursor: &mut io::Cursor<&[u8]>) -> Result<f32, ProtocolError> {
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

fn read_blob(cursor: &mut io::Cursor<&[u8]>) -> Result<Vec<u8>, ProtocolError> {
    let len = read_u32(cursor)? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

/// Not used by `ClientRequest`/`ServerMessage` themselves (they only ever
/// write into an already-owned `Vec<u8>`), kept so callers that stream
/// directly to a `Write` don't need to build an intermediate buffer first.
pub fn write_framed(out: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    out.write_all(&(bytes.len() as u32).to_le_bytes())?;
    out.write_all(bytes)
}
