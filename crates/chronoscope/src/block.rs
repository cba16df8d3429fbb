//! In-flight and closed block records (spec §3/§4.7).
//!
//! An open block lives on a thread's open-block stack between
//! `begin_block` and the matching `end_block`; closing it turns it into a
//! byte record appended to that thread's block chunk allocator. Events
//! never open — they are serialized the moment they are recorded.

use std::sync::Arc;

use chronoscope_clock::Tick;

use crate::descriptor::{BlockDescriptor, DescriptorId};

/// A block that has been opened but not yet closed, held on a thread's
/// open-block stack (spec §4.4).
pub struct OpenBlock {
    pub descriptor: Arc<BlockDescriptor>,
    pub begin: Tick,
    /// Runtime name override, e.g. `EASY_BLOCK(dynamic_name)`; `None` means
    /// use the descriptor's static name.
    pub runtime_name: Option<String>,
}

impl OpenBlock {
    pub fn new(descriptor: Arc<BlockDescriptor>, begin: Tick, runtime_name: Option<String>) -> Self {
        Self { descriptor, begin, runtime_name }
    }

    pub fn close(self, end: Tick) -> ClosedBlock {
        ClosedBlock {
            descriptor_id: self.descriptor.id,
            begin: self.begin,
            end,
            runtime_name: self.runtime_name,
        }
    }
}

/// A finished block or a standalone event, ready to be appended to a
/// thread's chunk allocator.
pub struct ClosedBlock {
    pub descriptor_id: DescriptorId,
    pub begin: Tick,
    pub end: Tick,
    pub runtime_name: Option<String>,
}

/// A standalone instantaneous event (spec §3 `BlockType::Event`): no end
/// tick, just the moment it fired.
pub struct ClosedEvent {
    pub descriptor_id: DescriptorId,
    pub at: Tick,
    pub runtime_name: Option<String>,
}

/// Appends a closed block's wire bytes to `out` (spec §4.7 block record):
/// begin tick, end tick, descriptor id, then the runtime name
/// NUL-terminated. An absent runtime name serializes as a lone NUL rather
/// than a length-prefixed empty string.
pub fn encode_block(block: &ClosedBlock, out: &mut Vec<u8>) {
    out.extend_from_slice(&block.begin.0.to_le_bytes());
    out.extend_from_slice(&block.end.0.to_le_bytes());
    out.extend_from_slice(&block.descriptor_id.0.to_le_bytes());
    encode_runtime_name(block.runtime_name.as_deref(), out);
}

/// An event is a zero-duration block on the wire: `begin == end == at`
/// (spec §4.7, "`store_event` appends a zero-duration block").
pub fn encode_event(event: &ClosedEvent, out: &mut Vec<u8>) {
    out.extend_from_slice(&event.at.0.to_le_bytes());
    out.extend_from_slice(&event.at.0.to_le_bytes());
    out.extend_from_slice(&event.descriptor_id.0.to_le_bytes());
    encode_runtime_name(event.runtime_name.as_deref(), out);
}

fn encode_runtime_name(name: Option<&str>, out: &mut Vec<u8>) {
    out.extend_from_slice(name.unwrap_or("").as_bytes());
    out.push(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{BlockDescriptor, BlockStatus, BlockType, Color};
    use std::sync::RwLock;

    fn descriptor() -> Arc<BlockDescriptor> {
        Arc::new(BlockDescriptor {
            id: DescriptorId(0),
            name: "work".into(),
            file: "f.rs",
            line: 1,
            color: Color::DEFAULT,
            kind: BlockType::Block,
            status: RwLock::new(BlockStatus::ON),
        })
    }

    #[test]
    fn closing_preserves_descriptor_and_ticks() {
        let open = OpenBlock::new(descriptor(), Tick(100), None);
        let closed = open.close(Tick(250));
        assert_eq!(closed.descriptor_id, DescriptorId(0));
        assert_eq!(closed.begin, Tick(100));
        assert_eq!(closed.end, Tick(250));
    }

    #[test]
    fn block_fields_are_ordered_begin_end_descriptor_id() {
        let closed = ClosedBlock { descriptor_id: DescriptorId(3), begin: Tick(10), end: Tick(20), runtime_name: None };
        let mut out = Vec::new();
        encode_block(&closed, &mut out);
        assert_eq!(u64::from_le_bytes(out[0..8].try_into().unwrap()), 10);
        assert_eq!(u64::from_le_bytes(out[8..16].try_into().unwrap()), 20);
        assert_eq!(u32::from_le_bytes(out[16..20].try_into().unwrap()), 3);
    }

    #[test]
    fn encoding_a_block_without_a_runtime_name_writes_a_lone_nul() {
        let closed = ClosedBlock { descriptor_id: DescriptorId(3), begin: Tick(1), end: Tick(2), runtime_name: None };
        let mut out = Vec::new();
        encode_block(&closed, &mut out);
        assert_eq!(out.len(), 8 + 8 + 4 + 1);
        assert_eq!(out[out.len() - 1], 0);
    }

    #[test]
    fn encoding_a_block_with_a_runtime_name_nul_terminates_it() {
        let closed = ClosedBlock {
            descriptor_id: DescriptorId(3),
            begin: Tick(1),
            end: Tick(2),
            runtime_name: Some("req-42".to_string()),
        };
        let mut out = Vec::new();
        encode_block(&closed, &mut out);
        assert!(out.ends_with(b"req-42\0"));
    }

    #[test]
    fn an_event_encodes_as_a_zero_duration_block() {
        let event = ClosedEvent { descriptor_id: DescriptorId(1), at: Tick(77), runtime_name: None };
        let mut out = Vec::new();
        encode_event(&event, &mut out);
        assert_eq!(u64::from_le_bytes(out[0..8].try_into().unwrap()), 77);
        assert_eq!(u64::from_le_bytes(out[8..16].try_into().unwrap()), 77);
    }
}
