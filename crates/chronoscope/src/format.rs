//! Bit-exact capture file layout (spec §4.7, C7).
//!
//! Byte order is little-endian throughout. The header is a fixed 64 bytes:
//! signature, format version, process id, cpu frequency in Hz, capture
//! begin tick, capture end tick, the total number of block/event/value
//! records across every thread, the total bytes those records occupy,
//! the descriptor count, and the byte size of the descriptor table that
//! immediately follows the header. One section per thread comes after the
//! descriptor table, in registration order.
//!
//! A thread (or descriptor) with no name writes `name_len = 1` and a
//! single NUL byte rather than `name_len = 0` (spec §9 Open Questions: the
//! NUL terminator always counts towards the length field).

use std::io::{self, Write};
use std::sync::Arc;

use chronoscope_clock::Tick;

use crate::descriptor::BlockDescriptor;

pub const SIGNATURE: u32 = 0x7973_4145; // "Easy" read little-endian
pub const FORMAT_VERSION: u32 = 1;

pub struct CaptureHeader {
    pub process_id: u64,
    pub cpu_frequency: u64,
    pub begin: Tick,
    pub end: Tick,
}

/// One thread's contribution to a dump (spec §4.7 per-thread section).
/// `cs_count`/`block_count` are record counts, not byte lengths: a reader
/// walks that many self-framed records rather than skipping a byte range.
pub struct ThreadSection {
    pub os_tid: u32,
    pub name: Option<String>,
    pub cs_count: u32,
    pub cs_bytes: Vec<u8>,
    pub block_count: u32,
    pub block_bytes: Vec<u8>,
}

pub fn write_capture(
    out: &mut impl Write,
    header: &CaptureHeader,
    descriptors: &[Arc<BlockDescriptor>],
    threads: &[ThreadSection],
) -> io::Result<()> {
    let mut descriptor_bytes = Vec::new();
    for descriptor in descriptors {
        write_descriptor(&mut descriptor_bytes, descriptor)?;
    }

    let total_block_count: u32 = threads.iter().map(|t| t.block_count).sum();
    let total_arena_bytes: u64 = threads.iter().map(|t| t.block_bytes.len() as u64).sum();

    out.write_all(&SIGNATURE.to_le_bytes())?;
    out.write_all(&FORMAT_VERSION.to_le_bytes())?;
    out.write_all(&header.process_id.to_le_bytes())?;
    out.write_all(&header.cpu_frequency.to_le_bytes())?;
    out.write_all(&header.begin.0.to_le_bytes())?;
    out.write_all(&header.end.0.to_le_bytes())?;
    out.write_all(&total_block_count.to_le_bytes())?;
    out.write_all(&total_arena_bytes.to_le_bytes())?;
    out.write_all(&(descriptors.len() as u32).to_le_bytes())?;
    out.write_all(&(descriptor_bytes.len() as u64).to_le_bytes())?;

    out.write_all(&descriptor_bytes)?;
    for thread in threads {
        write_thread_section(out, thread)?;
    }
    Ok(())
}

/// Writes just the descriptor table, with its own leading entry count:
/// the payload for a `RequestBlocksDescription` response (spec §4.8),
/// which a GUI asks for once up front rather than on every dump and so has
/// no header `descriptor_count` field to read a count from instead.
pub fn write_descriptor_table(out: &mut impl Write, descriptors: &[Arc<BlockDescriptor>]) -> io::Result<()> {
    out.write_all(&(descriptors.len() as u32).to_le_bytes())?;
    for descriptor in descriptors {
        write_descriptor(out, descriptor)?;
    }
    Ok(())
}

/// One descriptor table entry (spec §4.7): `size` (bytes following this
/// field), `id`, `line` (signed), `color`, `type`, `status`, then the name
/// as `name_len` (including its NUL) followed by that many bytes, and
/// finally the file name NUL-terminated with no length field of its own.
fn write_descriptor(out: &mut impl Write, descriptor: &BlockDescriptor) -> io::Result<()> {
    let name_bytes = descriptor.name.as_bytes();
    let file_bytes = descriptor.file.as_bytes();
    let name_field_len = (name_bytes.len() + 1) as u16;
    let payload_len = 4 + 4 + 4 + 1 + 1 + 2 + name_field_len as usize + file_bytes.len() + 1;

    out.write_all(&(payload_len as u16).to_le_bytes())?;
    out.write_all(&descriptor.id.0.to_le_bytes())?;
    out.write_all(&descriptor.line.to_le_bytes())?;
    out.write_all(&descriptor.color.0.to_le_bytes())?;
    out.write_all(&[descriptor.kind as u8])?;
    out.write_all(&[descriptor.status().bits()])?;
    out.write_all(&name_field_len.to_le_bytes())?;
    out.write_all(name_bytes)?;
    out.write_all(&[0u8])?;
    out.write_all(file_bytes)?;
    out.write_all(&[0u8])
}

fn write_thread_section(out: &mut impl Write, thread: &ThreadSection) -> io::Result<()> {
    out.write_all(&thread.os_tid.to_le_bytes())?;
    write_name(out, thread.name.as_deref())?;
    out.write_all(&thread.cs_count.to_le_bytes())?;
    out.write_all(&thread.cs_bytes)?;
    out.write_all(&thread.block_count.to_le_bytes())?;
    out.write_all(&thread.block_bytes)
}

fn write_name(out: &mut impl Write, name: Option<&str>) -> io::Result<()> {
    let bytes = name.map(str::as_bytes).unwrap_or(&[]);
    out.write_all(&((bytes.len() + 1) as u16).to_le_bytes())?;
    out.write_all(bytes)?;
    out.write_all(&[0u8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{BlockStatus, BlockType, Color, DescriptorId};
    use std::sync::RwLock;

    fn descriptor() -> Arc<BlockDescriptor> {
        Arc::new(BlockDescriptor {
            id: DescriptorId(0),
            name: "work".into(),
            file: "f.rs",
            line: 7,
            color: Color::DEFAULT,
            kind: BlockType::Block,
            status: RwLock::new(BlockStatus::ON),
        })
    }

    #[test]
    fn header_starts_with_the_signature_and_version() {
        let header = CaptureHeader { process_id: 1, cpu_frequency: 1_000_000_000, begin: Tick(0), end: Tick(100) };
        let mut out = Vec::new();
        write_capture(&mut out, &header, &[], &[]).unwrap();
        assert_eq!(u32::from_le_bytes(out[0..4].try_into().unwrap()), SIGNATURE);
        assert_eq!(u32::from_le_bytes(out[4..8].try_into().unwrap()), FORMAT_VERSION);
    }

    #[test]
    fn empty_capture_header_is_exactly_64_bytes() {
        let header = CaptureHeader { process_id: 1, cpu_frequency: 1, begin: Tick(0), end: Tick(1) };
        let mut out = Vec::new();
        write_capture(&mut out, &header, &[], &[]).unwrap();
        assert_eq!(out.len(), 64);
    }

    #[test]
    fn unnamed_thread_writes_name_len_one_and_a_single_nul_byte() {
        let header = CaptureHeader { process_id: 1, cpu_frequency: 1_000_000_000, begin: Tick(0), end: Tick(1) };
        let thread =
            ThreadSection { os_tid: 1, name: None, cs_count: 0, cs_bytes: Vec::new(), block_count: 0, block_bytes: Vec::new() };
        let mut out = Vec::new();
        write_capture(&mut out, &header, &[], std::slice::from_ref(&thread)).unwrap();
        // header (64 bytes, no descriptors) -> thread section starts here.
        let name_len_offset = 64 + 4;
        let name_len = u16::from_le_bytes(out[name_len_offset..name_len_offset + 2].try_into().unwrap());
        assert_eq!(name_len, 1);
        assert_eq!(out[name_len_offset + 2], 0);
        assert_eq!(out.len(), name_len_offset + 2 + 1 + 4 + 4);
    }

    #[test]
    fn header_reports_descriptor_count_and_arena_bytes() {
        let header = CaptureHeader { process_id: 1, cpu_frequency: 1, begin: Tick(0), end: Tick(0) };
        let mut out = Vec::new();
        write_capture(&mut out, &header, &[descriptor()], &[]).unwrap();
        assert_eq!(u32::from_le_bytes(out[52..56].try_into().unwrap()), 1);
        let descriptor_arena_bytes = u64::from_le_bytes(out[56..64].try_into().unwrap());
        assert_eq!(out.len(), 64 + descriptor_arena_bytes as usize);
    }

    #[test]
    fn header_reports_total_block_count_and_arena_bytes() {
        let header = CaptureHeader { process_id: 1, cpu_frequency: 1, begin: Tick(0), end: Tick(5) };
        let thread = ThreadSection {
            os_tid: 1,
            name: None,
            cs_count: 0,
            cs_bytes: Vec::new(),
            block_count: 2,
            block_bytes: vec![0u8; 10],
        };
        let mut out = Vec::new();
        write_capture(&mut out, &header, &[], std::slice::from_ref(&thread)).unwrap();
        assert_eq!(u32::from_le_bytes(out[40..44].try_into().unwrap()), 2);
        assert_eq!(u64::from_le_bytes(out[44..52].try_into().unwrap()), 10);
    }

    #[test]
    fn descriptor_entry_orders_id_line_color_type_status() {
        let mut out = Vec::new();
        write_descriptor_table(&mut out, &[descriptor()]).unwrap();
        // table count(4) + entry size(2) precede the fixed fields.
        let mut offset = 4 + 2;
        assert_eq!(u32::from_le_bytes(out[offset..offset + 4].try_into().unwrap()), 0); // id
        offset += 4;
        assert_eq!(i32::from_le_bytes(out[offset..offset + 4].try_into().unwrap()), 7); // line
        offset += 4;
        assert_eq!(u32::from_le_bytes(out[offset..offset + 4].try_into().unwrap()), Color::DEFAULT.0);
        offset += 4;
        assert_eq!(out[offset], BlockType::Block as u8);
        offset += 1;
        assert_eq!(out[offset], BlockStatus::ON.bits());
    }
}
