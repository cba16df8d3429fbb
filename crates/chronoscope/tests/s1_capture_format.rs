//! End-to-end capture-format check: a single scoped block, byte-exact
//! against the written capture (spec §8 S1).

use chronoscope::{BlockStatus, BlockType, Color, ProfileManager, ProfilerConfig};
use chronoscope_clock::{init_mock, Tick};

#[test]
fn single_scoped_block_produces_the_expected_capture_bytes() {
    let controller = init_mock();
    let manager = ProfileManager::new(ProfilerConfig::default());
    let descriptor =
        manager.descriptors.register("A", "x", 1, Color::DEFAULT, BlockType::Block, BlockStatus::ON, false);
    let thread = manager.register_thread(7, None, true);

    controller.increment(100);
    manager.enable().unwrap();

    controller.increment(100); // tick 200
    thread.begin_block(descriptor.clone(), Tick::now(), None);

    controller.increment(300); // tick 500
    thread.end_block(Tick::now());

    controller.increment(100); // tick 600
    manager.disable().unwrap();

    let mut out = Vec::new();
    manager.dump(&mut out).unwrap();

    assert_eq!(u32::from_le_bytes(out[0..4].try_into().unwrap()), chronoscope::SIGNATURE);
    assert_eq!(u32::from_le_bytes(out[4..8].try_into().unwrap()), chronoscope::FORMAT_VERSION);
    let begin = u64::from_le_bytes(out[24..32].try_into().unwrap());
    let end = u64::from_le_bytes(out[32..40].try_into().unwrap());
    assert_eq!(begin, 100, "capture_begin_tick must be the set_enabled(true) tick, not a dump-relative one");
    assert_eq!(end, 600);

    let total_block_count = u32::from_le_bytes(out[40..44].try_into().unwrap());
    let total_arena_bytes = u64::from_le_bytes(out[44..52].try_into().unwrap());
    assert_eq!(total_block_count, 1);

    let descriptor_count = u32::from_le_bytes(out[52..56].try_into().unwrap());
    let descriptor_arena_bytes = u64::from_le_bytes(out[56..64].try_into().unwrap());
    assert_eq!(descriptor_count, 1);

    // The descriptor table immediately follows the 64-byte header, with no
    // count of its own: the header's own `descriptor_count` is authoritative.
    let entry_offset = 64;
    let entry_size = u16::from_le_bytes(out[entry_offset..entry_offset + 2].try_into().unwrap()) as usize;
    assert_eq!(entry_offset + 2 + entry_size, 64 + descriptor_arena_bytes as usize);

    let mut field = entry_offset + 2;
    let descriptor_id = u32::from_le_bytes(out[field..field + 4].try_into().unwrap());
    field += 4;
    let line = i32::from_le_bytes(out[field..field + 4].try_into().unwrap());
    field += 4;
    let _color = u32::from_le_bytes(out[field..field + 4].try_into().unwrap());
    field += 4;
    let kind = out[field];
    field += 1;
    let status = out[field];
    field += 1;
    assert_eq!(descriptor_id, 0);
    assert_eq!(line, 1);
    assert_eq!(kind, BlockType::Block as u8);
    assert_eq!(status, BlockStatus::ON.bits());

    let name_field_len = u16::from_le_bytes(out[field..field + 2].try_into().unwrap()) as usize;
    field += 2;
    assert_eq!(&out[field..field + name_field_len], b"A\0");
    field += name_field_len;
    // Whatever remains of the entry is the NUL-terminated file name.
    let entry_end = 64 + descriptor_arena_bytes as usize;
    assert_eq!(&out[field..entry_end], b"x\0");

    let thread_section_offset = entry_end;
    let os_tid = u32::from_le_bytes(out[thread_section_offset..thread_section_offset + 4].try_into().unwrap());
    assert_eq!(os_tid, 7);
    let name_len_offset = thread_section_offset + 4;
    let name_len = u16::from_le_bytes(out[name_len_offset..name_len_offset + 2].try_into().unwrap()) as usize;
    assert_eq!(name_len, 1, "unnamed thread writes name_len = 1");
    assert_eq!(out[name_len_offset + 2], 0, "unnamed thread writes a single NUL, not a zero-length prefix");

    let cs_count_offset = name_len_offset + 2 + name_len;
    let cs_count = u32::from_le_bytes(out[cs_count_offset..cs_count_offset + 4].try_into().unwrap());
    assert_eq!(cs_count, 0);

    let block_count_offset = cs_count_offset + 4;
    let block_count = u32::from_le_bytes(out[block_count_offset..block_count_offset + 4].try_into().unwrap());
    assert_eq!(block_count, 1);
    assert_eq!(block_count, total_block_count);

    // A block record carries no length prefix of its own: begin/end/
    // descriptor_id are fixed-size and the name is self-delimiting via its
    // NUL terminator, so `total_arena_bytes` is exactly this one record's size.
    let record_offset = block_count_offset + 4;
    let record = &out[record_offset..record_offset + total_arena_bytes as usize];

    let rec_begin = u64::from_le_bytes(record[0..8].try_into().unwrap());
    let rec_end = u64::from_le_bytes(record[8..16].try_into().unwrap());
    let rec_descriptor_id = u32::from_le_bytes(record[16..20].try_into().unwrap());
    assert_eq!(rec_begin, 200);
    assert_eq!(rec_end, 500);
    assert_eq!(rec_descriptor_id, 0);
    assert_eq!(&record[20..], b"\0", "no runtime name override, just the lone NUL");

    let capture_end = record_offset + total_arena_bytes as usize;
    assert_eq!(out.len(), capture_end, "nothing trails the single thread section");
}
