//! Context-switch begin/end pairing lands on the thread that went off-cpu,
//! not the one it switched to (spec §8 S4).

use chronoscope::{ProfileManager, ProfilerConfig};
use chronoscope_clock::Tick;

#[test]
fn closed_switch_lands_on_the_departing_thread() {
    let manager = ProfileManager::new(ProfilerConfig::default());
    manager.register_thread(10, None, false);
    // Thread 11 never registers; end_cs only needs from_tid's storage.

    manager.begin_cs(10, Tick(100), 11, "other");
    manager.end_cs(11, 4242, Tick(150));

    let mut out = Vec::new();
    manager.dump(&mut out).unwrap();

    // No block descriptors were ever registered and no thread expired, so
    // the descriptor table is empty and there is exactly one thread
    // section, for tid 10.
    let descriptor_count = u32::from_le_bytes(out[52..56].try_into().unwrap());
    let descriptor_arena_bytes = u64::from_le_bytes(out[56..64].try_into().unwrap());
    assert_eq!(descriptor_count, 0);
    assert_eq!(descriptor_arena_bytes, 0);

    let thread_section_offset = 64 + descriptor_arena_bytes as usize;

    let os_tid = u32::from_le_bytes(out[thread_section_offset..thread_section_offset + 4].try_into().unwrap());
    assert_eq!(os_tid, 10);
    let name_len_offset = thread_section_offset + 4;
    let name_len = u16::from_le_bytes(out[name_len_offset..name_len_offset + 2].try_into().unwrap()) as usize;
    assert_eq!(name_len, 1, "unnamed thread");
    assert_eq!(out[name_len_offset + 2], 0);

    let cs_count_offset = name_len_offset + 2 + name_len;
    let cs_count = u32::from_le_bytes(out[cs_count_offset..cs_count_offset + 4].try_into().unwrap());
    assert_eq!(cs_count, 1);

    let cs_record_len = 8 + 8 + 4 + "other".len() + 1;
    let cs_bytes = &out[cs_count_offset + 4..cs_count_offset + 4 + cs_record_len];
    let begin = u64::from_le_bytes(cs_bytes[0..8].try_into().unwrap());
    let end = u64::from_le_bytes(cs_bytes[8..16].try_into().unwrap());
    let target_tid = u32::from_le_bytes(cs_bytes[16..20].try_into().unwrap());
    assert_eq!(begin, 100);
    assert_eq!(end, 150);
    assert_eq!(target_tid, 11);
    assert_eq!(&cs_bytes[20..25], b"other");
    assert_eq!(cs_bytes[25], 0, "process name is NUL-terminated");

    let block_count_offset = cs_count_offset + 4 + cs_record_len;
    let block_count = u32::from_le_bytes(out[block_count_offset..block_count_offset + 4].try_into().unwrap());
    assert_eq!(block_count, 0, "no blocks were recorded, only the context switch");
}

#[test]
fn end_cs_with_nothing_pending_is_dropped_silently() {
    let manager = ProfileManager::new(ProfilerConfig::default());
    manager.register_thread(10, None, false);

    // No matching begin_cs; must not panic and must not fabricate a record.
    manager.end_cs(11, 4242, Tick(150));

    let mut out = Vec::new();
    manager.dump(&mut out).unwrap();
    let thread_section_offset = 64; // header only, no descriptors
    let name_len_offset = thread_section_offset + 4;
    let name_len = u16::from_le_bytes(out[name_len_offset..name_len_offset + 2].try_into().unwrap()) as usize;
    let cs_count_offset = name_len_offset + 2 + name_len;
    let cs_count = u32::from_le_bytes(out[cs_count_offset..cs_count_offset + 4].try_into().unwrap());
    assert_eq!(cs_count, 0);
}
