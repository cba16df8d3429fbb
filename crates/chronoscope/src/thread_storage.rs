//! Per-thread collection state (spec §4.4, C4).
//!
//! Every OS thread that records at least one block gets exactly one
//! `ThreadStorage`, created lazily on first use and cached in a
//! thread-local pointer from then on (spec §9, "one lookup per
//! thread-lifetime, not per call"). The open-block stack is only ever
//! touched by its owning thread; the chunk allocators and frame stats are
//! also written by the owner but read by whichever thread performs a dump,
//! so those live behind a short-held `Mutex`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use chronoscope_clock::{Duration, Tick};
use chronoscope_storage::{ChunkAllocator, BLOCK_CHUNK_SIZE, SYNC_CHUNK_SIZE};

use crate::block::{encode_block, encode_event, ClosedEvent, OpenBlock};
use crate::cs_record::{encode_cs_record, ClosedContextSwitch};
use crate::descriptor::{BlockDescriptor, BlockStatus, DescriptorId};
use crate::value::{encode_value, ArbitraryValue};

/// Accumulated frame-duration statistics (spec §4.5 dump step 7), tracked
/// separately because the main thread and every other thread update them
/// on different triggers (see [`ThreadStorage::update_frame`]).
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    pub current: Duration,
    pub max: Duration,
    /// Running average over every frame observed so far.
    pub average: Duration,
    frame_count: u64,
}

impl FrameStats {
    fn observe(&mut self, frame: Duration) {
        self.current = frame;
        if frame.0 > self.max.0 {
            self.max = frame;
        }
        self.frame_count += 1;
        // Incremental mean: avoids keeping a running sum that could
        // overflow across a long-lived process.
        let delta = frame.0 as i128 - self.average.0 as i128;
        self.average = Duration(((self.average.0 as i128) + delta / self.frame_count as i128) as u64);
    }
}

/// Thread is still running; neither path below has marked it done.
const EXPIRED_NONE: u8 = 0;
/// `ProfileManager::dump` probed the OS and found the thread gone (spec §4.4
/// "Expiration check"); the next dump emits a synthetic "ThreadExpired"
/// event for it.
const EXPIRED_PROBED: u8 = 1;
/// `ThreadGuard`/`mark_thread_expired` already recorded "ThreadFinished"
/// explicitly; no further synthetic event is needed at dump time.
const EXPIRED_FINISHED: u8 = 2;

pub struct ThreadStorage {
    pub os_tid: u32,
    pub is_main: bool,
    name: Mutex<Option<String>>,
    open_blocks: Mutex<Vec<OpenBlock>>,
    block_stream: Mutex<ChunkAllocator>,
    cs_stream: Mutex<ChunkAllocator>,
    frame_stats: Mutex<FrameStats>,
    expired: AtomicU8,
    /// One entry per currently-open gated scope: `(allow_children, was_recorded)`
    /// (spec §7 "OffRecursive"/"OnWithoutChildren" propagation, §8 S2). The
    /// top of the stack is the nearest open ancestor; an empty stack means
    /// no ancestor is suppressing anything.
    scope_stack: Mutex<Vec<(bool, bool)>>,
}

impl ThreadStorage {
    pub fn new(os_tid: u32, is_main: bool) -> Self {
        Self {
            os_tid,
            is_main,
            name: Mutex::new(None),
            open_blocks: Mutex::new(Vec::new()),
            block_stream: Mutex::new(ChunkAllocator::new(BLOCK_CHUNK_SIZE)),
            cs_stream: Mutex::new(ChunkAllocator::new(SYNC_CHUNK_SIZE)),
            frame_stats: Mutex::new(FrameStats::default()),
            expired: AtomicU8::new(EXPIRED_NONE),
            scope_stack: Mutex::new(Vec::new()),
        }
    }

    /// Whether a descriptor with `status` would be recorded right now,
    /// given the nearest open ancestor's suppression state, without opening
    /// a new scope (spec §7 gating, used by non-scoped event/value stores).
    pub fn would_record(&self, status: BlockStatus) -> bool {
        if self.current_allow_children() {
            status.is_enabled()
        } else {
            status.is_forced()
        }
    }

    fn current_allow_children(&self) -> bool {
        self.scope_stack
            .lock()
            .expect("scope stack lock poisoned")
            .last()
            .map_or(true, |&(allow, _)| allow)
    }

    /// Opens a gated scope for `descriptor` and records its begin if it
    /// passes gating (spec §7). Returns whether it was recorded; the
    /// matching [`Self::end_gated`] call must always follow, recorded or
    /// not, to keep the scope stack balanced.
    pub fn begin_gated(&self, descriptor: std::sync::Arc<BlockDescriptor>, at: Tick) -> bool {
        let parent_allows = self.current_allow_children();
        let status = descriptor.status();
        let (recorded, child_allow) = if parent_allows {
            (status.is_enabled(), !status.is_off_recursive() && status.allows_children())
        } else if status.is_forced() {
            (true, false)
        } else {
            (false, false)
        };

        self.scope_stack.lock().expect("scope stack lock poisoned").push((child_allow, recorded));
        if recorded {
            self.begin_block(descriptor, at, None);
        }
        recorded
    }

    /// Closes the innermost gated scope opened by [`Self::begin_gated`].
    pub fn end_gated(&self, at: Tick) {
        let popped = self.scope_stack.lock().expect("scope stack lock poisoned").pop();
        if let Some((_, recorded)) = popped {
            if recorded {
                self.end_block(at);
            }
        }
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock().expect("thread name lock poisoned") = Some(name.into());
    }

    pub fn name(&self) -> Option<String> {
        self.name.lock().expect("thread name lock poisoned").clone()
    }

    /// Marks this thread finished explicitly (spec §9 `ThreadGuard` drop):
    /// the caller has already recorded "ThreadFinished", so dump time must
    /// not also emit "ThreadExpired" for it.
    pub fn mark_expired(&self) {
        self.expired.store(EXPIRED_FINISHED, Ordering::Release);
    }

    /// Marks this thread expired because a dump-time OS liveness probe
    /// found it gone (spec §4.4 "Expiration check"). A no-op if the thread
    /// was already marked some other way, so an explicit finish always
    /// wins a race with the probe.
    pub fn mark_probed_dead(&self) {
        let _ = self.expired.compare_exchange(EXPIRED_NONE, EXPIRED_PROBED, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire) != EXPIRED_NONE
    }

    /// Whether this dump should emit a synthetic "ThreadExpired" record:
    /// only true for the OS-probed path, since the explicit
    /// `ThreadGuard`/`mark_thread_expired` path already recorded
    /// "ThreadFinished" itself (spec §8, "a thread ... emits exactly one
    /// synthetic ... record").
    pub fn needs_expired_event(&self) -> bool {
        self.expired.load(Ordering::Acquire) == EXPIRED_PROBED
    }

    pub fn begin_block(&self, descriptor: std::sync::Arc<BlockDescriptor>, at: Tick, runtime_name: Option<String>) {
        self.open_blocks
            .lock()
            .expect("open-block stack lock poisoned")
            .push(OpenBlock::new(descriptor, at, runtime_name));
    }

    /// Pops the innermost open block and appends its closed record to the
    /// block stream. Returns `false` with nothing recorded if the stack was
    /// empty (a mismatched `end_block`, spec §7 edge cases).
    pub fn end_block(&self, at: Tick) -> bool {
        let open = self.open_blocks.lock().expect("open-block stack lock poisoned").pop();
        let Some(open) = open else { return false };
        let closed = open.close(at);
        let mut buf = Vec::new();
        encode_block(&closed, &mut buf);
        self.block_stream.lock().expect("block stream lock poisoned").push_record(&buf);
        true
    }

    pub fn record_event(&self, descriptor_id: DescriptorId, at: Tick, runtime_name: Option<String>) {
        let event = ClosedEvent { descriptor_id, at, runtime_name };
        let mut buf = Vec::new();
        encode_event(&event, &mut buf);
        self.block_stream.lock().expect("block stream lock poisoned").push_record(&buf);
    }

    pub fn record_value(&self, value: &ArbitraryValue) {
        let mut buf = Vec::new();
        encode_value(value, &mut buf);
        self.block_stream.lock().expect("block stream lock poisoned").push_record(&buf);
    }

    /// Appends a finished context-switch span to this thread's CS stream.
    /// Called on the thread that went off-cpu, once `end_cs` pairs it with
    /// the `begin_cs` that opened it (spec §4.6, §8 S4).
    pub fn record_context_switch(&self, record: &ClosedContextSwitch) {
        let mut buf = Vec::new();
        encode_cs_record(record, &mut buf);
        self.cs_stream.lock().expect("cs stream lock poisoned").push_record(&buf);
    }

    /// Number of blocks still open when a dump happens (spec §4.5 step 4:
    /// these get a synthetic close at the dump tick rather than being
    /// dropped).
    pub fn open_block_count(&self) -> usize {
        self.open_blocks.lock().expect("open-block stack lock poisoned").len()
    }

    /// Closes every still-open block at `at`, as a dump or thread-expiry
    /// does (spec §4.5 step 4, §9 `ThreadGuard` "ThreadFinished" handling).
    pub fn force_close_open_blocks(&self, at: Tick) {
        let mut stack = self.open_blocks.lock().expect("open-block stack lock poisoned");
        let mut blocks = Vec::new();
        let mut buf = Vec::new();
        while let Some(open) = stack.pop() {
            let closed = open.close(at);
            buf.clear();
            encode_block(&closed, &mut buf);
            blocks.push(buf.clone());
        }
        drop(stack);
        let mut stream = self.block_stream.lock().expect("block stream lock poisoned");
        for record in blocks {
            stream.push_record(&record);
        }
    }

    /// Updates frame statistics. The main thread's frame boundary is the
    /// dump cadence itself; every other thread's frame is the span between
    /// its own successive top-level blocks, so non-main threads pass the
    /// duration of the block that just closed at depth zero rather than
    /// the dump interval.
    pub fn update_frame(&self, frame: Duration) {
        self.frame_stats.lock().expect("frame stats lock poisoned").observe(frame);
    }

    pub fn frame_stats(&self) -> FrameStats {
        *self.frame_stats.lock().expect("frame stats lock poisoned")
    }

    pub fn bytes_used(&self) -> usize {
        self.block_stream.lock().expect("block stream lock poisoned").bytes_used()
            + self.cs_stream.lock().expect("cs stream lock poisoned").bytes_used()
    }

    /// Drains both streams into `out`, clears them, and returns
    /// `(block_count, cs_count)` (spec §4.7 per-thread section: record
    /// counts, not byte lengths).
    pub fn drain_into(&self, blocks_out: &mut Vec<u8>, cs_out: &mut Vec<u8>) -> (u32, u32) {
        let mut blocks = self.block_stream.lock().expect("block stream lock poisoned");
        let block_count = blocks.len() as u32;
        for record in blocks.iter_records() {
            blocks_out.extend_from_slice(record);
        }
        blocks.clear();

        let mut cs = self.cs_stream.lock().expect("cs stream lock poisoned");
        let cs_count = cs.len() as u32;
        for record in cs.iter_records() {
            cs_out.extend_from_slice(record);
        }
        cs.clear();

        (block_count, cs_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{BlockDescriptor, BlockStatus, BlockType, Color, DescriptorId};
    use std::sync::{Arc, RwLock};

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
    fn end_block_without_a_matching_begin_reports_failure() {
        let storage = ThreadStorage::new(1, false);
        assert!(!storage.end_block(Tick(10)));
    }

    #[test]
    fn begin_then_end_produces_one_block_record() {
        let storage = ThreadStorage::new(1, false);
        storage.begin_block(descriptor(), Tick(10), None);
        assert!(storage.end_block(Tick(20)));
        assert_eq!(storage.open_block_count(), 0);
        assert!(storage.bytes_used() > 0);
    }

    #[test]
    fn force_close_flushes_every_nested_open_block() {
        let storage = ThreadStorage::new(1, false);
        storage.begin_block(descriptor(), Tick(1), None);
        storage.begin_block(descriptor(), Tick(2), None);
        assert_eq!(storage.open_block_count(), 2);
        storage.force_close_open_blocks(Tick(50));
        assert_eq!(storage.open_block_count(), 0);
    }

    fn described(status: BlockStatus) -> Arc<BlockDescriptor> {
        Arc::new(BlockDescriptor {
            id: DescriptorId(0),
            name: "work".into(),
            file: "f.rs",
            line: 1,
            color: Color::DEFAULT,
            kind: BlockType::Block,
            status: RwLock::new(status),
        })
    }

    #[test]
    fn off_recursive_parent_suppresses_a_plain_child_but_not_a_forced_one() {
        let storage = ThreadStorage::new(1, false);

        assert!(storage.begin_gated(described(BlockStatus::OFF_RECURSIVE_STATUS), Tick(0)));
        assert!(!storage.begin_gated(described(BlockStatus::ON), Tick(1)));
        storage.end_gated(Tick(2));
        assert!(storage.begin_gated(described(BlockStatus::FORCE_ON_STATUS), Tick(3)));
        storage.end_gated(Tick(4));
        storage.end_gated(Tick(5));

        assert_eq!(storage.open_block_count(), 0);
        let mut blocks = Vec::new();
        let mut cs = Vec::new();
        storage.drain_into(&mut blocks, &mut cs);
        // Two recorded blocks (the OffRecursive parent and the forced
        // escapee); the plain child in between produced nothing.
        let mut one_record = Vec::new();
        crate::block::encode_block(
            &crate::block::ClosedBlock { descriptor_id: DescriptorId(0), begin: Tick(0), end: Tick(0), runtime_name: None },
            &mut one_record,
        );
        assert_eq!(blocks.len(), 2 * one_record.len());
    }

    #[test]
    fn a_forced_escapee_does_not_let_its_own_children_back_in() {
        let storage = ThreadStorage::new(1, false);

        assert!(storage.begin_gated(described(BlockStatus::OFF_RECURSIVE_STATUS), Tick(0)));
        assert!(storage.begin_gated(described(BlockStatus::FORCE_ON_STATUS), Tick(1)));
        assert!(!storage.begin_gated(described(BlockStatus::ON), Tick(2)));
        storage.end_gated(Tick(3));
        storage.end_gated(Tick(4));
        storage.end_gated(Tick(5));
    }

    #[test]
    fn frame_stats_track_max_and_running_average() {
        let storage = ThreadStorage::new(1, true);
        storage.update_frame(Duration(100));
        storage.update_frame(Duration(300));
        let stats = storage.frame_stats();
        assert_eq!(stats.current.0, 300);
        assert_eq!(stats.max.0, 300);
        assert_eq!(stats.average.0, 200);
    }
}
