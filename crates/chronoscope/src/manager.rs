//! Global process state machine coordinating enable/disable/dump (spec
//! §4.5, C5).
//!
//! `ProfileManager` is usually reached through the process-wide singleton
//! in [`crate::api`], but every method here takes `&self` and nothing it
//! touches is process-global, so tests construct their own instance
//! instead of fighting over the one shared by the whole test binary (spec
//! §9 Design Notes: a global manager, but locally constructible for
//! tests).

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chronoscope_clock::Tick;
use once_cell::sync::OnceCell;
use chronoscope_cswitch::{ContextSwitchSource, DisabledSource};
use tracing::{debug, info, warn};

use crate::config::ProfilerConfig;
use crate::cs_record::ClosedContextSwitch;
use crate::descriptor::{BlockDescriptor, BlockStatus, BlockType, Color, DescriptorId, DescriptorRegistry};
use crate::error::{ContextSwitchError, DumpError, EnableError};
use crate::format::{self, CaptureHeader, ThreadSection};
use crate::thread_storage::ThreadStorage;
use crate::value::ArbitraryValue;

/// A context switch observed on `from_tid`, waiting for the matching
/// `end_cs(to_tid, ..)` that tells us how long it lasted (spec §4.6
/// `begin_cs`/`end_cs`, §8 S4). Keyed by `to_tid` rather than by the thread
/// storage it will eventually land on, since that's the only identifier the
/// pairing `end_cs` call carries.
struct PendingCs {
    from_tid: u32,
    begin: Tick,
    name: String,
}

/// OS liveness probe for the dump-time expiration check (spec §4.4),
/// grounded on `easy_profiler`'s `ProfileManager::checkThreadExpired`. The
/// real implementation is Windows-only (`GetExitCodeThread`); its Linux
/// branch is a stubbed-out `pthread_kill` call with a comment admitting
/// there is no portable way to probe another thread's liveness, and always
/// reports the thread alive. Matched here rather than reaching for a
/// `/proc/self/task/<tid>` check of our own: `os_tid` is whatever value the
/// caller passed to `register_thread`, not something this crate can verify
/// actually names a live kernel thread in this process's group, so treating
/// an unrecognized id as "probed dead" would misfire for any caller that
/// assigns its own thread identifiers.
fn thread_is_alive(_os_tid: u32) -> bool {
    true
}

pub struct ProfileManager {
    pub descriptors: DescriptorRegistry,
    threads: RwLock<HashMap<u32, Arc<ThreadStorage>>>,
    enabled: AtomicBool,
    dump_lock: Mutex<()>,
    cs_source: Mutex<Box<dyn ContextSwitchSource>>,
    cs_enabled: AtomicBool,
    pending_cs: Mutex<HashMap<u32, PendingCs>>,
    /// Tick the most recent `enable()` call observed (spec §3 `ProfileManager.
    /// begin_tick`); the header's `capture_begin_tick` for the next dump
    /// (spec §8 S1).
    capture_begin: Mutex<Tick>,
    // Lazily registered the first time a thread actually finishes or
    // expires (spec §9 Design Notes, "register on first use"), so that a
    // capture with no thread lifecycle events keeps descriptor_count
    // exactly matching what the caller itself registered (spec §8 S1).
    thread_finished_descriptor: OnceCell<DescriptorId>,
    thread_expired_descriptor: OnceCell<DescriptorId>,
    start_capture_descriptor: OnceCell<DescriptorId>,
    stop_capture_descriptor: OnceCell<DescriptorId>,
    config: ProfilerConfig,
}

impl ProfileManager {
    pub fn new(config: ProfilerConfig) -> Self {
        Self::with_context_switch_source(config, Box::new(DisabledSource))
    }

    pub fn with_context_switch_source(config: ProfilerConfig, source: Box<dyn ContextSwitchSource>) -> Self {
        let descriptors = DescriptorRegistry::new();
        let start = Tick::now();
        let enabled = config.enabled_at_start;
        Self {
            descriptors,
            threads: RwLock::new(HashMap::new()),
            enabled: AtomicBool::new(enabled),
            dump_lock: Mutex::new(()),
            cs_source: Mutex::new(source),
            cs_enabled: AtomicBool::new(false),
            pending_cs: Mutex::new(HashMap::new()),
            capture_begin: Mutex::new(start),
            thread_finished_descriptor: OnceCell::new(),
            thread_expired_descriptor: OnceCell::new(),
            start_capture_descriptor: OnceCell::new(),
            stop_capture_descriptor: OnceCell::new(),
            config,
        }
    }

    /// Synthetic descriptors for lifecycle markers (spec §1.2, supplied by
    /// the original event-trace source rather than spec.md itself):
    /// "ThreadFinished" fires when a thread's scoped guard drops;
    /// "ThreadExpired" fires when a dump notices a thread hasn't been
    /// touched since the last one. Each is registered the first time it is
    /// actually needed, not eagerly at construction.
    fn thread_finished_descriptor(&self) -> DescriptorId {
        *self.thread_finished_descriptor.get_or_init(|| {
            self.descriptors
                .register("ThreadFinished", "<internal>", 0, Color::DEFAULT, BlockType::Event, BlockStatus::ON, false)
                .id
        })
    }

    fn thread_expired_descriptor(&self) -> DescriptorId {
        *self.thread_expired_descriptor.get_or_init(|| {
            self.descriptors
                .register("ThreadExpired", "<internal>", 0, Color::DEFAULT, BlockType::Event, BlockStatus::ON, false)
                .id
        })
    }

    fn start_capture_descriptor(&self) -> DescriptorId {
        *self.start_capture_descriptor.get_or_init(|| {
            self.descriptors
                .register("StartCapture", "<internal>", 0, Color::DEFAULT, BlockType::Event, BlockStatus::ON, false)
                .id
        })
    }

    fn stop_capture_descriptor(&self) -> DescriptorId {
        *self.stop_capture_descriptor.get_or_init(|| {
            self.descriptors
                .register("StopCapture", "<internal>", 0, Color::DEFAULT, BlockType::Event, BlockStatus::ON, false)
                .id
        })
    }

    /// Finds the registered main thread, if any (spec §4.8 network lifecycle
    /// events land on it rather than on the network thread itself).
    fn main_thread(&self) -> Option<Arc<ThreadStorage>> {
        self.threads.read().expect("thread map lock poisoned").values().find(|t| t.is_main).cloned()
    }

    /// Emits a synthetic "StartCapture" marker on the main thread (spec §4.8
    /// `RequestStartCapture`). A no-op if no thread has registered as main
    /// yet.
    pub fn emit_start_capture_event(&self) {
        if let Some(thread) = self.main_thread() {
            thread.record_event(self.start_capture_descriptor(), Tick::now(), None);
        }
    }

    /// Emits a synthetic "StopCapture" marker on the main thread (spec §4.8
    /// `RequestStopCapture`).
    pub fn emit_stop_capture_event(&self) {
        if let Some(thread) = self.main_thread() {
            thread.record_event(self.stop_capture_descriptor(), Tick::now(), None);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) -> Result<(), EnableError> {
        if self.enabled.swap(true, Ordering::AcqRel) {
            return Err(EnableError::AlreadyEnabled);
        }
        *self.capture_begin.lock().expect("capture-begin lock poisoned") = Tick::now();
        info!("profiler enabled");
        Ok(())
    }

    pub fn disable(&self) -> Result<(), EnableError> {
        if !self.enabled.swap(false, Ordering::AcqRel) {
            return Err(EnableError::AlreadyDisabled);
        }
        info!("profiler disabled");
        Ok(())
    }

    /// Finds or lazily creates the storage for `os_tid` (spec §4.4,
    /// "register on first use"). Callers cache the returned handle in a
    /// thread-local so this map is only consulted once per thread
    /// lifetime.
    pub fn register_thread(&self, os_tid: u32, name: Option<String>, is_main: bool) -> Arc<ThreadStorage> {
        if let Some(existing) = self.threads.read().expect("thread map lock poisoned").get(&os_tid) {
            if let Some(name) = name {
                existing.set_name(name);
            }
            return existing.clone();
        }

        let mut threads = self.threads.write().expect("thread map lock poisoned");
        if let Some(existing) = threads.get(&os_tid) {
            return existing.clone();
        }
        let storage = Arc::new(ThreadStorage::new(os_tid, is_main));
        if let Some(name) = name {
            storage.set_name(name);
        }
        threads.insert(os_tid, storage.clone());
        debug!(os_tid, is_main, "thread registered");
        storage
    }

    /// Marks a thread's storage as stale without removing it immediately;
    /// the next dump flushes its remaining data, emits a synthetic
    /// "ThreadExpired" event, and then drops it (spec §9 `ThreadGuard`).
    pub fn mark_thread_expired(&self, os_tid: u32) {
        if let Some(storage) = self.threads.read().expect("thread map lock poisoned").get(&os_tid) {
            storage.record_event(self.thread_finished_descriptor(), Tick::now(), None);
            storage.mark_expired();
        }
    }

    pub fn set_event_tracing_enabled(&self, enabled: bool) -> Result<(), ContextSwitchError> {
        let mut source = self.cs_source.lock().expect("context-switch source lock poisoned");
        if enabled {
            if self.cs_enabled.load(Ordering::Acquire) {
                return Ok(());
            }
            let status = source.start();
            ContextSwitchError::from_status(status)?;
            self.cs_enabled.store(true, Ordering::Release);
        } else {
            source.stop();
            self.cs_enabled.store(false, Ordering::Release);
        }
        Ok(())
    }

    pub fn set_event_tracing_low_priority(&self, low: bool) {
        self.cs_source.lock().expect("context-switch source lock poisoned").set_low_priority(low);
    }

    pub fn is_event_tracing_enabled(&self) -> bool {
        self.cs_enabled.load(Ordering::Acquire)
    }

    /// Current main thread frame rate, derived from its most recent frame
    /// duration (spec §6.2 `RequestMainThreadFps`); `0.0` before any frame
    /// has been observed or if no thread has registered as main.
    pub fn main_thread_fps(&self) -> f32 {
        let threads = self.threads.read().expect("thread map lock poisoned");
        threads
            .values()
            .find(|storage| storage.is_main)
            .map(|storage| {
                let micros = storage.frame_stats().current.to_microseconds() as f32;
                if micros <= 0.0 {
                    0.0
                } else {
                    1_000_000.0 / micros
                }
            })
            .unwrap_or(0.0)
    }

    /// Records an arbitrary-value sample, gated the same way a block or
    /// event would be (spec §7).
    pub fn value(&self, thread: &ThreadStorage, descriptor: &BlockDescriptor, value: ArbitraryValue) {
        if !self.is_enabled() || !thread.would_record(descriptor.status()) {
            return;
        }
        thread.record_value(&value);
    }

    /// Runs the dump protocol (spec §4.5 steps 1-10) and writes the
    /// resulting capture to `sink`.
    pub fn dump(&self, sink: &mut impl Write) -> Result<(), DumpError> {
        let _guard = self.dump_lock.try_lock().map_err(|_| DumpError::AlreadyInProgress)?;

        // Dump protocol step 2 (spec §4.5): record end_tick = now at the
        // Enabled→Dumping transition, before anything else runs.
        let end = Tick::now();
        let begin = *self.capture_begin.lock().expect("capture-begin lock poisoned");

        self.drain_context_switches();

        let mut threads = self.threads.write().expect("thread map lock poisoned");
        let mut sections = Vec::with_capacity(threads.len());
        let mut expired_tids = Vec::new();

        for (&os_tid, storage) in threads.iter() {
            storage.force_close_open_blocks(end);

            // Expiration check (spec §4.4): a thread that never went through
            // `ThreadGuard`/`mark_thread_expired` still needs to be noticed
            // once its OS thread is actually gone, so every still-running
            // thread gets probed on each dump.
            if !storage.is_expired() && !thread_is_alive(os_tid) {
                storage.mark_probed_dead();
            }
            if storage.needs_expired_event() {
                storage.record_event(self.thread_expired_descriptor(), end, None);
            }
            if storage.is_expired() {
                expired_tids.push(os_tid);
            }
            if storage.is_main {
                storage.update_frame(chronoscope_clock::Duration::between(begin, end));
            }

            let mut block_bytes = Vec::new();
            let mut cs_bytes = Vec::new();
            let (block_count, cs_count) = storage.drain_into(&mut block_bytes, &mut cs_bytes);

            sections.push(ThreadSection {
                os_tid,
                name: storage.name(),
                cs_count,
                cs_bytes,
                block_count,
                block_bytes,
            });
        }
        for tid in expired_tids {
            threads.remove(&tid);
        }
        drop(threads);

        let header = CaptureHeader {
            process_id: std::process::id() as u64,
            cpu_frequency: Tick::frequency(),
            begin,
            end,
        };
        format::write_capture(sink, &header, &self.descriptors.snapshot(), &sections)
            .map_err(|source| DumpError::Io { path: self.config.capture_file.clone().unwrap_or_default(), source })
    }

    pub fn dump_to_file(&self) -> Result<(), DumpError> {
        let path = self.config.capture_file.clone().unwrap_or_else(|| "capture.chron".into());
        let mut file = std::fs::File::create(&path).map_err(|source| DumpError::Io { path: path.clone(), source })?;
        self.dump(&mut file)
    }

    /// Opens a pending context switch on `from_tid`, to be closed by a
    /// later `end_cs(to_tid, ..)` (spec §4.6 `begin_cs`). Dropped if
    /// `from_tid` has never registered.
    pub fn begin_cs(&self, from_tid: u32, t: Tick, to_tid: u32, to_name: impl Into<String>) {
        if !self.threads.read().expect("thread map lock poisoned").contains_key(&from_tid) {
            warn!(from_tid, "begin_cs for an unregistered thread");
            return;
        }
        self.pending_cs
            .lock()
            .expect("pending context-switch lock poisoned")
            .insert(to_tid, PendingCs { from_tid, begin: t, name: to_name.into() });
    }

    /// Closes the pending switch opened by the most recent `begin_cs`
    /// targeting `to_tid`, landing the finished record on the thread that
    /// opened it rather than on `to_tid` itself (spec §4.6 `end_cs`, §8 S4).
    /// Dropped if nothing is pending for `to_tid` or its opening thread has
    /// since been removed.
    pub fn end_cs(&self, to_tid: u32, _to_pid: u32, t: Tick) {
        let Some(pending) = self.pending_cs.lock().expect("pending context-switch lock poisoned").remove(&to_tid)
        else {
            return;
        };
        match self.threads.read().expect("thread map lock poisoned").get(&pending.from_tid) {
            Some(storage) => storage.record_context_switch(&ClosedContextSwitch {
                begin: pending.begin,
                end: t,
                target_tid: to_tid,
                target_process_name: pending.name,
            }),
            None => warn!(from_tid = pending.from_tid, "end_cs for a thread that has since expired"),
        }
    }

    /// Funnels every `(t, from_tid, to_tid, to_pid, to_process_name)` tuple
    /// the context-switch source has accumulated through `begin_cs`/`end_cs`
    /// (spec §4.5 step 6), using the same tick for both halves the way the
    /// OS sources themselves observe a switch as one instant shared by the
    /// outgoing and incoming thread.
    fn drain_context_switches(&self) {
        self.cs_source.lock().expect("context-switch source lock poisoned").drain_pending(&mut |event| {
            self.begin_cs(event.from_tid, event.time, event.to_tid, event.to_process_name.clone());
            self.end_cs(event.to_tid, event.to_pid, event.time);
        });
    }
}
