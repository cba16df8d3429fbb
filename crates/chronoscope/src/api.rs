//! Process-wide public entry points (spec §6.1) and the `block!`/`event!`
//! macros.
//!
//! A descriptor is registered exactly once per call site: each macro
//! invocation owns a `static OnceLock` that holds the descriptor handle
//! after its first run, so every later call at that site is a clone of an
//! `Arc` plus a status check, never a registry lookup (spec §9 Design
//! Notes). Each OS thread resolves its [`ThreadStorage`] the same way,
//! through a `thread_local!` populated on first use.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use chronoscope_clock::Tick;

use crate::config::ProfilerConfig;
use crate::descriptor::{BlockDescriptor, BlockStatus};
use crate::manager::ProfileManager;
use crate::thread_storage::ThreadStorage;
use crate::value::{ArbitraryValue, ValueType};

static MANAGER: OnceCell<ProfileManager> = OnceCell::new();

/// Installs process-wide configuration. Only the first call has any
/// effect; later calls are logged and ignored, since every thread may
/// already hold a handle to the manager this created.
pub fn init(config: ProfilerConfig) {
    if MANAGER.set(ProfileManager::new(config)).is_err() {
        tracing::warn!("chronoscope::init called more than once; ignoring");
    }
}

/// The process-wide manager, lazily created with default configuration if
/// [`init`] was never called.
pub fn manager() -> &'static ProfileManager {
    MANAGER.get_or_init(|| ProfileManager::new(ProfilerConfig::default()))
}

pub fn enable() -> Result<(), crate::error::EnableError> {
    manager().enable()
}

pub fn disable() -> Result<(), crate::error::EnableError> {
    manager().disable()
}

pub fn is_enabled() -> bool {
    manager().is_enabled()
}

pub fn dump_to_file() -> Result<(), crate::error::DumpError> {
    manager().dump_to_file()
}

#[cfg(target_os = "linux")]
fn os_tid() -> u32 {
    unsafe { libc::syscall(libc::SYS_gettid) as u32 }
}

#[cfg(not(target_os = "linux"))]
fn os_tid() -> u32 {
    std::process::id()
}

fn is_main_thread(tid: u32) -> bool {
    tid == std::process::id()
}

thread_local! {
    static CURRENT_THREAD: Arc<ThreadStorage> = {
        let tid = os_tid();
        let name = std::thread::current().name().map(str::to_string);
        manager().register_thread(tid, name, is_main_thread(tid))
    };
}

/// Returns this thread's storage, registering it with the manager on first
/// call.
pub fn current_thread_storage() -> Arc<ThreadStorage> {
    CURRENT_THREAD.with(Arc::clone)
}

/// Gives the current thread a name other than whatever
/// `std::thread::current().name()` reported (spec §6.1
/// `register_thread`/`REGISTER_THREAD`).
pub fn register_thread(name: impl Into<String>) {
    current_thread_storage().set_name(name.into());
}

/// Scoped form of [`register_thread`]: emits a synthetic "ThreadFinished"
/// event and marks the thread's storage for cleanup when the guard drops
/// (spec §1.2 supplement, `REGISTER_THREAD_SCOPED`).
#[must_use = "dropping this immediately marks the thread as finished"]
pub struct ThreadGuard {
    os_tid: u32,
}

impl ThreadGuard {
    pub fn new(name: impl Into<String>) -> Self {
        register_thread(name);
        Self { os_tid: current_thread_storage().os_tid }
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        manager().mark_thread_expired(self.os_tid);
    }
}

pub fn register_thread_scoped(name: impl Into<String>) -> ThreadGuard {
    ThreadGuard::new(name)
}

/// RAII guard returned by the `block!` macro; closes the block when it
/// drops, including on an early return or a panic unwind.
pub struct ScopedBlock {
    thread: Option<Arc<ThreadStorage>>,
}

impl ScopedBlock {
    /// Opens `descriptor` on the current thread unless the profiler itself
    /// is disabled, in which case it records nothing and costs one atomic
    /// load to close. Gating against the descriptor's own status and any
    /// suppressing ancestor happens in [`ThreadStorage::begin_gated`] (spec
    /// §7, §8 S2).
    pub fn enter(descriptor: Arc<BlockDescriptor>) -> Self {
        if !manager().is_enabled() {
            return Self { thread: None };
        }
        let thread = current_thread_storage();
        thread.begin_gated(descriptor, Tick::now());
        Self { thread: Some(thread) }
    }
}

impl Drop for ScopedBlock {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            thread.end_gated(Tick::now());
        }
    }
}

/// Records an instantaneous event if the profiler is enabled and the
/// descriptor's status (and any suppressing ancestor scope, spec §7) allows
/// it; used by the `event!` macro.
pub fn record_event(descriptor: &BlockDescriptor) {
    if !manager().is_enabled() {
        return;
    }
    let thread = current_thread_storage();
    if !thread.would_record(descriptor.status()) {
        return;
    }
    thread.record_event(descriptor.id, Tick::now(), None);
}

/// Records an arbitrary-value sample against `descriptor` on the current
/// thread, gated the same way a block or event would be (spec §6.1
/// `store_value(desc, type, data, size, array, vin)`); used by the `value!`
/// macro. `value_id` ("vin") distinguishes independent value streams that
/// share one descriptor, e.g. the same counter sampled for several entities.
pub fn store_value(descriptor: &BlockDescriptor, value_type: ValueType, bytes: Vec<u8>, is_array: bool, value_id: u64) {
    if !manager().is_enabled() {
        return;
    }
    let thread = current_thread_storage();
    if !thread.would_record(descriptor.status()) {
        return;
    }
    let value = ArbitraryValue {
        timestamp: Tick::now().0,
        value_id,
        descriptor: descriptor.id,
        thread_id: thread.os_tid,
        value_type,
        is_array,
        bytes,
    };
    thread.record_value(&value);
}

/// Applies a `ChangeBlockStatus` request (spec §6.2) from a connected GUI.
pub fn set_block_status(id: crate::descriptor::DescriptorId, status: BlockStatus) {
    manager().descriptors.set_status(id, status);
}

pub fn set_event_tracing_enabled(enabled: bool) -> Result<(), crate::error::ContextSwitchError> {
    manager().set_event_tracing_enabled(enabled)
}

pub fn set_event_tracing_low_priority(low: bool) {
    manager().set_event_tracing_low_priority(low)
}

/// Re-exports the macros need to resolve without requiring every crate
/// that calls `block!`/`event!` to add `once_cell` as its own dependency.
#[doc(hidden)]
pub mod macro_support {
    pub use once_cell::sync::OnceCell;
    pub use std::sync::Arc;
}

/// Registers (once) and opens/closes a block for the duration of the
/// enclosing scope (spec §6.1 `EASY_BLOCK`/`EASY_FUNCTION`).
#[macro_export]
macro_rules! block {
    ($name:expr) => {
        $crate::block!($name, $crate::Color::DEFAULT)
    };
    ($name:expr, $color:expr) => {{
        static DESCRIPTOR: $crate::macro_support::OnceCell<
            $crate::macro_support::Arc<$crate::BlockDescriptor>,
        > = $crate::macro_support::OnceCell::new();
        let descriptor = DESCRIPTOR
            .get_or_init(|| {
                $crate::manager().descriptors.register(
                    $name,
                    file!(),
                    line!() as i32,
                    $color,
                    $crate::BlockType::Block,
                    $crate::BlockStatus::ON,
                    false,
                )
            })
            .clone();
        $crate::ScopedBlock::enter(descriptor)
    }};
}

/// Records an instantaneous marker (spec §6.1 `EASY_EVENT`).
#[macro_export]
macro_rules! event {
    ($name:expr) => {
        $crate::event!($name, $crate::Color::DEFAULT)
    };
    ($name:expr, $color:expr) => {{
        static DESCRIPTOR: $crate::macro_support::OnceCell<
            $crate::macro_support::Arc<$crate::BlockDescriptor>,
        > = $crate::macro_support::OnceCell::new();
        let descriptor = DESCRIPTOR.get_or_init(|| {
            $crate::manager().descriptors.register(
                $name,
                file!(),
                line!() as i32,
                $color,
                $crate::BlockType::Event,
                $crate::BlockStatus::ON,
                false,
            )
        });
        $crate::record_event(descriptor);
    }};
}

/// Records an arbitrary value alongside the current call site (spec §6.1
/// `store_value`). Accepts anything with a `From<T> for (ValueType,
/// Vec<u8>)` conversion, e.g. the numeric primitives, `bool`, and `&str`.
#[macro_export]
macro_rules! value {
    ($name:expr, $value:expr) => {{
        static DESCRIPTOR: $crate::macro_support::OnceCell<
            $crate::macro_support::Arc<$crate::BlockDescriptor>,
        > = $crate::macro_support::OnceCell::new();
        let descriptor = DESCRIPTOR.get_or_init(|| {
            $crate::manager().descriptors.register(
                $name,
                file!(),
                line!() as i32,
                $crate::Color::DEFAULT,
                $crate::BlockType::Value,
                $crate::BlockStatus::ON,
                false,
            )
        });
        let (value_type, bytes): ($crate::ValueType, ::std::vec::Vec<u8>) = $value.into();
        $crate::store_value(descriptor, value_type, bytes, false, 0);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_tid_is_stable_within_a_thread() {
        assert_eq!(os_tid(), os_tid());
    }

    #[test]
    fn thread_guard_does_not_panic_on_drop() {
        let _guard = ThreadGuard::new("scoped-worker");
    }

    #[test]
    fn registering_a_thread_sets_its_name() {
        register_thread("named-thread");
        assert_eq!(current_thread_storage().name().as_deref(), Some("named-thread"));
    }
}
