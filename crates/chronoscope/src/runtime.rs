//! Thread pinning/priority for the manager-owned collector threads (spec
//! §5 supplement): the network listener and the context-switch log
//! consumer both want to run off the hot path without competing with it
//! for a core.

use core_affinity::CoreId;
#[cfg(target_os = "linux")]
use libc::{sched_param, sched_setscheduler, SCHED_FIFO};
use tracing::warn;

/// Requests realtime scheduling for the calling thread. Any variant other
/// than `OsDefault` asks for `SCHED_FIFO` if the process has permission
/// (`CAP_SYS_NICE`); if the OS refuses, execution continues under the
/// default scheduler.
#[derive(Clone, Copy, Debug)]
pub enum ThreadPriority {
    OsDefault,
    Low,
    Medium,
    High,
    Custom(i32),
}

#[cfg(target_os = "linux")]
impl ThreadPriority {
    fn to_sched_param(self) -> Option<sched_param> {
        let priority = match self {
            ThreadPriority::OsDefault => return None,
            ThreadPriority::Low => 40,
            ThreadPriority::Medium => 60,
            ThreadPriority::High => 75,
            ThreadPriority::Custom(p) => p,
        };
        Some(sched_param { sched_priority: priority })
    }
}

#[cfg(target_os = "linux")]
fn set_thread_priority(priority: ThreadPriority) {
    if let Some(param) = priority.to_sched_param() {
        unsafe {
            let code = sched_setscheduler(0, SCHED_FIFO, &param);
            if code != 0 {
                warn!(code, priority = param.sched_priority, "couldn't set thread priority");
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn set_thread_priority(priority: ThreadPriority) {
    if !matches!(priority, ThreadPriority::OsDefault) {
        warn!(?priority, "thread priority setting only supported on linux");
    }
}

fn set_thread_affinity(core: usize) {
    if !core_affinity::set_for_current(CoreId { id: core }) {
        warn!(core, "couldn't set core affinity");
    }
}

/// Pins and/or elevates the calling thread before it enters its collector
/// loop (spec §9 Design Notes: pinning is a deployment knob, not a
/// correctness requirement, so failures only warn).
pub fn thread_boot(core: Option<usize>, priority: ThreadPriority) {
    if let Some(core) = core {
        set_thread_affinity(core);
    }
    set_thread_priority(priority);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_default_priority_does_not_touch_the_scheduler() {
        // No assertion beyond "doesn't panic": there is nothing externally
        // observable about the OS-default path from within a test process.
        thread_boot(None, ThreadPriority::OsDefault);
    }
}
