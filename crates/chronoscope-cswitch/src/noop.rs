use crate::{ContextSwitchSource, CsEvent, EnableStatus};

/// A context-switch source that never produces events. Used on platforms
/// without a wired-up tracer and by tests that don't exercise CS ingestion.
#[derive(Default)]
pub struct DisabledSource;

impl ContextSwitchSource for DisabledSource {
    fn start(&mut self) -> EnableStatus {
        EnableStatus::LaunchedSuccessfully
    }

    fn stop(&mut self) {}

    fn set_low_priority(&mut self, _low: bool) {}

    fn drain_pending(&mut self, _on_event: &mut dyn FnMut(CsEvent)) {}
}
