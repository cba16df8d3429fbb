//! Process-wide profiler configuration (spec §6.1).
//!
//! Mirrors the teacher's tile configuration builders: every knob has a
//! sensible default, and `ProfilerConfig::builder()` only needs to name
//! the handful of settings a given deployment actually wants to change.

use std::path::PathBuf;

use chronoscope_cswitch::DEFAULT_CS_LOG_PATH;

#[derive(Clone, Debug)]
pub struct ProfilerConfig {
    pub enabled_at_start: bool,
    pub capture_file: Option<PathBuf>,
    pub context_switch_log_path: PathBuf,
    pub event_tracing_enabled: bool,
    pub event_tracing_low_priority: bool,
    pub listen_port: Option<u16>,
    pub pin_collector_thread: Option<usize>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled_at_start: false,
            capture_file: None,
            context_switch_log_path: PathBuf::from(DEFAULT_CS_LOG_PATH),
            event_tracing_enabled: false,
            event_tracing_low_priority: false,
            listen_port: None,
            pin_collector_thread: None,
        }
    }
}

impl ProfilerConfig {
    pub fn builder() -> ProfilerConfigBuilder {
        ProfilerConfigBuilder { config: Self::default() }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProfilerConfigBuilder {
    config: ProfilerConfig,
}

impl ProfilerConfigBuilder {
    pub fn enabled_at_start(mut self, enabled: bool) -> Self {
        self.config.enabled_at_start = enabled;
        self
    }

    pub fn capture_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.capture_file = Some(path.into());
        self
    }

    pub fn context_switch_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.context_switch_log_path = path.into();
        self
    }

    pub fn event_tracing(mut self, enabled: bool, low_priority: bool) -> Self {
        self.config.event_tracing_enabled = enabled;
        self.config.event_tracing_low_priority = low_priority;
        self
    }

    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.listen_port = Some(port);
        self
    }

    pub fn pin_collector_thread(mut self, core: usize) -> Self {
        self.config.pin_collector_thread = Some(core);
        self
    }

    pub fn build(self) -> ProfilerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_an_idle_disabled_profiler() {
        let config = ProfilerConfig::default();
        assert!(!config.enabled_at_start);
        assert!(config.capture_file.is_none());
        assert_eq!(config.context_switch_log_path, PathBuf::from(DEFAULT_CS_LOG_PATH));
    }

    #[test]
    fn builder_overrides_only_what_it_touches() {
        let config = ProfilerConfig::builder().enabled_at_start(true).listen_port(28077).build();
        assert!(config.enabled_at_start);
        assert_eq!(config.listen_port, Some(28077));
        assert!(!config.event_tracing_enabled);
    }
}
