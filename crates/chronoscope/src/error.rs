//! Error types for the boundary operations that can fail (spec §7).
//!
//! The hot path — `begin_block`, `end_block`, `event`, `value` — never
//! returns `Result`; a descriptor lookup or a chunk write cannot fail in a
//! way the caller could usefully react to mid-measurement, so those stay
//! `bool`/`()` per spec §7. Errors are reserved for dump, enable/disable,
//! and context-switch tracing, where a caller genuinely has a decision to
//! make.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("a dump is already in progress")]
    AlreadyInProgress,

    #[error("failed to write capture file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EnableError {
    #[error("profiler is already enabled")]
    AlreadyEnabled,

    #[error("profiler is already disabled")]
    AlreadyDisabled,
}

#[derive(Debug, thiserror::Error)]
pub enum ContextSwitchError {
    #[error("context-switch tracing already running")]
    AlreadyLaunchedBySomebodyElse,

    #[error("insufficient privileges to start context-switch tracing")]
    NotEnoughAccessRights,

    #[error("context-switch tracing session reported an unexpected properties size")]
    BadPropertiesSize,

    #[error("context-switch tracing failed for an unspecified reason")]
    UnknownError,
}

impl ContextSwitchError {
    pub fn from_status(status: chronoscope_cswitch::EnableStatus) -> Result<(), Self> {
        use chronoscope_cswitch::EnableStatus::*;
        match status {
            LaunchedSuccessfully => Ok(()),
            AlreadyLaunchedBySomebodyElse => Err(Self::AlreadyLaunchedBySomebodyElse),
            NotEnoughAccessRights => Err(Self::NotEnoughAccessRights),
            BadPropertiesSize => Err(Self::BadPropertiesSize),
            UnknownError => Err(Self::UnknownError),
        }
    }
}
