use std::{
    fs::File,
    io::{BufRead, BufReader, Seek, SeekFrom},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use tracing::warn;

use crate::{ContextSwitchSource, CsEvent, EnableStatus};

/// Default path the kernel-tracing backend is documented to write to on
/// Linux (spec §6.1, `set_context_switch_log_filename`).
pub const DEFAULT_CS_LOG_PATH: &str = "/tmp/cs_profiling_info.log";

const MAX_START_ATTEMPTS: u32 = 6;
const START_BACKOFF: Duration = Duration::from_millis(500);

/// Replays context-switch records from a log file an external kernel
/// tracer is assumed to append to. Each line is
/// `<tick> <from_tid> <to_tid> <to_pid> <to_process_name>`, whitespace
/// separated, process name last (and therefore free to contain no further
/// whitespace — this is the wire contract for the external tracer, not
/// something this crate generates).
pub struct LinuxLogFileSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    offset: u64,
    low_priority: bool,
}

impl LinuxLogFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into(), reader: None, offset: 0, low_priority: false }
    }

    pub fn default_path() -> Self {
        Self::new(DEFAULT_CS_LOG_PATH)
    }

    fn try_open(path: &Path) -> std::io::Result<File> {
        File::open(path)
    }
}

impl ContextSwitchSource for LinuxLogFileSource {
    fn start(&mut self) -> EnableStatus {
        // The external tracer may not have created the log file yet; retry
        // with backoff rather than failing immediately, mirroring the
        // retry-on-"session exists" behavior of the ETW adapter (spec §4.6).
        for attempt in 0..MAX_START_ATTEMPTS {
            match Self::try_open(&self.path) {
                Ok(file) => {
                    self.reader = Some(BufReader::new(file));
                    self.offset = 0;
                    // Drain whatever the external tracer already wrote so
                    // start() leaves the source ready to replay only new
                    // records on the next drain.
                    self.drain_pending(&mut |_| {});
                    return EnableStatus::LaunchedSuccessfully;
                }
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    return EnableStatus::NotEnoughAccessRights;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if attempt + 1 < MAX_START_ATTEMPTS {
                        thread::sleep(START_BACKOFF);
                        continue;
                    }
                    warn!(path = %self.path.display(), "context-switch log file never appeared");
                    return EnableStatus::AlreadyLaunchedBySomebodyElse;
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "failed to open context-switch log");
                    return EnableStatus::UnknownError;
                }
            }
        }
        EnableStatus::UnknownError
    }

    fn stop(&mut self) {
        self.reader = None;
    }

    fn set_low_priority(&mut self, low: bool) {
        self.low_priority = low;
    }

    /// Reads every complete line appended since the last drain and invokes
    /// `on_event` with the parsed event; malformed lines are logged and
    /// skipped.
    fn drain_pending(&mut self, on_event: &mut dyn FnMut(CsEvent)) {
        let Some(reader) = self.reader.as_mut() else { return };
        if reader.seek(SeekFrom::Start(self.offset)).is_err() {
            return;
        }

        let mut consumed = self.offset;
        loop {
            let mut line = String::new();
            let read = match reader.read_line(&mut line) {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "error reading context-switch log");
                    break;
                }
            };
            if read == 0 || !line.ends_with('\n') {
                // EOF, or a partial line the tracer is still writing: stop
                // here and retry the remainder on the next drain.
                break;
            }
            consumed += read as u64;
            if let Some(event) = parse_line(line.trim_end()) {
                on_event(event);
            } else {
                warn!(%line, "malformed context-switch log line");
            }
        }
        self.offset = consumed;
    }
}

fn parse_line(line: &str) -> Option<CsEvent> {
    let mut parts = line.splitn(5, ' ');
    let time = parts.next()?.parse().ok()?;
    let from_tid = parts.next()?.parse().ok()?;
    let to_tid = parts.next()?.parse().ok()?;
    let to_pid = parts.next()?.parse().ok()?;
    let to_process_name = parts.next()?.to_string();
    Some(CsEvent {
        time: chronoscope_clock::Tick(time),
        from_tid,
        to_tid,
        to_pid,
        to_process_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        let event = parse_line("100 10 11 42 worker").unwrap();
        assert_eq!(event.time, chronoscope_clock::Tick(100));
        assert_eq!(event.from_tid, 10);
        assert_eq!(event.to_tid, 11);
        assert_eq!(event.to_pid, 42);
        assert_eq!(event.to_process_name, "worker");
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(parse_line("not a valid line").is_none());
    }

    #[test]
    fn drains_only_whole_lines_appended_since_last_read() {
        use std::io::Write;

        let dir = tempfile_dir();
        let path = dir.join("cs.log");
        std::fs::write(&path, "100 1 2 9 a\n").unwrap();

        let mut source = LinuxLogFileSource::new(&path);
        let status = source.start();
        assert_eq!(status, EnableStatus::LaunchedSuccessfully);

        let mut seen = Vec::new();
        source.drain_pending(&mut |e| seen.push(e));
        assert!(seen.is_empty(), "start() already drained the pre-existing line");

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "200 3 4 9 b").unwrap();
        file.flush().unwrap();

        source.drain_pending(&mut |e| seen.push(e));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].from_tid, 3);
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "chronoscope-cswitch-test-{}-{:?}",
            std::process::id(),
            std::time::SystemTime::now()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
