//! Diagnostic Filter
//!
//! Every formatted log line passes through a [`DiagnosticFilter`] before it
//! reaches stderr. Operational lines (startup, access log, failures) are
//! shown, the overlay login prompt is throttled to once a minute, and the
//! rest of the chatter from the network stack is dropped.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing_subscriber::fmt::MakeWriter;

/// Minimum gap between two visible login prompts
pub const AUTH_PROMPT_INTERVAL: Duration = Duration::from_secs(60);

/// Substrings that always pass, matched as-is
const ALLOW: &[&str] = &["serving . at", "access: ", "bind: ", "shutting down"];

/// Substrings that always pass, matched ignoring ASCII case
const ALLOW_ANY_CASE: &[&str] = &["error", "fail"];

/// Marker of the overlay login prompt
pub const AUTH_PROMPT: &str = "To start this";

/// Source of time for the throttle
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock to `offset` after its creation
    pub fn set(&self, offset: Duration) {
        *lock(&self.offset) = offset;
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.offset) += by;
    }
}

#[cfg(test)]
impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *lock(&self.offset)
    }
}

/// Outcome of classifying one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Written to the sink
    Pass,
    /// Login prompt shown too recently
    Throttled,
    /// Not on the allow-list
    Suppressed,
}

/// Throttle state, guarded by the filter lock
#[derive(Debug, Default)]
struct ThrottleState {
    last_auth: Option<Instant>,
}

/// Classifying, rate-limiting log sink
pub struct DiagnosticFilter {
    sink: Mutex<Box<dyn Write + Send>>,
    throttle: Mutex<ThrottleState>,
    clock: Arc<dyn Clock>,
}

impl DiagnosticFilter {
    /// Filter writing to stderr with the wall clock
    pub fn stderr() -> Self {
        Self::new(Box::new(io::stderr()), Arc::new(SystemClock))
    }

    pub fn new(sink: Box<dyn Write + Send>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink: Mutex::new(sink),
            throttle: Mutex::new(ThrottleState::default()),
            clock,
        }
    }

    /// Decide what happens to `line`, updating the throttle if it is a prompt
    pub fn classify(&self, line: &str) -> Verdict {
        if is_allowed(line) {
            return Verdict::Pass;
        }

        if line.contains(AUTH_PROMPT) {
            let now = self.clock.now();
            let mut state = lock(&self.throttle);
            let due = match state.last_auth {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= AUTH_PROMPT_INTERVAL,
            };
            if due {
                state.last_auth = Some(now);
                return Verdict::Pass;
            }
            return Verdict::Throttled;
        }

        Verdict::Suppressed
    }

    /// Accept one diagnostic line. Always reports the whole line as consumed.
    pub fn write_line(&self, line: &[u8]) -> usize {
        let text = String::from_utf8_lossy(line);
        if self.classify(&text) == Verdict::Pass {
            let mut sink = lock(&self.sink);
            // Nowhere left to report a broken stderr
            let _ = sink.write_all(line);
            let _ = sink.flush();
        }
        line.len()
    }
}

fn is_allowed(line: &str) -> bool {
    if ALLOW.iter().any(|pattern| line.contains(pattern)) {
        return true;
    }
    let lower = line.to_ascii_lowercase();
    ALLOW_ANY_CASE.iter().any(|pattern| lower.contains(pattern))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `io::Write` handle over a shared filter, used as the fmt layer writer
#[derive(Clone)]
pub struct DiagWriter {
    filter: Arc<DiagnosticFilter>,
}

impl DiagWriter {
    pub fn new(filter: Arc<DiagnosticFilter>) -> Self {
        Self { filter }
    }
}

impl Write for DiagWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.filter.write_line(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for DiagWriter {
    type Writer = DiagWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// In-memory sink shared between a filter and a test
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct MemorySink(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl MemorySink {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.0)).into_owned()
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

#[cfg(test)]
impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
