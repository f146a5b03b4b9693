//! The execution backend seam.
//!
//! "Execute code" is an opaque capability: the engine hands the backend
//! source text plus a stdio buffer and gets back a tagged outcome. Rich
//! introspection (completion, inspection, completeness) has default empty
//! implementations so a minimal backend stays minimal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::Value;

/// Which output stream a side-channel write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl StreamName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamName::Stdout => "stdout",
            StreamName::Stderr => "stderr",
        }
    }
}

/// Buffer for side-channel writes made during one execution.
///
/// The backend writes into it; the owning event loop drains it into `stream`
/// broadcasts after each request is handled. Consecutive writes to the same
/// stream are coalesced into one chunk.
pub struct StdioCapture {
    enabled: AtomicBool,
    buffer: Mutex<Vec<(StreamName, String)>>,
}

impl Default for StdioCapture {
    fn default() -> Self {
        Self::new(true)
    }
}

impl StdioCapture {
    pub fn new(enabled: bool) -> Self {
        StdioCapture {
            enabled: AtomicBool::new(enabled),
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn write(&self, stream: StreamName, text: &str) {
        if !self.enabled.load(Ordering::SeqCst) || text.is_empty() {
            return;
        }
        let mut buffer = self.buffer.lock().unwrap();
        match buffer.last_mut() {
            Some((last_stream, chunk)) if *last_stream == stream => chunk.push_str(text),
            _ => buffer.push((stream, text.to_owned())),
        }
    }

    pub fn write_stdout(&self, text: &str) {
        self.write(StreamName::Stdout, text);
    }

    pub fn write_stderr(&self, text: &str) {
        self.write(StreamName::Stderr, text);
    }

    /// Take all buffered chunks, leaving the buffer empty.
    pub fn drain(&self) -> Vec<(StreamName, String)> {
        std::mem::take(&mut *self.buffer.lock().unwrap())
    }
}

/// Diagnostic record for a failed execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

impl ErrorReport {
    pub fn new(ename: &str, evalue: String) -> Self {
        let traceback = vec![format!("{}: {}", ename, evalue)];
        ErrorReport {
            ename: ename.to_owned(),
            evalue,
            traceback,
        }
    }
}

/// Result of a successful execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSuccess {
    /// Mime-bundle rendering of the result value; `None` when the code
    /// produced no displayable value.
    pub data: Option<Value>,
    /// Front-end-directed side requests to queue into the reply.
    pub payloads: Vec<Value>,
}

/// Tagged outcome of one backend invocation.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Success(ExecutionSuccess),
    Failed(ErrorReport),
}

/// Language metadata advertised in kernel_info replies.
#[derive(Debug, Clone)]
pub struct LanguageInfo {
    pub name: String,
    pub version: String,
    pub mimetype: String,
    pub file_extension: String,
}

/// Completion matches for a cursor position in source text.
#[derive(Debug, Clone, Default)]
pub struct CompletionResult {
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
}

/// Inspection result for a name under the cursor.
#[derive(Debug, Clone)]
pub struct InspectionResult {
    pub found: bool,
    /// Mime bundle; empty object when not found.
    pub data: Value,
}

impl Default for InspectionResult {
    fn default() -> Self {
        InspectionResult {
            found: false,
            data: Value::Object(Default::default()),
        }
    }
}

/// Answer to an is_complete probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    Complete,
    Incomplete,
    Invalid,
    Unknown,
}

impl Completeness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completeness::Complete => "complete",
            Completeness::Incomplete => "incomplete",
            Completeness::Invalid => "invalid",
            Completeness::Unknown => "unknown",
        }
    }
}

/// A language evaluator plugged into the execute engine.
///
/// Executions run one at a time; the engine never invokes `execute`
/// concurrently with itself.
pub trait ExecutionBackend: Send + Sync {
    /// Run one top-level block of source text. Side-channel writes go into
    /// `io`; the outcome carries the result rendering or the failure
    /// diagnostics.
    fn execute<'a>(&'a self, code: &'a str, io: &'a StdioCapture)
        -> BoxFuture<'a, ExecutionOutcome>;

    fn language_info(&self) -> LanguageInfo;

    fn banner(&self) -> String {
        let info = self.language_info();
        format!("{} {}", info.name, info.version)
    }

    fn complete(&self, _code: &str, _cursor_pos: usize) -> CompletionResult {
        CompletionResult::default()
    }

    fn inspect(&self, _code: &str, _cursor_pos: usize) -> InspectionResult {
        InspectionResult::default()
    }

    fn is_complete(&self, _code: &str) -> Completeness {
        Completeness::Unknown
    }
}
