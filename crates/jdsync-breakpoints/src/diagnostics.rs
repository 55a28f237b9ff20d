use std::error::Error;

use parking_lot::Mutex;

/// Destination for unexpected failures that are absorbed rather than
/// propagated. Implementations must not block.
pub trait DiagnosticSink: Send + Sync {
    fn log(&self, error: &(dyn Error + 'static));
}

/// Reports absorbed failures through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn log(&self, error: &(dyn Error + 'static)) {
        tracing::error!(
            target: "jdsync.diagnostics",
            error = %render(error),
            "absorbed failure"
        );
    }
}

/// Keeps every absorbed failure in memory.
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    entries: Mutex<Vec<String>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl DiagnosticSink for RecordingDiagnostics {
    fn log(&self, error: &(dyn Error + 'static)) {
        self.entries.lock().push(render(error));
    }
}

/// `error: cause: cause ...`
fn render(error: &(dyn Error + 'static)) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
