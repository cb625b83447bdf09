//! Per-run log buffering
//!
//! Tests run in parallel, so each run collects its engine output in its own
//! buffer and hands the whole buffer to one serialized sink when the run
//! ends. Lines from one run stay together; runs interleave only at run
//! boundaries.

use once_cell::sync::Lazy;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Every Nth buffered line is echoed through tracing as a progress sample
const SAMPLE_EVERY: usize = 50;

pub type SharedSink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Process-wide destination of merged run logs
static SERIALIZED_SINK: Lazy<SharedSink> =
    Lazy::new(|| Arc::new(Mutex::new(Box::new(std::io::stdout()) as Box<dyn Write + Send>)));

#[derive(Default)]
struct RunBuffer {
    lines: Mutex<Vec<String>>,
    count: AtomicUsize,
}

/// Cheap handle used by the engine to record output lines
#[derive(Clone)]
pub enum RunLogger {
    Buffered(Arc<RunBufferHandle>),
    Discard,
}

/// Shared buffer behind a `RunLogger::Buffered`
pub struct RunBufferHandle {
    buffer: RunBuffer,
    label: String,
}

impl RunLogger {
    pub fn discard() -> Self {
        RunLogger::Discard
    }

    pub fn is_discard(&self) -> bool {
        matches!(self, RunLogger::Discard)
    }

    /// Record one line (multi-line text is split)
    pub fn log(&self, text: &str) {
        let RunLogger::Buffered(handle) = self else {
            return;
        };
        for line in text.lines() {
            let n = handle.buffer.count.fetch_add(1, Ordering::Relaxed) + 1;
            if n % SAMPLE_EVERY == 0 {
                info!(run = %handle.label, "logging sample: {}", line);
            }
            match handle.buffer.lines.lock() {
                Ok(mut lines) => lines.push(line.to_string()),
                Err(poisoned) => poisoned.into_inner().push(line.to_string()),
            }
        }
    }

    pub fn line_count(&self) -> usize {
        match self {
            RunLogger::Buffered(handle) => handle.buffer.count.load(Ordering::Relaxed),
            RunLogger::Discard => 0,
        }
    }
}

/// Scope of one run's buffer: created at run start, merged into the
/// serialized sink when dropped, on every exit path.
pub struct RunLog {
    handle: Arc<RunBufferHandle>,
    sink: SharedSink,
}

impl RunLog {
    pub fn begin(label: impl Into<String>) -> Self {
        Self::begin_with_sink(label, SERIALIZED_SINK.clone())
    }

    pub fn begin_with_sink(label: impl Into<String>, sink: SharedSink) -> Self {
        Self {
            handle: Arc::new(RunBufferHandle {
                buffer: RunBuffer::default(),
                label: label.into(),
            }),
            sink,
        }
    }

    pub fn logger(&self) -> RunLogger {
        RunLogger::Buffered(self.handle.clone())
    }

    fn merge(&self) -> std::io::Result<()> {
        let lines = match self.handle.buffer.lines.lock() {
            Ok(mut lines) => std::mem::take(&mut *lines),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        if lines.is_empty() {
            return Ok(());
        }

        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        for line in &lines {
            writeln!(sink, "{}", line)?;
        }
        sink.flush()
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        if let Err(e) = self.merge() {
            tracing::warn!("Failed to flush run log for {}: {}", self.handle.label, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that appends into a shared byte vector
    struct VecSink(Arc<Mutex<Vec<u8>>>);

    impl Write for VecSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture() -> (SharedSink, Arc<Mutex<Vec<u8>>>) {
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let sink: SharedSink =
            Arc::new(Mutex::new(Box::new(VecSink(bytes.clone())) as Box<dyn Write + Send>));
        (sink, bytes)
    }

    #[test]
    fn test_lines_reach_sink_only_on_drop() {
        let (sink, bytes) = capture();
        let log = RunLog::begin_with_sink("examples/default", sink);
        let logger = log.logger();
        logger.log("Initializing the backend...\nTerraform has been successfully initialized!");

        assert!(bytes.lock().unwrap().is_empty());
        drop(log);

        let written = String::from_utf8(bytes.lock().unwrap().clone()).unwrap();
        assert_eq!(
            written,
            "Initializing the backend...\nTerraform has been successfully initialized!\n"
        );
        assert_eq!(logger.line_count(), 2);
    }

    #[test]
    fn test_runs_stay_contiguous() {
        let (sink, bytes) = capture();
        let a = RunLog::begin_with_sink("a", sink.clone());
        let b = RunLog::begin_with_sink("b", sink);
        a.logger().log("a1");
        b.logger().log("b1");
        a.logger().log("a2");
        drop(b);
        drop(a);

        let written = String::from_utf8(bytes.lock().unwrap().clone()).unwrap();
        assert_eq!(written, "b1\na1\na2\n");
    }

    #[test]
    fn test_discard_logger_records_nothing() {
        let logger = RunLogger::discard();
        logger.log("secret output");
        assert_eq!(logger.line_count(), 0);
        assert!(logger.is_discard());
    }
}
