//! Output handling for supervised processes.
//!
//! Every line read from a child's stdout or stderr is handed to a `LogSink`
//! together with a source tag such as `bitcoind[stdout]`. The production sink
//! forwards lines to the `log` facade; tests capture them in memory.

use std::fmt;

use strip_ansi_escapes::strip;

/// Indicates the source stream of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard Output.
    Stdout,
    /// Standard Error.
    Stderr,
}

impl StreamKind {
    pub fn label(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Builds the source tag attached to every line, e.g. `armory[stderr]`.
pub fn stream_tag(name: &str, stream: StreamKind) -> String {
    format!("{}[{}]", name, stream)
}

/// Destination for process output lines.
///
/// Implementations are called from the pipe reader tasks and must not block
/// for long.
pub trait LogSink: Send + Sync {
    fn write(&self, tag: &str, line: &str);
}

/// Forwards output lines to the `log` facade at a fixed level.
#[derive(Debug, Clone, Copy)]
pub struct LoggerSink {
    level: log::Level,
}

impl LoggerSink {
    pub fn new(level: log::Level) -> Self {
        Self { level }
    }
}

impl LogSink for LoggerSink {
    fn write(&self, tag: &str, line: &str) {
        log::log!(self.level, "{}: {}", tag, sanitize_text(line, true));
    }
}

/// Sanitizes text for display, optionally stripping ANSI escape codes.
///
/// If `strip_ansi` is true, ANSI codes are removed. Invalid UTF-8 sequences are replaced.
pub fn sanitize_text(text: &str, strip_ansi: bool) -> String {
    if !strip_ansi {
        return text.to_string();
    }
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}

/// Records every `(tag, line)` pair it receives.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: std::sync::Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn lines(&self) -> Vec<(String, String)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn lines_for(&self, tag: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(t, _)| t == tag)
            .map(|(_, line)| line)
            .collect()
    }
}

#[cfg(test)]
impl LogSink for MemorySink {
    fn write(&self, tag: &str, line: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((tag.to_string(), line.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_include_stream_label() {
        assert_eq!(stream_tag("bitcoind", StreamKind::Stdout), "bitcoind[stdout]");
        assert_eq!(stream_tag("armory", StreamKind::Stderr), "armory[stderr]");
    }

    #[test]
    fn strips_ansi_sequences() {
        let colored = "\u{1b}[32mSynced\u{1b}[0m block 100";
        assert_eq!(sanitize_text(colored, true), "Synced block 100");
        assert_eq!(sanitize_text(colored, false), colored);
    }

    #[test]
    fn memory_sink_filters_by_tag() {
        let sink = MemorySink::default();
        sink.write("a[stdout]", "one");
        sink.write("b[stdout]", "two");
        sink.write("a[stdout]", "three");
        assert_eq!(sink.lines_for("a[stdout]"), vec!["one", "three"]);
        assert_eq!(sink.lines().len(), 3);
    }
}
