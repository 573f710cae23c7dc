//! Progress reporter (spec §4.9).

use std::collections::VecDeque;
use std::io::Write as _;
use std::sync::Mutex;
use std::time::Duration;

const ETA_WINDOW: usize = 10;
const MIN_COMPLETIONS_FOR_ETA: usize = 2;

/// Strip ANSI escape codes, for the file-log sink (spec §4.9).
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Moving average over the last [`ETA_WINDOW`] completion durations,
/// displayed once at least [`MIN_COMPLETIONS_FOR_ETA`] completions have
/// been observed (spec §4.9).
#[derive(Debug, Default)]
struct EtaTracker {
    durations: VecDeque<Duration>,
}

impl EtaTracker {
    fn record(&mut self, duration: Duration) {
        self.durations.push_back(duration);
        if self.durations.len() > ETA_WINDOW {
            self.durations.pop_front();
        }
    }

    fn estimate(&self, remaining: usize) -> Option<Duration> {
        if self.durations.len() < MIN_COMPLETIONS_FOR_ETA {
            return None;
        }
        let total: Duration = self.durations.iter().sum();
        let avg = total / self.durations.len() as u32;
        Some(avg * remaining as u32)
    }
}

/// One human-readable line per lifecycle event, plus an end-of-run
/// summary. Writes are single atomic line-oriented writes: interleaving
/// between workers is expected and correct, but no line is fragmented.
pub struct ProgressReporter<W: std::io::Write + Send> {
    sink: Mutex<W>,
    eta: Mutex<EtaTracker>,
    strip_ansi_for_sink: bool,
}

impl<W: std::io::Write + Send> ProgressReporter<W> {
    pub fn new(sink: W, strip_ansi_for_sink: bool) -> Self {
        Self {
            sink: Mutex::new(sink),
            eta: Mutex::new(EtaTracker::default()),
            strip_ansi_for_sink,
        }
    }

    fn write_line(&self, line: &str) {
        let rendered = if self.strip_ansi_for_sink {
            strip_ansi(line)
        } else {
            line.to_string()
        };
        let mut sink = self.sink.lock().unwrap();
        let _ = writeln!(sink, "{rendered}");
        let _ = sink.flush();
    }

    pub fn task_succeeded(&self, path: &str, duration: Duration) {
        self.eta.lock().unwrap().record(duration);
        self.write_line(&format!("OK   {path} ({}ms)", duration.as_millis()));
    }

    pub fn task_failed(&self, path: &str, short_error: &str) {
        self.write_line(&format!("FAIL {path} {short_error}"));
    }

    /// Current ETA for `remaining` outstanding tasks, if enough
    /// completions have been observed to estimate one.
    pub fn eta(&self, remaining: usize) -> Option<Duration> {
        self.eta.lock().unwrap().estimate(remaining)
    }

    pub fn summary(&self, processed: usize, failed: usize, retries: u32) {
        self.write_line(&format!(
            "Done: {processed} processed, {failed} failed, {retries} retries"
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_removes_color_codes() {
        let input = "\u{1b}[32mOK\u{1b}[0m path";
        assert_eq!(strip_ansi(input), "OK path");
    }

    #[test]
    fn test_strip_ansi_passthrough_plain_text() {
        assert_eq!(strip_ansi("plain text"), "plain text");
    }

    #[test]
    fn test_eta_none_before_two_completions() {
        let mut tracker = EtaTracker::default();
        assert!(tracker.estimate(5).is_none());
        tracker.record(Duration::from_millis(100));
        assert!(tracker.estimate(5).is_none());
    }

    #[test]
    fn test_eta_present_after_two_completions() {
        let mut tracker = EtaTracker::default();
        tracker.record(Duration::from_millis(100));
        tracker.record(Duration::from_millis(200));
        let eta = tracker.estimate(2).unwrap();
        // average of 100,200 = 150ms, times 2 remaining = 300ms
        assert_eq!(eta, Duration::from_millis(300));
    }

    #[test]
    fn test_eta_window_caps_at_ten() {
        let mut tracker = EtaTracker::default();
        for _ in 0..15 {
            tracker.record(Duration::from_millis(100));
        }
        assert_eq!(tracker.durations.len(), 10);
    }

    #[test]
    fn test_task_succeeded_writes_ok_line() {
        let buf = Vec::new();
        let reporter = ProgressReporter::new(buf, false);
        reporter.task_succeeded("src/a.rs", Duration::from_millis(50));
        let sink = reporter.sink.lock().unwrap();
        let text = String::from_utf8(sink.clone()).unwrap();
        assert!(text.starts_with("OK   src/a.rs"));
    }

    #[test]
    fn test_task_failed_writes_fail_line() {
        let buf = Vec::new();
        let reporter = ProgressReporter::new(buf, false);
        reporter.task_failed("src/b.rs", "TIMEOUT");
        let sink = reporter.sink.lock().unwrap();
        let text = String::from_utf8(sink.clone()).unwrap();
        assert!(text.starts_with("FAIL src/b.rs TIMEOUT"));
    }

    #[test]
    fn test_strips_ansi_when_enabled() {
        let buf = Vec::new();
        let reporter = ProgressReporter::new(buf, true);
        reporter.write_line("\u{1b}[31mFAIL\u{1b}[0m x");
        let sink = reporter.sink.lock().unwrap();
        let text = String::from_utf8(sink.clone()).unwrap();
        assert_eq!(text.trim(), "FAIL x");
    }
}
