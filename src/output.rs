use crossbeam_channel::{bounded, Sender, TrySendError};
use log::{error, info, warn};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::metrics::Metrics;

/// The downstream collaborator (out of scope per the spec: "the output log
/// producer"). Anything that can take ownership of a finished JSON line.
pub trait OutputSink: Send + Sync {
    /// Enqueue `line` for delivery, blocking up to `timeout` under
    /// backpressure; returns `false` (and the caller counts a drop) if the
    /// queue is still full once the deadline lapses.
    fn send_line(&self, line: String, timeout: Duration) -> bool;
}

/// A bounded channel feeding a dedicated writer thread — the concrete stand-in
/// for "a configured message-bus topic". Default writer is stdout (one JSON
/// object per line), matching `threads::exporter`'s original `info!`-per-line
/// shape but on its own unbuffered sink instead of the logger.
pub struct ChannelOutputSink {
    tx: Sender<String>,
}

impl ChannelOutputSink {
    pub fn new(capacity: usize, mut writer: Box<dyn Write + Send>) -> Self {
        let (tx, rx) = bounded::<String>(capacity);

        thread::Builder::new()
            .name("Exporter".to_string())
            .spawn(move || {
                while let Ok(line) = rx.recv() {
                    if let Err(e) = writeln!(writer, "{}", line) {
                        error!("Failed to write output line: {}", e);
                    }
                }
                info!("Output sink channel closed, exporter thread exiting");
            })
            .expect("failed to spawn Exporter thread");

        ChannelOutputSink { tx }
    }

    pub fn stdout(capacity: usize) -> Self {
        Self::new(capacity, Box::new(std::io::stdout()))
    }
}

impl OutputSink for ChannelOutputSink {
    fn send_line(&self, line: String, timeout: Duration) -> bool {
        match self.tx.send_timeout(line, timeout) {
            Ok(()) => true,
            Err(crossbeam_channel::SendTimeoutError::Timeout(_)) => false,
            Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                warn!("Output sink disconnected, dropping line");
                false
            }
        }
    }
}

/// Wraps any `OutputSink` with the queue-full counter bookkeeping described
/// in the error handling design (§7): block bounded time, then drop with a
/// counter.
pub struct MeteredOutputSink<S> {
    inner: S,
    metrics: Arc<Metrics>,
}

impl<S: OutputSink> MeteredOutputSink<S> {
    pub fn new(inner: S, metrics: Arc<Metrics>) -> Self {
        MeteredOutputSink { inner, metrics }
    }
}

impl<S: OutputSink> OutputSink for MeteredOutputSink<S> {
    fn send_line(&self, line: String, timeout: Duration) -> bool {
        let ok = self.inner.send_line(line, timeout);
        if !ok {
            Metrics::incr(&self.metrics.output_queue_full_drops);
        }
        ok
    }
}

// `TrySendError` is re-exported above purely so downstream modules that want
// a non-blocking probe (e.g. tests) can match on it without pulling in
// crossbeam-channel directly.
pub type TrySendErr = TrySendError<String>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct VecSink(Mutex<Vec<String>>);

    impl OutputSink for VecSink {
        fn send_line(&self, line: String, _timeout: Duration) -> bool {
            self.0.lock().unwrap().push(line);
            true
        }
    }

    #[test]
    fn metered_sink_counts_drops() {
        struct AlwaysFull;
        impl OutputSink for AlwaysFull {
            fn send_line(&self, _line: String, _timeout: Duration) -> bool {
                false
            }
        }

        let metrics = Arc::new(Metrics::default());
        let sink = MeteredOutputSink::new(AlwaysFull, metrics.clone());
        assert!(!sink.send_line("x".to_string(), Duration::from_millis(1)));
        assert_eq!(metrics.output_queue_full_drops.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn vec_sink_records_lines() {
        let sink = VecSink(Mutex::new(vec![]));
        sink.send_line("a".to_string(), Duration::from_millis(1));
        sink.send_line("b".to_string(), Duration::from_millis(1));
        assert_eq!(sink.0.lock().unwrap().as_slice(), &["a".to_string(), "b".to_string()]);
    }
}
