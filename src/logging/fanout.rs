//! In-process log sink shared by the dashboard views.
//!
//! Each formatted event is recorded in the recent-lines ring and offered to
//! live subscribers of the SSE log stream.

use super::recent::recent_logs;
use super::state::LOG_BROADCAST_TX;
use std::io::{self, Write};
use tokio::sync::broadcast;
use tracing_subscriber::fmt::writer::MakeWriter;

/// Lagging SSE clients lose the oldest lines past this depth
const SUBSCRIBER_DEPTH: usize = 1024;

fn sender() -> &'static broadcast::Sender<String> {
    LOG_BROADCAST_TX.get_or_init(|| broadcast::channel(SUBSCRIBER_DEPTH).0)
}

/// Record one formatted line. Trailing line breaks are dropped.
pub(crate) fn publish_line(line: &str) {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return;
    }
    recent_logs().push(line.to_string());
    // Without subscribers the line still lands in the ring
    let _ = sender().send(line.to_string());
}

/// Live feed of formatted log lines
pub fn subscribe_log_lines() -> broadcast::Receiver<String> {
    sender().subscribe()
}

/// `MakeWriter` handing each event its own buffer
#[derive(Clone, Copy, Default)]
pub struct FanoutMakeWriter;

/// Collects the pieces `fmt` writes for one event, published on drop
pub struct EventBuffer(Vec<u8>);

impl<'a> MakeWriter<'a> for FanoutMakeWriter {
    type Writer = EventBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        EventBuffer(Vec::with_capacity(256))
    }
}

impl Write for EventBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EventBuffer {
    fn drop(&mut self) {
        if !self.0.is_empty() {
            publish_line(&String::from_utf8_lossy(&self.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_lines_reach_ring_and_subscribers() {
        let mut rx = subscribe_log_lines();
        {
            let mut w = FanoutMakeWriter.make_writer();
            w.write_all(b"2025-06-01 INFO fanout_marker_a").unwrap();
            w.write_all(b" tail\r\n").unwrap();
        }
        publish_line("\n");

        // Other tests may be logging concurrently
        let got: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(got.iter().any(|l| l == "2025-06-01 INFO fanout_marker_a tail"));
        assert!(!got.iter().any(String::is_empty));
        assert!(
            recent_logs()
                .tail(crate::logging::RECENT_CAPACITY)
                .iter()
                .any(|l| l.ends_with("fanout_marker_a tail"))
        );
    }
}
