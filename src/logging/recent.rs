use super::state::RECENT_LOGS;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Lines kept for the dashboard log view
pub const RECENT_CAPACITY: usize = 500;

/// Bounded ring buffer of formatted log lines; oldest lines fall off.
#[derive(Debug)]
pub struct RecentLogs {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl RecentLogs {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == self.capacity {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    /// Up to `n` most recent lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        self.lines.lock().map_or_else(
            |_| Vec::new(),
            |lines| {
                let skip = lines.len().saturating_sub(n);
                lines.iter().skip(skip).cloned().collect()
            },
        )
    }

    pub fn len(&self) -> usize {
        self.lines.lock().map_or(0, |l| l.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn recent_logs() -> &'static RecentLogs {
    RECENT_LOGS.get_or_init(|| RecentLogs::new(RECENT_CAPACITY))
}

/// Up to `n` of the most recently logged lines, oldest first
pub fn recent_lines(n: usize) -> Vec<String> {
    recent_logs().tail(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_when_full() {
        let buf = RecentLogs::new(3);
        for i in 0..5 {
            buf.push(format!("line {i}"));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.tail(10), vec!["line 2", "line 3", "line 4"]);
        assert_eq!(buf.tail(1), vec!["line 4"]);
    }
}
