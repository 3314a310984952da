use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Receives operator-facing progress lines. Shared by all workers of a load.
pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

/// Counters owned by a single worker; never shared or merged.
#[derive(Debug, Clone)]
pub struct ProgressCounters {
    started: Instant,
    pub documents: u64,
    pub matched: u64,
    pub modified: u64,
    pub failed: u64,
}

impl ProgressCounters {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            documents: 0,
            matched: 0,
            modified: 0,
            failed: 0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            documents: self.documents,
            matched: self.matched,
            modified: self.modified,
            failed: self.failed,
            elapsed_secs: self.elapsed().as_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub documents: u64,
    pub matched: u64,
    pub modified: u64,
    pub failed: u64,
    pub elapsed_secs: u64,
}
