use std::io::{self, Write};
use std::sync::Mutex;

use serde::Serialize;

use crate::progress::{ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Progress lines on stdout.
    Text,
    /// Progress is silenced and a JSON summary is printed at the end.
    Json,
}

/// Stdout sink shared by all workers of a load; whole lines never interleave.
pub struct ConsoleOutput {
    mode: OutputMode,
    stdout: Mutex<io::Stdout>,
}

impl ConsoleOutput {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            stdout: Mutex::new(io::stdout()),
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Banner and summary lines; printed in text mode only.
    pub fn line(&self, message: &str) -> io::Result<()> {
        if self.mode == OutputMode::Json {
            return Ok(());
        }
        self.write_line(message)
    }

    pub fn print_json<T: Serialize>(&self, value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        self.write_line(&json)
    }

    fn write_line(&self, message: &str) -> io::Result<()> {
        let stdout = self
            .stdout
            .lock()
            .map_err(|_| io::Error::other("stdout lock poisoned"))?;
        let mut handle = stdout.lock();
        handle.write_all(message.as_bytes())?;
        handle.write_all(b"\n")?;
        handle.flush()
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        if let Err(err) = self.line(&event.message) {
            tracing::warn!(error = %err, "failed to write progress line");
        }
    }
}
