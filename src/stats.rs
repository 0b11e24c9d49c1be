use std::{fmt, path::Path, time::Instant};

use crate::util;

pub struct RecordingStats {
    pub started: Instant,
}

pub struct RecordingSummary {
    pub elapsed_secs: u64,
    pub bytes: Option<u64>,
}

impl RecordingStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn summary(&self, output: &Path) -> RecordingSummary {
        RecordingSummary {
            elapsed_secs: self.started.elapsed().as_secs(),
            bytes: std::fs::metadata(output).ok().map(|m| m.len()),
        }
    }
}

impl Default for RecordingStats {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_duration(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

impl fmt::Display for RecordingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_duration(self.elapsed_secs))?;
        if let Some(bytes) = self.bytes {
            write!(f, ", {}", util::format_bytes(bytes))?;
        }
        Ok(())
    }
}
