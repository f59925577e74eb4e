// src/backend/progress.rs

//! Turns ffmpeg's textual output into `EngineEvent::Progress`.
//!
//! ffmpeg prints the input duration once on stderr
//! (`  Duration: 00:01:02.50, start: ...`) and, with `-progress pipe:1`,
//! a stream of `key=value` blocks on stdout. We only need `out_time_us` and
//! the final `progress=end`.

use std::sync::LazyLock;

use regex::Regex;

use super::EngineEvent;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("duration regex is valid")
});

/// Per-exec progress state.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    duration_us: Option<u64>,
    last_time_us: u64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect one stderr line for the input duration header.
    ///
    /// Only the first duration is kept; later ones belong to extra inputs.
    pub fn observe_stderr(&mut self, line: &str) {
        if self.duration_us.is_some() {
            return;
        }
        if let Some(us) = parse_duration_us(line) {
            self.duration_us = Some(us);
        }
    }

    /// Inspect one stdout line of `-progress` output.
    pub fn observe_progress(&mut self, line: &str) -> Option<EngineEvent> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            // `out_time_ms` is also microseconds in ffmpeg's output.
            "out_time_us" | "out_time_ms" => {
                let us: u64 = value.trim().parse().ok()?;
                self.last_time_us = us;
                Some(self.event(us))
            }
            "progress" if value.trim() == "end" => Some(EngineEvent::Progress {
                ratio: 1.0,
                time_ns: self.last_time_us.saturating_mul(1_000),
            }),
            _ => None,
        }
    }

    fn event(&self, time_us: u64) -> EngineEvent {
        let ratio = match self.duration_us {
            Some(total) if total > 0 => (time_us as f64 / total as f64).clamp(0.0, 1.0),
            _ => 0.0,
        };
        EngineEvent::Progress {
            ratio,
            time_ns: time_us.saturating_mul(1_000),
        }
    }
}

fn parse_duration_us(line: &str) -> Option<u64> {
    let caps = DURATION_RE.captures(line)?;
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    let whole = (hours * 3600 + minutes * 60) as f64 + seconds;
    Some((whole * 1_000_000.0).round() as u64)
}
