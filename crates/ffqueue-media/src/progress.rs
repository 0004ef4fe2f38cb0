//! FFmpeg progress parsing.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};

/// Minimum percentage advance before another progress update is emitted.
pub const DEFAULT_PROGRESS_THRESHOLD: f64 = 0.1;

/// FFmpeg stat line, e.g.
/// `frame=  125 fps=0.0 q=-1.0 Lsize=  12kB time=00:00:04.96 bitrate=  19.8kbits/s speed=20.1x`.
///
/// The `frame/fps/q` prefix is missing for audio-only outputs, and newer
/// builds insert `dup=`/`drop=` before `speed=`.
static STAT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?:frame=\s*(?P<frame>\d+)\s+fps=\s*(?P<fps>[\d.]+)\s+q=\s*(?P<q>[-\d.]+)\s+)?",
        r"(?:L?size=\s*(?P<size>\d+)\w*\s+)?",
        r"time=\s*(?P<time>-?[\d:.]+)\s+",
        r"bitrate=\s*(?:(?P<bitrate>[\d.]+)\w*/s|N/A)\s+",
        r"(?:.*?\s)?speed=\s*(?:(?P<speed>[\d.]+)x|N/A)",
    ))
    .expect("stat line pattern is valid")
});

/// Prefixes of stat fragments and `-progress` keys that are neither
/// progress records nor worth forwarding as log output.
const NOISE_PREFIXES: &[&str] = &[
    "frame=",
    "fps=",
    "size=",
    "time=",
    "bitrate=",
    "speed=",
    "Parsed_",
    "stream_",
    "total_size=",
    "out_time",
    "dup_frames=",
    "drop_frames=",
    "progress=",
];

/// One parsed progress record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Current frame number
    pub frame: Option<u64>,
    /// Current FPS
    pub fps: Option<f64>,
    /// Output size so far in kilobytes
    pub size_kb: Option<u64>,
    /// Output time in seconds; `None` when FFmpeg reports a negative or unparsable time
    pub elapsed_seconds: Option<f64>,
    /// Bitrate in kbit/s
    pub bitrate_kbps: Option<f64>,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: Option<f64>,
}

impl ProgressRecord {
    /// Parse an FFmpeg stat line.
    pub fn parse_stat_line(line: &str) -> Option<Self> {
        let caps = STAT_LINE.captures(line)?;
        let num = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<f64>().ok());

        Some(Self {
            frame: caps.name("frame").and_then(|m| m.as_str().parse().ok()),
            fps: num("fps"),
            size_kb: caps.name("size").and_then(|m| m.as_str().parse().ok()),
            elapsed_seconds: caps.name("time").and_then(|m| parse_time_to_seconds(m.as_str())),
            bitrate_kbps: num("bitrate"),
            speed: num("speed"),
        })
    }

    /// Parse a `-progress pipe:2` key/value line carrying the output time.
    pub fn parse_key_value(line: &str) -> Option<Self> {
        let (key, value) = line.trim().split_once('=')?;
        let elapsed_seconds = match key {
            "out_time" => parse_time_to_seconds(value),
            // FFmpeg reports out_time_ms in microseconds as well.
            "out_time_us" | "out_time_ms" => value
                .parse::<i64>()
                .ok()
                .filter(|us| *us >= 0)
                .map(|us| us as f64 / 1_000_000.0),
            _ => return None,
        };

        Some(Self {
            elapsed_seconds,
            ..Default::default()
        })
    }

    /// Parse either supported progress format.
    pub fn parse(line: &str) -> Option<Self> {
        Self::parse_stat_line(line).or_else(|| Self::parse_key_value(line))
    }

    /// Calculate progress percentage given total duration in seconds.
    pub fn percentage(&self, total_duration_sec: f64) -> Option<f64> {
        let elapsed = self.elapsed_seconds?;
        if total_duration_sec <= 0.0 {
            return None;
        }
        Some((elapsed / total_duration_sec * 100.0).clamp(0.0, 100.0))
    }
}

/// Parse `HH:MM:SS.frac`, `MM:SS.frac` or bare seconds.
pub fn parse_time_to_seconds(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    let mut values = Vec::with_capacity(parts.len());
    for part in &parts {
        let value: f64 = part.parse().ok()?;
        if !value.is_finite() || value.is_sign_negative() {
            return None;
        }
        values.push(value);
    }

    match values.as_slice() {
        [h, m, s] => Some(h * 3600.0 + m * 60.0 + s),
        [m, s] => Some(m * 60.0 + s),
        [s] => Some(*s),
        _ => None,
    }
}

/// Check that a duration hint can be used for percentages.
pub fn validate_duration(duration_sec: Option<f64>) -> MediaResult<f64> {
    match duration_sec {
        Some(d) if d.is_finite() && d > 0.0 => Ok(d),
        Some(d) => Err(MediaError::invalid_spec(format!(
            "duration_sec must be a positive number when progress is requested, got {d}"
        ))),
        None => Err(MediaError::invalid_spec(
            "duration_sec must be a positive number when progress is requested",
        )),
    }
}

/// Classification of one diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineEvent {
    /// A progress record. Holds the percentage to deliver when the
    /// emission threshold was crossed.
    Progress(Option<f64>),
    /// A stat fragment that is neither progress nor a message.
    Noise,
    /// Any other diagnostic output (warnings, errors, banner).
    Message,
}

/// Converts diagnostic lines into throttled progress percentages.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_duration_sec: Option<f64>,
    threshold: f64,
    last_reported: Option<f64>,
    last_observed: Option<f64>,
    last_record: Option<ProgressRecord>,
}

impl ProgressTracker {
    /// Create a tracker. Without a positive duration, progress records are
    /// recognized but never turned into percentages.
    pub fn new(total_duration_sec: Option<f64>) -> Self {
        Self {
            total_duration_sec: total_duration_sec.filter(|d| d.is_finite() && *d > 0.0),
            threshold: DEFAULT_PROGRESS_THRESHOLD,
            last_reported: None,
            last_observed: None,
            last_record: None,
        }
    }

    /// Set the minimum advance between emitted updates.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.max(0.0);
        self
    }

    /// Classify one line, updating the emission state.
    pub fn observe(&mut self, line: &str) -> LineEvent {
        let line = line.trim();
        if line.is_empty() {
            return LineEvent::Noise;
        }

        match ProgressRecord::parse(line) {
            Some(record) => {
                let pct = self
                    .total_duration_sec
                    .and_then(|total| record.percentage(total));
                self.last_record = Some(record);
                LineEvent::Progress(pct.and_then(|p| self.offer(p)))
            }
            None if NOISE_PREFIXES.iter().any(|p| line.starts_with(p)) => LineEvent::Noise,
            None => LineEvent::Message,
        }
    }

    fn offer(&mut self, pct: f64) -> Option<f64> {
        self.last_observed = Some(self.last_observed.map_or(pct, |prev| prev.max(pct)));

        let crossed = match self.last_reported {
            None => true,
            Some(last) => pct >= last + self.threshold || (pct >= 100.0 && last < 100.0),
        };
        if crossed {
            self.last_reported = Some(pct);
            Some(pct)
        } else {
            None
        }
    }

    /// The last observed percentage if it was held back by the threshold.
    pub fn flush(&mut self) -> Option<f64> {
        let observed = self.last_observed?;
        match self.last_reported {
            Some(last) if last >= observed => None,
            _ => {
                self.last_reported = Some(observed);
                Some(observed)
            }
        }
    }

    /// 100.0 if it has not been reported yet. Only meaningful after a
    /// successful exit with a known duration.
    pub fn finish_success(&mut self) -> Option<f64> {
        self.total_duration_sec?;
        if self.last_reported.is_some_and(|last| last >= 100.0) {
            return None;
        }
        self.last_observed = Some(100.0);
        self.last_reported = Some(100.0);
        Some(100.0)
    }

    /// Last percentage delivered to callers.
    pub fn last_reported(&self) -> Option<f64> {
        self.last_reported
    }

    /// Most recent progress record seen.
    pub fn last_record(&self) -> Option<&ProgressRecord> {
        self.last_record.as_ref()
    }
}
