use super::ConversionProgress;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2})(?:\.(\d+))?").expect("duration regex")
});

static OUT_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+):(\d{2}):(\d{2})(?:\.(\d+))?$").expect("out_time regex")
});

/// Parses ffmpeg `-progress pipe:1` key/value blocks into progress events.
///
/// A block ends with a `progress=continue` or `progress=end` line; only then
/// is an event produced.
#[derive(Debug, Default)]
pub struct ProgressParser {
    duration_seconds: Option<f64>,
    block: HashMap<String, String>,
}

impl ProgressParser {
    pub fn new(duration_seconds: Option<f64>) -> Self {
        Self {
            duration_seconds,
            block: HashMap::new(),
        }
    }

    pub fn set_duration(&mut self, duration_seconds: Option<f64>) {
        if let Some(duration) = duration_seconds.filter(|d| *d > 0.0) {
            self.duration_seconds = Some(duration);
        }
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration_seconds
    }

    pub fn feed(&mut self, line: &str) -> Option<ConversionProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let key = key.trim();
        let value = value.trim();

        if key != "progress" {
            self.block.insert(key.to_string(), value.to_string());
            return None;
        }

        let finished = value == "end";
        let block = std::mem::take(&mut self.block);
        Some(self.summarize(&block, finished))
    }

    fn summarize(&self, block: &HashMap<String, String>, finished: bool) -> ConversionProgress {
        let mut parts = Vec::new();
        if let Some(frame) = block.get("frame") {
            parts.push(format!("frame={}", frame));
        }
        let elapsed = out_time_seconds(block);
        if let Some(seconds) = elapsed {
            parts.push(format!("time={}", format_timestamp(seconds)));
        }
        if let Some(speed) = block.get("speed").filter(|s| *s != "N/A") {
            parts.push(format!("speed={}", speed));
        }
        if let Some(size) = block.get("total_size").filter(|s| *s != "N/A") {
            parts.push(format!("size={}B", size));
        }

        let percent = if finished {
            Some(100.0)
        } else {
            match (elapsed, self.duration_seconds) {
                (Some(elapsed), Some(total)) => Some(((elapsed / total) * 100.0).clamp(0.0, 100.0) as f32),
                _ => None,
            }
        };

        let message = if finished {
            "Transcoding finished".to_string()
        } else if parts.is_empty() {
            "Transcoding".to_string()
        } else {
            parts.join(" ")
        };

        ConversionProgress { message, percent }
    }
}

/// Extract the input duration ffmpeg prints in its stderr header.
pub fn parse_duration(line: &str) -> Option<f64> {
    let caps = DURATION_RE.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    let fraction = caps
        .get(4)
        .and_then(|m| format!("0.{}", m.as_str()).parse::<f64>().ok())
        .unwrap_or(0.0);
    Some(hours * 3600.0 + minutes * 60.0 + seconds + fraction)
}

fn out_time_seconds(block: &HashMap<String, String>) -> Option<f64> {
    if let Some(us) = block
        .get("out_time_us")
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v >= 0)
    {
        return Some(us as f64 / 1_000_000.0);
    }

    let caps = OUT_TIME_RE.captures(block.get("out_time")?)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    let fraction = caps
        .get(4)
        .and_then(|m| format!("0.{}", m.as_str()).parse::<f64>().ok())
        .unwrap_or(0.0);
    Some(hours * 3600.0 + minutes * 60.0 + seconds + fraction)
}

fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0);
    let hours = (total / 3600.0) as u64;
    let minutes = ((total % 3600.0) / 60.0) as u64;
    let secs = total % 60.0;
    format!("{}:{:02}:{:05.2}", hours, minutes, secs)
}
