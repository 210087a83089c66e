use std::time::{Duration, Instant};

/// Rate limiter for progress lines: fires at most once per interval of wall-clock time.
#[derive(Debug)]
pub struct ProgressTicker {
    interval: Duration,
    last: Instant,
}

impl ProgressTicker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    /// True when a progress line is due; restarts the interval if so.
    pub fn tick(&mut self) -> bool {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

/// Format bytes into human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// "copied / total (percent)" for a running copy.
pub fn format_copy_progress(copied: u64, total: u64) -> String {
    if total == 0 {
        return format_bytes(copied);
    }
    let percent = copied as f64 * 100.0 / total as f64;
    format!(
        "{} / {} ({:.0}%)",
        format_bytes(copied),
        format_bytes(total),
        percent
    )
}
