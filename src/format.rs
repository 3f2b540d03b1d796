//! Human-readable rendering of sizes, rates, counts and durations.

use num_format::{Locale, ToFormattedString};

const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

/// Largest binary unit not exceeding `value`, as (scaled value, unit index).
fn scale(value: f64) -> Option<(f64, usize)> {
    let mut scaled = value;
    let mut unit = None;
    while scaled >= 1024.0 && unit.map_or(true, |u| u + 1 < UNITS.len()) {
        scaled /= 1024.0;
        unit = Some(unit.map_or(0, |u| u + 1));
    }
    unit.map(|u| (scaled, u))
}

/// `1536` -> `"1.50 KB"`
pub fn format_bytes(bytes: u64) -> String {
    match scale(bytes as f64) {
        Some((value, unit)) => format!("{:.2} {}", value, UNITS[unit]),
        None => format!("{} B", bytes),
    }
}

/// Compact form for fixed-width columns: `"512B"`, `"3K"`, `"1.5G"`.
pub fn format_bytes_short(bytes: u64) -> String {
    match scale(bytes as f64) {
        Some((value, unit)) if unit >= 2 => format!("{:.1}{}", value, &UNITS[unit][..1]),
        Some((value, unit)) => format!("{:.0}{}", value, &UNITS[unit][..1]),
        None => format!("{}B", bytes),
    }
}

/// Bytes per second. Negative or non-finite input renders as zero.
pub fn format_throughput(bytes_per_sec: f64) -> String {
    let rate = if bytes_per_sec.is_finite() {
        bytes_per_sec.max(0.0)
    } else {
        0.0
    };
    match scale(rate) {
        Some((value, unit)) => format!("{:.2} {}/s", value, UNITS[unit]),
        None => format!("{:.0} B/s", rate),
    }
}

/// Thousands separators, e.g. `1234567` -> `"1,234,567"`.
pub fn format_count(count: u64) -> String {
    count.to_formatted_string(&Locale::en)
}

/// Uptime style: `"3d 04:05:06"`, or `"04:05:06"` under a day.
pub fn format_duration(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;
    if days > 0 {
        format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

/// Cuts `s` to at most `max_chars` characters, marking the cut with `..`.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars <= 2 {
        return s.chars().take(max_chars).collect();
    }
    let mut out: String = s.chars().take(max_chars - 2).collect();
    out.push_str("..");
    out
}
