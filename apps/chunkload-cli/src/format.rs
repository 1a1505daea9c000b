//! Human-readable output helpers.

const UNITS: [(u64, &str); 3] = [(1 << 30, "GB"), (1 << 20, "MB"), (1 << 10, "KB")];

/// Formats a byte count with the largest fitting unit, rounded up.
pub fn format_size(bytes: u64) -> String {
    for (scale, unit) in UNITS {
        if bytes >= scale {
            return format!("{}{unit}", bytes.div_ceil(scale));
        }
    }
    format!("{bytes}B")
}

/// Formats a transfer rate in bytes per second.
pub fn format_rate(bytes_per_second: f64) -> String {
    format!("{}/s", format_size(bytes_per_second.max(0.0) as u64))
}
