//! Resource-limit translation
//!
//! Human-readable limit strings from configuration are converted into the
//! numeric units the container engine expects. Bad input is a configuration
//! error and recovers by defaulting; it is never fatal.

use tracing::warn;

/// Default memory limit when the configured string is unparsable: 512 MiB
pub const DEFAULT_MEMORY_BYTES: i64 = 512 * 1024 * 1024;

/// Default CPU quota when the configured string is unparsable: one core
pub const DEFAULT_CPU_QUOTA: i64 = 100_000;

/// CPU quota units per whole core (the engine's `cpu_quota` is measured
/// against a 100ms period)
const CPU_QUOTA_PER_CORE: f64 = 100_000.0;

/// Parse a memory limit string such as `"512m"`, `"2g"`, `"131072k"`, or a
/// bare byte count into bytes. Unparsable input yields the 512 MiB default.
pub fn parse_memory_limit(input: &str) -> i64 {
    let trimmed = input.trim().to_ascii_lowercase();
    let (digits, multiplier) = match trimmed.strip_suffix(['k', 'm', 'g']) {
        Some(prefix) => {
            let multiplier = match trimmed.as_bytes()[trimmed.len() - 1] {
                b'k' => 1024i64,
                b'm' => 1024 * 1024,
                _ => 1024 * 1024 * 1024,
            };
            (prefix, multiplier)
        }
        None => (trimmed.as_str(), 1),
    };

    match digits.parse::<i64>() {
        Ok(value) if value > 0 => value.saturating_mul(multiplier),
        _ => {
            warn!(
                input,
                "unparsable memory limit, defaulting to {} bytes", DEFAULT_MEMORY_BYTES
            );
            DEFAULT_MEMORY_BYTES
        }
    }
}

/// Parse a fractional-core CPU limit string (`"0.5"` → 50_000, `"2"` →
/// 200_000) into engine quota units. Unparsable input yields one core.
pub fn parse_cpu_limit(input: &str) -> i64 {
    match input.trim().parse::<f64>() {
        Ok(cores) if cores > 0.0 && cores.is_finite() => (cores * CPU_QUOTA_PER_CORE).round() as i64,
        _ => {
            warn!(input, "unparsable CPU limit, defaulting to one core");
            DEFAULT_CPU_QUOTA
        }
    }
}
