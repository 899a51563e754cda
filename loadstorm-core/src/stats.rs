//! Shared statistics helpers

/// Sort a response-time sample in ascending order.
///
/// NaN samples sort last; they only arise from corrupt engine output and are
/// harmless at the tail.
pub fn sort_samples(samples: &mut [f64]) {
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
}

/// Read the p-th percentile from an ascending-sorted sample using the
/// nearest-rank index `ceil(p/100 * n) - 1`, clamped to the sample bounds.
/// Returns 0.0 for an empty sample.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (p / 100.0 * n as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(n - 1);
    sorted[idx]
}
