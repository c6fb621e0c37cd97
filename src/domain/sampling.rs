//! Order statistics over response-time samples
//!
//! All functions expect (or produce) ascending sequences. Empty inputs yield 0
//! so derived figures never become NaN.

/// Numeric sample that can take part in order statistics
pub trait Sample: Copy {
    fn as_f64(self) -> f64;
}

impl Sample for u64 {
    #[inline]
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Sample for f64 {
    #[inline]
    fn as_f64(self) -> f64 {
        self
    }
}

/// Percentile by linear interpolation between order statistics.
///
/// `index = p/100 * (n-1)`; an integral index returns that sample, otherwise
/// the two neighbours are blended by the fractional part. `p` is clamped to
/// `[0, 100]`.
pub fn percentile<T: Sample>(sorted: &[T], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let p = p.clamp(0.0, 100.0);
    let index = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    let low = sorted[lower].as_f64();
    if lower == upper {
        return low;
    }

    let high = sorted[upper.min(sorted.len() - 1)].as_f64();
    let weight = index - lower as f64;
    low * (1.0 - weight) + high * weight
}

/// Arithmetic mean, 0 for an empty slice
pub fn mean<T: Sample>(values: &[T]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: f64 = values.iter().map(|v| v.as_f64()).sum();
    sum / values.len() as f64
}

/// Merge an unsorted batch into an already ascending sequence.
///
/// Only the batch is sorted; the two runs are then combined with a two-pointer
/// merge, so the cost is `O(m log m + n + m)` instead of re-sorting all
/// `n + m` samples. `batch` is left empty.
pub fn sort_and_merge(sorted: &mut Vec<u64>, batch: &mut Vec<u64>) {
    if batch.is_empty() {
        return;
    }
    batch.sort_unstable();

    if sorted.is_empty() {
        std::mem::swap(sorted, batch);
        return;
    }

    // Fast path: batch lies entirely after the existing run
    if let (Some(&last), Some(&first)) = (sorted.last(), batch.first()) {
        if last <= first {
            sorted.append(batch);
            return;
        }
    }

    let left = std::mem::take(sorted);
    let mut merged = Vec::with_capacity(left.len() + batch.len());
    let (mut li, mut ri) = (0, 0);
    while li < left.len() && ri < batch.len() {
        if left[li] <= batch[ri] {
            merged.push(left[li]);
            li += 1;
        } else {
            merged.push(batch[ri]);
            ri += 1;
        }
    }
    merged.extend_from_slice(&left[li..]);
    merged.extend_from_slice(&batch[ri..]);

    *sorted = merged;
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_empty() {
        let empty: [u64; 0] = [];
        assert_eq!(percentile(&empty, 50.0), 0.0);
        assert_eq!(mean(&empty), 0.0);
    }

    #[test]
    fn test_percentile_bounds() {
        let samples = [3u64, 7, 11, 20, 42];
        assert_eq!(percentile(&samples, 0.0), 3.0);
        assert_eq!(percentile(&samples, 100.0), 42.0);
        assert_eq!(percentile(&samples, 50.0), 11.0);
    }

    #[test]
    fn test_percentile_single_sample() {
        let samples = [17u64];
        for p in [0.0, 50.0, 90.0, 95.0, 99.0, 100.0] {
            assert_eq!(percentile(&samples, p), 17.0);
        }
    }

    #[test]
    fn test_percentile_interpolates() {
        let samples: Vec<u64> = (1..=10).map(|v| v * 10).collect();
        // index 8.1 -> 90 * 0.9 + 100 * 0.1
        assert!((percentile(&samples, 90.0) - 91.0).abs() < 1e-9);
        // index 8.55 -> 90 * 0.45 + 100 * 0.55
        assert!((percentile(&samples, 95.0) - 95.5).abs() < 1e-9);
        assert!((mean(&samples) - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_clamps_out_of_range() {
        let samples = [1.0f64, 2.0, 3.0];
        assert_eq!(percentile(&samples, -5.0), 1.0);
        assert_eq!(percentile(&samples, 250.0), 3.0);
    }

    #[test]
    fn test_sort_and_merge_interleaved() {
        let mut sorted = vec![1, 4, 9, 12];
        let mut batch = vec![10, 2, 15, 4];
        sort_and_merge(&mut sorted, &mut batch);
        assert_eq!(sorted, vec![1, 2, 4, 4, 9, 10, 12, 15]);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_sort_and_merge_into_empty() {
        let mut sorted = Vec::new();
        let mut batch = vec![5, 3, 8];
        sort_and_merge(&mut sorted, &mut batch);
        assert_eq!(sorted, vec![3, 5, 8]);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_sort_and_merge_appends_tail() {
        let mut sorted = vec![1, 2, 3];
        let mut batch = vec![9, 4];
        sort_and_merge(&mut sorted, &mut batch);
        assert_eq!(sorted, vec![1, 2, 3, 4, 9]);
    }

    #[test]
    fn test_sort_and_merge_matches_full_sort() {
        let mut sorted: Vec<u64> = (0..200).step_by(3).collect();
        let mut batch: Vec<u64> = (0..150).rev().step_by(7).collect();

        let mut expected: Vec<u64> = sorted.iter().chain(batch.iter()).copied().collect();
        expected.sort_unstable();

        sort_and_merge(&mut sorted, &mut batch);
        assert_eq!(sorted, expected);
    }
}
