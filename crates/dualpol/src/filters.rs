//! Gate-window filters shared by the algorithm modules.
//!
//! All filters ignore [`MISSING`] gates and leave them untouched.

use radar_common::MISSING;

#[inline]
pub fn is_missing(v: f64) -> bool {
    v == MISSING || !v.is_finite()
}

/// Window bounds `[lo, hi)` of length up to `len` centred on `i`.
#[inline]
pub(crate) fn window(i: usize, len: usize, n: usize) -> (usize, usize) {
    let half = len / 2;
    let lo = i.saturating_sub(half);
    let hi = (i + half + 1).min(n);
    (lo, hi)
}

/// In-place running median over `len` gates.
///
/// `src` and `work` are caller-owned scratch, reused between rays.
pub fn median_filter(data: &mut [f64], len: usize, src: &mut Vec<f64>, work: &mut Vec<f64>) {
    if len < 3 || data.is_empty() {
        return;
    }
    src.clear();
    src.extend_from_slice(data);
    let n = src.len();
    for i in 0..n {
        if is_missing(src[i]) {
            continue;
        }
        let (lo, hi) = window(i, len, n);
        work.clear();
        work.extend(src[lo..hi].iter().copied().filter(|v| !is_missing(*v)));
        work.sort_by(|a, b| a.total_cmp(b));
        data[i] = work[work.len() / 2];
    }
}

/// Standard deviation of `data` over a centred window of `len` gates.
///
/// Gates with fewer than three valid neighbours get [`MISSING`].
pub fn running_sdev(data: &[f64], len: usize, out: &mut [f64]) {
    let n = data.len().min(out.len());
    for i in 0..n {
        let (lo, hi) = window(i, len.max(1), n);
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for &v in &data[lo..hi] {
            if !is_missing(v) {
                count += 1;
                sum += v;
                sum_sq += v * v;
            }
        }
        out[i] = if count < 3 {
            MISSING
        } else {
            let mean = sum / count as f64;
            (sum_sq / count as f64 - mean * mean).max(0.0).sqrt()
        };
    }
}

/// Least-squares slope of `y` against `x` over a centred window.
///
/// Returns `None` when the window has fewer than two valid points.
pub fn window_slope(x: &[f64], y: &[f64], i: usize, len: usize) -> Option<f64> {
    let n = x.len().min(y.len());
    let (lo, hi) = window(i, len.max(2), n);
    let mut count = 0.0;
    let (mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0);
    for j in lo..hi {
        if is_missing(y[j]) {
            continue;
        }
        count += 1.0;
        sx += x[j];
        sy += y[j];
        sxx += x[j] * x[j];
        sxy += x[j] * y[j];
    }
    if count < 2.0 {
        return None;
    }
    let denom = count * sxx - sx * sx;
    if denom.abs() < f64::EPSILON {
        return None;
    }
    Some((count * sxy - sx * sy) / denom)
}

/// Clear every run of set flags shorter than `min_run` gates.
pub fn remove_short_runs(flags: &mut [bool], min_run: usize) {
    let n = flags.len();
    let mut i = 0;
    while i < n {
        if !flags[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && flags[i] {
            i += 1;
        }
        if i - start < min_run {
            flags[start..i].fill(false);
        }
    }
}

/// Set gaps of at most `max_gap` gates that have set flags on both sides.
pub fn fill_short_gaps(flags: &mut [bool], max_gap: usize) {
    let mut last_set: Option<usize> = None;
    for i in 0..flags.len() {
        if !flags[i] {
            continue;
        }
        if let Some(prev) = last_set {
            let gap = i - prev - 1;
            if gap > 0 && gap <= max_gap {
                flags[prev + 1..i].fill(true);
            }
        }
        last_set = Some(i);
    }
}

/// Runs of set flags as inclusive `(start, end)` gate pairs.
pub fn flag_runs(flags: &[bool]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, &set) in flags.iter().enumerate() {
        match (set, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, i - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, flags.len() - 1));
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_removes_spike() {
        let mut data = vec![1.0, 1.0, 50.0, 1.0, 1.0];
        let (mut src, mut work) = (Vec::new(), Vec::new());
        median_filter(&mut data, 3, &mut src, &mut work);
        assert_eq!(data[2], 1.0);
    }

    #[test]
    fn test_median_keeps_missing() {
        let mut data = vec![1.0, MISSING, 3.0];
        let (mut src, mut work) = (Vec::new(), Vec::new());
        median_filter(&mut data, 3, &mut src, &mut work);
        assert_eq!(data[1], MISSING);
    }

    #[test]
    fn test_running_sdev_constant_is_zero() {
        let data = vec![2.0; 10];
        let mut out = vec![0.0; 10];
        running_sdev(&data, 5, &mut out);
        assert!(out.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_window_slope_linear() {
        let x: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v + 1.0).collect();
        let slope = window_slope(&x, &y, 5, 5).unwrap();
        assert!((slope - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_runs_removed_including_trailing() {
        let mut flags = vec![true, true, false, true, true, true, false, true, true];
        remove_short_runs(&mut flags, 3);
        assert_eq!(
            flags,
            vec![false, false, false, true, true, true, false, false, false]
        );
    }

    #[test]
    fn test_gaps_filled_only_between_runs() {
        let mut flags = vec![false, true, false, false, true, false, false, false, true, false];
        fill_short_gaps(&mut flags, 2);
        assert_eq!(
            flags,
            vec![false, true, true, true, true, false, false, false, true, false]
        );
    }

    #[test]
    fn test_flag_runs() {
        let flags = [true, false, true, true, false, false, true];
        assert_eq!(flag_runs(&flags), vec![(0, 0), (2, 3), (6, 6)]);
        assert!(flag_runs(&[false; 4]).is_empty());
    }
}
