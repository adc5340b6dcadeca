//! # 峰检测
//!
//! 在（可选平滑后的）强度曲线上寻找候选峰。
//!
//! ## 判据
//! - 峰高 ≥ 全局最小值 + 5% × 强度范围
//! - 显著性（prominence）≥ 2% × 强度范围
//! - 相邻峰满足最小样本间隔，冲突时保留更高的峰
//!
//! 检测结果可以为空，由调用方决定如何提示。
//!
//! ## 依赖关系
//! - 被 `session/`、`batch/`、`commands/detect.rs` 调用
//! - 使用 `deconv/smoothing.rs`
//! - 产出 `models/peak.rs` 的 PeakCandidate

use crate::deconv::smoothing;
use crate::error::Result;
use crate::models::{DetectionConfig, PeakCandidate, PeakOrigin};

/// 检测候选峰，返回按索引升序的样本索引
pub fn detect_peaks(trace: &[f64], config: &DetectionConfig) -> Result<Vec<usize>> {
    if trace.len() < 3 {
        return Ok(Vec::new());
    }

    let smoothed;
    let data = match config.smoothing {
        Some(sg) => {
            smoothed = smoothing::savitzky_golay(trace, sg)?;
            &smoothed[..]
        }
        None => trace,
    };

    let (min, max) = min_max(data);
    let range = max - min;
    if !(range > 0.0) {
        return Ok(Vec::new());
    }

    let min_height = min + config.height_fraction * range;
    let min_prominence = config.prominence_fraction * range;

    let peaks = find_peaks(data, min_height, min_prominence, config.min_distance);
    log::debug!(
        "detected {} peaks (height >= {:.3}, prominence >= {:.3})",
        peaks.len(),
        min_height,
        min_prominence
    );
    Ok(peaks)
}

/// 局部极大值 + 高度 / 间隔 / 显著性过滤
pub fn find_peaks(
    data: &[f64],
    min_height: f64,
    min_prominence: f64,
    min_distance: usize,
) -> Vec<usize> {
    let mut peaks: Vec<usize> = local_maxima(data)
        .into_iter()
        .filter(|&i| data[i] >= min_height)
        .collect();

    if min_distance > 1 {
        peaks = filter_by_distance(&peaks, data, min_distance);
    }

    peaks.retain(|&i| prominence(data, i) >= min_prominence);
    peaks
}

/// 局部极大值，平台取中点
fn local_maxima(data: &[f64]) -> Vec<usize> {
    let n = data.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }

    let last = n - 1;
    let mut i = 1;
    while i < last {
        if data[i - 1] < data[i] {
            let mut ahead = i + 1;
            while ahead < last && data[ahead] == data[i] {
                ahead += 1;
            }
            if data[ahead] < data[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// 按峰高优先保留，移除间隔过近的较低峰
fn filter_by_distance(peaks: &[usize], data: &[f64], distance: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| data[peaks[b]].total_cmp(&data[peaks[a]]));

    let mut keep = vec![true; peaks.len()];
    for &j in &order {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, k)| k.then_some(p))
        .collect()
}

/// 峰的显著性：峰高减去两侧“基座”中较高的一个
pub fn prominence(data: &[f64], peak: usize) -> f64 {
    let height = data[peak];

    let mut left_min = height;
    let mut i = peak;
    loop {
        if data[i] > height {
            break;
        }
        left_min = left_min.min(data[i]);
        if i == 0 {
            break;
        }
        i -= 1;
    }

    let mut right_min = height;
    for &v in &data[peak..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }

    height - left_min.max(right_min)
}

/// 半高宽估计：在半显著性处线性插值左右交点
///
/// 交点缺失（到达数据边界）时返回 `None`。
pub fn estimate_fwhm(positions: &[f64], data: &[f64], peak: usize) -> Option<f64> {
    let prom = prominence(data, peak);
    if !(prom > 0.0) {
        return None;
    }
    let reference = data[peak] - 0.5 * prom;

    let mut i = peak;
    while i > 0 && data[i] > reference {
        i -= 1;
    }
    if data[i] > reference {
        return None;
    }
    let left = interpolate_crossing(positions, data, i, i + 1, reference);

    let mut j = peak;
    while j < data.len() - 1 && data[j] > reference {
        j += 1;
    }
    if data[j] > reference {
        return None;
    }
    let right = interpolate_crossing(positions, data, j - 1, j, reference);

    let width = right - left;
    (width > 0.0 && width.is_finite()).then_some(width)
}

fn interpolate_crossing(positions: &[f64], data: &[f64], a: usize, b: usize, level: f64) -> f64 {
    let dy = data[b] - data[a];
    if dy == 0.0 {
        return positions[a];
    }
    positions[a] + (level - data[a]) / dy * (positions[b] - positions[a])
}

/// 由样本索引构造候选峰（含高度与 FWHM 估计）
pub fn build_candidates(
    positions: &[f64],
    trace: &[f64],
    indices: &[usize],
    fallback_fwhm: f64,
    origin: PeakOrigin,
) -> Vec<PeakCandidate> {
    indices
        .iter()
        .filter(|&&i| i < trace.len())
        .map(|&i| {
            let fwhm = estimate_fwhm(positions, trace, i).unwrap_or_else(|| {
                log::debug!(
                    "FWHM estimation failed at {:.4}, using fallback {:.4}",
                    positions[i],
                    fallback_fwhm
                );
                fallback_fwhm
            });
            PeakCandidate {
                index: i,
                position: positions[i],
                height: trace[i],
                fwhm,
                origin,
            }
        })
        .collect()
}

fn min_max(data: &[f64]) -> (f64, f64) {
    data.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deconv::testutil::{grid, pv_trace};

    #[test]
    fn test_single_isolated_peak() {
        let x = grid(18.0, 22.0, 0.01);
        let y = pv_trace(&x, &[(20.0, 0.2, 500.0)], 100.0, 1.0);
        let peaks = detect_peaks(&y, &DetectionConfig::default()).unwrap();
        assert_eq!(peaks.len(), 1);
        assert!((x[peaks[0]] - 20.0).abs() < 0.011);
    }

    #[test]
    fn test_flat_trace_is_empty() {
        let peaks = detect_peaks(&[5.0; 100], &DetectionConfig::default()).unwrap();
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_plateau_takes_midpoint() {
        let data = [0.0, 1.0, 3.0, 3.0, 3.0, 1.0, 0.0];
        assert_eq!(local_maxima(&data), vec![3]);
    }

    #[test]
    fn test_distance_keeps_highest() {
        let data = [0.0, 5.0, 0.0, 8.0, 0.0, 0.0, 0.0, 0.0, 0.0, 6.0, 0.0];
        let peaks = find_peaks(&data, 0.0, 0.0, 3);
        assert_eq!(peaks, vec![3, 9]);
    }

    #[test]
    fn test_prominence_filter() {
        // small shoulder bump on a large peak is removed by prominence
        let data = [0.0, 2.0, 10.0, 4.0, 4.2, 3.0, 0.0];
        let peaks = find_peaks(&data, 0.0, 1.0, 1);
        assert_eq!(peaks, vec![2]);
        assert!((prominence(&data, 4) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_fwhm_estimate_on_background() {
        let x = grid(18.0, 22.0, 0.005);
        let y = pv_trace(&x, &[(20.0, 0.2, 500.0)], 100.0, 0.0);
        let peak = detect_peaks(&y, &DetectionConfig::default()).unwrap()[0];
        let fwhm = estimate_fwhm(&x, &y, peak).unwrap();
        assert!((fwhm - 0.2).abs() < 0.02, "fwhm = {}", fwhm);
    }

    #[test]
    fn test_fallback_fwhm_at_edge() {
        let x = grid(0.0, 1.0, 0.1);
        let y = [5.0, 4.0, 3.0, 2.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let candidates = build_candidates(&x, &y, &[0], 0.33, PeakOrigin::Manual);
        assert_eq!(candidates[0].fwhm, 0.33);
    }
}
