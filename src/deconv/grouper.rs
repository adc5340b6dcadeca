//! # 重叠峰分组
//!
//! 按位置排序后顺序扫描：相邻两峰的中心距离小于
//! `threshold × max(FWHM_a, FWHM_b)` 时归入同一组。
//!
//! 分组结果决定拟合路径：单峰组只走单峰拟合，多峰组走两阶段联合拟合。
//! 阈值增大只会合并组，不会拆分组。
//!
//! ## 依赖关系
//! - 被 `session/`、`batch/`、`commands/detect.rs` 调用
//! - 使用 `models/peak.rs`

use crate::models::{PeakCandidate, PeakGroup};

/// 将候选峰划分为有序、互不重叠的组
///
/// 组内成员为 `candidates` 的下标，组与组按位置升序排列。
pub fn group_peaks(candidates: &[PeakCandidate], threshold: f64) -> Vec<PeakGroup> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        candidates[a]
            .position
            .total_cmp(&candidates[b].position)
            .then(a.cmp(&b))
    });

    let mut groups: Vec<PeakGroup> = Vec::new();
    let mut current: Vec<usize> = Vec::new();

    for idx in order {
        if let Some(&prev) = current.last() {
            if !overlaps(&candidates[prev], &candidates[idx], threshold) {
                groups.push(PeakGroup {
                    members: std::mem::take(&mut current),
                });
            }
        }
        current.push(idx);
    }
    if !current.is_empty() {
        groups.push(PeakGroup { members: current });
    }

    log::debug!(
        "grouped {} peaks into {} groups (threshold {:.2})",
        candidates.len(),
        groups.len(),
        threshold
    );
    groups
}

/// 两峰是否重叠
pub fn overlaps(a: &PeakCandidate, b: &PeakCandidate, threshold: f64) -> bool {
    let distance = (b.position - a.position).abs();
    distance < threshold * a.fwhm.max(b.fwhm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PeakOrigin;

    fn candidate(position: f64, fwhm: f64) -> PeakCandidate {
        PeakCandidate {
            index: 0,
            position,
            height: 1.0,
            fwhm,
            origin: PeakOrigin::Detected,
        }
    }

    fn sample() -> Vec<PeakCandidate> {
        vec![
            candidate(12.0, 0.2),
            candidate(10.0, 0.15),
            candidate(10.3, 0.15),
            candidate(15.0, 0.3),
            candidate(15.9, 0.4),
            candidate(20.0, 0.1),
        ]
    }

    #[test]
    fn test_groups_are_sorted_partition() {
        let candidates = sample();
        let groups = group_peaks(&candidates, 1.5);

        let mut seen: Vec<usize> = groups.iter().flat_map(|g| g.members.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..candidates.len()).collect::<Vec<_>>());

        let positions: Vec<f64> = groups
            .iter()
            .flat_map(|g| g.members.iter().map(|&m| candidates[m].position))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_regrouping_is_idempotent() {
        let candidates = sample();
        for threshold in [0.5, 1.5, 5.0] {
            assert_eq!(
                group_peaks(&candidates, threshold),
                group_peaks(&candidates, threshold)
            );
        }
    }

    #[test]
    fn test_larger_threshold_only_merges() {
        let candidates = sample();
        let thresholds = [0.1, 0.5, 1.0, 1.5, 2.5, 5.0, 10.0, 30.0];
        for pair in thresholds.windows(2) {
            let fine = group_peaks(&candidates, pair[0]);
            let coarse = group_peaks(&candidates, pair[1]);
            assert!(coarse.len() <= fine.len());
            // every fine group is contained in exactly one coarse group
            for group in &fine {
                let container = coarse
                    .iter()
                    .filter(|c| group.members.iter().all(|m| c.members.contains(m)))
                    .count();
                assert_eq!(container, 1);
            }
        }
    }

    #[test]
    fn test_close_pair_merged_only_in_overlap_mode() {
        let candidates = vec![candidate(10.0, 0.15), candidate(10.3, 0.15)];
        // overlap mode: 5.0 × 0.15 = 0.75 > 0.3
        let merged = group_peaks(&candidates, 5.0);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].members, vec![0, 1]);
        // normal mode: 1.5 × 0.15 = 0.225 < 0.3
        assert_eq!(group_peaks(&candidates, 1.5).len(), 2);
    }

    #[test]
    fn test_empty_input() {
        assert!(group_peaks(&[], 1.5).is_empty());
    }
}
