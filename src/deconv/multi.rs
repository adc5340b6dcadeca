//! # 多峰联合拟合
//!
//! 对重叠峰组做两阶段拟合：
//! - **Stage A**: 组内每个峰在更窄的窗口（≈ 2 × FWHM）中独立做单峰拟合，
//!   忽略相邻峰的干扰，得到各峰的局部最优参数（rayon 并行）
//! - **Stage B**: 覆盖整组的联合窗口，以 Stage A 参数为初值，拟合各峰线形
//!   之和；局部背景同样使用边缘估计
//!
//! Stage B 参数为最终结果，Stage A 参数作为参考保存在每个结果中；
//! 整组共享一个 R²。联合拟合不收敛时该组标记为失败，Stage A 结果作为
//! 降级结果返回。
//!
//! 单峰组直接走单峰拟合，保证两条路径结果一致。
//!
//! ## 依赖关系
//! - 被 `session/`、`batch/` 调用
//! - 使用 `deconv/single.rs`、`deconv/solver.rs`、`deconv/window.rs`
//! - 使用 `rayon` 并行执行 Stage A

use crate::deconv::profile::ProfileKind;
use crate::deconv::single::{
    effective_fwhm, fit_single, heuristic_seed, seed_bounds, solver_options, SingleFit,
};
use crate::deconv::solver::{self, Bounds};
use crate::deconv::window::{r_squared, FitWindow};
use crate::error::{PeakfitError, Result};
use crate::models::{FitConfig, FitResult, PeakCandidate, PeakFailure, PeakGroup, Spectrum};

use rayon::prelude::*;

/// 峰组拟合状态
#[derive(Debug, Clone, PartialEq)]
pub enum GroupOutcome {
    /// 全部结果可用
    Fitted,
    /// 联合拟合失败，结果为 Stage A 降级结果
    Degraded(String),
    /// 没有可用结果
    Failed,
}

/// 峰组拟合输出
#[derive(Debug)]
pub struct GroupFit {
    /// 组成员（峰候选下标）
    pub members: Vec<usize>,
    pub results: Vec<FitResult>,
    pub failures: Vec<PeakFailure>,
    pub outcome: GroupOutcome,
    /// 求解器诊断信息
    pub diagnostics: Vec<String>,
}

impl GroupFit {
    /// 组拟合质量：各结果中最低的 R²
    pub fn r_squared(&self) -> Option<f64> {
        self.results
            .iter()
            .map(|r| r.r_squared)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// 该组是否存在失败（包括降级）
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty() || self.outcome != GroupOutcome::Fitted
    }
}

/// 拟合一个峰组
///
/// 峰级与组级失败都记录在返回值中，从不中断调用方对其余峰组的处理。
pub fn fit_group(
    spectrum: &Spectrum,
    candidates: &[PeakCandidate],
    group: &PeakGroup,
    config: &FitConfig,
) -> GroupFit {
    if group.is_singleton() {
        return fit_singleton(spectrum, candidates, group.members[0], config);
    }

    // ── Stage A ──
    let stage_a: Vec<(usize, Result<SingleFit>)> = group
        .members
        .par_iter()
        .map(|&m| {
            let fit = fit_single(spectrum, &candidates[m], m, config, config.stage_a_multiplier);
            (m, fit)
        })
        .collect();

    let mut diagnostics = Vec::new();
    let mut references: Vec<Option<FitResult>> = Vec::with_capacity(stage_a.len());
    for (m, fit) in stage_a {
        match fit {
            Ok(fit) => {
                diagnostics.extend(fit.diagnostics);
                references.push(Some(fit.result));
            }
            Err(e) => {
                log::warn!(
                    "Stage A failed for peak #{} at {:.4}: {}",
                    m + 1,
                    candidates[m].position,
                    e
                );
                diagnostics.push(format!("stage A, peak #{}: {}", m + 1, e));
                references.push(None);
            }
        }
    }

    // ── Stage B ──
    match fit_joint(spectrum, candidates, group, config, &references) {
        Ok((results, joint_diagnostics)) => {
            diagnostics.extend(joint_diagnostics);
            GroupFit {
                members: group.members.clone(),
                results,
                failures: Vec::new(),
                outcome: GroupOutcome::Fitted,
                diagnostics,
            }
        }
        Err(e) => {
            let reason = e.to_string();
            log::warn!("Joint fit failed for group of {} peaks: {}", group.len(), reason);
            diagnostics.push(format!("stage B: {}", reason));
            degraded(group, candidates, references, reason, diagnostics)
        }
    }
}

fn fit_singleton(
    spectrum: &Spectrum,
    candidates: &[PeakCandidate],
    member: usize,
    config: &FitConfig,
) -> GroupFit {
    let candidate = &candidates[member];
    match fit_single(
        spectrum,
        candidate,
        member,
        config,
        config.effective_window_multiplier(),
    ) {
        Ok(fit) => GroupFit {
            members: vec![member],
            results: vec![fit.result],
            failures: Vec::new(),
            outcome: GroupOutcome::Fitted,
            diagnostics: fit.diagnostics,
        },
        Err(error) => {
            log::warn!(
                "Fit failed for peak #{} at {:.4}: {}",
                member + 1,
                candidate.position,
                error
            );
            GroupFit {
                members: vec![member],
                results: Vec::new(),
                failures: vec![PeakFailure {
                    peak_index: member,
                    position: candidate.position,
                    error,
                }],
                outcome: GroupOutcome::Failed,
                diagnostics: Vec::new(),
            }
        }
    }
}

/// 联合拟合失败时用 Stage A 结果降级
fn degraded(
    group: &PeakGroup,
    candidates: &[PeakCandidate],
    references: Vec<Option<FitResult>>,
    reason: String,
    diagnostics: Vec<String>,
) -> GroupFit {
    let mut results = Vec::new();
    let mut failures = Vec::new();
    for (&m, reference) in group.members.iter().zip(references) {
        match reference {
            Some(mut result) => {
                result.group_size = group.len();
                results.push(result);
            }
            None => failures.push(PeakFailure {
                peak_index: m,
                position: candidates[m].position,
                error: PeakfitError::FitConvergence {
                    position: candidates[m].position,
                    reason: format!("joint fit failed and no stage A result: {}", reason),
                },
            }),
        }
    }
    let outcome = if results.is_empty() {
        GroupOutcome::Failed
    } else {
        GroupOutcome::Degraded(reason)
    };
    GroupFit {
        members: group.members.clone(),
        results,
        failures,
        outcome,
        diagnostics,
    }
}

/// Stage B：联合窗口内拟合各峰之和
fn fit_joint(
    spectrum: &Spectrum,
    candidates: &[PeakCandidate],
    group: &PeakGroup,
    config: &FitConfig,
    references: &[Option<FitResult>],
) -> Result<(Vec<FitResult>, Vec<String>)> {
    let kind = config.profile;
    let np = kind.n_params();
    let k = group.len();
    let step = spectrum.mean_step();

    let members: Vec<&PeakCandidate> = group.members.iter().map(|&m| &candidates[m]).collect();
    let fwhms: Vec<f64> = members.iter().map(|c| effective_fwhm(c, config)).collect();
    let avg_fwhm = fwhms.iter().sum::<f64>() / k as f64;

    let half = avg_fwhm * config.effective_window_multiplier() * config.joint_window_factor;
    let (lo, hi) = members.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
        (lo.min(c.position), hi.max(c.position))
    });
    let window = FitWindow::spanning(
        spectrum.positions(),
        spectrum.working(),
        lo - half,
        hi + half,
        k * np + 2,
    )?;

    let mut initial = Vec::with_capacity(k * np);
    let mut lower = Vec::with_capacity(k * np);
    let mut upper = Vec::with_capacity(k * np);
    for ((candidate, &fwhm), reference) in members.iter().zip(&fwhms).zip(references) {
        let bounds = seed_bounds(kind, candidate.position, fwhm, step, &window, config)?;
        let seed = match reference {
            Some(result) => result.vector(),
            None => heuristic_seed(kind, candidate, fwhm, step, &window, config)?.initial,
        };
        initial.extend(seed);
        lower.extend(bounds.lower);
        upper.extend(bounds.upper);
    }
    let bounds = Bounds { lower, upper };

    let model = |x: f64, p: &[f64]| sum_profiles(kind, x, p);
    let report = solver::least_squares(
        model,
        &window.x,
        &window.corrected,
        &initial,
        &bounds,
        &solver_options(config),
    );

    if !report.converged {
        return Err(PeakfitError::FitConvergence {
            position: 0.5 * (lo + hi),
            reason: report
                .diagnostics
                .last()
                .cloned()
                .unwrap_or_else(|| "joint solver did not converge".to_string()),
        });
    }

    let fitted: Vec<f64> = window.x.iter().map(|&x| model(x, &report.params)).collect();
    let shared_r2 = r_squared(&window.corrected, &fitted);
    let span = window.span();

    let results = group
        .members
        .iter()
        .zip(report.params.chunks(np))
        .zip(references)
        .map(|((&m, p), reference)| {
            let mut result = FitResult::from_vector(m, kind, p, shared_r2, span);
            result.is_multi_peak = true;
            result.group_size = k;
            result.reference = reference.as_ref().map(|r| r.params);
            result
        })
        .collect();

    log::debug!(
        "joint fit of {} peaks over [{:.4}, {:.4}]: R² {:.4}, {} iterations",
        k,
        span.start,
        span.end,
        shared_r2,
        report.iterations
    );
    Ok((results, report.diagnostics))
}

/// 多峰参数向量（按峰依次排列）对应的线形之和
pub fn sum_profiles(kind: ProfileKind, x: f64, p: &[f64]) -> f64 {
    p.chunks(kind.n_params())
        .map(|chunk| kind.evaluate(x, chunk))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deconv::detector::{build_candidates, detect_peaks};
    use crate::deconv::grouper::group_peaks;
    use crate::deconv::testutil::{grid, pv_trace};
    use crate::models::PeakOrigin;

    fn overlapping_pair() -> Spectrum {
        let x = grid(9.0, 11.5, 0.005);
        let y = pv_trace(&x, &[(10.0, 0.15, 300.0), (10.3, 0.15, 250.0)], 100.0, 1.0);
        Spectrum::new("pair", x, y).unwrap()
    }

    fn candidates_of(spectrum: &Spectrum, config: &FitConfig) -> Vec<PeakCandidate> {
        let indices = detect_peaks(spectrum.working(), &config.detection).unwrap();
        build_candidates(
            spectrum.positions(),
            spectrum.working(),
            &indices,
            config.fallback_fwhm,
            PeakOrigin::Detected,
        )
    }

    #[test]
    fn test_overlapping_pair_joint_fit() {
        let spectrum = overlapping_pair();
        let config = FitConfig {
            overlap_mode: true,
            ..FitConfig::default()
        };
        let candidates = candidates_of(&spectrum, &config);
        assert_eq!(candidates.len(), 2);

        let groups = group_peaks(&candidates, config.effective_threshold());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);

        let fit = fit_group(&spectrum, &candidates, &groups[0], &config);
        assert_eq!(fit.outcome, GroupOutcome::Fitted, "{:?}", fit.diagnostics);
        assert_eq!(fit.results.len(), 2);

        let mut centers: Vec<f64> = fit.results.iter().map(|r| r.center()).collect();
        centers.sort_by(|a, b| a.total_cmp(b));
        assert!((centers[0] - 10.0).abs() < 0.01, "centers = {:?}", centers);
        assert!((centers[1] - 10.3).abs() < 0.01, "centers = {:?}", centers);

        for result in &fit.results {
            assert!(result.is_multi_peak);
            assert_eq!(result.group_size, 2);
            assert!(result.r_squared > 0.95);
            assert!(result.reference.is_some());
        }
        // shared R² across the group
        assert_eq!(fit.results[0].r_squared, fit.results[1].r_squared);
    }

    #[test]
    fn test_normal_mode_splits_the_pair() {
        let spectrum = overlapping_pair();
        let config = FitConfig::default();
        let candidates = candidates_of(&spectrum, &config);
        let groups = group_peaks(&candidates, config.effective_threshold());
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_singleton_group_matches_single_fit() {
        let x = grid(18.0, 22.0, 0.01);
        let y = pv_trace(&x, &[(20.0, 0.2, 500.0)], 100.0, 1.0);
        let spectrum = Spectrum::new("single", x, y).unwrap();
        let config = FitConfig::default();
        let candidates = candidates_of(&spectrum, &config);
        let group = PeakGroup::singleton(0);

        let joint = fit_group(&spectrum, &candidates, &group, &config);
        let single = fit_single(
            &spectrum,
            &candidates[0],
            0,
            &config,
            config.effective_window_multiplier(),
        )
        .unwrap();

        assert_eq!(joint.results.len(), 1);
        let a = &joint.results[0];
        let b = &single.result;
        assert!((a.center() - b.center()).abs() < 1e-12);
        assert!((a.area - b.area).abs() < 1e-9);
        assert!((a.fwhm - b.fwhm).abs() < 1e-12);
        assert!((a.r_squared - b.r_squared).abs() < 1e-12);
        assert!(!a.is_multi_peak);
    }

    #[test]
    fn test_sum_profiles_adds_components() {
        let kind = ProfileKind::PseudoVoigt;
        let p = [1.0, 0.0, 0.1, 0.1, 0.5, 2.0, 0.3, 0.2, 0.1, 0.2];
        let x = 0.17;
        let expected = kind.evaluate(x, &p[..5]) + kind.evaluate(x, &p[5..]);
        assert!((sum_profiles(kind, x, &p) - expected).abs() < 1e-15);
    }

    #[test]
    fn test_failed_singleton_reports_failure() {
        let x = grid(0.0, 0.05, 0.01);
        let spectrum = Spectrum::new("tiny", x.clone(), vec![1.0, 5.0, 2.0, 1.0, 1.0, 1.0]).unwrap();
        let candidates = vec![PeakCandidate {
            index: 1,
            position: x[1],
            height: 5.0,
            fwhm: 0.001,
            origin: PeakOrigin::Manual,
        }];
        let fit = fit_group(&spectrum, &candidates, &PeakGroup::singleton(0), &FitConfig::default());
        assert_eq!(fit.outcome, GroupOutcome::Failed);
        assert_eq!(fit.failures.len(), 1);
        assert!(fit.has_failures());
        assert!(fit.r_squared().is_none());
    }

    #[test]
    fn test_joint_failure_degrades_to_stage_a() {
        let spectrum = overlapping_pair();
        let config = FitConfig {
            overlap_mode: true,
            ..FitConfig::default()
        };
        let candidates = candidates_of(&spectrum, &config);
        let group = PeakGroup {
            members: vec![0, 1],
        };
        let stage_a = fit_single(
            &spectrum,
            &candidates[0],
            0,
            &config,
            config.stage_a_multiplier,
        )
        .unwrap()
        .result;

        let fit = degraded(
            &group,
            &candidates,
            vec![Some(stage_a), None],
            "joint fit diverged".to_string(),
            Vec::new(),
        );
        assert_eq!(fit.outcome, GroupOutcome::Degraded("joint fit diverged".to_string()));
        assert_eq!(fit.results.len(), 1);
        assert_eq!(fit.failures.len(), 1);
        assert_eq!(fit.failures[0].peak_index, 1);
        assert_eq!(fit.results[0].group_size, group.len());
        // Stage-A parameters, not a joint result
        assert!(!fit.results[0].is_multi_peak);

        let fit = degraded(&group, &candidates, vec![None, None], "x".to_string(), Vec::new());
        assert_eq!(fit.outcome, GroupOutcome::Failed);
        assert!(fit.results.is_empty());
        assert_eq!(fit.failures.len(), 2);
    }
}
