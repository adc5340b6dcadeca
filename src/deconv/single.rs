//! # 单峰拟合
//!
//! 在以峰为中心的局部窗口内独立拟合一个峰：
//! 1. 窗口半宽 = FWHM 估计 × 窗口倍数，按样本数限制范围
//! 2. 扣除窗口边缘局部背景
//! 3. 启发式初值与参数边界
//! 4. 有界 Levenberg-Marquardt
//!
//! 失败（不收敛、窗口或边界不可行）作为峰级错误返回，由调用方跳过该峰。
//!
//! ## 依赖关系
//! - 被 `deconv/multi.rs`（Stage A 与单峰组）、`session/` 调用
//! - 使用 `deconv/window.rs`、`deconv/solver.rs`、`deconv/profile.rs`

use crate::deconv::profile::{gamma_from_fwhm, sigma_from_fwhm, ProfileKind};
use crate::deconv::solver::{self, Bounds, SolverOptions};
use crate::deconv::window::{half_width_points, r_squared, FitWindow};
use crate::error::{PeakfitError, Result};
use crate::models::{FitConfig, FitResult, PeakCandidate, Spectrum};

/// 单峰拟合输出
#[derive(Debug, Clone)]
pub struct SingleFit {
    pub result: FitResult,
    /// 求解器诊断信息
    pub diagnostics: Vec<String>,
}

/// 初值与边界
#[derive(Debug, Clone)]
pub(crate) struct Seed {
    pub initial: Vec<f64>,
    pub bounds: Bounds,
}

/// 候选峰的有效 FWHM：估计值不可用时取配置中的替代值
pub(crate) fn effective_fwhm(candidate: &PeakCandidate, config: &FitConfig) -> f64 {
    if candidate.fwhm.is_finite() && candidate.fwhm > 0.0 {
        candidate.fwhm
    } else {
        config.fallback_fwhm
    }
}

/// 求解器参数（随重叠模式切换）
pub(crate) fn solver_options(config: &FitConfig) -> SolverOptions {
    SolverOptions {
        tolerance: config.effective_tolerance(),
        max_iterations: config.effective_max_iterations(),
        ..SolverOptions::default()
    }
}

/// 启发式初值与边界
///
/// - 振幅 ≈ 局部峰高 × σ × √(2π)，上界由窗口强度范围缩放
/// - σ ≈ FWHM / 2.355，γ ≈ FWHM / 2，η = 0.5
/// - 中心容差 = FWHM × 中心容差系数
/// - 宽度参数范围 [一个采样间隔, 3 × FWHM]
pub(crate) fn heuristic_seed(
    kind: ProfileKind,
    candidate: &PeakCandidate,
    fwhm: f64,
    step: f64,
    window: &FitWindow,
    config: &FitConfig,
) -> Result<Seed> {
    let sigma = sigma_from_fwhm(fwhm);
    let gamma = gamma_from_fwhm(fwhm);
    let height = window
        .local_height(candidate.position, 0.5 * fwhm)
        .max(f64::MIN_POSITIVE);
    let amplitude = height * kind.unit_height_amplitude(sigma);

    let mut initial = vec![amplitude, candidate.position, sigma, gamma];
    if kind == ProfileKind::PseudoVoigt {
        initial.push(0.5);
    }

    let bounds = seed_bounds(kind, candidate.position, fwhm, step, window, config)?;
    Ok(Seed { initial, bounds })
}

/// 参数边界，中心锚定在候选位置
pub(crate) fn seed_bounds(
    kind: ProfileKind,
    position: f64,
    fwhm: f64,
    step: f64,
    window: &FitWindow,
    config: &FitConfig,
) -> Result<Bounds> {
    let (lo, hi) = window.corrected_range();
    let intensity_range = (hi - lo).max(f64::MIN_POSITIVE);
    let amplitude_upper = intensity_range * fwhm * 10.0;

    let center_tol = fwhm * config.effective_center_tolerance();
    let width_lower = step.max(f64::MIN_POSITIVE);
    let width_upper = 3.0 * fwhm;
    if width_lower > width_upper {
        return Err(PeakfitError::BoundsInfeasible {
            position,
            reason: format!(
                "sample spacing {:.4e} exceeds width bound {:.4e}",
                width_lower, width_upper
            ),
        });
    }

    let mut lower = vec![0.0, position - center_tol, width_lower, width_lower];
    let mut upper = vec![amplitude_upper, position + center_tol, width_upper, width_upper];
    if kind == ProfileKind::PseudoVoigt {
        lower.push(0.0);
        upper.push(1.0);
    }

    let bounds = Bounds { lower, upper };
    if !bounds.is_feasible() {
        return Err(PeakfitError::BoundsInfeasible {
            position,
            reason: "parameter bounds are empty or not finite".to_string(),
        });
    }
    Ok(bounds)
}

/// 在局部窗口内拟合单个峰
///
/// `multiplier` 为窗口半宽相对 FWHM 的倍数：普通单峰拟合使用
/// `FitConfig::effective_window_multiplier`，Stage A 使用更窄的倍数。
pub fn fit_single(
    spectrum: &Spectrum,
    candidate: &PeakCandidate,
    peak_index: usize,
    config: &FitConfig,
    multiplier: f64,
) -> Result<SingleFit> {
    let kind = config.profile;
    let step = spectrum.mean_step();
    let fwhm = effective_fwhm(candidate, config);

    let half_width = half_width_points(fwhm, multiplier, step, config);
    let window = FitWindow::centered(
        spectrum.positions(),
        spectrum.working(),
        candidate.index,
        half_width,
        kind.n_params() + 2,
    )?;

    let seed = heuristic_seed(kind, candidate, fwhm, step, &window, config)?;
    let report = solver::least_squares(
        |x, p| kind.evaluate(x, p),
        &window.x,
        &window.corrected,
        &seed.initial,
        &seed.bounds,
        &solver_options(config),
    );

    if !report.converged {
        return Err(PeakfitError::FitConvergence {
            position: candidate.position,
            reason: report
                .diagnostics
                .last()
                .cloned()
                .unwrap_or_else(|| "solver did not converge".to_string()),
        });
    }

    let fitted: Vec<f64> = window
        .x
        .iter()
        .map(|&x| kind.evaluate(x, &report.params))
        .collect();
    let r2 = r_squared(&window.corrected, &fitted);

    let result = FitResult::from_vector(peak_index, kind, &report.params, r2, window.span());
    log::debug!(
        "peak #{} fitted at {:.4} (FWHM {:.4}, R² {:.4}, {} iterations)",
        peak_index + 1,
        result.center(),
        result.fwhm,
        r2,
        report.iterations
    );

    Ok(SingleFit {
        result,
        diagnostics: report.diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deconv::detector::{build_candidates, detect_peaks};
    use crate::deconv::grouper::group_peaks;
    use crate::deconv::testutil::{grid, pv_trace};
    use crate::models::PeakOrigin;

    fn isolated_peak() -> Spectrum {
        let x = grid(18.0, 22.0, 0.01);
        let y = pv_trace(&x, &[(20.0, 0.2, 500.0)], 100.0, 1.0);
        Spectrum::new("isolated", x, y).unwrap()
    }

    #[test]
    fn test_isolated_peak_recovered() {
        let spectrum = isolated_peak();
        let config = FitConfig::default();

        let indices = detect_peaks(spectrum.working(), &config.detection).unwrap();
        assert_eq!(indices.len(), 1);
        let candidates = build_candidates(
            spectrum.positions(),
            spectrum.working(),
            &indices,
            config.fallback_fwhm,
            PeakOrigin::Detected,
        );
        let groups = group_peaks(&candidates, config.effective_threshold());
        assert_eq!(groups.len(), 1);
        assert!(groups[0].is_singleton());

        let fit = fit_single(
            &spectrum,
            &candidates[0],
            0,
            &config,
            config.effective_window_multiplier(),
        )
        .unwrap();
        let result = fit.result;
        assert!((result.center() - 20.0).abs() < 0.005, "center = {}", result.center());
        assert!((result.fwhm - 0.2).abs() < 0.03, "fwhm = {}", result.fwhm);
        assert!(result.r_squared > 0.99);
        assert!(!result.is_multi_peak);
        assert_eq!(result.group_size, 1);
        assert!(!fit.diagnostics.is_empty());
    }

    #[test]
    fn test_voigt_profile_fit() {
        let spectrum = isolated_peak();
        let config = FitConfig {
            profile: ProfileKind::Voigt,
            ..FitConfig::default()
        };
        let indices = detect_peaks(spectrum.working(), &config.detection).unwrap();
        let candidates = build_candidates(
            spectrum.positions(),
            spectrum.working(),
            &indices,
            config.fallback_fwhm,
            PeakOrigin::Detected,
        );
        let fit = fit_single(&spectrum, &candidates[0], 0, &config, 3.0).unwrap();
        assert!((fit.result.center() - 20.0).abs() < 0.005);
        assert!(fit.result.params.eta.is_none());
    }

    #[test]
    fn test_peak_at_spectrum_edge_is_peak_level_failure() {
        let x = grid(0.0, 0.05, 0.01);
        let y = vec![1.0, 5.0, 2.0, 1.0, 1.0, 1.0];
        let spectrum = Spectrum::new("tiny", x.clone(), y.clone()).unwrap();
        let candidate = PeakCandidate {
            index: 1,
            position: x[1],
            height: 5.0,
            fwhm: 0.001,
            origin: PeakOrigin::Manual,
        };
        let config = FitConfig {
            min_window_points: 3,
            ..FitConfig::default()
        };
        let err = fit_single(&spectrum, &candidate, 0, &config, 3.0).unwrap_err();
        assert!(err.is_peak_level(), "{}", err);
    }
}
