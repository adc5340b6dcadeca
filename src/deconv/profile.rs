//! # 峰形函数
//!
//! 两种解析线形，会话内选定一次，拟合过程中不变：
//! - Pseudo-Voigt: `A·(η·L(x; c, γ) + (1−η)·G(x; c, σ))`，G、L 均为面积归一化
//! - Voigt: `A·Re[w(z)] / (σ√(2π))`，`z = (x − c + iγ) / (σ√2)`
//!
//! 两者的积分面积都等于 A。
//!
//! ## 参数向量布局
//! - Pseudo-Voigt: `[amplitude, center, sigma, gamma, eta]`
//! - Voigt: `[amplitude, center, sigma, gamma]`
//!
//! ## 依赖关系
//! - 被 `deconv/single.rs`、`deconv/multi.rs`、`deconv/curves.rs` 使用
//! - 使用 `deconv/faddeeva.rs`

use crate::deconv::faddeeva::faddeeva;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// FWHM / σ（高斯）
pub const GAUSS_FWHM_FACTOR: f64 = 2.354_820_045_030_949;

const SQRT_2PI: f64 = 2.506_628_274_631_000_7;

/// 峰形类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileKind {
    #[default]
    PseudoVoigt,
    Voigt,
}

impl std::fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileKind::PseudoVoigt => write!(f, "pseudo-voigt"),
            ProfileKind::Voigt => write!(f, "voigt"),
        }
    }
}

/// 单峰参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileParams {
    /// 积分面积因子
    pub amplitude: f64,
    pub center: f64,
    /// 高斯宽度
    pub sigma: f64,
    /// 洛伦兹半宽
    pub gamma: f64,
    /// 洛伦兹混合比（仅 Pseudo-Voigt）
    pub eta: Option<f64>,
}

impl ProfileKind {
    /// 每个峰的参数个数
    pub fn n_params(self) -> usize {
        match self {
            ProfileKind::PseudoVoigt => 5,
            ProfileKind::Voigt => 4,
        }
    }

    /// 在 x 处求值
    pub fn evaluate(self, x: f64, p: &[f64]) -> f64 {
        match self {
            ProfileKind::PseudoVoigt => pseudo_voigt(x, p[0], p[1], p[2], p[3], p[4]),
            ProfileKind::Voigt => voigt(x, p[0], p[1], p[2], p[3]),
        }
    }

    /// 峰顶高度
    pub fn height(self, p: &[f64]) -> f64 {
        self.evaluate(p[1], p)
    }

    /// 半高全宽
    pub fn fwhm(self, p: &[f64]) -> f64 {
        match self {
            ProfileKind::PseudoVoigt => numeric_fwhm(self, p),
            ProfileKind::Voigt => {
                // Olivero & Longbothum (1977)
                let f_l = 2.0 * p[3].abs();
                let f_g = GAUSS_FWHM_FACTOR * p[2].abs();
                0.5346 * f_l + (0.2166 * f_l * f_l + f_g * f_g).sqrt()
            }
        }
    }

    /// 积分面积
    pub fn area(self, p: &[f64]) -> f64 {
        p[0]
    }

    /// 参数向量转为结构体
    pub fn to_params(self, p: &[f64]) -> ProfileParams {
        ProfileParams {
            amplitude: p[0],
            center: p[1],
            sigma: p[2],
            gamma: p[3],
            eta: match self {
                ProfileKind::PseudoVoigt => Some(p[4]),
                ProfileKind::Voigt => None,
            },
        }
    }

    /// 结构体转为参数向量
    pub fn to_vec(self, params: &ProfileParams) -> Vec<f64> {
        let mut v = vec![params.amplitude, params.center, params.sigma, params.gamma];
        if self == ProfileKind::PseudoVoigt {
            v.push(params.eta.unwrap_or(0.5));
        }
        v
    }

    /// 高度为 1 时对应的面积因子（用于初值估计）
    pub fn unit_height_amplitude(self, sigma: f64) -> f64 {
        sigma * SQRT_2PI
    }
}

/// Pseudo-Voigt 线形
pub fn pseudo_voigt(x: f64, amplitude: f64, center: f64, sigma: f64, gamma: f64, eta: f64) -> f64 {
    let dx = x - center;
    let gauss = (-dx * dx / (2.0 * sigma * sigma)).exp() / (sigma * SQRT_2PI);
    let lorentz = gamma / (PI * (dx * dx + gamma * gamma));
    amplitude * (eta * lorentz + (1.0 - eta) * gauss)
}

/// Voigt 线形
pub fn voigt(x: f64, amplitude: f64, center: f64, sigma: f64, gamma: f64) -> f64 {
    let scale = sigma * std::f64::consts::SQRT_2;
    let z = Complex64::new(x - center, gamma.max(0.0)) / scale;
    amplitude * faddeeva(z).re / (sigma * SQRT_2PI)
}

/// 数值求半高全宽（对称且单调衰减的线形）
fn numeric_fwhm(kind: ProfileKind, p: &[f64]) -> f64 {
    let center = p[1];
    let half = 0.5 * kind.height(p);
    if !(half > 0.0) {
        return 0.0;
    }

    let mut hi = (p[2].abs() + p[3].abs()).max(1e-12);
    let mut guard = 0;
    while kind.evaluate(center + hi, p) > half && guard < 200 {
        hi *= 2.0;
        guard += 1;
    }

    let mut lo = 0.0;
    for _ in 0..80 {
        let mid = 0.5 * (lo + hi);
        if kind.evaluate(center + mid, p) > half {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo + hi
}

/// 由高斯 FWHM 估计 σ
pub fn sigma_from_fwhm(fwhm: f64) -> f64 {
    fwhm / GAUSS_FWHM_FACTOR
}

/// 洛伦兹半宽 γ = FWHM / 2
pub fn gamma_from_fwhm(fwhm: f64) -> f64 {
    fwhm / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integrate(kind: ProfileKind, p: &[f64], lo: f64, hi: f64) -> f64 {
        let n = 200_000;
        let h = (hi - lo) / n as f64;
        (0..n)
            .map(|i| kind.evaluate(lo + (i as f64 + 0.5) * h, p))
            .sum::<f64>()
            * h
    }

    #[test]
    fn test_pseudo_voigt_pure_gaussian_fwhm() {
        let p = [10.0, 5.0, 0.1, 0.05, 0.0];
        let fwhm = ProfileKind::PseudoVoigt.fwhm(&p);
        assert!((fwhm - GAUSS_FWHM_FACTOR * 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_pseudo_voigt_pure_lorentzian_fwhm() {
        let p = [10.0, 5.0, 0.1, 0.07, 1.0];
        let fwhm = ProfileKind::PseudoVoigt.fwhm(&p);
        assert!((fwhm - 0.14).abs() < 1e-9);
    }

    #[test]
    fn test_pseudo_voigt_area() {
        let p = [3.0, 0.0, 0.1, 0.1, 0.3];
        // Lorentzian tails converge slowly; 1e4 half-widths leave < 1e-4 outside
        let area = integrate(ProfileKind::PseudoVoigt, &p, -1000.0, 1000.0);
        assert!((area - 3.0).abs() / 3.0 < 1e-3, "area = {}", area);
    }

    #[test]
    fn test_voigt_reduces_to_gaussian() {
        let p = [2.0, 1.0, 0.2, 0.0];
        for &x in &[1.0, 1.1, 1.3, 1.5] {
            let dx: f64 = x - 1.0;
            let gauss = 2.0 * (-dx * dx / (2.0 * 0.04)).exp() / (0.2 * SQRT_2PI);
            let v = ProfileKind::Voigt.evaluate(x, &p);
            assert!((v - gauss).abs() < 2e-3 * gauss.max(1.0), "x={} {} {}", x, v, gauss);
        }
    }

    #[test]
    fn test_voigt_fwhm_limits() {
        let g = ProfileKind::Voigt.fwhm(&[1.0, 0.0, 0.1, 0.0]);
        assert!((g - GAUSS_FWHM_FACTOR * 0.1).abs() < 1e-9);
        let l = ProfileKind::Voigt.fwhm(&[1.0, 0.0, 0.0, 0.1]);
        assert!((l - 0.2).abs() < 1e-3);
    }

    #[test]
    fn test_params_round_trip_layout() {
        let kind = ProfileKind::PseudoVoigt;
        let v = vec![1.0, 2.0, 3.0, 4.0, 0.25];
        let params = kind.to_params(&v);
        assert_eq!(params.eta, Some(0.25));
        assert_eq!(kind.to_vec(&params), v);
        assert_eq!(ProfileKind::Voigt.to_params(&v[..4]).eta, None);
    }
}
