//! 测试用合成谱生成

use crate::deconv::profile::{self, GAUSS_FWHM_FACTOR};

/// 等间距网格（含端点）
pub fn grid(start: f64, end: f64, step: f64) -> Vec<f64> {
    let n = ((end - start) / step).round() as usize + 1;
    (0..n).map(|i| start + i as f64 * step).collect()
}

/// 确定性伪噪声，幅度在 [-amplitude, amplitude]
pub fn noise(n: usize, amplitude: f64) -> Vec<f64> {
    let mut state: u64 = 0x2545_F491_4F6C_DD1D;
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
            (2.0 * unit - 1.0) * amplitude
        })
        .collect()
}

/// Pseudo-Voigt 合成谱（η = 0.5，高斯与洛伦兹分量 FWHM 相同）
///
/// `peaks` 为 (中心, FWHM, 峰高)。
pub fn pv_trace(x: &[f64], peaks: &[(f64, f64, f64)], background: f64, noise_amp: f64) -> Vec<f64> {
    let jitter = noise(x.len(), noise_amp);
    x.iter()
        .zip(jitter)
        .map(|(&xi, e)| {
            let signal: f64 = peaks
                .iter()
                .map(|&(c, fwhm, height)| {
                    let sigma = fwhm / GAUSS_FWHM_FACTOR;
                    let gamma = fwhm / 2.0;
                    let unit = profile::pseudo_voigt(c, 1.0, c, sigma, gamma, 0.5);
                    height / unit * profile::pseudo_voigt(xi, 1.0, c, sigma, gamma, 0.5)
                })
                .sum();
            background + signal + e
        })
        .collect()
}
