//! # Savitzky-Golay 平滑
//!
//! 对窗口内数据做最小二乘多项式拟合，取中心点的拟合值。
//! 边缘样本使用贴边的完整窗口，在窗口内的相应位置求值，避免边缘收缩。
//!
//! ## 依赖关系
//! - 被 `deconv/detector.rs`、`session/` 调用
//! - 使用 `deconv/linalg.rs`

use crate::deconv::linalg;
use crate::error::{PeakfitError, Result};

use serde::{Deserialize, Serialize};

/// 平滑参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// 窗口长度（奇数）
    pub window: usize,
    /// 多项式阶数
    pub order: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window: 11,
            order: 3,
        }
    }
}

/// Savitzky-Golay 平滑
pub fn savitzky_golay(data: &[f64], config: SmoothingConfig) -> Result<Vec<f64>> {
    let SmoothingConfig { window, order } = config;
    if window % 2 == 0 || window < 3 {
        return Err(PeakfitError::InvalidArgument(format!(
            "smoothing window must be odd and >= 3, got {}",
            window
        )));
    }
    if order >= window {
        return Err(PeakfitError::InvalidArgument(format!(
            "polynomial order {} must be smaller than window {}",
            order, window
        )));
    }
    let n = data.len();
    if n < window {
        return Ok(data.to_vec());
    }

    let half = window / 2;
    // 每个窗口内偏移位置的卷积系数，中心点以及边缘各偏移各一套
    let mut smoothed = vec![0.0; n];
    let center_coeffs = coefficients(window, order, half)?;

    for i in half..n - half {
        smoothed[i] = center_coeffs
            .iter()
            .zip(&data[i - half..=i + half])
            .map(|(c, y)| c * y)
            .sum();
    }

    for i in 0..half {
        let coeffs = coefficients(window, order, i)?;
        smoothed[i] = coeffs.iter().zip(&data[..window]).map(|(c, y)| c * y).sum();

        let j = n - 1 - i;
        let coeffs = coefficients(window, order, window - 1 - i)?;
        smoothed[j] = coeffs
            .iter()
            .zip(&data[n - window..])
            .map(|(c, y)| c * y)
            .sum();
    }

    Ok(smoothed)
}

/// 计算窗口内位置 `at` 处求值的卷积系数
///
/// 系数 = e_atᵀ · V · (VᵀV)⁻¹ · Vᵀ，V 为范德蒙矩阵。
fn coefficients(window: usize, order: usize, at: usize) -> Result<Vec<f64>> {
    let half = (window / 2) as f64;
    let xs: Vec<f64> = (0..window).map(|k| k as f64 - half).collect();
    let m = order + 1;

    let mut normal = vec![vec![0.0; m]; m];
    for x in &xs {
        for r in 0..m {
            for c in 0..m {
                normal[r][c] += x.powi((r + c) as i32);
            }
        }
    }

    // 求 (VᵀV)⁻¹ · v(at)，v(at) 为该位置的幂次向量
    let t = xs[at];
    let rhs: Vec<f64> = (0..m).map(|p| t.powi(p as i32)).collect();
    let w = linalg::solve(normal, rhs).ok_or_else(|| {
        PeakfitError::InvalidArgument("ill-conditioned smoothing window".to_string())
    })?;

    Ok(xs
        .iter()
        .map(|x| (0..m).map(|p| w[p] * x.powi(p as i32)).sum())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_polynomial() {
        let data: Vec<f64> = (0..40)
            .map(|i| {
                let x = i as f64 * 0.1;
                1.0 + 2.0 * x - 0.5 * x * x + 0.1 * x * x * x
            })
            .collect();
        let out = savitzky_golay(&data, SmoothingConfig { window: 7, order: 3 }).unwrap();
        for (a, b) in out.iter().zip(&data) {
            assert!((a - b).abs() < 1e-8, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_reduces_noise() {
        let data: Vec<f64> = (0..100)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let out = savitzky_golay(&data, SmoothingConfig { window: 9, order: 2 }).unwrap();
        let before: f64 = data.iter().map(|v| v * v).sum();
        let after: f64 = out[10..90].iter().map(|v| v * v).sum();
        assert!(after < before * 0.2);
    }

    #[test]
    fn test_rejects_even_window() {
        assert!(savitzky_golay(&[1.0; 20], SmoothingConfig { window: 6, order: 2 }).is_err());
        assert!(savitzky_golay(&[1.0; 20], SmoothingConfig { window: 5, order: 5 }).is_err());
    }

    #[test]
    fn test_short_input_unchanged() {
        let out = savitzky_golay(&[1.0, 3.0, 2.0], SmoothingConfig::default()).unwrap();
        assert_eq!(out, vec![1.0, 3.0, 2.0]);
    }
}
