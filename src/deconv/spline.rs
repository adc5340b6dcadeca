//! # 三次平滑样条
//!
//! Reinsch 形式：最小化 Σ(yᵢ − g(tᵢ))² + λ∫g''²。
//! 解 `(R + λQᵀQ)γ = Qᵀy` 得内部节点二阶导数 γ，再由 `g = y − λQγ`
//! 得节点处的样条值，两端为自然边界（二阶导数为 0）。
//!
//! ## 参考
//! - Green & Silverman, Nonparametric Regression and Generalized Linear Models, §2.3
//!
//! ## 依赖关系
//! - 被 `deconv/background.rs` 调用
//! - 使用 `deconv/linalg.rs`

use crate::deconv::linalg;
use crate::error::{PeakfitError, Result};

/// 拟合后的自然三次样条
#[derive(Debug, Clone)]
pub struct SmoothingSpline {
    knots: Vec<f64>,
    values: Vec<f64>,
    second: Vec<f64>,
}

impl SmoothingSpline {
    /// 在严格递增的节点上拟合
    ///
    /// `smoothing` 为无量纲系数，实际 λ = smoothing × (平均节点间距)³，
    /// 因此与横坐标单位无关。
    pub fn fit(knots: &[f64], values: &[f64], smoothing: f64) -> Result<Self> {
        let n = knots.len();
        if n != values.len() || n < 3 {
            return Err(PeakfitError::InvalidArgument(format!(
                "smoothing spline needs at least 3 matching knots, got {}",
                n
            )));
        }
        if knots.windows(2).any(|w| w[1] <= w[0]) {
            return Err(PeakfitError::InvalidArgument(
                "spline knots must be strictly increasing".to_string(),
            ));
        }

        let h: Vec<f64> = knots.windows(2).map(|w| w[1] - w[0]).collect();
        let mean_h = (knots[n - 1] - knots[0]) / (n - 1) as f64;
        let lambda = smoothing.max(0.0) * mean_h.powi(3);
        let m = n - 2;

        // Q: n × m，按列存储的三对角带
        let q = |row: usize, col: usize| -> f64 {
            if row == col {
                1.0 / h[col]
            } else if row == col + 1 {
                -1.0 / h[col] - 1.0 / h[col + 1]
            } else if row == col + 2 {
                1.0 / h[col + 1]
            } else {
                0.0
            }
        };

        let mut system = vec![vec![0.0; m]; m];
        for j in 0..m {
            system[j][j] = (h[j] + h[j + 1]) / 3.0;
            if j + 1 < m {
                system[j][j + 1] = h[j + 1] / 6.0;
                system[j + 1][j] = h[j + 1] / 6.0;
            }
        }
        if lambda > 0.0 {
            for a in 0..m {
                for b in a.saturating_sub(2)..(a + 3).min(m) {
                    let qtq: f64 = (0..n).map(|r| q(r, a) * q(r, b)).sum();
                    system[a][b] += lambda * qtq;
                }
            }
        }

        let rhs: Vec<f64> = (0..m)
            .map(|j| (0..n).map(|r| q(r, j) * values[r]).sum())
            .collect();

        let gamma = linalg::solve(system, rhs).ok_or_else(|| {
            PeakfitError::InvalidArgument("smoothing spline system is singular".to_string())
        })?;

        let fitted: Vec<f64> = (0..n)
            .map(|r| values[r] - lambda * (0..m).map(|j| q(r, j) * gamma[j]).sum::<f64>())
            .collect();

        let mut second = Vec::with_capacity(n);
        second.push(0.0);
        second.extend(gamma);
        second.push(0.0);

        Ok(Self {
            knots: knots.to_vec(),
            values: fitted,
            second,
        })
    }

    /// 求值；节点范围之外取端点值
    pub fn evaluate(&self, x: f64) -> f64 {
        let n = self.knots.len();
        if x <= self.knots[0] {
            return self.values[0];
        }
        if x >= self.knots[n - 1] {
            return self.values[n - 1];
        }
        let j = self.knots.partition_point(|&k| k <= x).saturating_sub(1).min(n - 2);
        let (t0, t1) = (self.knots[j], self.knots[j + 1]);
        let h = t1 - t0;
        let a = x - t0;
        let b = t1 - x;
        (a * self.values[j + 1] + b * self.values[j]) / h
            - a * b / 6.0
                * ((1.0 + a / h) * self.second[j + 1] + (1.0 + b / h) * self.second[j])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_is_reproduced() {
        let knots = [0.0, 1.0, 2.5, 3.0, 5.0];
        let values: Vec<f64> = knots.iter().map(|x| 2.0 * x + 1.0).collect();
        for smoothing in [0.0, 1.0, 100.0] {
            let spline = SmoothingSpline::fit(&knots, &values, smoothing).unwrap();
            for x in [0.5, 1.7, 2.9, 4.2] {
                assert!((spline.evaluate(x) - (2.0 * x + 1.0)).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_zero_smoothing_interpolates() {
        let knots = [0.0, 1.0, 2.0, 3.0, 4.0];
        let values = [1.0, 3.0, 2.0, 5.0, 4.0];
        let spline = SmoothingSpline::fit(&knots, &values, 0.0).unwrap();
        for (k, v) in knots.iter().zip(values) {
            assert!((spline.evaluate(*k) - v).abs() < 1e-9);
        }
    }

    #[test]
    fn test_large_smoothing_flattens() {
        let knots = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let values = [0.0, 4.0, 0.0, 4.0, 0.0, 4.0];
        let rough = SmoothingSpline::fit(&knots, &values, 0.0).unwrap();
        let smooth = SmoothingSpline::fit(&knots, &values, 1e4).unwrap();
        let spread = |s: &SmoothingSpline| {
            knots
                .iter()
                .map(|&k| s.evaluate(k))
                .fold(f64::NEG_INFINITY, f64::max)
                - knots.iter().map(|&k| s.evaluate(k)).fold(f64::INFINITY, f64::min)
        };
        assert!(spread(&smooth) < spread(&rough) * 0.5);
    }

    #[test]
    fn test_rejects_unsorted_knots() {
        assert!(SmoothingSpline::fit(&[0.0, 2.0, 1.0], &[1.0, 1.0, 1.0], 1.0).is_err());
    }
}
