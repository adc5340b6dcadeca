//! # 背景估计
//!
//! ## 策略
//! - `Manual`: 用户选择的控制点，按 x 排序后线性插值，两端平推
//! - `Valleys`: 相邻峰之间（以及首峰之前、末峰之后）的局部最小值作为控制点
//! - `Spline`: 以谷底控制点拟合平滑样条，适合弯曲基线
//! - 边缘局部估计：拟合窗口内部使用，与全局背景选择无关
//!
//! 所有全局背景曲线与谱长度一致；扣除在 `Spectrum` 的工作副本上进行，
//! 原始数据始终保留。
//!
//! ## 依赖关系
//! - 被 `session/`、`batch/`、`deconv/window.rs` 调用
//! - 使用 `deconv/spline.rs`

use crate::deconv::spline::SmoothingSpline;
use crate::error::{PeakfitError, Result};

use serde::{Deserialize, Serialize};

/// 背景方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackgroundMethod {
    Manual,
    Valleys,
    Spline,
}

impl std::fmt::Display for BackgroundMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackgroundMethod::Manual => write!(f, "manual"),
            BackgroundMethod::Valleys => write!(f, "valleys"),
            BackgroundMethod::Spline => write!(f, "spline"),
        }
    }
}

/// 背景模型：控制点 + 方法 + 与谱等长的曲线
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundModel {
    pub method: BackgroundMethod,
    pub points: Vec<(f64, f64)>,
    pub curve: Vec<f64>,
}

impl BackgroundModel {
    /// 手动控制点
    pub fn manual(positions: &[f64], points: &[(f64, f64)]) -> Result<Self> {
        if points.is_empty() {
            return Err(PeakfitError::InvalidArgument(
                "manual background needs at least one control point".to_string(),
            ));
        }
        let points = sorted_points(points);
        let curve = interpolate_linear(positions, &points);
        Ok(Self {
            method: BackgroundMethod::Manual,
            points,
            curve,
        })
    }

    /// 自动谷底检测
    pub fn from_valleys(positions: &[f64], trace: &[f64], peaks: &[usize]) -> Result<Self> {
        let points = valley_points(positions, trace, peaks);
        if points.is_empty() {
            return Err(PeakfitError::InvalidArgument(
                "no valley control points found".to_string(),
            ));
        }
        let curve = interpolate_linear(positions, &points);
        Ok(Self {
            method: BackgroundMethod::Valleys,
            points,
            curve,
        })
    }

    /// 谷底控制点上的平滑样条；控制点不足 3 个时退化为线性插值
    pub fn spline(
        positions: &[f64],
        trace: &[f64],
        peaks: &[usize],
        smoothing: f64,
    ) -> Result<Self> {
        let points = valley_points(positions, trace, peaks);
        if points.len() < 3 {
            log::debug!(
                "only {} valley points, falling back to linear background",
                points.len()
            );
            let mut model = Self::from_valleys(positions, trace, peaks)?;
            model.method = BackgroundMethod::Spline;
            return Ok(model);
        }

        let knots: Vec<f64> = points.iter().map(|p| p.0).collect();
        let values: Vec<f64> = points.iter().map(|p| p.1).collect();
        let spline = SmoothingSpline::fit(&knots, &values, smoothing)?;
        let curve = positions.iter().map(|&x| spline.evaluate(x)).collect();
        Ok(Self {
            method: BackgroundMethod::Spline,
            points,
            curve,
        })
    }
}

/// 按 x 排序，x 相同的点保留后加入的一个
fn sorted_points(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut sorted: Vec<(f64, f64)> = points.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut out: Vec<(f64, f64)> = Vec::with_capacity(sorted.len());
    for p in sorted {
        match out.last_mut() {
            Some(last) if last.0 == p.0 => *last = p,
            _ => out.push(p),
        }
    }
    out
}

/// 线性插值，两端平推
pub fn interpolate_linear(positions: &[f64], points: &[(f64, f64)]) -> Vec<f64> {
    if points.is_empty() {
        return vec![0.0; positions.len()];
    }
    let first = points[0];
    let last = points[points.len() - 1];

    positions
        .iter()
        .map(|&x| {
            if x <= first.0 {
                return first.1;
            }
            if x >= last.0 {
                return last.1;
            }
            let j = points.partition_point(|p| p.0 <= x);
            let (x0, y0) = points[j - 1];
            let (x1, y1) = points[j];
            y0 + (y1 - y0) * (x - x0) / (x1 - x0)
        })
        .collect()
}

/// 峰间谷底控制点
///
/// 区段为 [0, p₀)、(pᵢ, pᵢ₊₁)、(pₙ, N−1]，每段取最小值所在样本。
pub fn valley_points(positions: &[f64], trace: &[f64], peaks: &[usize]) -> Vec<(f64, f64)> {
    let n = trace.len().min(positions.len());
    if n == 0 {
        return Vec::new();
    }

    let mut sorted: Vec<usize> = peaks.iter().copied().filter(|&p| p < n).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut segments: Vec<(usize, usize)> = Vec::new();
    match (sorted.first(), sorted.last()) {
        (Some(&first), Some(&last)) => {
            segments.push((0, first));
            for w in sorted.windows(2) {
                segments.push((w[0] + 1, w[1]));
            }
            segments.push((last + 1, n));
        }
        _ => segments.push((0, n)),
    }

    segments
        .into_iter()
        .filter(|(lo, hi)| hi > lo)
        .filter_map(|(lo, hi)| {
            (lo..hi)
                .min_by(|&a, &b| trace[a].total_cmp(&trace[b]))
                .map(|i| (positions[i], trace[i]))
        })
        .collect()
}

/// 拟合窗口内的边缘局部背景
///
/// 两侧各取 5% 宽度的边缘，取其中最低 10% 的强度求平均，再线性连接。
/// 对噪声和局部异常值稳健，与全局背景方法无关。
pub fn edge_background(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = y.len().min(x.len());
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![y[0]];
    }

    let margin = ((n as f64 * 0.05).ceil() as usize).clamp(1, n);
    let left = low_mean(&y[..margin]);
    let right = low_mean(&y[n - margin..n]);

    let (x0, x1) = (x[0], x[n - 1]);
    let span = x1 - x0;
    x[..n]
        .iter()
        .map(|&xi| {
            if span == 0.0 {
                0.5 * (left + right)
            } else {
                left + (right - left) * (xi - x0) / span
            }
        })
        .collect()
}

/// 最低 10%（至少一个）的平均值
fn low_mean(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let k = ((sorted.len() as f64 * 0.1).ceil() as usize).clamp(1, sorted.len());
    sorted[..k].iter().sum::<f64>() / k as f64
}
