//! # 拟合窗口
//!
//! 从工作谱中截取局部窗口，并扣除边缘局部背景。
//! 单峰拟合以峰为中心取窗口，联合拟合取覆盖整个峰组的区间。
//!
//! ## 依赖关系
//! - 被 `deconv/single.rs`、`deconv/multi.rs` 调用
//! - 使用 `deconv/background.rs` 的边缘背景估计

use crate::deconv::background::edge_background;
use crate::error::{PeakfitError, Result};
use crate::models::FitConfig;

use serde::{Deserialize, Serialize};

/// 拟合窗口样本，`start..end` 为谱中的索引范围
#[derive(Debug, Clone)]
pub struct FitWindow {
    pub start: usize,
    pub end: usize,
    pub x: Vec<f64>,
    /// 窗口内的工作强度
    pub raw: Vec<f64>,
    /// 边缘局部背景
    pub background: Vec<f64>,
    /// 扣除局部背景后的强度
    pub corrected: Vec<f64>,
}

/// 窗口的位置范围
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowSpan {
    pub start: f64,
    pub end: f64,
}

impl FitWindow {
    /// 由索引范围构造（`end` 不含）
    pub fn from_range(
        positions: &[f64],
        trace: &[f64],
        start: usize,
        end: usize,
        min_points: usize,
        anchor: f64,
    ) -> Result<Self> {
        let n = positions.len().min(trace.len());
        let end = end.min(n);
        if start >= end || end - start < min_points {
            return Err(PeakfitError::BoundsInfeasible {
                position: anchor,
                reason: format!(
                    "window holds {} samples, at least {} required",
                    end.saturating_sub(start),
                    min_points
                ),
            });
        }

        let x = positions[start..end].to_vec();
        let raw = trace[start..end].to_vec();
        let background = edge_background(&x, &raw);
        let corrected = raw.iter().zip(&background).map(|(y, b)| y - b).collect();
        Ok(Self {
            start,
            end,
            x,
            raw,
            background,
            corrected,
        })
    }

    /// 以样本 `center` 为中心、半宽 `half_width` 个样本的窗口
    pub fn centered(
        positions: &[f64],
        trace: &[f64],
        center: usize,
        half_width: usize,
        min_points: usize,
    ) -> Result<Self> {
        let start = center.saturating_sub(half_width);
        let end = center.saturating_add(half_width).saturating_add(1);
        let anchor = positions.get(center).copied().unwrap_or(f64::NAN);
        Self::from_range(positions, trace, start, end, min_points, anchor)
    }

    /// 覆盖位置区间 `[lo, hi]` 的窗口
    pub fn spanning(
        positions: &[f64],
        trace: &[f64],
        lo: f64,
        hi: f64,
        min_points: usize,
    ) -> Result<Self> {
        let start = positions.partition_point(|&x| x < lo);
        let end = positions.partition_point(|&x| x <= hi);
        Self::from_range(positions, trace, start, end, min_points, 0.5 * (lo + hi))
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn span(&self) -> WindowSpan {
        WindowSpan {
            start: self.x.first().copied().unwrap_or(f64::NAN),
            end: self.x.last().copied().unwrap_or(f64::NAN),
        }
    }

    /// 窗口内扣除背景后强度的 (最小值, 最大值)
    pub fn corrected_range(&self) -> (f64, f64) {
        self.corrected
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// 位置 `x0` 附近 ±`radius` 内扣除背景后的最大值
    pub fn local_height(&self, x0: f64, radius: f64) -> f64 {
        let height = self
            .x
            .iter()
            .zip(&self.corrected)
            .filter(|(x, _)| (**x - x0).abs() <= radius)
            .map(|(_, y)| *y)
            .fold(f64::NEG_INFINITY, f64::max);
        if height.is_finite() {
            height
        } else {
            self.corrected_range().1
        }
    }
}

/// 窗口半宽的样本数：FWHM × 倍数 / 平均步长，限制在配置范围内
pub fn half_width_points(fwhm: f64, multiplier: f64, step: f64, config: &FitConfig) -> usize {
    let raw = if step > 0.0 {
        (fwhm * multiplier / step).round()
    } else {
        0.0
    };
    let points = if raw.is_finite() && raw > 0.0 {
        raw as usize
    } else {
        config.min_window_points
    };
    points.clamp(config.min_window_points, config.max_window_points)
}

/// 决定系数，限制在 [0, 1]
pub fn r_squared(observed: &[f64], fitted: &[f64]) -> f64 {
    let n = observed.len().min(fitted.len());
    if n == 0 {
        return 0.0;
    }
    let mean = observed[..n].iter().sum::<f64>() / n as f64;
    let ss_tot: f64 = observed[..n].iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = observed[..n]
        .iter()
        .zip(&fitted[..n])
        .map(|(y, f)| (y - f).powi(2))
        .sum();
    if !(ss_tot > 0.0) {
        return 0.0;
    }
    (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
}
