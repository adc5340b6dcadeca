//! # 拟合配置
//!
//! 所有可调参数集中在 `FitConfig` 中，可由命令行参数构造，也可以从
//! JSON 配置文件读取（缺失字段取默认值）。
//!
//! 重叠阈值 1.5 / 5.0 为经验默认值，应针对实际数据校验。
//!
//! ## 依赖关系
//! - 被 `deconv/`、`session/`、`batch/`、`commands/` 使用
//! - 使用 `serde_json` 读取配置文件

use crate::deconv::profile::ProfileKind;
use crate::deconv::smoothing::SmoothingConfig;
use crate::error::{PeakfitError, Result};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 峰检测参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// 最小峰高：全局最小值 + 该比例 × 强度范围
    pub height_fraction: f64,
    /// 最小显著性：该比例 × 强度范围
    pub prominence_fraction: f64,
    /// 相邻峰最小样本间隔
    pub min_distance: usize,
    /// 检测前可选平滑
    pub smoothing: Option<SmoothingConfig>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            height_fraction: 0.05,
            prominence_fraction: 0.02,
            min_distance: 5,
            smoothing: None,
        }
    }
}

/// 拟合配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub profile: ProfileKind,
    /// 重叠模式：更宽的分组、窗口和中心容差，更严格的收敛判据
    pub overlap_mode: bool,
    /// 普通模式重叠阈值（× FWHM）
    pub overlap_threshold: f64,
    /// 重叠模式阈值（× FWHM）
    pub overlap_mode_threshold: f64,
    /// 单峰窗口半宽（× FWHM），重叠模式下额外 +1.0
    pub window_multiplier: f64,
    /// Stage A 窗口倍数
    pub stage_a_multiplier: f64,
    /// 联合窗口缩放系数
    pub joint_window_factor: f64,
    /// 窗口半宽的样本数范围
    pub min_window_points: usize,
    pub max_window_points: usize,
    /// FWHM 估计失败时的替代值（位置单位）
    pub fallback_fwhm: f64,
    /// 中心容差（× FWHM）
    pub center_tolerance: f64,
    pub overlap_center_tolerance: f64,
    /// 收敛容差
    pub tolerance: f64,
    pub overlap_tolerance: f64,
    /// 最大迭代次数
    pub max_iterations: usize,
    pub overlap_max_iterations: usize,
    pub detection: DetectionConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            profile: ProfileKind::PseudoVoigt,
            overlap_mode: false,
            overlap_threshold: 1.5,
            overlap_mode_threshold: 5.0,
            window_multiplier: 3.0,
            stage_a_multiplier: 2.0,
            joint_window_factor: 0.8,
            min_window_points: 8,
            max_window_points: 400,
            fallback_fwhm: 0.1,
            center_tolerance: 0.5,
            overlap_center_tolerance: 0.8,
            tolerance: 1e-8,
            overlap_tolerance: 1e-9,
            max_iterations: 10_000,
            overlap_max_iterations: 30_000,
            detection: DetectionConfig::default(),
        }
    }
}

impl FitConfig {
    /// 从 JSON 文件读取
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| PeakfitError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| PeakfitError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// 当前生效的分组阈值
    pub fn effective_threshold(&self) -> f64 {
        if self.overlap_mode {
            self.overlap_mode_threshold
        } else {
            self.overlap_threshold
        }
    }

    /// 当前生效的窗口倍数
    pub fn effective_window_multiplier(&self) -> f64 {
        if self.overlap_mode {
            self.window_multiplier + 1.0
        } else {
            self.window_multiplier
        }
    }

    /// 当前生效的中心容差系数
    pub fn effective_center_tolerance(&self) -> f64 {
        if self.overlap_mode {
            self.overlap_center_tolerance
        } else {
            self.center_tolerance
        }
    }

    pub fn effective_tolerance(&self) -> f64 {
        if self.overlap_mode {
            self.overlap_tolerance
        } else {
            self.tolerance
        }
    }

    pub fn effective_max_iterations(&self) -> usize {
        if self.overlap_mode {
            self.overlap_max_iterations
        } else {
            self.max_iterations
        }
    }

    /// 检查参数合法性
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("overlap_threshold", self.overlap_threshold),
            ("overlap_mode_threshold", self.overlap_mode_threshold),
            ("window_multiplier", self.window_multiplier),
            ("stage_a_multiplier", self.stage_a_multiplier),
            ("joint_window_factor", self.joint_window_factor),
            ("fallback_fwhm", self.fallback_fwhm),
            ("tolerance", self.tolerance),
            ("overlap_tolerance", self.overlap_tolerance),
        ];
        for (name, value) in positive {
            if !(value > 0.0) || !value.is_finite() {
                return Err(PeakfitError::InvalidArgument(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        if self.min_window_points < 3 || self.max_window_points < self.min_window_points {
            return Err(PeakfitError::InvalidArgument(format!(
                "invalid window point range {}..{}",
                self.min_window_points, self.max_window_points
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_mode_switches_regime() {
        let mut config = FitConfig::default();
        assert_eq!(config.effective_threshold(), 1.5);
        assert_eq!(config.effective_window_multiplier(), 3.0);
        assert_eq!(config.effective_max_iterations(), 10_000);

        config.overlap_mode = true;
        assert_eq!(config.effective_threshold(), 5.0);
        assert_eq!(config.effective_window_multiplier(), 4.0);
        assert_eq!(config.effective_center_tolerance(), 0.8);
        assert_eq!(config.effective_tolerance(), 1e-9);
        assert_eq!(config.effective_max_iterations(), 30_000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FitConfig =
            serde_json::from_str(r#"{"profile": "voigt", "overlap_mode_threshold": 4.0}"#).unwrap();
        assert_eq!(config.profile, ProfileKind::Voigt);
        assert_eq!(config.overlap_mode_threshold, 4.0);
        assert_eq!(config.window_multiplier, 3.0);
        assert_eq!(config.detection.min_distance, 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = FitConfig {
            window_multiplier: 0.0,
            ..FitConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(FitConfig::default().validate().is_ok());
    }
}
