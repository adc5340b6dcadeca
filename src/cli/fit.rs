//! # fit 子命令 CLI 定义
//!
//! 同时定义 `detect`、`fit`、`batch` 共用的拟合选项 `FitOptions`。
//! 显式给出的参数覆盖 `--config` 配置文件中的值。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs`、`cli/detect.rs`、`cli/batch.rs` 使用
//! - 参数传递给 `commands/fit.rs`

use crate::deconv::{BackgroundMethod, ProfileKind};

use clap::{Args, ValueEnum};
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────
// 枚举参数
// ─────────────────────────────────────────────────────────────

/// 峰形
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ProfileArg {
    /// Pseudo-Voigt (Gaussian/Lorentzian mix)
    PseudoVoigt,
    /// Voigt (Faddeeva function)
    Voigt,
}

impl std::fmt::Display for ProfileArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileArg::PseudoVoigt => write!(f, "pseudo-voigt"),
            ProfileArg::Voigt => write!(f, "voigt"),
        }
    }
}

impl From<ProfileArg> for ProfileKind {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::PseudoVoigt => ProfileKind::PseudoVoigt,
            ProfileArg::Voigt => ProfileKind::Voigt,
        }
    }
}

/// 全局背景方法
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum BackgroundArg {
    /// No global background (edge-local background only)
    #[default]
    None,
    /// Straight segments through the valleys between peaks
    Valleys,
    /// Smoothing spline through the valleys
    Spline,
    /// Linear interpolation through --bg-points
    Manual,
}

impl std::fmt::Display for BackgroundArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackgroundArg::None => write!(f, "none"),
            BackgroundArg::Valleys => write!(f, "valleys"),
            BackgroundArg::Spline => write!(f, "spline"),
            BackgroundArg::Manual => write!(f, "manual"),
        }
    }
}

impl BackgroundArg {
    pub fn method(self) -> Option<BackgroundMethod> {
        match self {
            BackgroundArg::None => None,
            BackgroundArg::Valleys => Some(BackgroundMethod::Valleys),
            BackgroundArg::Spline => Some(BackgroundMethod::Spline),
            BackgroundArg::Manual => Some(BackgroundMethod::Manual),
        }
    }
}

/// 解析背景控制点 `x:y`
pub fn parse_point(input: &str) -> Result<(f64, f64), String> {
    let (x, y) = input
        .split_once(':')
        .ok_or_else(|| format!("Expected 'x:y', got '{}'", input))?;
    let x: f64 = x
        .trim()
        .parse()
        .map_err(|_| format!("Invalid x value in '{}'", input))?;
    let y: f64 = y
        .trim()
        .parse()
        .map_err(|_| format!("Invalid y value in '{}'", input))?;
    Ok((x, y))
}

// ─────────────────────────────────────────────────────────────
// 共用拟合选项
// ─────────────────────────────────────────────────────────────

/// 拟合与检测选项
#[derive(Args, Debug, Clone)]
pub struct FitOptions {
    /// JSON configuration file (explicit flags take precedence)
    #[arg(long, env = "PEAKFIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Peak profile
    #[arg(long, value_enum)]
    pub profile: Option<ProfileArg>,

    /// Group overlapping peaks and fit them jointly with wider windows
    #[arg(long, default_value_t = false)]
    pub overlap_mode: bool,

    /// Override the grouping threshold (multiple of FWHM)
    #[arg(long)]
    pub overlap_threshold: Option<f64>,

    /// Fit window half-width as a multiple of FWHM
    #[arg(long)]
    pub window_multiplier: Option<f64>,

    /// Minimum peak height as a fraction of the intensity range
    #[arg(long)]
    pub height_fraction: Option<f64>,

    /// Minimum peak prominence as a fraction of the intensity range
    #[arg(long)]
    pub prominence_fraction: Option<f64>,

    /// Minimum distance between detected peaks (samples)
    #[arg(long)]
    pub min_distance: Option<usize>,

    /// Savitzky-Golay smoothing window (odd, samples)
    #[arg(long)]
    pub smooth: Option<usize>,

    /// Savitzky-Golay polynomial order
    #[arg(long, default_value_t = 3)]
    pub smooth_order: usize,

    /// Number of parallel jobs for Stage-A fits (0 = auto)
    #[arg(short = 'j', long, default_value_t = 0)]
    pub jobs: usize,
}

// ─────────────────────────────────────────────────────────────
// fit 子命令
// ─────────────────────────────────────────────────────────────

/// fit 子命令参数
#[derive(Args, Debug)]
pub struct FitArgs {
    /// Spectrum file (two or more columns: position, intensity, ...)
    pub input: PathBuf,

    #[command(flatten)]
    pub options: FitOptions,

    /// Peak positions to fit instead of auto-detection (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub peaks: Vec<f64>,

    /// Global background subtraction
    #[arg(long, value_enum, default_value_t = BackgroundArg::None)]
    pub background: BackgroundArg,

    /// Background control points for --background manual ('x:y', comma-separated)
    #[arg(long, value_delimiter = ',', value_parser = parse_point)]
    pub bg_points: Vec<(f64, f64)>,

    /// Smoothing parameter for --background spline (0 = interpolating)
    #[arg(long, default_value_t = 0.0)]
    pub spline_smoothing: f64,

    /// Output directory (default: next to the input file)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Do not write the results CSV
    #[arg(long, default_value_t = false)]
    pub no_results: bool,

    /// Render a fit plot
    #[arg(long, default_value_t = false)]
    pub save_plot: bool,

    /// Render the plot as SVG instead of PNG
    #[arg(long, default_value_t = false)]
    pub svg: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("10.5:120"), Ok((10.5, 120.0)));
        assert_eq!(parse_point(" 3 : -1.5 "), Ok((3.0, -1.5)));
        assert!(parse_point("10.5").is_err());
        assert!(parse_point("a:1").is_err());
    }

    #[test]
    fn test_background_arg_mapping() {
        assert_eq!(BackgroundArg::None.method(), None);
        assert_eq!(BackgroundArg::Spline.method(), Some(BackgroundMethod::Spline));
        assert_eq!(ProfileKind::from(ProfileArg::Voigt), ProfileKind::Voigt);
    }
}
