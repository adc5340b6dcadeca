//! # batch 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/batch.rs`

use super::fit::{BackgroundArg, FitOptions};
use crate::batch::FailurePolicy;

use clap::{Args, ValueEnum};
use std::path::PathBuf;

/// 失败策略
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum PolicyArg {
    /// Pause and ask what to do
    Pause,
    /// Log the failure and continue with the next file
    Skip,
    /// Stop the whole batch
    Stop,
}

impl std::fmt::Display for PolicyArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyArg::Pause => write!(f, "pause"),
            PolicyArg::Skip => write!(f, "skip"),
            PolicyArg::Stop => write!(f, "stop"),
        }
    }
}

impl From<PolicyArg> for FailurePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Pause => FailurePolicy::Pause,
            PolicyArg::Skip => FailurePolicy::Skip,
            PolicyArg::Stop => FailurePolicy::Stop,
        }
    }
}

/// batch 子命令参数
#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Input directory (or a file: its siblings with the same extension are processed)
    pub input: PathBuf,

    #[command(flatten)]
    pub options: FitOptions,

    /// File matching pattern(s), comma-separated
    #[arg(short, long)]
    pub pattern: Option<String>,

    /// Search subdirectories recursively
    #[arg(short, long, default_value_t = false)]
    pub recursive: bool,

    /// What to do when a file fails or fits poorly
    #[arg(long, value_enum, default_value_t = PolicyArg::Skip)]
    pub policy: PolicyArg,

    /// Files with a worse R² than this are treated as failures
    #[arg(long, default_value_t = 0.92)]
    pub r2_threshold: f64,

    /// Automatic global background subtraction (manual is not available in batch mode)
    #[arg(long, value_enum, default_value_t = BackgroundArg::None)]
    pub background: BackgroundArg,

    /// Smoothing parameter for --background spline
    #[arg(long, default_value_t = 0.0)]
    pub spline_smoothing: f64,

    /// Pause after each file (milliseconds)
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,

    /// Render a fit plot per file
    #[arg(long, default_value_t = false)]
    pub save_plots: bool,

    /// Do not write per-file and aggregate CSV results
    #[arg(long, default_value_t = false)]
    pub no_results: bool,

    /// Output directory (default: next to each input file)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
