//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `detect`: 峰检测与重叠分组预览
//! - `fit`: 单谱多峰解卷积
//! - `batch`: 目录批量解卷积
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: fit, detect, batch

pub mod batch;
pub mod detect;
pub mod fit;

use clap::{Parser, Subcommand};

/// peakfit - 一维衍射谱多峰解卷积工具
#[derive(Parser)]
#[command(name = "peakfit")]
#[command(author = "Changjiang Wu")]
#[command(version)]
#[command(about = "Multi-peak deconvolution for 1D diffraction spectra", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Detect peaks and preview overlap groups
    Detect(detect::DetectArgs),

    /// Fit all peaks of a single spectrum
    Fit(fit::FitArgs),

    /// Fit every spectrum in a directory
    Batch(batch::BatchArgs),
}
