//! # detect 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/detect.rs`

use super::fit::FitOptions;

use clap::Args;
use std::path::PathBuf;

/// detect 子命令参数
#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Spectrum file
    pub input: PathBuf,

    #[command(flatten)]
    pub options: FitOptions,
}
