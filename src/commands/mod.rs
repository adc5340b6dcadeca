//! # 命令执行模块
//!
//! 实现各子命令的业务逻辑。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `cli/`, `session/`, `batch/`, `deconv/`, `utils/`
//! - 子模块: detect, fit, batch

pub mod batch;
pub mod detect;
pub mod fit;

use crate::cli::Commands;
use crate::error::Result;

/// 执行命令
pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Detect(args) => detect::execute(args),
        Commands::Fit(args) => fit::execute(args),
        Commands::Batch(args) => batch::execute(args),
    }
}
