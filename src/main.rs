//! # peakfit - 一维衍射谱多峰解卷积
//!
//! 对 XRD 等一维谱做自动峰检测、背景扣除、重叠峰分组与
//! Pseudo-Voigt / Voigt 多峰拟合，支持单谱和目录批处理。
//!
//! ## 子命令
//! - `detect` - 峰检测与分组预览
//! - `fit`    - 单谱拟合
//! - `batch`  - 目录批处理（Pause / Skip / Stop 失败策略）
//!
//! ## 依赖关系
//! ```text
//! main.rs
//!   ├── cli/        (命令行参数定义)
//!   ├── commands/   (命令执行逻辑)
//!   │     ├── session/   (交互会话与后台拟合线程)
//!   │     ├── batch/     (文件收集与批处理编排)
//!   │     ├── deconv/    (数值核心：检测、背景、分组、拟合、输出)
//!   │     ├── parsers/   (谱文件解析)
//!   │     └── models/    (数据模型与配置)
//!   ├── utils/      (终端输出与进度条)
//!   └── error.rs    (错误处理)
//! ```

mod batch;
mod cli;
mod commands;
mod deconv;
mod error;
mod models;
mod parsers;
mod session;
mod utils;

use clap::Parser;
use cli::Cli;

fn main() {
    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    if let Err(e) = commands::run(cli.command) {
        log::debug!("{:?}", e);
        utils::output::print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
