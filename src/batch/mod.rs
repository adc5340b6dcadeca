//! # 批量处理模块
//!
//! 提供谱文件的批量解卷积能力。
//!
//! ## 功能
//! - 收集匹配的谱文件列表
//! - 逐文件执行检测、背景、分组与拟合
//! - 按失败策略（Pause / Skip / Stop）处理出错文件
//! - 后台线程运行，进度以事件形式回传
//!
//! ## 依赖关系
//! - 被 `commands/batch.rs` 使用
//! - 使用 `session/` 执行单文件流程
//! - 使用 `walkdir`、`glob` 收集文件

pub mod collector;
pub mod runner;

pub use collector::FileCollector;
pub use runner::{
    spawn_batch, BatchConfig, BatchControl, BatchEvent, BatchOrchestrator, BatchReport, BatchState,
    FailurePolicy, FileOutcome, FileStatus,
};
