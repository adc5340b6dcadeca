//! # 解析器模块
//!
//! 提供一维衍射谱文本格式的解析器。
//!
//! ## 依赖关系
//! - 被 `session/`、`batch/`、`commands/` 使用
//! - 使用 `models/` 数据模型
//! - 子模块: xy

pub mod xy;

pub use xy::{parse_xy_content, parse_xy_file};
