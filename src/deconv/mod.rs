//! # 多峰解卷积核心模块
//!
//! 纯同步的数值核心，可被任意并发封装调用。
//!
//! ## 流程
//! ```text
//! 谱 ──► detector (候选峰) ──► background (全局背景，可选)
//!                    │
//!                    ▼
//!              grouper (重叠分组)
//!                    │
//!         ┌──────────┴──────────┐
//!         ▼                     ▼
//!   single (单峰组)      multi (Stage A ─► Stage B)
//!         └──────────┬──────────┘
//!                    ▼
//!        curves / export / plot (输出)
//! ```
//!
//! ## 依赖关系
//! - 被 `session/`、`batch/`、`commands/` 使用
//! - 子模块: profile, faddeeva, linalg, solver, smoothing, spline, detector,
//!   background, window, grouper, single, multi, curves, export, plot

pub mod background;
pub mod curves;
pub mod detector;
pub mod export;
pub mod faddeeva;
pub mod grouper;
pub mod linalg;
pub mod multi;
pub mod plot;
pub mod profile;
pub mod single;
pub mod smoothing;
pub mod solver;
pub mod spline;
pub mod window;

#[cfg(test)]
pub(crate) mod testutil;

pub use background::{BackgroundMethod, BackgroundModel};
pub use curves::FitCurves;
pub use grouper::group_peaks;
pub use multi::{fit_group, GroupFit, GroupOutcome};
pub use profile::{ProfileKind, ProfileParams};
pub use single::fit_single;
pub use smoothing::SmoothingConfig;
