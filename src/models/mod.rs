//! # 数据模型模块
//!
//! 定义谱、峰候选、峰组、拟合结果和配置的数据模型。
//!
//! ## 依赖关系
//! - 被 `parsers/`、`deconv/`、`session/`、`batch/`、`commands/` 使用
//! - 子模块: spectrum, peak, fit_result, config

pub mod config;
pub mod fit_result;
pub mod peak;
pub mod spectrum;

pub use config::{DetectionConfig, FitConfig};
pub use fit_result::{FitResult, PeakFailure};
pub use peak::{PeakCandidate, PeakGroup, PeakOrigin};
pub use spectrum::Spectrum;
