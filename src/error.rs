//! # 统一错误处理模块
//!
//! 定义 peakfit 的所有错误类型，使用 `thiserror` 派生。
//!
//! ## 错误分级
//! - 文件级：`DataLoad`、`BatchFile`（由批处理失败策略决定后续行为）
//! - 峰/峰组级：`FitConvergence`、`BoundsInfeasible`（跳过该峰，继续处理其余峰）
//! - 提示级：`DetectionEmpty`（警告，不中断流程）
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 无外部模块依赖

use thiserror::Error;

/// peakfit 统一错误类型
#[derive(Error, Debug)]
pub enum PeakfitError {
    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ─────────────────────────────────────────────────────────────
    // 数据加载 / 检测
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to load spectrum: {path}\nReason: {reason}")]
    DataLoad { path: String, reason: String },

    #[error("No peaks found in {context}")]
    DetectionEmpty { context: String },

    // ─────────────────────────────────────────────────────────────
    // 拟合错误
    // ─────────────────────────────────────────────────────────────
    #[error("Fit did not converge for peak at {position:.4}: {reason}")]
    FitConvergence { position: f64, reason: String },

    #[error("Infeasible fitting window for peak at {position:.4}: {reason}")]
    BoundsInfeasible { position: f64, reason: String },

    // ─────────────────────────────────────────────────────────────
    // 批处理
    // ─────────────────────────────────────────────────────────────
    #[error("Batch processing failed for {path}: {reason}")]
    BatchFile { path: String, reason: String },

    #[error("A fitting job is already running")]
    WorkerBusy,

    #[error("Background worker disconnected")]
    WorkerDisconnected,

    // ─────────────────────────────────────────────────────────────
    // 参数 / 配置
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration file {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("No spectrum loaded")]
    NoSpectrum,

    // ─────────────────────────────────────────────────────────────
    // 输出
    // ─────────────────────────────────────────────────────────────
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Plot rendering failed: {0}")]
    Plot(String),

    // ─────────────────────────────────────────────────────────────
    // 其他
    // ─────────────────────────────────────────────────────────────
    #[error("No matching files found with pattern: {pattern}")]
    NoFilesFound { pattern: String },

    #[error("{0}")]
    Other(String),
}

impl PeakfitError {
    /// 峰级失败：调用方跳过该峰并继续
    pub fn is_peak_level(&self) -> bool {
        matches!(
            self,
            PeakfitError::FitConvergence { .. } | PeakfitError::BoundsInfeasible { .. }
        )
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, PeakfitError>;
