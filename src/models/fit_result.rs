//! # 拟合结果数据模型
//!
//! 每个峰一条 `FitResult`；失败的峰记录为 `PeakFailure`，不会中断其余峰。
//!
//! ## 依赖关系
//! - 被 `deconv/single.rs`、`deconv/multi.rs` 创建
//! - 被 `session/`、`batch/`、`deconv/export.rs`、`deconv/plot.rs` 使用

use crate::deconv::profile::{ProfileKind, ProfileParams};
use crate::deconv::window::WindowSpan;
use crate::error::PeakfitError;

use serde::{Deserialize, Serialize};

/// 单峰拟合结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// 峰候选列表中的下标
    pub peak_index: usize,

    pub profile: ProfileKind,

    /// 拟合参数（联合拟合时为 Stage B 结果）
    pub params: ProfileParams,

    /// 半高全宽
    pub fwhm: f64,

    /// 积分面积
    pub area: f64,

    /// 峰顶高度
    pub height: f64,

    /// 决定系数，联合拟合时为整组共享
    pub r_squared: f64,

    /// 是否来自 Stage B 联合拟合
    ///
    /// 联合拟合失败降级时为 `false`，但 `group_size` 仍为原峰组大小。
    pub is_multi_peak: bool,

    /// 所在峰组的大小
    pub group_size: usize,

    /// Stage A 单峰参数（仅联合拟合）
    pub reference: Option<ProfileParams>,

    /// 拟合窗口
    pub window: WindowSpan,
}

impl FitResult {
    /// 由参数向量构造，派生量（FWHM、面积、高度）在此计算
    pub fn from_vector(
        peak_index: usize,
        profile: ProfileKind,
        p: &[f64],
        r_squared: f64,
        window: WindowSpan,
    ) -> Self {
        FitResult {
            peak_index,
            profile,
            params: profile.to_params(p),
            fwhm: profile.fwhm(p),
            area: profile.area(p),
            height: profile.height(p),
            r_squared,
            is_multi_peak: false,
            group_size: 1,
            reference: None,
            window,
        }
    }

    pub fn center(&self) -> f64 {
        self.params.center
    }

    /// 参数向量
    pub fn vector(&self) -> Vec<f64> {
        self.profile.to_vec(&self.params)
    }

    /// 在 x 处求该峰分量的值
    pub fn evaluate(&self, x: f64) -> f64 {
        self.profile.evaluate(x, &self.vector())
    }
}

/// 峰级失败
#[derive(Debug)]
pub struct PeakFailure {
    pub peak_index: usize,
    pub position: f64,
    pub error: PeakfitError,
}

impl std::fmt::Display for PeakFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peak #{} at {:.4}: {}", self.peak_index + 1, self.position, self.error)
    }
}
