//! # 峰候选与峰组
//!
//! ## 依赖关系
//! - 被 `deconv/detector.rs`、`deconv/grouper.rs` 创建
//! - 被 `deconv/single.rs`、`deconv/multi.rs`、`session/` 使用

use serde::{Deserialize, Serialize};

/// 峰的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeakOrigin {
    /// 自动检测
    Detected,
    /// 手动添加
    Manual,
}

/// 峰候选
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakCandidate {
    /// 谱中的样本索引
    pub index: usize,
    /// 对应位置（2θ）
    pub position: f64,
    /// 工作数据中的峰高
    pub height: f64,
    /// 半高宽估计（位置单位）
    pub fwhm: f64,
    pub origin: PeakOrigin,
}

/// 峰组：单峰或重叠峰簇
///
/// `members` 为峰候选列表中的下标，按位置升序。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakGroup {
    pub members: Vec<usize>,
}

impl PeakGroup {
    pub fn singleton(member: usize) -> Self {
        Self {
            members: vec![member],
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }
}
