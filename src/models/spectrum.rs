//! # 一维衍射谱数据模型
//!
//! 保存 (2θ, 强度) 序列。原始强度在加载后不可变，所有背景扣除和平滑
//! 只作用于工作副本，因此随时可以逐位还原。
//!
//! ## 依赖关系
//! - 被 `parsers/xy.rs` 创建
//! - 被 `deconv/`、`session/`、`batch/` 使用

use crate::error::{PeakfitError, Result};

/// 一维衍射谱
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// 谱名称（通常为文件名主干）
    pub name: String,
    /// 位置（2θ），严格递增
    positions: Vec<f64>,
    /// 原始强度（只读）
    original: Vec<f64>,
    /// 工作强度（背景扣除 / 平滑之后）
    working: Vec<f64>,
    /// 当前已扣除的背景曲线
    subtracted: Option<Vec<f64>>,
    /// 平滑后的基线数据
    smoothed: Option<Vec<f64>>,
}

impl Spectrum {
    /// 创建新谱，位置与强度长度必须一致
    pub fn new(name: impl Into<String>, positions: Vec<f64>, intensities: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if positions.len() != intensities.len() {
            return Err(PeakfitError::DataLoad {
                path: name,
                reason: format!(
                    "position/intensity length mismatch ({} vs {})",
                    positions.len(),
                    intensities.len()
                ),
            });
        }
        Ok(Self {
            name,
            positions,
            working: intensities.clone(),
            original: intensities,
            subtracted: None,
            smoothed: None,
        })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn original(&self) -> &[f64] {
        &self.original
    }

    pub fn working(&self) -> &[f64] {
        &self.working
    }

    /// 当前已扣除的背景
    pub fn subtracted_background(&self) -> Option<&[f64]> {
        self.subtracted.as_deref()
    }

    pub fn is_smoothed(&self) -> bool {
        self.smoothed.is_some()
    }

    /// 平均采样间隔
    pub fn mean_step(&self) -> f64 {
        if self.positions.len() < 2 {
            return 1.0;
        }
        let span = self.positions[self.positions.len() - 1] - self.positions[0];
        span / (self.positions.len() - 1) as f64
    }

    /// 离给定位置最近的样本索引
    pub fn nearest_index(&self, x: f64) -> Option<usize> {
        if self.positions.is_empty() {
            return None;
        }
        let idx = self.positions.partition_point(|&p| p < x);
        if idx == 0 {
            return Some(0);
        }
        if idx >= self.positions.len() {
            return Some(self.positions.len() - 1);
        }
        if (x - self.positions[idx - 1]) <= (self.positions[idx] - x) {
            Some(idx - 1)
        } else {
            Some(idx)
        }
    }

    /// 背景扣除前的基线数据：平滑结果或原始强度
    pub fn base(&self) -> &[f64] {
        self.smoothed.as_deref().unwrap_or(&self.original)
    }

    /// 从工作副本中扣除背景
    ///
    /// 已存在的背景会先被还原，不会累计扣除。
    pub fn subtract_background(&mut self, background: &[f64]) -> Result<()> {
        if background.len() != self.len() {
            return Err(PeakfitError::InvalidArgument(format!(
                "background length {} does not match spectrum length {}",
                background.len(),
                self.len()
            )));
        }
        let base = self.smoothed.as_ref().unwrap_or(&self.original);
        for ((w, b), bg) in self.working.iter_mut().zip(base).zip(background) {
            *w = b - bg;
        }
        self.subtracted = Some(background.to_vec());
        Ok(())
    }

    /// 撤销背景扣除，工作副本从基线数据逐位复制
    pub fn clear_background(&mut self) {
        self.subtracted = None;
        let base = self.smoothed.as_ref().unwrap_or(&self.original);
        self.working.copy_from_slice(base);
    }

    /// 设置平滑后的基线数据，已扣除的背景会重新作用其上
    pub fn set_smoothed(&mut self, smoothed: Vec<f64>) -> Result<()> {
        if smoothed.len() != self.len() {
            return Err(PeakfitError::InvalidArgument(
                "smoothed trace length mismatch".to_string(),
            ));
        }
        self.smoothed = Some(smoothed);
        match self.subtracted.take() {
            Some(bg) => self.subtract_background(&bg)?,
            None => self.clear_background(),
        }
        Ok(())
    }

    /// 还原到原始数据（撤销平滑与背景扣除）
    pub fn restore_original(&mut self) {
        self.smoothed = None;
        self.subtracted = None;
        self.working.copy_from_slice(&self.original);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Spectrum {
        let x: Vec<f64> = (0..50).map(|i| 10.0 + i as f64 * 0.02).collect();
        let y: Vec<f64> = x.iter().map(|v| 100.0 + (v * 7.3).sin() * 13.7 + 0.1).collect();
        Spectrum::new("sample", x, y).unwrap()
    }

    #[test]
    fn test_subtract_then_clear_is_bit_identical() {
        let mut s = sample();
        let bg: Vec<f64> = (0..50).map(|i| 33.3 + i as f64 * 0.7).collect();
        s.subtract_background(&bg).unwrap();
        assert!(s.working().iter().zip(s.original()).any(|(a, b)| a != b));
        s.clear_background();
        assert!(s.subtracted_background().is_none());
        for (a, b) in s.working().iter().zip(s.original()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_repeated_subtraction_does_not_accumulate() {
        let mut s = sample();
        let bg = vec![10.0; 50];
        s.subtract_background(&bg).unwrap();
        s.subtract_background(&bg).unwrap();
        assert!((s.working()[0] - (s.original()[0] - 10.0)).abs() < 1e-12);
    }

    #[test]
    fn test_restore_after_smoothing() {
        let mut s = sample();
        s.set_smoothed(vec![1.0; 50]).unwrap();
        s.subtract_background(&vec![0.5; 50]).unwrap();
        assert!((s.working()[3] - 0.5).abs() < 1e-12);
        s.restore_original();
        assert!(!s.is_smoothed());
        for (a, b) in s.working().iter().zip(s.original()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_background_length_mismatch() {
        let mut s = sample();
        assert!(s.subtract_background(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_nearest_index() {
        let s = sample();
        assert_eq!(s.nearest_index(0.0), Some(0));
        assert_eq!(s.nearest_index(10.021), Some(1));
        assert_eq!(s.nearest_index(10.039), Some(2));
        assert_eq!(s.nearest_index(99.0), Some(49));
    }
}
