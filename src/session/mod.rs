//! # 交互会话
//!
//! `Session` 保存一次交互工作的全部可变状态：当前谱、峰候选与峰组、
//! 背景控制点与背景模型、拟合结果，以及可撤销操作的历史栈。
//! 会话是显式传递的普通值，批处理中每个文件复用同一个会话。
//!
//! ## 可撤销操作
//! 添加/删除峰、添加/删除背景控制点。撤销严格按入栈的逆序进行。
//!
//! ## 点选交互
//! 显示层只需把点击坐标转发给 `PointSelection::on_point_selected`，
//! 会话根据当前交互模式分派到峰编辑或背景编辑：左键添加，右键删除最近的一个。
//!
//! ## 依赖关系
//! - 被 `session/worker.rs`、`batch/runner.rs`、`commands/` 使用
//! - 使用 `deconv/`、`parsers/`、`models/`
//! - 子模块: worker

pub mod worker;

use crate::deconv::background::BackgroundModel;
use crate::deconv::curves::FitCurves;
use crate::deconv::detector::{self, build_candidates};
use crate::deconv::multi::{fit_group, GroupFit, GroupOutcome};
use crate::deconv::smoothing::{self, SmoothingConfig};
use crate::deconv::{group_peaks, BackgroundMethod};
use crate::error::{PeakfitError, Result};
use crate::models::{FitConfig, FitResult, PeakCandidate, PeakFailure, PeakGroup, PeakOrigin, Spectrum};
use crate::parsers;

use std::path::{Path, PathBuf};

/// 鼠标按键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

/// 交互模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InteractionMode {
    /// 点击编辑峰
    #[default]
    Peaks,
    /// 点击编辑背景控制点
    Background,
}

/// 点选交互接口，与任何具体 UI 工具包无关
pub trait PointSelection {
    fn on_point_selected(&mut self, x: f64, y: f64, button: MouseButton) -> Result<()>;
}

/// 可撤销操作
#[derive(Debug, Clone, PartialEq)]
enum Action {
    AddPeak(PeakCandidate),
    RemovePeak(PeakCandidate),
    AddBackgroundPoint((f64, f64)),
    RemoveBackgroundPoint { slot: usize, point: (f64, f64) },
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::AddPeak(c) => write!(f, "add peak at {:.4}", c.position),
            Action::RemovePeak(c) => write!(f, "remove peak at {:.4}", c.position),
            Action::AddBackgroundPoint((x, _)) => write!(f, "add background point at {:.4}", x),
            Action::RemoveBackgroundPoint { point, .. } => {
                write!(f, "remove background point at {:.4}", point.0)
            }
        }
    }
}

/// 一次全谱拟合的汇总
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitSummary {
    pub groups: usize,
    pub fitted_peaks: usize,
    pub failed_peaks: usize,
    /// 联合拟合失败、以 Stage A 结果降级的峰组数
    pub degraded_groups: usize,
    /// 所有结果中最低的 R²
    pub worst_r_squared: Option<f64>,
}

impl FitSummary {
    pub fn has_failures(&self) -> bool {
        self.failed_peaks > 0 || self.degraded_groups > 0
    }
}

/// 交互会话
#[derive(Debug)]
pub struct Session {
    config: FitConfig,
    spectrum: Option<Spectrum>,
    source: Option<PathBuf>,
    /// 按位置升序
    candidates: Vec<PeakCandidate>,
    groups: Vec<PeakGroup>,
    background_points: Vec<(f64, f64)>,
    background: Option<BackgroundModel>,
    fits: Vec<GroupFit>,
    history: Vec<Action>,
    mode: InteractionMode,
}

impl Session {
    pub fn new(config: FitConfig) -> Self {
        Self {
            config,
            spectrum: None,
            source: None,
            candidates: Vec::new(),
            groups: Vec::new(),
            background_points: Vec::new(),
            background: None,
            fits: Vec::new(),
            history: Vec::new(),
            mode: InteractionMode::default(),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // 访问器
    // ─────────────────────────────────────────────────────────────

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn spectrum(&self) -> Option<&Spectrum> {
        self.spectrum.as_ref()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn candidates(&self) -> &[PeakCandidate] {
        &self.candidates
    }

    pub fn groups(&self) -> &[PeakGroup] {
        &self.groups
    }

    pub fn background_points(&self) -> &[(f64, f64)] {
        &self.background_points
    }

    pub fn background(&self) -> Option<&BackgroundModel> {
        self.background.as_ref()
    }

    pub fn fits(&self) -> &[GroupFit] {
        &self.fits
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InteractionMode) {
        self.mode = mode;
    }

    /// 可撤销操作的数量
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// 所有峰的拟合结果（按峰组顺序）
    pub fn results(&self) -> Vec<&FitResult> {
        self.fits.iter().flat_map(|g| g.results.iter()).collect()
    }

    /// 所有峰级失败
    pub fn failures(&self) -> Vec<&PeakFailure> {
        self.fits.iter().flat_map(|g| g.failures.iter()).collect()
    }

    /// 每个峰组的显示曲线
    pub fn curves(&self) -> Vec<FitCurves> {
        let Some(spectrum) = self.spectrum.as_ref() else {
            return Vec::new();
        };
        self.fits
            .iter()
            .filter_map(|g| FitCurves::for_results(spectrum, &g.results))
            .collect()
    }

    /// 当前拟合结果的汇总
    pub fn summary(&self) -> FitSummary {
        let results = self.results();
        FitSummary {
            groups: self.fits.len(),
            fitted_peaks: results.len(),
            failed_peaks: self.failures().len(),
            degraded_groups: self
                .fits
                .iter()
                .filter(|g| matches!(g.outcome, GroupOutcome::Degraded(_)))
                .count(),
            worst_r_squared: results
                .iter()
                .map(|r| r.r_squared)
                .min_by(|a, b| a.total_cmp(b)),
        }
    }

    fn spectrum_ref(&self) -> Result<&Spectrum> {
        self.spectrum.as_ref().ok_or(PeakfitError::NoSpectrum)
    }

    fn spectrum_mut(&mut self) -> Result<&mut Spectrum> {
        self.spectrum.as_mut().ok_or(PeakfitError::NoSpectrum)
    }

    // ─────────────────────────────────────────────────────────────
    // 加载与重置
    // ─────────────────────────────────────────────────────────────

    /// 从文件加载谱，替换当前谱并清空所有派生状态
    pub fn load_spectrum(&mut self, path: &Path) -> Result<()> {
        let spectrum = parsers::parse_xy_file(path)?;
        log::info!(
            "loaded '{}' ({} points, {:.3}..{:.3})",
            path.display(),
            spectrum.len(),
            spectrum.positions().first().copied().unwrap_or(f64::NAN),
            spectrum.positions().last().copied().unwrap_or(f64::NAN)
        );
        self.set_spectrum(spectrum);
        self.source = Some(path.to_path_buf());
        Ok(())
    }

    /// 使用已构造的谱
    pub fn set_spectrum(&mut self, spectrum: Spectrum) {
        self.spectrum = Some(spectrum);
        self.source = None;
        self.clear_derived();
    }

    /// 重置：清除峰、背景、平滑、拟合与历史，保留已加载的谱
    pub fn reset(&mut self) {
        if let Some(spectrum) = self.spectrum.as_mut() {
            spectrum.restore_original();
        }
        self.clear_derived();
    }

    fn clear_derived(&mut self) {
        self.candidates.clear();
        self.groups.clear();
        self.background_points.clear();
        self.background = None;
        self.fits.clear();
        self.history.clear();
    }

    // ─────────────────────────────────────────────────────────────
    // 峰
    // ─────────────────────────────────────────────────────────────

    /// 自动检测峰，替换当前候选峰；返回检测到的数量（可能为 0）
    ///
    /// 旧的峰编辑历史随之作废，背景控制点的历史保留。
    pub fn detect_peaks(&mut self) -> Result<usize> {
        let spectrum = self.spectrum_ref()?;
        let indices = detector::detect_peaks(spectrum.working(), &self.config.detection)?;
        let candidates = build_candidates(
            spectrum.positions(),
            spectrum.working(),
            &indices,
            self.config.fallback_fwhm,
            PeakOrigin::Detected,
        );
        if candidates.is_empty() {
            log::warn!("no peaks found in '{}'", spectrum.name);
        }
        self.candidates = candidates;
        self.history
            .retain(|a| !matches!(a, Action::AddPeak(_) | Action::RemovePeak(_)));
        self.fits.clear();
        self.rebuild_groups();
        Ok(self.candidates.len())
    }

    /// 在最接近 x 的样本处手动添加峰
    pub fn add_peak_at(&mut self, x: f64) -> Result<&PeakCandidate> {
        let spectrum = self.spectrum_ref()?;
        let index = spectrum.nearest_index(x).ok_or(PeakfitError::NoSpectrum)?;
        if self.candidates.iter().any(|c| c.index == index) {
            return Err(PeakfitError::InvalidArgument(format!(
                "a peak is already selected at {:.4}",
                spectrum.positions()[index]
            )));
        }
        let candidate = build_candidates(
            spectrum.positions(),
            spectrum.working(),
            &[index],
            self.config.fallback_fwhm,
            PeakOrigin::Manual,
        )
        .pop()
        .ok_or(PeakfitError::NoSpectrum)?;

        let slot = self.insert_candidate(candidate.clone());
        self.history.push(Action::AddPeak(candidate));
        self.rebuild_groups();
        Ok(&self.candidates[slot])
    }

    /// 删除离 x 最近的峰
    pub fn remove_peak_near(&mut self, x: f64) -> Result<PeakCandidate> {
        let slot = nearest_by(&self.candidates, x, |c| c.position).ok_or_else(|| {
            PeakfitError::InvalidArgument("no peaks are selected".to_string())
        })?;
        let candidate = self.candidates.remove(slot);
        self.history.push(Action::RemovePeak(candidate.clone()));
        self.rebuild_groups();
        Ok(candidate)
    }

    fn insert_candidate(&mut self, candidate: PeakCandidate) -> usize {
        let slot = self
            .candidates
            .partition_point(|c| c.position < candidate.position);
        self.candidates.insert(slot, candidate);
        slot
    }

    // ─────────────────────────────────────────────────────────────
    // 背景控制点
    // ─────────────────────────────────────────────────────────────

    pub fn add_background_point(&mut self, x: f64, y: f64) {
        self.background_points.push((x, y));
        self.history.push(Action::AddBackgroundPoint((x, y)));
    }

    /// 删除 x 方向上最近的背景控制点
    pub fn remove_background_point_near(&mut self, x: f64) -> Result<(f64, f64)> {
        let slot = nearest_by(&self.background_points, x, |p| p.0).ok_or_else(|| {
            PeakfitError::InvalidArgument("no background points are selected".to_string())
        })?;
        let point = self.background_points.remove(slot);
        self.history
            .push(Action::RemoveBackgroundPoint { slot, point });
        Ok(point)
    }

    // ─────────────────────────────────────────────────────────────
    // 撤销
    // ─────────────────────────────────────────────────────────────

    /// 撤销最近一次可撤销操作，返回其描述；历史为空时返回 `None`
    pub fn undo(&mut self) -> Option<String> {
        let action = self.history.pop()?;
        let description = action.to_string();
        match action {
            Action::AddPeak(candidate) => {
                if let Some(slot) = self.candidates.iter().position(|c| c.index == candidate.index) {
                    self.candidates.remove(slot);
                }
                self.rebuild_groups();
            }
            Action::RemovePeak(candidate) => {
                if !self.candidates.iter().any(|c| c.index == candidate.index) {
                    self.insert_candidate(candidate);
                    self.rebuild_groups();
                }
            }
            Action::AddBackgroundPoint(point) => {
                if let Some(slot) = self.background_points.iter().rposition(|p| *p == point) {
                    self.background_points.remove(slot);
                }
            }
            Action::RemoveBackgroundPoint { slot, point } => {
                let slot = slot.min(self.background_points.len());
                self.background_points.insert(slot, point);
            }
        }
        log::debug!("undone: {}", description);
        Some(description)
    }

    // ─────────────────────────────────────────────────────────────
    // 分组
    // ─────────────────────────────────────────────────────────────

    /// 切换重叠模式并重新分组
    pub fn set_overlap_mode(&mut self, enabled: bool) {
        self.config.overlap_mode = enabled;
        self.rebuild_groups();
    }

    /// 覆盖重叠模式阈值并重新分组
    pub fn set_overlap_threshold(&mut self, threshold: f64) -> Result<()> {
        if !(threshold > 0.0) || !threshold.is_finite() {
            return Err(PeakfitError::InvalidArgument(format!(
                "overlap threshold must be positive, got {}",
                threshold
            )));
        }
        self.config.overlap_mode_threshold = threshold;
        self.rebuild_groups();
        Ok(())
    }

    pub fn rebuild_groups(&mut self) {
        self.groups = group_peaks(&self.candidates, self.config.effective_threshold());
    }

    // ─────────────────────────────────────────────────────────────
    // 背景与平滑
    // ─────────────────────────────────────────────────────────────

    /// 计算并扣除全局背景
    ///
    /// 背景基于扣除前的数据计算，重复调用不会累积。
    pub fn apply_background(&mut self, method: BackgroundMethod, smoothing: f64) -> Result<()> {
        let spectrum = self.spectrum_ref()?;
        let peaks: Vec<usize> = self.candidates.iter().map(|c| c.index).collect();
        let model = match method {
            BackgroundMethod::Manual => {
                BackgroundModel::manual(spectrum.positions(), &self.background_points)?
            }
            BackgroundMethod::Valleys => {
                BackgroundModel::from_valleys(spectrum.positions(), spectrum.base(), &peaks)?
            }
            BackgroundMethod::Spline => {
                BackgroundModel::spline(spectrum.positions(), spectrum.base(), &peaks, smoothing)?
            }
        };

        self.spectrum_mut()?.subtract_background(&model.curve)?;
        log::info!(
            "subtracted {} background ({} control points)",
            model.method,
            model.points.len()
        );
        self.background = Some(model);
        self.refresh_candidates();
        self.fits.clear();
        Ok(())
    }

    /// 撤销背景扣除，工作数据逐位还原
    pub fn clear_background(&mut self) -> Result<()> {
        self.spectrum_mut()?.clear_background();
        self.background = None;
        self.refresh_candidates();
        self.fits.clear();
        Ok(())
    }

    /// Savitzky-Golay 平滑（作用于原始数据，已扣除的背景会重新作用）
    pub fn smooth(&mut self, config: SmoothingConfig) -> Result<()> {
        let spectrum = self.spectrum_ref()?;
        let smoothed = smoothing::savitzky_golay(spectrum.original(), config)?;
        self.spectrum_mut()?.set_smoothed(smoothed)?;
        self.refresh_candidates();
        self.fits.clear();
        Ok(())
    }

    /// 撤销平滑与背景扣除
    pub fn restore_original(&mut self) -> Result<()> {
        self.spectrum_mut()?.restore_original();
        self.background = None;
        self.refresh_candidates();
        self.fits.clear();
        Ok(())
    }

    /// 工作数据变化后重新估计候选峰的高度和宽度
    fn refresh_candidates(&mut self) {
        let Some(spectrum) = self.spectrum.as_ref() else {
            return;
        };
        let fallback = self.config.fallback_fwhm;
        for candidate in &mut self.candidates {
            if let Some(updated) = build_candidates(
                spectrum.positions(),
                spectrum.working(),
                &[candidate.index],
                fallback,
                candidate.origin,
            )
            .pop()
            {
                *candidate = updated;
            }
        }
        self.rebuild_groups();
    }

    // ─────────────────────────────────────────────────────────────
    // 拟合
    // ─────────────────────────────────────────────────────────────

    /// 拟合所有峰组
    pub fn fit_all(&mut self) -> Result<FitSummary> {
        self.fit_all_with(|_, _, _| {})
    }

    /// 拟合所有峰组，每完成一个峰组调用一次 `on_group(序号, 总数, 结果)`
    ///
    /// 峰级和组级失败记录在结果中，不会中断其余峰组。
    pub fn fit_all_with<F>(&mut self, mut on_group: F) -> Result<FitSummary>
    where
        F: FnMut(usize, usize, &GroupFit),
    {
        let spectrum = self.spectrum.as_ref().ok_or(PeakfitError::NoSpectrum)?;
        if self.candidates.is_empty() {
            return Err(PeakfitError::DetectionEmpty {
                context: spectrum.name.clone(),
            });
        }
        self.config.validate()?;

        let total = self.groups.len();
        let mut fits = Vec::with_capacity(total);
        for (i, group) in self.groups.iter().enumerate() {
            let fit = fit_group(spectrum, &self.candidates, group, &self.config);
            for failure in &fit.failures {
                log::warn!("{}: {}", spectrum.name, failure);
            }
            on_group(i, total, &fit);
            fits.push(fit);
        }
        self.fits = fits;

        let summary = self.summary();
        log::info!(
            "{}: fitted {} peaks in {} groups ({} failed, {} degraded groups)",
            spectrum.name,
            summary.fitted_peaks,
            summary.groups,
            summary.failed_peaks,
            summary.degraded_groups
        );
        Ok(summary)
    }

    /// 清除拟合结果
    pub fn clear_fit(&mut self) {
        self.fits.clear();
    }
}

impl PointSelection for Session {
    fn on_point_selected(&mut self, x: f64, y: f64, button: MouseButton) -> Result<()> {
        match (self.mode, button) {
            (InteractionMode::Peaks, MouseButton::Left) => self.add_peak_at(x).map(|_| ()),
            (InteractionMode::Peaks, MouseButton::Right) => self.remove_peak_near(x).map(|_| ()),
            (InteractionMode::Background, MouseButton::Left) => {
                self.add_background_point(x, y);
                Ok(())
            }
            (InteractionMode::Background, MouseButton::Right) => {
                self.remove_background_point_near(x).map(|_| ())
            }
        }
    }
}

/// 按位置距离找最近的元素下标
fn nearest_by<T>(items: &[T], x: f64, key: impl Fn(&T) -> f64) -> Option<usize> {
    items
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (key(a) - x).abs().total_cmp(&(key(b) - x).abs()))
        .map(|(i, _)| i)
}
