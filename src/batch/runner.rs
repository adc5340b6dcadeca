//! # 批处理编排器
//!
//! 逐个文件执行完整的解卷积流程，并按失败策略处理出错或质量不达标的文件。
//!
//! ## 状态机
//! ```text
//! Idle → Loading → Detecting → (BackgroundFitting) → Fitting → Saving → NextFile → … → Done | Aborted
//!                                                                   ↘ Paused ↗
//! ```
//!
//! ## 失败策略
//! - `Pause`: 暂停等待用户决定（继续 / 重试当前文件 / 中止）
//! - `Skip`: 记录日志后处理下一个文件
//! - `Stop`: 立即终止整个批处理
//!
//! 暂停和中止只在文件之间检查，不会打断正在进行的拟合。
//! 所有文件复用同一个 `Session`，加载新文件时会话的派生状态被清空。
//!
//! ## 依赖关系
//! - 被 `commands/batch.rs` 调用
//! - 使用 `session::Session` 执行单文件流程
//! - 使用 `deconv/export.rs`、`deconv/plot.rs` 保存结果

use crate::deconv::export;
use crate::deconv::plot::{self, PlotOptions};
use crate::deconv::{BackgroundMethod, SmoothingConfig};
use crate::error::{PeakfitError, Result};
use crate::models::{FitConfig, FitResult};
use crate::session::Session;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 汇总结果文件名
pub const AGGREGATE_FILE: &str = "batch_results.csv";

// ─────────────────────────────────────────────────────────────
// 配置
// ─────────────────────────────────────────────────────────────

/// 文件失败或质量不达标时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// 暂停等待人工处理
    Pause,
    /// 记录并跳过
    #[default]
    Skip,
    /// 终止整个批处理
    Stop,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Pause => write!(f, "pause"),
            FailurePolicy::Skip => write!(f, "skip"),
            FailurePolicy::Stop => write!(f, "stop"),
        }
    }
}

/// 批处理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub policy: FailurePolicy,
    /// 载入后先做 Savitzky-Golay 平滑（`None` 表示不平滑）
    pub smoothing: Option<SmoothingConfig>,
    /// 低于该 R² 的文件视为质量不达标
    pub r2_threshold: f64,
    /// 自动扣除的全局背景（`None` 表示不扣除）
    pub background: Option<BackgroundMethod>,
    /// 样条背景的平滑参数
    pub spline_smoothing: f64,
    pub save_results: bool,
    pub save_plots: bool,
    /// 输出目录（`None` 时写到输入文件旁边）
    pub output_dir: Option<PathBuf>,
    /// 每个文件处理完后的停留时间（毫秒）
    pub delay_ms: u64,
    pub fit: FitConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            policy: FailurePolicy::default(),
            smoothing: None,
            r2_threshold: 0.92,
            background: None,
            spline_smoothing: 0.0,
            save_results: true,
            save_plots: false,
            output_dir: None,
            delay_ms: 0,
            fit: FitConfig::default(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.r2_threshold) {
            return Err(PeakfitError::InvalidArgument(format!(
                "r2 threshold must lie in [0, 1], got {}",
                self.r2_threshold
            )));
        }
        if self.background == Some(BackgroundMethod::Manual) {
            return Err(PeakfitError::InvalidArgument(
                "manual background needs control points and cannot run in batch mode".to_string(),
            ));
        }
        self.fit.validate()
    }

    fn output_dir_for(&self, input: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => input
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

// ─────────────────────────────────────────────────────────────
// 状态与结果
// ─────────────────────────────────────────────────────────────

/// 编排器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Loading,
    Detecting,
    BackgroundFitting,
    Fitting,
    Saving,
    NextFile,
    Paused,
    Done,
    Aborted,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Idle => "idle",
            BatchState::Loading => "loading",
            BatchState::Detecting => "detecting peaks",
            BatchState::BackgroundFitting => "fitting background",
            BatchState::Fitting => "fitting",
            BatchState::Saving => "saving",
            BatchState::NextFile => "next file",
            BatchState::Paused => "paused",
            BatchState::Done => "done",
            BatchState::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

/// 单个文件的处理状态
#[derive(Debug, Clone, PartialEq)]
pub enum FileStatus {
    Success { peaks: usize, worst_r_squared: f64 },
    /// 未检测到峰（仅警告）
    NoPeaks,
    LowQuality { worst_r_squared: f64 },
    Failed(String),
}

impl FileStatus {
    /// 是否触发失败策略
    pub fn needs_attention(&self) -> bool {
        matches!(self, FileStatus::LowQuality { .. } | FileStatus::Failed(_))
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Success {
                peaks,
                worst_r_squared,
            } => write!(f, "{} peaks, R² ≥ {:.4}", peaks, worst_r_squared),
            FileStatus::NoPeaks => write!(f, "no peaks found"),
            FileStatus::LowQuality { worst_r_squared } => {
                write!(f, "low quality (R² = {:.4})", worst_r_squared)
            }
            FileStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// 单个文件的处理结果
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub status: FileStatus,
    pub results: Vec<FitResult>,
}

impl FileOutcome {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// 批处理报告
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
    pub total: usize,
    pub aborted: bool,
}

impl BatchReport {
    /// 成功完成流程的文件数（含无峰、质量不达标）
    pub fn processed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o.status, FileStatus::Failed(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.processed()
    }

    pub fn low_quality(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, FileStatus::LowQuality { .. }))
            .count()
    }

    /// 汇总表条目：(文件名, 结果)
    pub fn aggregate_entries(&self) -> Vec<(String, Vec<FitResult>)> {
        self.outcomes
            .iter()
            .filter(|o| !o.results.is_empty())
            .map(|o| (o.file_name(), o.results.clone()))
            .collect()
    }
}

/// 编排器事件
#[derive(Debug, Clone)]
pub enum BatchEvent {
    StateChanged { index: usize, state: BatchState },
    Progress {
        current: usize,
        total: usize,
        status: String,
    },
    FileCompleted(FileOutcome),
    /// 等待用户决定
    Paused {
        index: usize,
        path: PathBuf,
        reason: String,
    },
    Finished(BatchReport),
}

// ─────────────────────────────────────────────────────────────
// 控制
// ─────────────────────────────────────────────────────────────

/// 暂停后的用户决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Resume,
    Retry,
    Abort,
}

#[derive(Debug, Default)]
struct ControlState {
    pause_requested: bool,
    aborted: bool,
    decision: Option<Decision>,
}

/// 批处理的协作式控制句柄
#[derive(Debug, Default)]
pub struct BatchControl {
    state: Mutex<ControlState>,
    wake: Condvar,
}

impl BatchControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 在下一个文件开始前暂停
    pub fn pause(&self) {
        self.lock().pause_requested = true;
    }

    /// 继续处理下一个文件
    pub fn resume(&self) {
        self.decide(Decision::Resume);
    }

    /// 重新处理当前文件
    pub fn retry(&self) {
        self.decide(Decision::Retry);
    }

    /// 中止批处理
    pub fn abort(&self) {
        let mut state = self.lock();
        state.aborted = true;
        state.decision = Some(Decision::Abort);
        self.wake.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    fn decide(&self, decision: Decision) {
        let mut state = self.lock();
        state.pause_requested = false;
        state.decision = Some(decision);
        self.wake.notify_all();
    }

    /// 进入暂停前丢弃未被消费的旧决定
    fn begin_pause(&self) {
        self.lock().decision = None;
    }

    fn take_pause_request(&self) -> bool {
        std::mem::take(&mut self.lock().pause_requested)
    }

    /// 阻塞直到收到决定
    fn wait_for_decision(&self) -> Decision {
        let mut state = self.lock();
        loop {
            if state.aborted {
                return Decision::Abort;
            }
            if let Some(decision) = state.decision.take() {
                return decision;
            }
            state = self
                .wake
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// 停留指定时间，中止时提前返回
    fn wait_delay(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let state = self.lock();
        let _ = self
            .wake
            .wait_timeout_while(state, delay, |s| !s.aborted);
    }
}

// ─────────────────────────────────────────────────────────────
// 编排器
// ─────────────────────────────────────────────────────────────

/// 批处理编排器
pub struct BatchOrchestrator {
    config: BatchConfig,
    control: Arc<BatchControl>,
    events: Option<Sender<BatchEvent>>,
    state: BatchState,
}

impl BatchOrchestrator {
    pub fn new(config: BatchConfig, control: Arc<BatchControl>) -> Self {
        Self {
            config,
            control,
            events: None,
            state: BatchState::Idle,
        }
    }

    /// 设置事件通道
    pub fn with_events(mut self, sender: Sender<BatchEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }

    fn enter(&mut self, index: usize, state: BatchState) {
        log::debug!("batch [{}]: {} -> {}", index + 1, self.state, state);
        self.state = state;
        self.emit(BatchEvent::StateChanged { index, state });
    }

    /// 顺序处理所有文件
    pub fn run(&mut self, files: &[PathBuf]) -> BatchReport {
        let total = files.len();
        let mut report = BatchReport {
            total,
            ..Default::default()
        };
        let mut session = Session::new(self.config.fit.clone());
        let delay = Duration::from_millis(self.config.delay_ms);

        let mut index = 0;
        while index < total {
            if self.control.is_aborted() {
                report.aborted = true;
                break;
            }

            // 用户请求的暂停
            if self.control.take_pause_request() {
                self.enter(index, BatchState::Paused);
                self.control.begin_pause();
                self.emit(BatchEvent::Paused {
                    index,
                    path: files[index].clone(),
                    reason: "paused by user".to_string(),
                });
                if self.control.wait_for_decision() == Decision::Abort {
                    report.aborted = true;
                    break;
                }
            }

            let path = &files[index];
            self.emit(BatchEvent::Progress {
                current: index + 1,
                total,
                status: format!("processing {}", path.display()),
            });

            let outcome = self.process_file(index, path, &mut session);
            self.emit(BatchEvent::Progress {
                current: index + 1,
                total,
                status: outcome.status.to_string(),
            });

            if outcome.status == FileStatus::NoPeaks {
                log::warn!("{}: no peaks found", path.display());
            }

            if outcome.status.needs_attention() {
                log::warn!(
                    "{}: {} (policy: {})",
                    path.display(),
                    outcome.status,
                    self.config.policy
                );
                match self.config.policy {
                    FailurePolicy::Skip => {}
                    FailurePolicy::Stop => {
                        self.emit(BatchEvent::FileCompleted(outcome.clone()));
                        report.outcomes.push(outcome);
                        report.aborted = true;
                        break;
                    }
                    FailurePolicy::Pause => {
                        self.enter(index, BatchState::Paused);
                        self.control.begin_pause();
                        self.emit(BatchEvent::Paused {
                            index,
                            path: path.clone(),
                            reason: outcome.status.to_string(),
                        });
                        match self.control.wait_for_decision() {
                            Decision::Resume => {}
                            Decision::Retry => {
                                log::info!("retrying {}", path.display());
                                continue;
                            }
                            Decision::Abort => {
                                self.emit(BatchEvent::FileCompleted(outcome.clone()));
                                report.outcomes.push(outcome);
                                report.aborted = true;
                                break;
                            }
                        }
                    }
                }
            }

            self.emit(BatchEvent::FileCompleted(outcome.clone()));
            report.outcomes.push(outcome);

            self.enter(index, BatchState::NextFile);
            self.control.wait_delay(delay);
            index += 1;
        }

        if self.control.is_aborted() {
            report.aborted = true;
        }

        if self.config.save_results && !report.aborted {
            if let Err(e) = self.write_aggregate(&report, files) {
                log::warn!("failed to write aggregate results: {}", e);
            }
        }

        let final_state = if report.aborted {
            BatchState::Aborted
        } else {
            BatchState::Done
        };
        self.enter(index.min(total.saturating_sub(1)), final_state);
        log::info!(
            "batch {}: {} processed, {} failed, {} low quality of {} files",
            final_state,
            report.processed(),
            report.failed(),
            report.low_quality(),
            total
        );
        self.emit(BatchEvent::Finished(report.clone()));
        report
    }

    /// 单文件流程；任何错误都转为 `FileStatus::Failed`
    fn process_file(&mut self, index: usize, path: &Path, session: &mut Session) -> FileOutcome {
        match self.try_process_file(index, path, session) {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = PeakfitError::BatchFile {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                };
                log::error!("{}", error);
                FileOutcome {
                    path: path.to_path_buf(),
                    status: FileStatus::Failed(e.to_string()),
                    results: Vec::new(),
                }
            }
        }
    }

    fn try_process_file(
        &mut self,
        index: usize,
        path: &Path,
        session: &mut Session,
    ) -> Result<FileOutcome> {
        self.enter(index, BatchState::Loading);
        session.load_spectrum(path)?;
        if let Some(smoothing) = self.config.smoothing {
            session.smooth(smoothing)?;
        }

        self.enter(index, BatchState::Detecting);
        if session.detect_peaks()? == 0 {
            return Ok(FileOutcome {
                path: path.to_path_buf(),
                status: FileStatus::NoPeaks,
                results: Vec::new(),
            });
        }

        if let Some(method) = self.config.background {
            self.enter(index, BatchState::BackgroundFitting);
            session.apply_background(method, self.config.spline_smoothing)?;
        }

        self.enter(index, BatchState::Fitting);
        let summary = session.fit_all()?;
        let results: Vec<FitResult> = session.results().into_iter().cloned().collect();

        let status = match summary.worst_r_squared {
            None => FileStatus::Failed(format!(
                "none of {} peaks could be fitted",
                session.candidates().len()
            )),
            Some(r2) if r2 < self.config.r2_threshold => FileStatus::LowQuality {
                worst_r_squared: r2,
            },
            Some(r2) => FileStatus::Success {
                peaks: results.len(),
                worst_r_squared: r2,
            },
        };

        if !results.is_empty() && (self.config.save_results || self.config.save_plots) {
            self.enter(index, BatchState::Saving);
            self.save_file_outputs(path, session, &results)?;
        }

        Ok(FileOutcome {
            path: path.to_path_buf(),
            status,
            results,
        })
    }

    fn save_file_outputs(&self, path: &Path, session: &Session, results: &[FitResult]) -> Result<()> {
        let dir = self.config.output_dir_for(path);
        std::fs::create_dir_all(&dir).map_err(|e| PeakfitError::FileWrite {
            path: dir.display().to_string(),
            source: e,
        })?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("spectrum");

        if self.config.save_results {
            let csv_path = dir.join(format!("{}_peaks.csv", stem));
            export::write_results_csv(results, &csv_path)?;
            log::debug!("saved {}", csv_path.display());
        }

        if self.config.save_plots {
            if let Some(spectrum) = session.spectrum() {
                let plot_path = dir.join(format!("{}_fit.png", stem));
                let options = PlotOptions {
                    title: stem.to_string(),
                    ..Default::default()
                };
                plot::render_fit_plot(spectrum, &session.curves(), results, &plot_path, &options)?;
                log::debug!("saved {}", plot_path.display());
            }
        }
        Ok(())
    }

    fn write_aggregate(&self, report: &BatchReport, files: &[PathBuf]) -> Result<()> {
        let entries = report.aggregate_entries();
        if entries.is_empty() {
            return Ok(());
        }
        let dir = match (&self.config.output_dir, files.first()) {
            (Some(dir), _) => dir.clone(),
            (None, Some(first)) => self.config.output_dir_for(first),
            (None, None) => return Ok(()),
        };
        std::fs::create_dir_all(&dir).map_err(|e| PeakfitError::FileWrite {
            path: dir.display().to_string(),
            source: e,
        })?;
        let path = dir.join(AGGREGATE_FILE);
        export::write_aggregate_csv(&entries, &path)?;
        log::info!("aggregate results written to {}", path.display());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
// 后台运行
// ─────────────────────────────────────────────────────────────

/// 后台批处理句柄
pub struct BatchHandle {
    control: Arc<BatchControl>,
    handle: JoinHandle<BatchReport>,
}

impl BatchHandle {
    pub fn control(&self) -> Arc<BatchControl> {
        Arc::clone(&self.control)
    }

    /// 等待批处理结束
    pub fn join(self) -> Result<BatchReport> {
        self.handle
            .join()
            .map_err(|_| PeakfitError::Other("batch thread panicked".to_string()))
    }
}

/// 在独立线程中运行批处理，事件通过返回的通道送达
pub fn spawn_batch(
    files: Vec<PathBuf>,
    config: BatchConfig,
) -> Result<(BatchHandle, Receiver<BatchEvent>)> {
    config.validate()?;
    let control = BatchControl::new();
    let (tx, rx) = mpsc::channel();
    let mut orchestrator = BatchOrchestrator::new(config, Arc::clone(&control)).with_events(tx);

    let handle = thread::Builder::new()
        .name("peakfit-batch".to_string())
        .spawn(move || orchestrator.run(&files))
        .map_err(|e| PeakfitError::Other(format!("failed to start batch thread: {}", e)))?;

    Ok((BatchHandle { control, handle }, rx))
}
