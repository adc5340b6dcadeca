//! # fit 命令实现
//!
//! 单谱解卷积：加载 → (平滑) → 检测或手动指定峰 → (全局背景) → 后台拟合 → 输出。
//!
//! 拟合在 `FitWorker` 后台线程中执行，终端 spinner 通过事件更新。
//! 同时提供 `detect`、`batch` 共用的配置构建与线程池设置。
//!
//! ## 依赖关系
//! - 使用 `cli/fit.rs` 定义的参数
//! - 使用 `session/` 的 Session 与 FitWorker
//! - 使用 `deconv/export.rs`、`deconv/plot.rs` 输出结果

use crate::cli::fit::{FitArgs, FitOptions};
use crate::deconv::export;
use crate::deconv::plot::{self, PlotOptions};
use crate::deconv::{BackgroundMethod, GroupOutcome, SmoothingConfig};
use crate::error::{PeakfitError, Result};
use crate::models::{FitConfig, FitResult};
use crate::session::worker::{FitEvent, FitWorker};
use crate::session::{FitSummary, Session};
use crate::utils::{output, progress};

use std::fs;
use std::path::{Path, PathBuf};

// ─────────────────────────────────────────────────────────────
// 共用辅助
// ─────────────────────────────────────────────────────────────

/// 由配置文件和命令行参数构建拟合配置
pub(crate) fn build_fit_config(options: &FitOptions) -> Result<FitConfig> {
    let mut config = match &options.config {
        Some(path) => {
            log::info!("loading configuration from {}", path.display());
            FitConfig::from_json_file(path)?
        }
        None => FitConfig::default(),
    };

    if let Some(profile) = options.profile {
        config.profile = profile.into();
    }
    if options.overlap_mode {
        config.overlap_mode = true;
    }
    if let Some(threshold) = options.overlap_threshold {
        if config.overlap_mode {
            config.overlap_mode_threshold = threshold;
        } else {
            config.overlap_threshold = threshold;
        }
    }
    if let Some(multiplier) = options.window_multiplier {
        config.window_multiplier = multiplier;
    }
    if let Some(fraction) = options.height_fraction {
        config.detection.height_fraction = fraction;
    }
    if let Some(fraction) = options.prominence_fraction {
        config.detection.prominence_fraction = fraction;
    }
    if let Some(distance) = options.min_distance {
        config.detection.min_distance = distance;
    }

    config.validate()?;
    Ok(config)
}

/// 工作数据平滑参数
pub(crate) fn smoothing_from(options: &FitOptions) -> Option<SmoothingConfig> {
    options.smooth.map(|window| SmoothingConfig {
        window,
        order: options.smooth_order,
    })
}

/// 设置全局 rayon 线程池（Stage A 并行拟合）
pub(crate) fn configure_threads(jobs: usize) {
    let jobs = if jobs == 0 { num_cpus::get() } else { jobs };
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build_global()
    {
        log::debug!("rayon pool already configured: {}", e);
    }
}

/// 加载谱并按选项平滑
pub(crate) fn open_session(input: &Path, config: FitConfig, options: &FitOptions) -> Result<Session> {
    if !input.is_file() {
        return Err(PeakfitError::FileNotFound {
            path: input.display().to_string(),
        });
    }
    let mut session = Session::new(config);
    session.load_spectrum(input)?;
    if let Some(smoothing) = smoothing_from(options) {
        session.smooth(smoothing)?;
        log::info!(
            "smoothed working data (window {}, order {})",
            smoothing.window,
            smoothing.order
        );
    }
    Ok(session)
}

/// 输出目录（未指定时为输入文件所在目录）
pub(crate) fn output_dir(output: Option<&PathBuf>, input: &Path) -> Result<PathBuf> {
    let dir = match output {
        Some(dir) => dir.clone(),
        None => input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    fs::create_dir_all(&dir).map_err(|e| PeakfitError::FileWrite {
        path: dir.display().to_string(),
        source: e,
    })?;
    Ok(dir)
}

// ─────────────────────────────────────────────────────────────
// fit 命令
// ─────────────────────────────────────────────────────────────

/// 执行 fit 命令
pub fn execute(args: FitArgs) -> Result<()> {
    configure_threads(args.options.jobs);
    let config = build_fit_config(&args.options)?;

    output::print_header(&format!("Peak fitting: {}", args.input.display()));
    output::print_info(&format!(
        "Profile: {}, overlap mode: {} (threshold {:.2} × FWHM)",
        config.profile,
        if config.overlap_mode { "on" } else { "off" },
        config.effective_threshold()
    ));

    let mut session = open_session(&args.input, config, &args.options)?;
    select_peaks(&mut session, &args.peaks)?;
    if session.candidates().is_empty() {
        return Ok(());
    }
    apply_background(&mut session, &args)?;

    output::print_info(&format!(
        "{} peaks in {} groups",
        session.candidates().len(),
        session.groups().len()
    ));

    let (session, summary) = run_in_worker(session)?;
    report(&session, &summary, &args)
}

/// 自动检测或使用手动指定的峰位
fn select_peaks(session: &mut Session, peaks: &[f64]) -> Result<()> {
    if peaks.is_empty() {
        let found = session.detect_peaks()?;
        if found == 0 {
            output::print_warning("No peaks detected; try --peaks or lower --height-fraction");
        }
        return Ok(());
    }

    for &x in peaks {
        match session.add_peak_at(x) {
            Ok(candidate) => log::debug!(
                "manual peak at {:.4} (FWHM estimate {:.4})",
                candidate.position,
                candidate.fwhm
            ),
            Err(PeakfitError::InvalidArgument(msg)) => output::print_skip(&msg),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn apply_background(session: &mut Session, args: &FitArgs) -> Result<()> {
    let Some(method) = args.background.method() else {
        return Ok(());
    };
    if method == BackgroundMethod::Manual {
        if args.bg_points.is_empty() {
            return Err(PeakfitError::InvalidArgument(
                "--background manual requires --bg-points".to_string(),
            ));
        }
        for &(x, y) in &args.bg_points {
            session.add_background_point(x, y);
        }
    } else if !args.bg_points.is_empty() {
        output::print_warning(&format!(
            "--bg-points is ignored with --background {}",
            args.background
        ));
    }
    session.apply_background(method, args.spline_smoothing)?;
    output::print_info(&format!("Subtracted {} background", method));
    Ok(())
}

/// 在后台线程中拟合，事件驱动 spinner
fn run_in_worker(session: Session) -> Result<(Box<Session>, FitSummary)> {
    let worker = FitWorker::spawn()?;
    worker
        .submit(Box::new(session))
        .map_err(|rejected| rejected.error)?;

    let spinner = progress::create_spinner("Fitting...");
    let mut job_error = None;
    loop {
        match worker.recv()? {
            FitEvent::PeakFitted(result) => {
                spinner.set_message(format!(
                    "peak {} at {:.4} (R² {:.4})",
                    result.peak_index + 1,
                    result.params.center,
                    result.r_squared
                ));
            }
            FitEvent::PeakFailed {
                position, reason, ..
            } => {
                spinner.suspend(|| output::print_peak_failure(position, &reason));
            }
            FitEvent::GroupFinished {
                index,
                total,
                outcome,
            } => {
                if let GroupOutcome::Degraded(reason) = &outcome {
                    spinner.suspend(|| {
                        output::print_warning(&format!(
                            "group {}/{} kept Stage-A results: {}",
                            index + 1,
                            total,
                            reason
                        ))
                    });
                }
            }
            FitEvent::Diagnostic(line) => log::debug!("{}", line),
            FitEvent::JobFailed(reason) => job_error = Some(reason),
            FitEvent::Completed { session, summary } => {
                spinner.finish_and_clear();
                return match (summary, job_error) {
                    (Some(summary), _) => Ok((session, summary)),
                    (None, Some(reason)) => Err(PeakfitError::Other(reason)),
                    (None, None) => Err(PeakfitError::WorkerDisconnected),
                };
            }
        }
    }
}

fn report(session: &Session, summary: &FitSummary, args: &FitArgs) -> Result<()> {
    let results: Vec<FitResult> = session.results().into_iter().cloned().collect();
    if results.is_empty() {
        output::print_warning("No peak could be fitted");
        return Ok(());
    }

    println!("{}", export::results_table(&results));
    match summary.worst_r_squared {
        Some(r2) if !summary.has_failures() => output::print_success(&format!(
            "Fitted {} peaks (worst R² {:.4})",
            summary.fitted_peaks, r2
        )),
        _ => output::print_warning(&format!(
            "Fitted {} peaks, {} failed, {} degraded groups",
            summary.fitted_peaks, summary.failed_peaks, summary.degraded_groups
        )),
    }

    if args.no_results && !args.save_plot {
        return Ok(());
    }

    let dir = output_dir(args.output.as_ref(), &args.input)?;
    let stem = args
        .input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("spectrum");

    if !args.no_results {
        let path = dir.join(format!("{}_peaks.csv", stem));
        export::write_results_csv(&results, &path)?;
        output::print_saved("results", &path);
    }

    if args.save_plot {
        if let Some(spectrum) = session.spectrum() {
            let ext = if args.svg { "svg" } else { "png" };
            let path = dir.join(format!("{}_fit.{}", stem, ext));
            let options = PlotOptions {
                title: stem.to_string(),
                ..Default::default()
            };
            plot::render_fit_plot(spectrum, &session.curves(), &results, &path, &options)?;
            output::print_saved("plot", &path);
        }
    }

    Ok(())
}
