//! # batch 命令实现
//!
//! 收集谱文件后在后台线程运行批处理编排器，
//! 主线程消费事件驱动进度条；Pause 策略下在终端询问继续、重试或中止。
//!
//! ## 依赖关系
//! - 使用 `cli/batch.rs` 定义的参数
//! - 使用 `batch/` 的 FileCollector 与编排器
//! - 使用 `console` 读取暂停时的按键，`tabled` 渲染汇总

use super::fit::{build_fit_config, configure_threads, smoothing_from};
use crate::batch::collector::DEFAULT_PATTERN;
use crate::batch::runner::AGGREGATE_FILE;
use crate::batch::{
    spawn_batch, BatchConfig, BatchControl, BatchEvent, BatchReport, FileCollector, FileStatus,
};
use crate::cli::batch::BatchArgs;
use crate::error::{PeakfitError, Result};
use crate::utils::{output, progress};

use console::Term;
use std::path::PathBuf;
use tabled::{Table, Tabled};

/// 汇总表格行
#[derive(Debug, Clone, Tabled)]
struct FileRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Peaks")]
    peaks: usize,
    #[tabled(rename = "Worst R²")]
    worst_r_squared: String,
    #[tabled(rename = "Status")]
    status: String,
}

/// 执行 batch 命令
pub fn execute(args: BatchArgs) -> Result<()> {
    configure_threads(args.options.jobs);
    let fit = build_fit_config(&args.options)?;

    let files = collect_files(&args)?;
    output::print_header(&format!("Batch fitting: {}", args.input.display()));
    output::print_info(&format!(
        "Found {} spectra, policy: {}, R² threshold: {:.3}",
        files.len(),
        args.policy,
        args.r2_threshold
    ));

    let config = BatchConfig {
        policy: args.policy.into(),
        smoothing: smoothing_from(&args.options),
        r2_threshold: args.r2_threshold,
        background: args.background.method(),
        spline_smoothing: args.spline_smoothing,
        save_results: !args.no_results,
        save_plots: args.save_plots,
        output_dir: args.output.clone(),
        delay_ms: args.delay_ms,
        fit,
    };
    let output_dir = args.output.clone();

    let total = files.len() as u64;
    let (handle, events) = spawn_batch(files, config)?;
    let control = handle.control();
    let pb = progress::create_progress_bar(total, "Fitting");

    for event in events.iter() {
        match event {
            BatchEvent::StateChanged { state, .. } => log::debug!("batch state: {}", state),
            BatchEvent::Progress { status, .. } => pb.set_message(status),
            BatchEvent::FileCompleted(outcome) => {
                pb.inc(1);
                if let FileStatus::Failed(reason) = &outcome.status {
                    pb.suspend(|| output::print_error(&format!("{}: {}", outcome.file_name(), reason)));
                }
            }
            BatchEvent::Paused { path, reason, .. } => {
                pb.suspend(|| ask_user(&control, &path, &reason));
            }
            BatchEvent::Finished(_) => pb.finish_and_clear(),
        }
    }

    let report = handle.join()?;
    print_report(&report);
    if !args.no_results && !report.aggregate_entries().is_empty() && !report.aborted {
        if let Some(dir) = output_dir {
            output::print_saved("aggregate", &dir.join(AGGREGATE_FILE));
        }
    }

    if report.aborted {
        return Err(PeakfitError::Other(format!(
            "batch aborted after {} of {} files",
            report.outcomes.len(),
            report.total
        )));
    }
    Ok(())
}

fn collect_files(args: &BatchArgs) -> Result<Vec<PathBuf>> {
    let collector = if args.input.is_file() && args.pattern.is_none() {
        FileCollector::siblings_of(&args.input)
    } else {
        FileCollector::new(args.input.clone())
            .with_pattern(args.pattern.as_deref().unwrap_or(DEFAULT_PATTERN))
            .recursive(args.recursive)
    };

    let files = collector.collect()?;
    if files.is_empty() {
        return Err(PeakfitError::NoFilesFound {
            pattern: args
                .pattern
                .clone()
                .unwrap_or_else(|| DEFAULT_PATTERN.to_string()),
        });
    }
    Ok(files)
}

/// 暂停时询问用户：继续 / 重试 / 中止
fn ask_user(control: &BatchControl, path: &std::path::Path, reason: &str) {
    output::print_warning(&format!("Paused at {}: {}", path.display(), reason));

    let term = Term::stderr();
    if !term.is_term() {
        output::print_info("Not a terminal, continuing with the next file");
        control.resume();
        return;
    }

    loop {
        let _ = term.write_line("  [c]ontinue  [r]etry  [a]bort");
        match term.read_char() {
            Ok('c') | Ok('C') | Ok('\n') => {
                control.resume();
                return;
            }
            Ok('r') | Ok('R') => {
                control.retry();
                return;
            }
            Ok('a') | Ok('A') => {
                control.abort();
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                log::warn!("failed to read from terminal: {}", e);
                control.abort();
                return;
            }
        }
    }
}

fn print_report(report: &BatchReport) {
    let rows: Vec<FileRow> = report
        .outcomes
        .iter()
        .map(|o| FileRow {
            file: o.file_name(),
            peaks: o.results.len(),
            worst_r_squared: o
                .results
                .iter()
                .map(|r| r.r_squared)
                .min_by(|a, b| a.total_cmp(b))
                .map(|r2| format!("{:.4}", r2))
                .unwrap_or_else(|| "-".to_string()),
            status: o.status.to_string(),
        })
        .collect();
    if !rows.is_empty() {
        println!("{}", Table::new(&rows));
    }

    let summary = format!(
        "{} processed, {} failed, {} low quality ({} files)",
        report.processed(),
        report.failed(),
        report.low_quality(),
        report.total
    );
    if report.failed() == 0 && report.low_quality() == 0 {
        output::print_done(&summary);
    } else {
        output::print_warning(&summary);
    }
}
