//! # detect 命令实现
//!
//! 检测峰并打印候选峰与重叠分组，不做拟合。
//! 用于在批处理前调整检测参数和分组阈值。
//!
//! ## 依赖关系
//! - 使用 `cli/detect.rs` 定义的参数
//! - 使用 `commands/fit.rs` 的配置构建
//! - 使用 `tabled` 渲染表格

use super::fit::{build_fit_config, open_session};
use crate::cli::detect::DetectArgs;
use crate::error::Result;
use crate::models::{PeakCandidate, PeakGroup, PeakOrigin};
use crate::utils::output;

use tabled::{Table, Tabled};

/// 候选峰表格行
#[derive(Debug, Clone, Tabled)]
struct CandidateRow {
    #[tabled(rename = "#")]
    number: usize,
    #[tabled(rename = "Position")]
    position: String,
    #[tabled(rename = "Height")]
    height: String,
    #[tabled(rename = "FWHM (est.)")]
    fwhm: String,
    #[tabled(rename = "Group")]
    group: usize,
    #[tabled(rename = "Source")]
    origin: &'static str,
}

/// 执行 detect 命令
pub fn execute(args: DetectArgs) -> Result<()> {
    let config = build_fit_config(&args.options)?;
    output::print_header(&format!("Peak detection: {}", args.input.display()));

    let mut session = open_session(&args.input, config, &args.options)?;
    if session.detect_peaks()? == 0 {
        output::print_warning("No peaks detected");
        return Ok(());
    }

    let rows = candidate_rows(session.candidates(), session.groups());
    println!("{}", Table::new(&rows));

    let joint = session.groups().iter().filter(|g| !g.is_singleton()).count();
    output::print_done(&format!(
        "{} peaks in {} groups ({} joint, threshold {:.2} × FWHM)",
        session.candidates().len(),
        session.groups().len(),
        joint,
        session.config().effective_threshold()
    ));
    Ok(())
}

fn candidate_rows(candidates: &[PeakCandidate], groups: &[PeakGroup]) -> Vec<CandidateRow> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| CandidateRow {
            number: i + 1,
            position: format!("{:.4}", c.position),
            height: format!("{:.2}", c.height),
            fwhm: format!("{:.4}", c.fwhm),
            group: groups
                .iter()
                .position(|g| g.members.contains(&i))
                .map(|g| g + 1)
                .unwrap_or(0),
            origin: match c.origin {
                PeakOrigin::Detected => "auto",
                PeakOrigin::Manual => "manual",
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(index: usize, position: f64) -> PeakCandidate {
        PeakCandidate {
            index,
            position,
            height: 100.0,
            fwhm: 0.1,
            origin: PeakOrigin::Detected,
        }
    }

    #[test]
    fn test_rows_carry_group_numbers() {
        let candidates = vec![candidate(10, 1.0), candidate(12, 1.05), candidate(90, 5.0)];
        let groups = vec![
            PeakGroup {
                members: vec![0, 1],
            },
            PeakGroup::singleton(2),
        ];
        let rows = candidate_rows(&candidates, &groups);
        let numbers: Vec<usize> = rows.iter().map(|r| r.group).collect();
        assert_eq!(numbers, [1, 1, 2]);
    }
}
