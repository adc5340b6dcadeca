//! # 拟合结果导出
//!
//! ## 输出格式
//! - 单文件 CSV: `Peak, Center, FWHM, Area, Amplitude, Sigma, Gamma, Eta, R_squared`
//! - 批处理汇总 CSV: 在最前面增加 `File` 列
//! - 终端表格（tabled）
//!
//! `Amplitude` 列为峰顶高度；`Eta` 仅 Pseudo-Voigt 有值。
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs`、`batch/runner.rs` 调用
//! - 使用 `models/fit_result.rs`
//! - 使用 `csv` 写入，`tabled` 渲染表格

use crate::error::{PeakfitError, Result};
use crate::models::FitResult;

use std::path::Path;
use tabled::{Table, Tabled};

/// 单文件结果表的列
pub const RESULT_COLUMNS: [&str; 9] = [
    "Peak",
    "Center",
    "FWHM",
    "Area",
    "Amplitude",
    "Sigma",
    "Gamma",
    "Eta",
    "R_squared",
];

/// 终端表格行
#[derive(Debug, Clone, Tabled)]
struct TableRow {
    #[tabled(rename = "Peak")]
    peak: usize,
    #[tabled(rename = "Center")]
    center: String,
    #[tabled(rename = "FWHM")]
    fwhm: String,
    #[tabled(rename = "Area")]
    area: String,
    #[tabled(rename = "Height")]
    height: String,
    #[tabled(rename = "η")]
    eta: String,
    #[tabled(rename = "R²")]
    r_squared: String,
    #[tabled(rename = "Group")]
    group: String,
}

fn record(result: &FitResult) -> Vec<String> {
    vec![
        (result.peak_index + 1).to_string(),
        format!("{:.6}", result.params.center),
        format!("{:.6}", result.fwhm),
        format!("{:.6}", result.area),
        format!("{:.6}", result.height),
        format!("{:.6}", result.params.sigma),
        format!("{:.6}", result.params.gamma),
        result
            .params
            .eta
            .map(|e| format!("{:.6}", e))
            .unwrap_or_default(),
        format!("{:.6}", result.r_squared),
    ]
}

/// 终端表格的峰组列
fn group_label(result: &FitResult) -> String {
    match (result.is_multi_peak, result.group_size) {
        (true, k) => format!("joint ×{}", k),
        (false, 1) => "single".to_string(),
        (false, k) => format!("stage A ×{}", k),
    }
}

fn sorted(results: &[FitResult]) -> Vec<&FitResult> {
    let mut sorted: Vec<&FitResult> = results.iter().collect();
    sorted.sort_by(|a, b| a.params.center.total_cmp(&b.params.center));
    sorted
}

/// 导出单文件结果
pub fn write_results_csv(results: &[FitResult], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    wtr.write_record(RESULT_COLUMNS)?;
    for result in sorted(results) {
        wtr.write_record(record(result))?;
    }

    wtr.flush().map_err(|e| PeakfitError::FileWrite {
        path: output_path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// 导出批处理汇总结果，`entries` 为 (文件名, 该文件的结果)
pub fn write_aggregate_csv(entries: &[(String, Vec<FitResult>)], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    let mut header = vec!["File"];
    header.extend(RESULT_COLUMNS);
    wtr.write_record(&header)?;

    for (file, results) in entries {
        for result in sorted(results) {
            let mut row = vec![file.clone()];
            row.extend(record(result));
            wtr.write_record(&row)?;
        }
    }

    wtr.flush().map_err(|e| PeakfitError::FileWrite {
        path: output_path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// 渲染终端结果表
pub fn results_table(results: &[FitResult]) -> String {
    let rows: Vec<TableRow> = sorted(results)
        .into_iter()
        .map(|r| TableRow {
            peak: r.peak_index + 1,
            center: format!("{:.4}", r.params.center),
            fwhm: format!("{:.4}", r.fwhm),
            area: format!("{:.2}", r.area),
            height: format!("{:.2}", r.height),
            eta: r.params.eta.map(|e| format!("{:.3}", e)).unwrap_or_else(|| "-".to_string()),
            r_squared: format!("{:.4}", r.r_squared),
            group: group_label(r),
        })
        .collect();
    Table::new(&rows).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deconv::profile::ProfileKind;
    use crate::deconv::window::WindowSpan;

    fn result(index: usize, center: f64, kind: ProfileKind) -> FitResult {
        let mut p = vec![10.0, center, 0.05, 0.04];
        if kind == ProfileKind::PseudoVoigt {
            p.push(0.3);
        }
        FitResult::from_vector(
            index,
            kind,
            &p,
            0.98,
            WindowSpan {
                start: center - 1.0,
                end: center + 1.0,
            },
        )
    }

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("peakfit-export-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_results_csv_columns_and_order() {
        let dir = temp_dir("single");
        let path = dir.join("results.csv");
        let results = vec![
            result(1, 30.0, ProfileKind::PseudoVoigt),
            result(0, 20.0, ProfileKind::PseudoVoigt),
        ];
        write_results_csv(&results, &path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, RESULT_COLUMNS);
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "1");
        assert_eq!(&rows[0][1], "20.000000");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_aggregate_csv_has_file_column() {
        let dir = temp_dir("aggregate");
        let path = dir.join("all.csv");
        let entries = vec![
            ("a.xy".to_string(), vec![result(0, 20.0, ProfileKind::Voigt)]),
            (
                "b.xy".to_string(),
                vec![result(0, 21.0, ProfileKind::Voigt), result(1, 25.0, ProfileKind::Voigt)],
            ),
        ];
        write_aggregate_csv(&entries, &path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(&reader.headers().unwrap()[0], "File");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[2][0], "b.xy");
        // Voigt results leave Eta empty
        assert_eq!(&rows[0][8], "");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_table_renders_every_peak() {
        let table = results_table(&[
            result(0, 20.0, ProfileKind::PseudoVoigt),
            result(1, 30.0, ProfileKind::PseudoVoigt),
        ]);
        assert!(table.contains("20.0000"));
        assert!(table.contains("30.0000"));
        assert!(table.contains("R²"));
    }

    #[test]
    fn test_group_label_marks_degraded_results() {
        let mut r = result(0, 20.0, ProfileKind::PseudoVoigt);
        assert_eq!(group_label(&r), "single");
        r.group_size = 2;
        assert_eq!(group_label(&r), "stage A ×2");
        r.is_multi_peak = true;
        assert_eq!(group_label(&r), "joint ×2");
    }
}
