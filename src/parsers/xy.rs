//! # 两列（或多列）文本谱解析器
//!
//! ## 格式说明
//! ```text
//! # comment                 # 以 # % ! ; 开头的行为注释
//! 2theta  intensity         # 可选的非数字表头（数据开始前）
//! 10.00   152.0   ...       # 第一列为位置，第二列为强度，其余列忽略
//! 10.02,  149.5             # 分隔符：空白、逗号、分号、制表符
//! ```
//!
//! 位置列必须严格递增；整体降序的数据会被反转为升序。
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs`、`session/`、`batch/` 使用
//! - 创建 `models/spectrum.rs` 的 Spectrum
//! - 使用 `regex` 切分字段

use crate::error::{PeakfitError, Result};
use crate::models::Spectrum;

use regex::Regex;
use std::fs;
use std::path::Path;

/// 最少数据行数
pub const MIN_ROWS: usize = 3;

const COMMENT_PREFIXES: [char; 4] = ['#', '%', '!', ';'];

/// 解析谱文件
pub fn parse_xy_file(path: &Path) -> Result<Spectrum> {
    let content = fs::read_to_string(path).map_err(|e| PeakfitError::FileRead {
        path: path.display().to_string(),
        source: e,
    })?;

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");

    parse_xy_content(&content, name).map_err(|e| match e {
        PeakfitError::DataLoad { reason, .. } => PeakfitError::DataLoad {
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })
}

/// 从字符串内容解析
pub fn parse_xy_content(content: &str, name: &str) -> Result<Spectrum> {
    let splitter = Regex::new(r"[\s,;]+").map_err(|e| PeakfitError::Other(e.to_string()))?;
    let fail = |reason: String| PeakfitError::DataLoad {
        path: name.to_string(),
        reason,
    };

    let mut positions = Vec::new();
    let mut intensities = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(COMMENT_PREFIXES) {
            continue;
        }

        let fields: Vec<&str> = splitter.split(line).filter(|s| !s.is_empty()).collect();
        let parsed = match fields.as_slice() {
            [x, y, ..] => x.parse::<f64>().ok().zip(y.parse::<f64>().ok()),
            _ => None,
        };

        match parsed {
            Some((x, y)) => {
                if !x.is_finite() || !y.is_finite() {
                    return Err(fail(format!("non-finite value at line {}", lineno + 1)));
                }
                positions.push(x);
                intensities.push(y);
            }
            // 数据开始前的表头
            None if positions.is_empty() => continue,
            None => {
                return Err(fail(format!(
                    "expected two numeric columns at line {}: '{}'",
                    lineno + 1,
                    line
                )))
            }
        }
    }

    if positions.len() < MIN_ROWS {
        return Err(fail(format!(
            "found {} data rows, at least {} required",
            positions.len(),
            MIN_ROWS
        )));
    }

    if positions.windows(2).all(|w| w[1] < w[0]) {
        positions.reverse();
        intensities.reverse();
    }
    if let Some(i) = positions.windows(2).position(|w| w[1] <= w[0]) {
        return Err(fail(format!(
            "positions are not strictly increasing near row {} ({} -> {})",
            i + 2,
            positions[i],
            positions[i + 1]
        )));
    }

    Spectrum::new(name, positions, intensities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whitespace_columns_with_comments() {
        let content = "\
# sample pattern
% exported
2theta intensity
10.00  150.0
10.02  151.5  extra
10.04  149.0

10.06  148.0
";
        let s = parse_xy_content(content, "sample").unwrap();
        assert_eq!(s.len(), 4);
        assert_eq!(s.positions(), &[10.00, 10.02, 10.04, 10.06]);
        assert_eq!(s.original()[1], 151.5);
        assert_eq!(s.name, "sample");
    }

    #[test]
    fn test_parse_mixed_delimiters() {
        let content = "1.0,2.0\n2.0;3.0\n3.0\t4.0\n4.0 , 5.0\n";
        let s = parse_xy_content(content, "csv").unwrap();
        assert_eq!(s.positions(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(s.original(), &[2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_descending_data_is_reversed() {
        let s = parse_xy_content("3 30\n2 20\n1 10\n", "desc").unwrap();
        assert_eq!(s.positions(), &[1.0, 2.0, 3.0]);
        assert_eq!(s.original(), &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_row_count_and_order_preserved() {
        let content: String = (0..500)
            .map(|i| format!("{:.3} {}\n", 5.0 + i as f64 * 0.013, (i * 7) % 31))
            .collect();
        let s = parse_xy_content(&content, "long").unwrap();
        assert_eq!(s.len(), 500);
        assert!(s.positions().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_malformed_inputs_are_data_load_errors() {
        let cases = [
            "1 2\n2 3\n",                 // too few rows
            "1 2\n2 3\nabc def\n4 5\n",   // garbage after data
            "1 2\n3 3\n2 4\n",            // not monotonic
            "1 2\n2 NaN\n3 4\n",          // non-finite
            "this is not a spectrum\n",   // no data
        ];
        for content in cases {
            let err = parse_xy_content(content, "bad").unwrap_err();
            assert!(
                matches!(err, PeakfitError::DataLoad { .. }),
                "unexpected error for {:?}: {}",
                content,
                err
            );
        }
    }
}
