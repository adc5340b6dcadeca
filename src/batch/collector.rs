//! # 文件收集器
//!
//! 根据输入路径和模式收集待处理的谱文件列表。
//!
//! ## 功能
//! - 支持单文件和目录输入
//! - glob 模式匹配（逗号分隔的多模式）
//! - 递归目录搜索
//! - 按同扩展名收集兄弟文件，用于文件间导航
//!
//! 结果按路径排序，批处理顺序稳定。
//!
//! ## 依赖关系
//! - 被 `batch/runner.rs`、`commands/batch.rs` 调用
//! - 使用 `walkdir` 遍历目录，`glob` 匹配文件名

use crate::error::{PeakfitError, Result};

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 默认的谱文件模式
pub const DEFAULT_PATTERN: &str = "*.xy,*.xye,*.dat,*.txt,*.csv";

/// 文件收集器
pub struct FileCollector {
    /// 输入路径
    input: PathBuf,
    /// 匹配模式列表
    patterns: Vec<String>,
    /// 是否递归
    recursive: bool,
}

impl FileCollector {
    /// 创建新的文件收集器
    pub fn new(input: PathBuf) -> Self {
        Self {
            input,
            patterns: split_patterns(DEFAULT_PATTERN),
            recursive: false,
        }
    }

    /// 收集与 `file` 同目录、同扩展名的所有文件
    pub fn siblings_of(file: &Path) -> Self {
        let dir = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let pattern = match file.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("*.{}", ext),
            None => "*".to_string(),
        };
        Self::new(dir).with_pattern(&pattern)
    }

    /// 设置匹配模式（逗号分隔的多模式）
    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.patterns = split_patterns(pattern);
        if self.patterns.is_empty() {
            self.patterns = vec!["*".to_string()];
        }
        self
    }

    /// 设置是否递归搜索
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// 收集所有匹配的文件（已排序）
    pub fn collect(&self) -> Result<Vec<PathBuf>> {
        if self.input.is_file() {
            return Ok(vec![self.input.clone()]);
        }

        if !self.input.is_dir() {
            return Err(PeakfitError::DirectoryNotFound {
                path: self.input.display().to_string(),
            });
        }

        let patterns = self
            .patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| {
                    PeakfitError::InvalidArgument(format!("Invalid pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let max_depth = if self.recursive { usize::MAX } else { 1 };

        let mut files: Vec<PathBuf> = WalkDir::new(&self.input)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| patterns.iter().any(|p| p.matches(name)))
                    .unwrap_or(false)
            })
            .map(|e| e.path().to_path_buf())
            .collect();

        files.sort();
        Ok(files)
    }
}

fn split_patterns(pattern: &str) -> Vec<String> {
    pattern
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("peakfit-collect-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("nested")).unwrap();
        for file in ["b.xy", "a.xy", "c.txt", "notes.md", "nested/d.xy"] {
            fs::write(dir.join(file), "1 2\n").unwrap();
        }
        dir
    }

    fn names(files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_collect_sorted_with_pattern() {
        let dir = temp_dir("pattern");
        let files = FileCollector::new(dir.clone()).with_pattern("*.xy").collect().unwrap();
        assert_eq!(names(&files), ["a.xy", "b.xy"]);

        let files = FileCollector::new(dir.clone())
            .with_pattern("*.xy, *.txt")
            .recursive(true)
            .collect()
            .unwrap();
        assert_eq!(files.len(), 4);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_default_pattern_skips_unrelated_files() {
        let dir = temp_dir("default");
        let files = FileCollector::new(dir.clone()).collect().unwrap();
        assert_eq!(names(&files), ["a.xy", "b.xy", "c.txt"]);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_siblings_share_extension() {
        let dir = temp_dir("siblings");
        let files = FileCollector::siblings_of(&dir.join("b.xy")).collect().unwrap();
        assert_eq!(names(&files), ["a.xy", "b.xy"]);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_directory_is_error() {
        let missing = std::env::temp_dir().join("peakfit-collect-does-not-exist");
        assert!(matches!(
            FileCollector::new(missing).collect(),
            Err(PeakfitError::DirectoryNotFound { .. })
        ));
    }
}
