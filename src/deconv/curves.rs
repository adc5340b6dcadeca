//! # 拟合曲线
//!
//! 为显示层准备曲线数组：
//! - Stage A 参考曲线（淡色）
//! - Stage B 各峰分量（虚线）
//! - 各分量逐点求和的总拟合曲线
//!
//! 总曲线始终在整个联合窗口上逐点求和，不拼接各峰独立拟合的片段，
//! 因此不会出现不连续。
//!
//! ## 依赖关系
//! - 被 `deconv/plot.rs`、`session/` 使用
//! - 使用 `deconv/background.rs` 的边缘背景

use crate::deconv::background::edge_background;
use crate::models::{FitResult, Spectrum};

/// 一个峰组（或单峰）的曲线
#[derive(Debug, Clone)]
pub struct FitCurves {
    pub x: Vec<f64>,
    /// 窗口内的局部背景，叠加到数据上显示时使用
    pub baseline: Vec<f64>,
    /// (峰下标, 分量曲线)
    pub components: Vec<(usize, Vec<f64>)>,
    /// (峰下标, Stage A 参考曲线)
    pub references: Vec<(usize, Vec<f64>)>,
    /// 分量之和
    pub sum: Vec<f64>,
}

impl FitCurves {
    /// 由同一窗口内的拟合结果构造曲线
    ///
    /// 结果为空或窗口内没有样本时返回 `None`。
    pub fn for_results(spectrum: &Spectrum, results: &[FitResult]) -> Option<Self> {
        let first = results.first()?;
        let span = first.window;
        let positions = spectrum.positions();
        let start = positions.partition_point(|&x| x < span.start);
        let end = positions.partition_point(|&x| x <= span.end);
        if start >= end {
            return None;
        }

        let x = positions[start..end].to_vec();
        let baseline = edge_background(&x, &spectrum.working()[start..end]);

        let components: Vec<(usize, Vec<f64>)> = results
            .iter()
            .map(|r| (r.peak_index, x.iter().map(|&xi| r.evaluate(xi)).collect()))
            .collect();

        let references = results
            .iter()
            .filter_map(|r| {
                let params = r.reference?;
                let p = r.profile.to_vec(&params);
                Some((
                    r.peak_index,
                    x.iter().map(|&xi| r.profile.evaluate(xi, &p)).collect(),
                ))
            })
            .collect();

        let mut sum = vec![0.0; x.len()];
        for (_, curve) in &components {
            for (s, v) in sum.iter_mut().zip(curve) {
                *s += v;
            }
        }

        Some(Self {
            x,
            baseline,
            components,
            references,
            sum,
        })
    }

    /// 叠加到工作谱上的总拟合曲线
    pub fn overlay(&self) -> Vec<f64> {
        self.sum.iter().zip(&self.baseline).map(|(s, b)| s + b).collect()
    }

    /// 叠加到工作谱上的分量曲线
    pub fn component_overlay(&self, curve: &[f64]) -> Vec<f64> {
        curve.iter().zip(&self.baseline).map(|(c, b)| c + b).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deconv::multi::{fit_group, sum_profiles};
    use crate::deconv::testutil::{grid, pv_trace};
    use crate::models::{FitConfig, PeakCandidate, PeakGroup, PeakOrigin};

    #[test]
    fn test_sum_matches_joint_model_everywhere() {
        let x = grid(9.0, 11.5, 0.005);
        let y = pv_trace(&x, &[(10.0, 0.15, 300.0), (10.3, 0.15, 250.0)], 100.0, 1.0);
        let spectrum = Spectrum::new("pair", x.clone(), y).unwrap();
        let candidates: Vec<PeakCandidate> = [10.0, 10.3]
            .iter()
            .map(|&c| {
                let index = spectrum.nearest_index(c).unwrap();
                PeakCandidate {
                    index,
                    position: x[index],
                    height: 300.0,
                    fwhm: 0.15,
                    origin: PeakOrigin::Manual,
                }
            })
            .collect();
        let config = FitConfig {
            overlap_mode: true,
            ..FitConfig::default()
        };
        let fit = fit_group(&spectrum, &candidates, &PeakGroup { members: vec![0, 1] }, &config);
        assert_eq!(fit.results.len(), 2);

        let curves = FitCurves::for_results(&spectrum, &fit.results).unwrap();
        assert_eq!(curves.components.len(), 2);
        assert_eq!(curves.references.len(), 2);
        assert_eq!(curves.sum.len(), curves.x.len());

        let params: Vec<f64> = fit.results.iter().flat_map(|r| r.vector()).collect();
        for (xi, si) in curves.x.iter().zip(&curves.sum) {
            let joint = sum_profiles(config.profile, *xi, &params);
            assert!((joint - si).abs() < 1e-9 * joint.abs().max(1.0));
        }
        // no jumps between neighbouring samples beyond what the data allows
        let max_jump = curves
            .sum
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0, f64::max);
        assert!(max_jump < 50.0, "max jump = {}", max_jump);
    }

    #[test]
    fn test_empty_results() {
        let spectrum = Spectrum::new("s", vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 1.0]).unwrap();
        assert!(FitCurves::for_results(&spectrum, &[]).is_none());
    }
}
