//! # 拟合结果图表
//!
//! 使用 `plotters` 渲染单个谱的拟合图：
//! - 原始数据曲线
//! - 全局背景曲线（若已扣除）
//! - Stage A 参考曲线（淡色）
//! - Stage B 各峰分量（虚线）
//! - 分量之和（连续实线）
//! - 峰位标记
//!
//! 根据输出文件扩展名选择 PNG 或 SVG。
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs`、`batch/runner.rs` 调用
//! - 使用 `deconv/curves.rs` 的 FitCurves
//! - 使用 `plotters` 渲染图表

use crate::deconv::curves::FitCurves;
use crate::error::{PeakfitError, Result};
use crate::models::{FitResult, Spectrum};

use plotters::prelude::*;
use std::path::Path;

/// 图表尺寸与标题
#[derive(Debug, Clone)]
pub struct PlotOptions {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            title: String::new(),
            width: 1200,
            height: 800,
        }
    }
}

/// 渲染拟合图
pub fn render_fit_plot(
    spectrum: &Spectrum,
    curves: &[FitCurves],
    results: &[FitResult],
    output_path: &Path,
    options: &PlotOptions,
) -> Result<()> {
    let use_svg = output_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("svg"))
        .unwrap_or(false);

    if use_svg {
        let root = SVGBackend::new(output_path, (options.width, options.height)).into_drawing_area();
        draw_fit_chart(&root, spectrum, curves, results, &options.title)?;
        root.present()
            .map_err(|e| PeakfitError::Plot(e.to_string()))?;
    } else {
        let root =
            BitMapBackend::new(output_path, (options.width, options.height)).into_drawing_area();
        draw_fit_chart(&root, spectrum, curves, results, &options.title)?;
        root.present()
            .map_err(|e| PeakfitError::Plot(e.to_string()))?;
    }
    Ok(())
}

/// 全局背景在位置 `x` 处的值（未扣除时为 0）
fn global_background_at(spectrum: &Spectrum, x: f64) -> f64 {
    match (spectrum.subtracted_background(), spectrum.nearest_index(x)) {
        (Some(bg), Some(i)) => bg[i],
        _ => 0.0,
    }
}

fn draw_fit_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, plotters::coord::Shift>,
    spectrum: &Spectrum,
    curves: &[FitCurves],
    results: &[FitResult],
    title: &str,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)
        .map_err(|e| PeakfitError::Plot(format!("{:?}", e)))?;

    let positions = spectrum.positions();
    let data = spectrum.base();
    let x_min = positions.first().copied().unwrap_or(0.0);
    let x_max = positions.last().copied().unwrap_or(1.0);
    let (y_min, y_max) = data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let pad = (y_max - y_min).abs().max(1.0) * 0.05;

    let mut chart = ChartBuilder::on(root)
        .caption(title, ("sans-serif", 28).into_font())
        .margin(30)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min..x_max, (y_min - pad)..(y_max + pad))
        .map_err(|e| PeakfitError::Plot(format!("{:?}", e)))?;

    chart
        .configure_mesh()
        .x_desc("2θ (°)")
        .y_desc("Intensity")
        .x_label_style(("sans-serif", 16))
        .y_label_style(("sans-serif", 16))
        .axis_desc_style(("sans-serif", 18))
        .draw()
        .map_err(|e| PeakfitError::Plot(format!("{:?}", e)))?;

    // 数据
    chart
        .draw_series(LineSeries::new(
            positions.iter().zip(data).map(|(x, y)| (*x, *y)),
            RGBColor(60, 60, 60).stroke_width(1),
        ))
        .map_err(|e| PeakfitError::Plot(format!("{:?}", e)))?
        .label("Data")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RGBColor(60, 60, 60)));

    // 全局背景
    if let Some(bg) = spectrum.subtracted_background() {
        let bg_color = RGBColor(230, 140, 0);
        chart
            .draw_series(LineSeries::new(
                positions.iter().zip(bg).map(|(x, y)| (*x, *y)),
                bg_color.stroke_width(2),
            ))
            .map_err(|e| PeakfitError::Plot(format!("{:?}", e)))?
            .label("Background")
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], bg_color));
    }

    let shift = |x: f64, y: f64| (x, y + global_background_at(spectrum, x));
    let reference_color = RGBColor(150, 150, 150).mix(0.4);
    let component_palette = [
        RGBColor(31, 119, 180),
        RGBColor(44, 160, 44),
        RGBColor(148, 103, 189),
        RGBColor(140, 86, 75),
        RGBColor(227, 119, 194),
        RGBColor(23, 190, 207),
    ];
    let sum_color = RGBColor(214, 39, 40);

    for group in curves {
        // Stage A 参考曲线
        for (_, reference) in &group.references {
            let ys = group.component_overlay(reference);
            chart
                .draw_series(LineSeries::new(
                    group.x.iter().zip(&ys).map(|(x, y)| shift(*x, *y)),
                    reference_color.stroke_width(1),
                ))
                .map_err(|e| PeakfitError::Plot(format!("{:?}", e)))?;
        }

        // Stage B 分量
        for (peak, component) in &group.components {
            let ys = group.component_overlay(component);
            let color = component_palette[peak % component_palette.len()];
            chart
                .draw_series(DashedLineSeries::new(
                    group.x.iter().zip(&ys).map(|(x, y)| shift(*x, *y)),
                    6,
                    4,
                    color.stroke_width(2),
                ))
                .map_err(|e| PeakfitError::Plot(format!("{:?}", e)))?;
        }

        // 分量之和
        let total = group.overlay();
        chart
            .draw_series(LineSeries::new(
                group.x.iter().zip(&total).map(|(x, y)| shift(*x, *y)),
                sum_color.stroke_width(2),
            ))
            .map_err(|e| PeakfitError::Plot(format!("{:?}", e)))?;
    }

    // 峰位标记
    chart
        .draw_series(results.iter().map(|r| {
            let x = r.params.center;
            let y = spectrum
                .nearest_index(x)
                .map(|i| data[i])
                .unwrap_or(r.height);
            TriangleMarker::new((x, y + pad * 0.5), 6, sum_color.filled())
        }))
        .map_err(|e| PeakfitError::Plot(format!("{:?}", e)))?
        .label("Fit")
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], sum_color));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| PeakfitError::Plot(format!("{:?}", e)))?;

    Ok(())
}
