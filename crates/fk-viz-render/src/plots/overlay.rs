use fk_viz::overlay::OverlayArtifact;

use crate::canvas::Canvas;
use crate::config::VizConfig;
use crate::layout::axes::Axis;
use crate::layout::legend::{LegendEntry, LegendKind, draw_legend};
use crate::layout::margins::PlotArea;
use crate::plots::axes_draw::draw_axes;
use crate::primitives::*;

/// Data histogram with error bars, the scaled total density and its components.
pub fn render(artifact: &OverlayArtifact, config: &VizConfig) -> crate::Result<String> {
    if artifact.x.len() != artifact.total.len()
        || artifact.components.iter().any(|c| c.y.len() != artifact.x.len())
    {
        return Err(crate::RenderError::Layout("overlay curves are not aligned with x".into()));
    }

    let mut canvas = Canvas::new(config.figure.width, config.figure.height)?;

    let curve_max = artifact.total.iter().copied().fold(0.0_f64, f64::max);
    let data_max = artifact
        .histogram
        .as_ref()
        .map(|h| h.counts.iter().zip(&h.errors).map(|(c, e)| c + e).fold(0.0_f64, f64::max))
        .unwrap_or(0.0);
    let y_top = (curve_max.max(data_max) * 1.15).max(1.0);

    let (lo, hi) = artifact.limits;
    let x_axis = Axis::exact(lo, hi, 7).with_label(&artifact.observable);
    let bin_width = (hi - lo) / artifact.n_bins as f64;
    let y_axis = Axis::auto_linear(0.0, y_top, 6).with_label(format!("Events / {}", format_width(bin_width)));

    let area = PlotArea::auto(&canvas, &y_axis, &x_axis, config);
    draw_axes(&mut canvas, &area, &x_axis, &y_axis, config);

    let to_px = |x: f64, y: f64| {
        (x_axis.data_to_pixel(x, area.left, area.right()), y_axis.data_to_pixel(y, area.bottom(), area.top))
    };

    canvas.push_clip(area.left, area.top, area.width, area.height);

    let mut legend = Vec::new();
    if config.overlay.show_components {
        for (i, c) in artifact.components.iter().enumerate() {
            let color = config.palette.nth(i);
            let pts: Vec<(f64, f64)> = artifact.x.iter().zip(&c.y).map(|(&x, &y)| to_px(x, y)).collect();
            canvas.polyline(&pts, &LineStyle::dashed(color, config.overlay.curve_width * 0.8));
            legend.push(LegendEntry { label: c.name.clone(), color, kind: LegendKind::Line(Some("6 3".into())) });
        }
    }

    let total: Vec<(f64, f64)> =
        artifact.x.iter().zip(&artifact.total).map(|(&x, &y)| to_px(x, y)).collect();
    canvas.polyline(&total, &LineStyle::solid(config.colors.total, config.overlay.curve_width));
    legend.insert(0, LegendEntry { label: artifact.name.clone(), color: config.colors.total, kind: LegendKind::Line(None) });

    if let Some(h) = &artifact.histogram {
        let bar = LineStyle::solid(config.colors.data, 0.8);
        let marker = MarkerStyle { size: config.overlay.marker_size, color: config.colors.data };
        for ((&x, &n), &e) in h.bin_centers.iter().zip(&h.counts).zip(&h.errors) {
            let (px, py) = to_px(x, n);
            let (_, py_lo) = to_px(x, (n - e).max(0.0));
            let (_, py_hi) = to_px(x, n + e);
            canvas.error_bar(px, py_lo, py_hi, 0.0, &bar);
            canvas.marker(px, py, &marker);
        }
        legend.insert(0, LegendEntry { label: "data".into(), color: config.colors.data, kind: LegendKind::Marker });
    }

    canvas.pop_clip();

    if config.overlay.show_legend {
        draw_legend(&mut canvas, &area, &legend, config.font.size);
    }

    Ok(canvas.finish_svg())
}

fn format_width(w: f64) -> String {
    let s = format!("{w:.4}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
