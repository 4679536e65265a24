use fk_viz::profile::ProfileCurveArtifact;

use crate::canvas::Canvas;
use crate::config::VizConfig;
use crate::layout::axes::Axis;
use crate::layout::margins::PlotArea;
use crate::plots::axes_draw::draw_axes;
use crate::primitives::*;

pub fn render(artifact: &ProfileCurveArtifact, config: &VizConfig) -> crate::Result<String> {
    if artifact.values.is_empty() {
        return Ok(empty_svg());
    }

    let mut canvas = Canvas::new(config.figure.width, config.figure.height)?;

    let mut order: Vec<usize> = (0..artifact.values.len()).collect();
    order.sort_by(|&a, &b| artifact.values[a].total_cmp(&artifact.values[b]));
    let x_min = artifact.values[order[0]];
    let x_max = artifact.values[order[order.len() - 1]];
    let x_axis = Axis::exact(x_min, x_max, 6).with_label(&artifact.param);

    let y_max = artifact.twice_delta_nll.iter().copied().fold(0.0_f64, f64::max).clamp(4.0, 10.0);
    let y_axis = Axis::auto_linear(0.0, y_max, 5).with_label("2\u{0394}NLL");

    let area = PlotArea::auto(&canvas, &y_axis, &x_axis, config);
    draw_axes(&mut canvas, &area, &x_axis, &y_axis, config);

    canvas.push_clip(area.left, area.top, area.width, area.height);

    let points: Vec<(f64, f64)> = order
        .iter()
        .map(|&i| {
            let px = x_axis.data_to_pixel(artifact.values[i], area.left, area.right());
            let py = y_axis.data_to_pixel(artifact.twice_delta_nll[i], area.bottom(), area.top);
            (px, py)
        })
        .collect();
    canvas.polyline(&points, &LineStyle::solid(config.colors.data, 1.5));

    // 1σ and 2σ levels of 2ΔNLL.
    for (thresh, label) in [(1.0, "1\u{03C3}"), (4.0, "2\u{03C3}")] {
        if thresh <= y_axis.max {
            let py = y_axis.data_to_pixel(thresh, area.bottom(), area.top);
            canvas.line(area.left, py, area.right(), py, &LineStyle::dashed(config.colors.threshold, 0.8));
            let style = TextStyle {
                size: config.font.tick_size * 0.85,
                color: config.colors.threshold,
                anchor: TextAnchor::End,
                ..Default::default()
            };
            canvas.text(area.right() - 4.0, py - 3.0, label, &style);
        }
    }

    let best_px = x_axis.data_to_pixel(artifact.best_value, area.left, area.right());
    canvas.line(best_px, area.top, best_px, area.bottom(), &LineStyle::dashed(config.colors.total, 0.8));
    let hat_style = TextStyle {
        size: config.font.tick_size * 0.85,
        color: config.colors.total,
        ..Default::default()
    };
    canvas.text(best_px + 3.0, area.top + 12.0, &format!("best = {:.4}", artifact.best_value), &hat_style);

    canvas.pop_clip();

    Ok(canvas.finish_svg())
}

fn empty_svg() -> String {
    r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="50"><text x="10" y="30">No profile data</text></svg>"#.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fk_viz::profile::ProfileCurvePoint;

    #[test]
    fn renders_curve_and_levels() {
        let values: Vec<f64> = (0..=20).map(|i| -2.0 + 0.2 * i as f64).collect();
        let twice_delta_nll: Vec<f64> = values.iter().map(|v| v * v).collect();
        let art = ProfileCurveArtifact {
            param: "mu".into(),
            best_value: 0.0,
            nll_hat: 0.0,
            points: values
                .iter()
                .zip(&twice_delta_nll)
                .map(|(&value, &d)| ProfileCurvePoint { value, nll: d / 2.0, converged: true })
                .collect(),
            values,
            twice_delta_nll,
        };
        let svg = render(&art, &VizConfig::default()).unwrap();
        assert_eq!(svg.matches("<polyline").count(), 1);
        assert!(svg.contains("1\u{03C3}") && svg.contains("2\u{03C3}"));
        assert!(svg.contains("best = 0.0000"));
    }

    #[test]
    fn empty_scan() {
        let art = ProfileCurveArtifact {
            param: "mu".into(),
            best_value: 0.0,
            nll_hat: 0.0,
            points: vec![],
            values: vec![],
            twice_delta_nll: vec![],
        };
        assert!(render(&art, &VizConfig::default()).unwrap().contains("No profile data"));
    }
}
