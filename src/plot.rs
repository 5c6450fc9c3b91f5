use crate::model::EdgeCurve;
use crate::training::LossRecord;
use plotters::prelude::*;
use std::path::Path;

/// 学習過程の損失をグラフとしてPNGファイルに出力します。
pub fn plot_loss_history(
    path: &Path,
    history: &[LossRecord],
) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let logs = |f: fn(&LossRecord) -> f32| -> Vec<(usize, f32)> {
        history
            .iter()
            .map(|r| (r.step, f(r).max(f32::MIN_POSITIVE).log10()))
            .collect()
    };
    let series = [
        ("PDE Loss", logs(|r: &LossRecord| r.pde), RED),
        ("BC Loss", logs(|r: &LossRecord| r.bc), BLUE),
        ("L2 Error", logs(|r: &LossRecord| r.l2), GREEN),
    ];
    let values = series.iter().flat_map(|(_, s, _)| s.iter().map(|p| p.1));
    let (min_log, max_log) = values.fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let (min_log, max_log) = if min_log <= max_log {
        (min_log - 0.5, max_log + 0.5)
    } else {
        (-6.0, 1.0)
    };
    let last_step = history.last().map_or(1, |r| r.step.max(1));

    let mut chart = ChartBuilder::on(&root)
        .caption("Loss History", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0..last_step, min_log..max_log)?;
    chart
        .configure_mesh()
        .y_desc("Loss (log10 scale)")
        .x_desc("Step")
        .draw()?;
    for (label, points, color) in series {
        chart
            .draw_series(LineSeries::new(points, &color))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// 各エッジの活性化関数を層ごとに並べて描画します。
///
/// 行が層、列がその層のエッジ。シンボリック関数に固定されたエッジは赤で描きます。
pub fn plot_activations(
    path: &Path,
    curves: &[EdgeCurve],
) -> Result<(), Box<dyn std::error::Error>> {
    let layers = curves.iter().map(|c| c.edge.layer + 1).max().unwrap_or(1);
    let columns = (0..layers)
        .map(|l| curves.iter().filter(|c| c.edge.layer == l).count())
        .max()
        .unwrap_or(1)
        .max(1);

    let root = BitMapBackend::new(path, (240 * columns as u32, 220 * layers as u32))
        .into_drawing_area();
    root.fill(&WHITE)?;
    let rows = root.split_evenly((layers, 1));
    for (l, row) in rows.iter().enumerate() {
        let panels = row.split_evenly((1, columns));
        for (curve, panel) in curves.iter().filter(|c| c.edge.layer == l).zip(panels.iter()) {
            let (x_min, x_max) = bounds(curve.points.iter().map(|p| p.0));
            let (y_min, y_max) = bounds(curve.points.iter().map(|p| p.1));
            let color = if curve.symbolic.is_some() { RED } else { BLUE };
            let caption = match curve.symbolic {
                Some(fun) => format!("{} = {}", curve.edge, fun),
                None => format!("{}", curve.edge),
            };
            let mut chart = ChartBuilder::on(panel)
                .caption(caption, ("sans-serif", 16).into_font())
                .margin(8)
                .x_label_area_size(20)
                .y_label_area_size(30)
                .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
            chart.configure_mesh().max_light_lines(0).draw()?;
            chart.draw_series(LineSeries::new(curve.points.iter().copied(), &color))?;
        }
    }
    root.present()?;
    Ok(())
}

/// 格子上の値 `values[ix * n + iy]` をヒートマップとして描画します。
pub fn plot_solution(
    path: &Path,
    n: usize,
    values: &[f32],
    title: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (640, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let (v_min, v_max) = bounds(values.iter().copied());
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(40)
        .build_cartesian_2d(0..n, 0..n)?;
    chart.configure_mesh().disable_mesh().draw()?;
    chart.draw_series((0..n).flat_map(|ix| {
        (0..n).map(move |iy| {
            let t = (values[ix * n + iy] - v_min) / (v_max - v_min);
            let color = HSLColor(0.66 * (1.0 - t as f64), 0.9, 0.5);
            Rectangle::new([(ix, iy), (ix + 1, iy + 1)], color.filled())
        })
    }))?;
    root.present()?;
    Ok(())
}

/// 描画範囲。値が一定のときは少し広げます。
fn bounds(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let (lo, hi) = values.fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        (-1.0, 1.0)
    } else if hi - lo < 1e-6 {
        (lo - 0.5, hi + 0.5)
    } else {
        (lo, hi)
    }
}
