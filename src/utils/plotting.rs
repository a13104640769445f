use anyhow::{anyhow, Result};
use plotters::prelude::*;

const TRACE_PLOT_SIZE: (u32, u32) = (800, 260);
const BURNIN_SHADE: RGBColor = RGBColor(220, 220, 220);
const TRACE_COLOUR: RGBColor = RGBColor(31, 119, 180);

/// Draws an MCMC trace (state vs value) as inline SVG markup, with the burn-in
/// region shaded. No text is drawn; axis labels live in the surrounding HTML.
///
/// # Arguments
///
/// * `series` - (state, value) pairs in sampling order.
/// * `burnin_samples` - Number of leading samples discarded as burn-in.
///
/// # Returns
/// SVG document as a String.
pub fn trace_plot_svg(series: &[(f64, f64)], burnin_samples: usize) -> Result<String> {
    if series.len() < 2 {
        return Err(anyhow!("Need at least two samples to plot a trace, got {}", series.len()));
    }

    let x_min = series.first().map(|p| p.0).unwrap_or(0.0);
    let x_max = series.last().map(|p| p.0).unwrap_or(1.0);
    let (mut y_min, mut y_max) = series
        .iter()
        .filter(|p| p.1.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.1), hi.max(p.1)));
    if !y_min.is_finite() || !y_max.is_finite() {
        return Err(anyhow!("Trace has no finite values"));
    }
    if y_max - y_min < f64::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }
    let pad = (y_max - y_min) * 0.05;
    let x_max = if x_max > x_min { x_max } else { x_min + 1.0 };

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, TRACE_PLOT_SIZE).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .build_cartesian_2d(x_min..x_max, (y_min - pad)..(y_max + pad))?;

        if burnin_samples > 0 {
            let burnin_end = series[burnin_samples.min(series.len() - 1)].0;
            chart.draw_series(std::iter::once(Rectangle::new(
                [(x_min, y_min - pad), (burnin_end, y_max + pad)],
                BURNIN_SHADE.filled(),
            )))?;
        }

        chart.draw_series(LineSeries::new(
            series.iter().copied().filter(|p| p.1.is_finite()),
            &TRACE_COLOUR,
        ))?;

        root.present()?;
    }
    Ok(svg)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_plot_is_svg() -> Result<()> {
        let series: Vec<(f64, f64)> = (0..20).map(|i| (i as f64 * 1000.0, -100.0 - (i % 5) as f64)).collect();
        let svg = trace_plot_svg(&series, 2)?;
        assert!(svg.contains("<svg"));
        assert!(svg.contains("</svg>"));
        assert!(!svg.contains("<text"));
        Ok(())
    }

    #[test]
    fn test_flat_trace_still_plots() -> Result<()> {
        let series = vec![(0.0, 5.0), (1.0, 5.0), (2.0, 5.0)];
        assert!(trace_plot_svg(&series, 0)?.contains("<svg"));
        Ok(())
    }

    #[test]
    fn test_too_few_samples() {
        assert!(trace_plot_svg(&[(0.0, 1.0)], 0).is_err());
    }
}
