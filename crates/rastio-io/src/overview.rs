//! Overview level selection for downsampled reads.
//!
//! Given a request that shrinks the window (buffer smaller than window),
//! [`select_level`] picks the most reduced overview band that can still
//! serve the request, and rescales the window into that overview's
//! coordinate space. Reading far fewer source blocks at a coarser level
//! is the whole point of carrying overviews.

use rastio_core::{FloatWindow, Window};

use crate::band::{OverviewKind, RasterBand};

/// The outcome of overview selection: which level to use and the request
/// window rescaled into its space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverviewChoice {
    /// Index into the band's overview list.
    pub index: usize,
    /// Request window in overview coordinates.
    pub window: Window,
    /// Sub-pixel window in overview coordinates, carried so split requests
    /// stay consistent through the substitution.
    pub float_window: Option<FloatWindow>,
}

/// Resolution factor of an overview relative to its base band, measured on
/// the least reduced axis.
fn overview_factor(band: &RasterBand, overview: &RasterBand) -> f64 {
    let fx = band.width() as f64 / overview.width() as f64;
    let fy = band.height() as f64 / overview.height() as f64;
    fx.min(fy)
}

/// Picks the best overview for reading `window` into a `buf_width` x
/// `buf_height` buffer, or `None` when full resolution serves best.
///
/// The desired decimation comes from the least reduced axis (the X axis
/// when the buffer is one pixel tall), truncated to a whole factor before
/// the 20% allowance is applied: a 3.5x request is served by a factor-2
/// overview, not a factor-4 one. Statistical overviews never qualify.
/// Among the surviving levels the most reduced one wins.
pub fn select_level(
    band: &RasterBand,
    window: &Window,
    float_window: Option<FloatWindow>,
    buf_width: usize,
    buf_height: usize,
) -> Option<OverviewChoice> {
    let ratio_x = window.width as f64 / buf_width as f64;
    let ratio_y = window.height as f64 / buf_height as f64;
    let desired = if buf_height == 1 || ratio_x < ratio_y {
        ratio_x
    } else {
        ratio_y
    };
    let cutoff = desired.floor() * 1.2;

    let mut best: Option<(usize, f64)> = None;
    for (index, overview) in band.overviews().iter().enumerate() {
        if overview.kind == OverviewKind::Statistical {
            continue;
        }
        let factor = overview_factor(band, &overview.band);
        if factor >= cutoff {
            continue;
        }
        if let Some((_, best_factor)) = best {
            if factor <= best_factor {
                continue;
            }
        }
        best = Some((index, factor));
    }
    let (index, _) = best?;
    let overview = &band.overviews()[index].band;

    // Rescale with the exact per-axis ratios of the chosen level.
    let res_x = band.width() as f64 / overview.width() as f64;
    let res_y = band.height() as f64 / overview.height() as f64;

    let ox = (overview.width() - 1).min((window.x as f64 / res_x + 0.5) as usize);
    let oy = (overview.height() - 1).min((window.y as f64 / res_y + 0.5) as usize);
    let mut ow = 1.max((window.width as f64 / res_x + 0.5) as usize);
    let mut oh = 1.max((window.height as f64 / res_y + 0.5) as usize);
    ow = ow.min(overview.width() - ox);
    oh = oh.min(overview.height() - oy);

    let float_window = float_window.map(|f| {
        FloatWindow::new(f.x / res_x, f.y / res_y, f.width / res_x, f.height / res_y)
    });

    let mut window = Window::new(ox, oy, ow, oh);
    if let Some(f) = float_window {
        // Rounding the origin can leave up to half a source pixel of the
        // scaled sub-pixel window uncovered; widen so the integer window
        // still contains it.
        let x0 = window.x.min(f.x.floor() as usize);
        let y0 = window.y.min(f.y.floor() as usize);
        let x1 = window
            .right()
            .max((f.x + f.width).ceil() as usize)
            .min(overview.width());
        let y1 = window
            .bottom()
            .max((f.y + f.height).ceil() as usize)
            .min(overview.height());
        window = Window::new(x0, y0, x1 - x0, y1 - y0);
    }

    Some(OverviewChoice {
        index,
        window,
        float_window,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::{BandOptions, OverviewKind};
    use crate::mem::MemSource;
    use rastio_core::RasterKind;
    use std::sync::Arc;

    fn band_with_overviews(size: usize, factors: &[(usize, OverviewKind)]) -> RasterBand {
        let make = |w: usize, h: usize| -> RasterBand {
            let source = Arc::new(MemSource::new(w, h, 16, 16, RasterKind::U8));
            RasterBand::new(
                BandOptions::new(w, h, 16, 16, RasterKind::U8),
                Box::new(source),
            )
            .unwrap()
        };
        let mut band = make(size, size);
        for &(factor, kind) in factors {
            band.push_overview(kind, Arc::new(make(size / factor, size / factor)));
        }
        band
    }

    #[test]
    fn test_decimation_3_5_selects_factor_2() {
        // Factors {2, 4, 8}; desired decimation 3.5. Factor 4 is past the
        // truncated 20% allowance (3 * 1.2 = 3.6), so factor 2 wins.
        let band = band_with_overviews(
            64,
            &[
                (2, OverviewKind::Pixel),
                (4, OverviewKind::Pixel),
                (8, OverviewKind::Pixel),
            ],
        );
        let window = Window::new(0, 0, 56, 56);
        let choice = select_level(&band, &window, None, 16, 16).unwrap();
        assert_eq!(choice.index, 0);
        assert_eq!(choice.window, Window::new(0, 0, 28, 28));
    }

    #[test]
    fn test_exact_factor_selected() {
        let band = band_with_overviews(64, &[(2, OverviewKind::Pixel), (4, OverviewKind::Pixel)]);
        let window = Window::new(0, 0, 64, 64);
        let choice = select_level(&band, &window, None, 16, 16).unwrap();
        assert_eq!(choice.index, 1);
        assert_eq!(choice.window, Window::new(0, 0, 16, 16));
    }

    #[test]
    fn test_statistical_overview_rejected() {
        let band = band_with_overviews(
            64,
            &[(2, OverviewKind::Statistical), (4, OverviewKind::Pixel)],
        );
        // Desired decimation 2: the statistical factor-2 level is skipped
        // and factor 4 is too coarse, so nothing qualifies.
        assert!(select_level(&band, &Window::new(0, 0, 64, 64), None, 32, 32).is_none());
    }

    #[test]
    fn test_no_overview_for_mild_downsampling() {
        let band = band_with_overviews(64, &[(2, OverviewKind::Pixel)]);
        // Desired 1.5: truncates to 1, cutoff 1.2, factor 2 rejected.
        assert!(select_level(&band, &Window::new(0, 0, 48, 48), None, 32, 32).is_none());
    }

    #[test]
    fn test_window_rescaled_and_clipped() {
        let band = band_with_overviews(64, &[(4, OverviewKind::Pixel)]);
        let window = Window::new(30, 58, 34, 6);
        // Desired decimation on Y: 6 / 1 = 6 with bufH 1? Use an 8x1 buffer:
        // least reduced axis is X (34/8 = 4.25), cutoff 4 * 1.2 = 4.8.
        let choice = select_level(&band, &window, None, 8, 1).unwrap();
        assert_eq!(choice.index, 0);
        // 30/4 + 0.5 -> 8, 58/4 + 0.5 -> 15, sizes rounded then clipped.
        assert_eq!(choice.window, Window::new(8, 15, 8, 1));
    }

    #[test]
    fn test_integer_window_covers_scaled_float_window() {
        let band = band_with_overviews(64, &[(4, OverviewKind::Pixel)]);
        let window = Window::new(30, 58, 34, 6);
        let choice = select_level(&band, &window, Some(window.to_float()), 8, 1).unwrap();
        assert_eq!(choice.float_window, Some(FloatWindow::new(7.5, 14.5, 8.5, 1.5)));
        // Origin rounding alone would give (8, 15, 8, 1), leaving half a
        // pixel of the sub-pixel window outside the integer one.
        assert_eq!(choice.window, Window::new(7, 14, 9, 2));
    }

    #[test]
    fn test_float_window_rescaled() {
        let band = band_with_overviews(64, &[(2, OverviewKind::Pixel)]);
        let window = Window::new(0, 0, 64, 64);
        let fwin = FloatWindow::new(1.0, 2.0, 62.0, 60.0);
        let choice = select_level(&band, &window, Some(fwin), 32, 32).unwrap();
        assert_eq!(
            choice.float_window,
            Some(FloatWindow::new(0.5, 1.0, 31.0, 30.0))
        );
    }
}
