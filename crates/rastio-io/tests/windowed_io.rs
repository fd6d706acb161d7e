//! Integration tests for the windowed access engine and block cache.

use std::sync::Arc;

use rastio_core::{Error, FloatWindow, Progress, RasterKind, Window};
use rastio_io::{
    rasterio, BandOptions, BufferShape, CacheStrategy, IoBuffer, IoOptions, MemSource,
    OverviewKind, RasterBand, Resampling,
};

/// A zeroed u8 band over an in-memory source, with a handle to the source
/// for failure injection and direct pixel loads.
fn u8_band(
    width: usize,
    height: usize,
    block_width: usize,
    block_height: usize,
) -> (Arc<MemSource>, RasterBand) {
    let source = Arc::new(MemSource::new(
        width,
        height,
        block_width,
        block_height,
        RasterKind::U8,
    ));
    let band = RasterBand::new(
        BandOptions::new(width, height, block_width, block_height, RasterKind::U8),
        Box::new(Arc::clone(&source)),
    )
    .unwrap();
    (source, band)
}

fn read_packed(band: &RasterBand, window: Window, width: usize, height: usize) -> Vec<u8> {
    let shape = BufferShape::packed(width, height, RasterKind::U8);
    let mut out = vec![0u8; shape.min_bytes()];
    band.read_window(window, &mut out, &shape).unwrap();
    out
}

#[test]
fn write_then_read_crossing_all_blocks() {
    // The reference scenario: 4x4 band in 2x2 blocks. A full-window write
    // of 9s, then a 2x2 read at (1, 1) touching all four blocks.
    let (_, band) = u8_band(4, 4, 2, 2);
    let shape = BufferShape::packed(4, 4, RasterKind::U8);
    band.write_window(Window::new(0, 0, 4, 4), &[9u8; 16], &shape)
        .unwrap();

    let out = read_packed(&band, Window::new(1, 1, 2, 2), 2, 2);
    assert_eq!(out, vec![9, 9, 9, 9]);

    // Same window averaged down to a single pixel.
    let shape = BufferShape::packed(1, 1, RasterKind::U8);
    let mut out = vec![0u8; 1];
    let options = IoOptions {
        resampling: Resampling::Average,
        ..Default::default()
    };
    band.read_window_with(
        Window::new(1, 1, 2, 2),
        &mut out,
        &shape,
        &options,
        &mut Progress::none(),
    )
    .unwrap();
    assert_eq!(out[0], 9);
}

#[test]
fn round_trip_is_block_alignment_independent() {
    for (bw, bh) in [(16, 16), (5, 3), (16, 1), (7, 16)] {
        let (_, band) = u8_band(16, 16, bw, bh);
        let window = Window::new(3, 5, 9, 7);
        let payload: Vec<u8> = (0..window.area()).map(|i| (i * 7 % 251) as u8).collect();
        let shape = BufferShape::packed(window.width, window.height, RasterKind::U8);
        band.write_window(window, &payload, &shape).unwrap();
        let out = read_packed(&band, window, window.width, window.height);
        assert_eq!(out, payload, "block size {bw}x{bh}");
    }
}

#[test]
fn partial_write_preserves_surrounding_pixels() {
    let (source, band) = u8_band(8, 8, 4, 4);
    source.load(&[100u8; 64]);

    let window = Window::new(3, 3, 2, 2);
    let shape = BufferShape::packed(2, 2, RasterKind::U8);
    band.write_window(window, &[1, 2, 3, 4], &shape).unwrap();

    let out = read_packed(&band, Window::new(0, 0, 8, 8), 8, 8);
    assert_eq!(out[3 * 8 + 3], 1);
    assert_eq!(out[4 * 8 + 4], 4);
    assert_eq!(out[2 * 8 + 3], 100);
    assert_eq!(out[3 * 8 + 2], 100);
    assert_eq!(out[5 * 8 + 5], 100);
}

#[test]
fn buffer_kind_converts_and_saturates_on_write() {
    let (_, band) = u8_band(4, 1, 4, 1);
    let mut payload = Vec::new();
    for v in [300i16, -5, 128, 255] {
        payload.extend_from_slice(&v.to_ne_bytes());
    }
    let shape = BufferShape::packed(4, 1, RasterKind::I16);
    band.write_window(Window::new(0, 0, 4, 1), &payload, &shape)
        .unwrap();
    let out = read_packed(&band, Window::new(0, 0, 4, 1), 4, 1);
    assert_eq!(out, vec![255, 0, 128, 255]);
}

#[test]
fn interleaved_buffer_strides_respected() {
    let (source, band) = u8_band(4, 2, 4, 2);
    source.load(&[1, 2, 3, 4, 5, 6, 7, 8]);

    // Read into every second byte of the output.
    let shape = BufferShape::with_strides(4, 2, RasterKind::U8, 2, 8);
    let mut out = vec![0xFFu8; shape.min_bytes()];
    band.read_window(Window::new(0, 0, 4, 2), &mut out, &shape)
        .unwrap();
    assert_eq!(out[0], 1);
    assert_eq!(out[2], 2);
    assert_eq!(out[1], 0xFF);
    assert_eq!(out[8], 5);
}

#[test]
fn one_live_block_per_coordinate() {
    let (_, band) = u8_band(8, 8, 2, 2);
    let _ = read_packed(&band, Window::new(0, 0, 8, 8), 8, 8);
    let _ = read_packed(&band, Window::new(2, 2, 4, 4), 4, 4);
    assert_eq!(band.cache().len(), 16);

    let first = band.locked_block(1, 1, false).unwrap();
    let second = band.locked_block(1, 1, false).unwrap();
    assert!(Arc::ptr_eq(first.block(), second.block()));
}

#[test]
fn locked_blocks_survive_cache_flush() {
    let (_, band) = u8_band(8, 8, 2, 2);
    let _ = read_packed(&band, Window::new(0, 0, 8, 8), 8, 8);
    let pinned = band.locked_block(2, 3, false).unwrap();

    band.flush_cache(true).unwrap();
    assert_eq!(band.cache().len(), 1);
    assert!(Arc::ptr_eq(
        pinned.block(),
        band.locked_block(2, 3, false).unwrap().block()
    ));
    drop(pinned);
    band.flush_cache(true).unwrap();
    assert_eq!(band.cache().len(), 0);
}

#[test]
fn any_algorithm_is_nearest_at_one_to_one() {
    let (source, band) = u8_band(8, 8, 4, 4);
    let pixels: Vec<u8> = (0..64).map(|i| (i * 3 % 256) as u8).collect();
    source.load(&pixels);

    let window = Window::new(1, 2, 5, 5);
    let reference = read_packed(&band, window, 5, 5);
    for alg in [
        Resampling::Bilinear,
        Resampling::Cubic,
        Resampling::CubicSpline,
        Resampling::Lanczos,
        Resampling::Average,
        Resampling::Mode,
        Resampling::Gaussian,
    ] {
        let shape = BufferShape::packed(5, 5, RasterKind::U8);
        let mut out = vec![0u8; shape.min_bytes()];
        let options = IoOptions {
            resampling: alg,
            ..Default::default()
        };
        band.read_window_with(window, &mut out, &shape, &options, &mut Progress::none())
            .unwrap();
        assert_eq!(out, reference, "{alg}");
    }
}

#[test]
fn cancellation_stops_after_first_row_group() {
    let (_, band) = u8_band(4, 4, 4, 1);
    let shape = BufferShape::packed(4, 4, RasterKind::U8);
    let mut out = vec![0u8; shape.min_bytes()];

    let mut cb = |_: f64| false;
    let mut progress = Progress::new(&mut cb);
    let err = band
        .read_window_with(
            Window::new(0, 0, 4, 4),
            &mut out,
            &shape,
            &IoOptions::default(),
            &mut progress,
        )
        .unwrap_err();
    assert!(err.is_cancelled());
    // The veto fired after the first block row; nothing further was read.
    assert_eq!(band.cache().len(), 1);
}

#[test]
fn decode_failure_leaves_no_partial_block() {
    let (source, band) = u8_band(8, 8, 4, 4);
    source.fail_reads_at(1, 1);

    let shape = BufferShape::packed(8, 8, RasterKind::U8);
    let mut out = vec![0u8; shape.min_bytes()];
    let err = band
        .read_window(Window::new(0, 0, 8, 8), &mut out, &shape)
        .unwrap_err();
    assert!(err.is_driver_error());
    assert!(band.try_locked_block(1, 1).unwrap().is_none());

    source.clear_failures();
    assert!(band
        .read_window(Window::new(0, 0, 8, 8), &mut out, &shape)
        .is_ok());
}

#[test]
fn write_back_failure_is_sticky_until_acknowledged() {
    let (source, band) = u8_band(4, 4, 2, 2);
    let shape = BufferShape::packed(4, 4, RasterKind::U8);
    band.write_window(Window::new(0, 0, 4, 4), &[7u8; 16], &shape)
        .unwrap();

    source.fail_writes();
    assert!(band.flush_cache(true).is_err());

    // The failed write-back poisons subsequent writes, not reads.
    let err = band
        .write_window(Window::new(0, 0, 4, 4), &[8u8; 16], &shape)
        .unwrap_err();
    assert!(matches!(err, Error::WriteBack { .. }));
    let _ = read_packed(&band, Window::new(0, 0, 2, 2), 2, 2);

    source.clear_failures();
    assert!(band.take_flush_error().is_some());
    assert!(band
        .write_window(Window::new(0, 0, 4, 4), &[8u8; 16], &shape)
        .is_ok());
    assert!(band.take_flush_error().is_none());
}

#[test]
fn fill_reaches_every_pixel() {
    let (_, band) = u8_band(10, 6, 4, 4);
    band.fill(42.0, 0.0).unwrap();
    let out = read_packed(&band, Window::new(0, 0, 10, 6), 10, 6);
    assert!(out.iter().all(|&v| v == 42));
}

#[test]
fn fill_persists_through_write_back() {
    let (source, band) = u8_band(6, 6, 4, 4);
    band.fill(5.0, 0.0).unwrap();
    band.flush_cache(true).unwrap();
    // Only the valid area of each edge block lands in storage.
    assert!(source.snapshot().iter().all(|&v| v == 5));
}

#[test]
fn checksum_stable_across_block_sizes() {
    let pixels: Vec<u8> = (0..256).map(|i| (i * 13 % 251) as u8).collect();
    let mut sums = Vec::new();
    for (bw, bh) in [(16, 16), (4, 4), (16, 2), (3, 5)] {
        let (source, band) = u8_band(16, 16, bw, bh);
        source.load(&pixels);
        sums.push(band.checksum(Window::new(0, 0, 16, 16)).unwrap());
    }
    assert!(sums.windows(2).all(|w| w[0] == w[1]), "{sums:?}");
    assert_ne!(sums[0], 0);
}

#[test]
fn overview_serves_downsampled_read() {
    let (_, mut band) = u8_band(8, 8, 4, 4);
    band.fill(1.0, 0.0).unwrap();

    let (_, overview) = u8_band(4, 4, 4, 4);
    overview.fill(7.0, 0.0).unwrap();
    band.push_overview(OverviewKind::Pixel, Arc::new(overview));

    // Factor-2 downsample: served from the overview.
    let out = read_packed(&band, Window::new(0, 0, 8, 8), 4, 4);
    assert!(out.iter().all(|&v| v == 7), "{out:?}");

    // 1:1 still reads the base band.
    let out = read_packed(&band, Window::new(0, 0, 8, 8), 8, 8);
    assert!(out.iter().all(|&v| v == 1));
}

#[test]
fn statistical_overview_never_substituted() {
    let (_, mut band) = u8_band(8, 8, 4, 4);
    band.fill(1.0, 0.0).unwrap();

    let (_, overview) = u8_band(4, 4, 4, 4);
    overview.fill(7.0, 0.0).unwrap();
    band.push_overview(OverviewKind::Statistical, Arc::new(overview));

    let out = read_packed(&band, Window::new(0, 0, 8, 8), 4, 4);
    assert!(out.iter().all(|&v| v == 1), "{out:?}");
}

#[test]
fn float_window_makes_tiled_reads_match_unsplit() {
    let (source, band) = u8_band(16, 8, 4, 4);
    let pixels: Vec<u8> = (0..128).map(|i| (i * 11 % 256) as u8).collect();
    source.load(&pixels);

    // One downsampled read at an awkward ratio.
    let window = Window::new(1, 0, 13, 7);
    let out_w = 5;
    let out_h = 3;
    let full = {
        let shape = BufferShape::packed(out_w, out_h, RasterKind::U8);
        let mut out = vec![0u8; shape.min_bytes()];
        band.read_window(window, &mut out, &shape).unwrap();
        out
    };

    // The same read split into column tiles, each carrying its exact
    // fractional source window.
    let scale_x = window.width as f64 / out_w as f64;
    let mut tiled = vec![0u8; out_w * out_h];
    for (x0, x1) in [(0usize, 2usize), (2, 5)] {
        let fx = window.x as f64 + x0 as f64 * scale_x;
        let fw = (x1 - x0) as f64 * scale_x;
        let ix = (fx.floor() as usize).max(window.x);
        let iright = ((fx + fw).ceil() as usize).min(window.right());
        let sub_window = Window::new(ix, window.y, iright - ix, window.height);
        let options = IoOptions {
            window_override: Some(FloatWindow::new(
                fx,
                window.y as f64,
                fw,
                window.height as f64,
            )),
            ..Default::default()
        };
        let shape = BufferShape::packed(x1 - x0, out_h, RasterKind::U8);
        let mut out = vec![0u8; shape.min_bytes()];
        band.read_window_with(sub_window, &mut out, &shape, &options, &mut Progress::none())
            .unwrap();
        for row in 0..out_h {
            for col in 0..(x1 - x0) {
                tiled[row * out_w + x0 + col] = out[row * (x1 - x0) + col];
            }
        }
    }
    assert_eq!(tiled, full);
}

#[test]
fn upsampling_replicates_nearest_source_pixels() {
    let (source, band) = u8_band(2, 2, 2, 2);
    source.load(&[10, 20, 30, 40]);

    let out = read_packed(&band, Window::new(0, 0, 2, 2), 4, 4);
    assert_eq!(out[0], 10);
    assert_eq!(out[3], 20);
    assert_eq!(out[12], 30);
    assert_eq!(out[15], 40);
}

#[test]
fn scaled_write_covers_every_window_pixel() {
    let (_, band) = u8_band(8, 8, 4, 4);
    band.fill(0.0, 0.0).unwrap();

    // A 2x2 buffer written into an 8x8 window: each buffer pixel floods a
    // 4x4 quadrant.
    let shape = BufferShape::packed(2, 2, RasterKind::U8);
    band.write_window(Window::new(0, 0, 8, 8), &[1, 2, 3, 4], &shape)
        .unwrap();
    let out = read_packed(&band, Window::new(0, 0, 8, 8), 8, 8);
    assert_eq!(out[0], 1);
    assert_eq!(out[7], 2);
    assert_eq!(out[56], 3);
    assert_eq!(out[63], 4);
    assert_eq!(out[3 * 8 + 3], 1);
    assert_eq!(out[4 * 8 + 4], 4);
}

#[test]
fn average_downsample_of_gradient() {
    let (source, band) = u8_band(4, 4, 2, 2);
    #[rustfmt::skip]
    source.load(&[
        0, 0, 8, 8,
        0, 0, 8, 8,
        4, 4, 12, 12,
        4, 4, 12, 12,
    ]);

    let shape = BufferShape::packed(2, 2, RasterKind::U8);
    let mut out = vec![0u8; shape.min_bytes()];
    let options = IoOptions {
        resampling: Resampling::Average,
        ..Default::default()
    };
    band.read_window_with(
        Window::new(0, 0, 4, 4),
        &mut out,
        &shape,
        &options,
        &mut Progress::none(),
    )
    .unwrap();
    assert_eq!(out, vec![0, 8, 4, 12]);
}

#[test]
fn nodata_excluded_from_kernel_resampling() {
    let source = Arc::new(MemSource::new(4, 4, 4, 4, RasterKind::U8));
    let band = RasterBand::new(
        BandOptions::new(4, 4, 4, 4, RasterKind::U8).with_nodata(0.0),
        Box::new(Arc::clone(&source)),
    )
    .unwrap();
    // Half the pixels carry no-data; the rest are a constant 80.
    let mut pixels = [80u8; 16];
    for i in (0..16).step_by(2) {
        pixels[i] = 0;
    }
    source.load(&pixels);

    let shape = BufferShape::packed(2, 2, RasterKind::U8);
    let mut out = vec![0u8; shape.min_bytes()];
    let options = IoOptions {
        resampling: Resampling::Bilinear,
        ..Default::default()
    };
    band.read_window_with(
        Window::new(0, 0, 4, 4),
        &mut out,
        &shape,
        &options,
        &mut Progress::none(),
    )
    .unwrap();
    // Valid neighbours all hold 80, so the filtered output does too.
    assert_eq!(out, vec![80, 80, 80, 80]);
}

#[test]
fn progress_reports_reach_completion() {
    let (_, band) = u8_band(8, 8, 2, 2);
    let mut fractions = Vec::new();
    let mut cb = |f: f64| {
        fractions.push(f);
        true
    };
    let mut progress = Progress::new(&mut cb);
    let shape = BufferShape::packed(8, 8, RasterKind::U8);
    let mut out = vec![0u8; shape.min_bytes()];
    band.read_window_with(
        Window::new(0, 0, 8, 8),
        &mut out,
        &shape,
        &IoOptions::default(),
        &mut progress,
    )
    .unwrap();
    drop(progress);
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(fractions.last().copied(), Some(1.0));
}

#[test]
fn concurrent_reads_share_the_cache() {
    let (source, band) = u8_band(16, 16, 4, 4);
    let pixels: Vec<u8> = (0..256).map(|i| (i % 256) as u8).collect();
    source.load(&pixels);
    let expected = read_packed(&band, Window::new(0, 0, 16, 16), 16, 16);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let out = read_packed(&band, Window::new(0, 0, 16, 16), 16, 16);
                assert_eq!(out, expected);
            });
        }
    });
    assert_eq!(band.cache().len(), 16);
}

#[test]
fn sparse_and_dense_strategies_agree() {
    let window = Window::new(2, 3, 11, 9);
    let payload: Vec<u8> = (0..window.area()).map(|i| (i % 200) as u8).collect();
    let mut results = Vec::new();
    for strategy in [CacheStrategy::Dense, CacheStrategy::Sparse] {
        let source = Arc::new(MemSource::new(16, 16, 5, 4, RasterKind::U8));
        let band = RasterBand::new(
            BandOptions::new(16, 16, 5, 4, RasterKind::U8).with_strategy(strategy),
            Box::new(source),
        )
        .unwrap();
        let shape = BufferShape::packed(window.width, window.height, RasterKind::U8);
        band.write_window(window, &payload, &shape).unwrap();
        results.push(read_packed(&band, window, window.width, window.height));
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0], payload);
}

#[test]
fn out_of_window_override_is_rejected() {
    let (_, band) = u8_band(4, 4, 2, 2);
    let shape = BufferShape::packed(2, 2, RasterKind::U8);
    let mut out = vec![0u8; shape.min_bytes()];

    for (resampling, fwin) in [
        (Resampling::Average, FloatWindow::new(100.0, 0.0, 2.0, 2.0)),
        (Resampling::Nearest, FloatWindow::new(0.0, 0.0, 8.0, 8.0)),
        (Resampling::Bilinear, FloatWindow::new(1.0, 1.0, 0.0, 2.0)),
    ] {
        let options = IoOptions {
            resampling,
            window_override: Some(fwin),
            ..Default::default()
        };
        let err = band
            .read_window_with(
                Window::new(0, 0, 4, 4),
                &mut out,
                &shape,
                &options,
                &mut Progress::none(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{resampling}");
    }
}

#[test]
fn invalid_requests_are_rejected_up_front() {
    let (_, band) = u8_band(8, 8, 4, 4);
    let shape = BufferShape::packed(4, 4, RasterKind::U8);
    let mut out = vec![0u8; shape.min_bytes()];

    let err = band
        .read_window(Window::new(6, 6, 4, 4), &mut out, &shape)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidWindow { .. }));

    let mut small = vec![0u8; 3];
    let err = rasterio(
        &band,
        Window::new(0, 0, 4, 4),
        IoBuffer::Read(&mut small),
        &shape,
        &IoOptions::default(),
        &mut Progress::none(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::BufferTooSmall { .. }));
}
