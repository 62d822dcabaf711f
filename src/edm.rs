// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Euclidean distance map of a binary image, and watershed segmentation of
//! binary particles built on it.
//!
//! The distance map uses the two-pass algorithm of ImageJ's EDM plugin,
//! similar to the 8SSEDT of Leymarie and Levine. Each foreground pixel keeps
//! the nearest background point found so far, propagated from the previous
//! line (same column), the previous pixel, and the diagonal. The result is
//! exact for distances below 13; beyond that a small fraction of pixels may
//! be low by up to 0.09. Images up to 46340 pixels on the diagonal are
//! supported.

use std::time::Instant;

use image::{GrayImage, Luma};
use log::debug;

use crate::maximum_finder::{find_maxima, MaximaOutput};
use crate::plane::GrayF32Image;

const NO_POINT: i32 = -1;

/// Prominence used when splitting particles at their necks.
pub const WATERSHED_TOLERANCE: f64 = 0.5;

fn encode(x: usize, y: usize) -> i32 {
    (x | y << 16) as i32
}

fn decode(p: i32) -> (i64, i64) {
    ((p & 0xffff) as i64, ((p >> 16) & 0xffff) as i64)
}

/// Minimum squared distance of (x, y) to the candidates `points[x]` (same
/// column, previous line), `p_prev` (previous pixel) and `p_diag`. Stores
/// the winning candidate in `points[x]`.
fn min_dist2(points: &mut [i32], p_prev: i32, p_diag: i32, x: usize, y: usize,
             mut dist_sqr: i64) -> f32 {
    let (x, y) = (x as i64, y as i64);
    let p0 = points[x as usize];
    let mut nearest = p0;
    if p0 != NO_POINT {
        let (x0, y0) = decode(p0);
        let d = (x - x0) * (x - x0) + (y - y0) * (y - y0);
        if d < dist_sqr {
            dist_sqr = d;
        }
    }
    if p_diag != p0 && p_diag != NO_POINT {
        let (x1, y1) = decode(p_diag);
        let d = (x - x1) * (x - x1) + (y - y1) * (y - y1);
        if d < dist_sqr {
            nearest = p_diag;
            dist_sqr = d;
        }
    }
    if p_prev != p_diag && p_prev != NO_POINT {
        let (x1, y1) = decode(p_prev);
        let d = (x - x1) * (x - x1) + (y - y1) * (y - y1);
        if d < dist_sqr {
            nearest = p_prev;
            dist_sqr = d;
        }
    }
    points[x as usize] = nearest;
    dist_sqr as f32
}

/// One line, left to right then right to left. `y_dist` is the distance to
/// the nearest image edge along y, or None if edges are not background.
#[allow(clippy::too_many_arguments)]
fn edm_line(pixels: &[u8], dist: &mut [f32], buffers: &mut [Vec<i32>; 2],
            width: usize, y: usize, background: u8, y_dist: Option<i64>) {
    let row = y * width;
    let mut dist_sqr = i32::MAX as i64;

    let points = &mut buffers[0];
    let mut p_prev = NO_POINT;
    let mut p_diag = NO_POINT;
    for x in 0..width {
        let p_next_diag = points[x];
        if pixels[row + x] == background {
            points[x] = encode(x, y);
        } else {
            if let Some(y_dist) = y_dist {
                let xd = x as i64 + 1;
                dist_sqr = if xd < y_dist { xd * xd } else { y_dist * y_dist };
            }
            let d2 = min_dist2(points, p_prev, p_diag, x, y, dist_sqr);
            if dist[row + x] > d2 {
                dist[row + x] = d2;
            }
        }
        p_prev = points[x];
        p_diag = p_next_diag;
    }

    let points = &mut buffers[1];
    p_prev = NO_POINT;
    p_diag = NO_POINT;
    for x in (0..width).rev() {
        let p_next_diag = points[x];
        if pixels[row + x] == background {
            points[x] = encode(x, y);
        } else {
            if let Some(y_dist) = y_dist {
                let xd = (width - x) as i64;
                dist_sqr = if xd < y_dist { xd * xd } else { y_dist * y_dist };
            }
            let d2 = min_dist2(points, p_prev, p_diag, x, y, dist_sqr);
            if dist[row + x] > d2 {
                dist[row + x] = d2;
            }
        }
        p_prev = points[x];
        p_diag = p_next_diag;
    }
}

/// Distance of every pixel to the nearest pixel with value `background`.
/// Background pixels are 0. With `edges_are_background`, the area outside
/// the image counts as background too.
pub fn make_float_edm(image: &GrayImage, background: u8,
                      edges_are_background: bool) -> GrayF32Image {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let pixels = image.as_raw();
    let mut dist: Vec<f32> = pixels.iter()
        .map(|&p| if p != background { f32::MAX } else { 0.0 })
        .collect();
    let mut buffers = [vec![NO_POINT; width], vec![NO_POINT; width]];

    for y in 0..height {
        let y_dist = edges_are_background.then_some(y as i64 + 1);
        edm_line(pixels, &mut dist, &mut buffers, width, y, background, y_dist);
    }
    buffers[0].fill(NO_POINT);
    buffers[1].fill(NO_POINT);
    for y in (0..height).rev() {
        let y_dist = edges_are_background.then_some((height - y) as i64);
        edm_line(pixels, &mut dist, &mut buffers, width, y, background, y_dist);
    }
    for d in dist.iter_mut() {
        *d = d.sqrt();
    }
    GrayF32Image::from_raw(width as u32, height as u32, dist)
        .expect("buffer size matches image")
}

/// Splits touching particles of a binary mask (foreground 255) along the
/// necks between them. The returned mask is the input with one pixel wide
/// separation lines cleared.
pub fn watershed(mask: &GrayImage) -> GrayImage {
    let start = Instant::now();
    let edm = make_float_edm(mask, 0, false);
    let segmented = find_maxima(&edm, WATERSHED_TOLERANCE, false, None,
                                MaximaOutput::Segmented, false, true);
    let result = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([mask.get_pixel(x, y)[0] & segmented.get_pixel(x, y)[0]])
    });
    debug!("Watershed of {}x{} mask in {:?}", mask.width(), mask.height(),
           start.elapsed());
    result
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_single_background_row() {
        let mut image = GrayImage::from_pixel(16, 16, Luma([255]));
        for x in 0..16 {
            image.put_pixel(x, 8, Luma([0]));
        }
        let edm = make_float_edm(&image, 0, false);
        for x in 0..16 {
            assert_abs_diff_eq!(edm.get_pixel(x, 0)[0], 8.0);
            assert_abs_diff_eq!(edm.get_pixel(x, 7)[0], 1.0);
            assert_abs_diff_eq!(edm.get_pixel(x, 8)[0], 0.0);
            assert_abs_diff_eq!(edm.get_pixel(x, 15)[0], 7.0);
        }
    }

    #[test]
    fn test_single_background_pixel() {
        let mut image = GrayImage::from_pixel(9, 9, Luma([255]));
        image.put_pixel(4, 4, Luma([0]));
        let edm = make_float_edm(&image, 0, false);
        for (x, y, p) in edm.enumerate_pixels() {
            let dx = x as f32 - 4.0;
            let dy = y as f32 - 4.0;
            assert_abs_diff_eq!(p[0], (dx * dx + dy * dy).sqrt(),
                                epsilon = 0.09);
        }
        assert_eq!(edm.get_pixel(4, 4)[0], 0.0);
    }

    #[test]
    fn test_edges_are_background() {
        let image = GrayImage::from_pixel(5, 5, Luma([255]));
        let edm = make_float_edm(&image, 0, true);
        assert_abs_diff_eq!(edm.get_pixel(0, 0)[0], 1.0);
        assert_abs_diff_eq!(edm.get_pixel(2, 2)[0], 3.0);
        assert_abs_diff_eq!(edm.get_pixel(1, 2)[0], 2.0);
    }

    fn two_discs() -> GrayImage {
        GrayImage::from_fn(100, 100, |x, y| {
            let inside = |cx: f64, cy: f64| {
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                dx * dx + dy * dy <= 15.0 * 15.0
            };
            let fg = inside(40.0, 50.0) || inside(60.0, 50.0);
            Luma([if fg { 255 } else { 0 }])
        })
    }

    #[test]
    fn test_watershed_splits_discs() {
        let mask = two_discs();
        let split = watershed(&mask);
        // The neck between the discs is cut; the discs' far sides remain.
        assert_eq!(split.get_pixel(50, 50)[0], 0);
        assert_eq!(split.get_pixel(30, 50)[0], 255);
        assert_eq!(split.get_pixel(70, 50)[0], 255);
        // Nothing is added.
        for (x, y, p) in split.enumerate_pixels() {
            if p[0] != 0 {
                assert_eq!(mask.get_pixel(x, y)[0], 255);
            }
        }
        let removed = mask.pixels().filter(|p| p[0] != 0).count() -
            split.pixels().filter(|p| p[0] != 0).count();
        assert!(removed > 10 && removed < 60, "removed {}", removed);
    }

    #[test]
    fn test_watershed_keeps_single_disc() {
        let mask = GrayImage::from_fn(40, 40, |x, y| {
            let dx = x as f64 - 20.0;
            let dy = y as f64 - 20.0;
            Luma([if dx * dx + dy * dy <= 100.0 { 255 } else { 0 }])
        });
        assert_eq!(watershed(&mask), mask);
    }
}  // mod tests.
