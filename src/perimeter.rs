// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! ImageJ compatible traced perimeter.
//!
//! The perimeter is measured on the polygon that runs along the pixel edges of
//! the object's outer boundary. Axis aligned step lengths are summed and
//! `2 - sqrt(2)` is subtracted for each corner that is not directly adjacent
//! to a previously counted one, which approximates cutting the corners
//! diagonally.

use std::f64::consts::{PI, SQRT_2};

use image::GrayImage;

/// Length saved by cutting one pixel corner diagonally.
pub const CORNER_CUT: f64 = 2.0 - SQRT_2;

/// Traces the outer boundary of the 8-connected component containing the
/// first foreground pixel in raster order. Returns the polygon vertices in
/// mask coordinates, where vertex (x, y) is the top-left corner of pixel
/// (x, y). Only vertices at which the boundary changes direction are
/// reported. An empty mask yields no vertices.
pub fn trace_outline(mask: &GrayImage) -> Vec<(i32, i32)> {
    let (width, height) = mask.dimensions();
    let start = mask.enumerate_pixels().find(|(_, _, p)| p[0] > 0)
        .map(|(x, y, _)| (x as i32, y as i32));
    let (x0, y0) = match start {
        Some(s) => s,
        None => return Vec::new(),
    };
    let foreground = |x: i32, y: i32| -> bool {
        x >= 0 && y >= 0 && x < width as i32 && y < height as i32 &&
            mask.get_pixel(x as u32, y as u32)[0] > 0
    };

    // The boundary is walked with the object on the right hand side (y axis
    // points down). We arrive at the start vertex moving up along the left
    // edge of the start pixel.
    let mut vertices = Vec::new();
    let (mut vx, mut vy) = (x0, y0);
    let (mut dx, mut dy) = (0, -1);
    loop {
        let ahead_left = foreground(vx + (dx + dy - 1) / 2,
                                    vy + (dy - dx - 1) / 2);
        let ahead_right = foreground(vx + (dx - dy - 1) / 2,
                                     vy + (dy + dx - 1) / 2);
        let (ndx, ndy) = if ahead_left {
            (dy, -dx)
        } else if ahead_right {
            (dx, dy)
        } else {
            (-dy, dx)
        };
        if (ndx, ndy) != (dx, dy) {
            vertices.push((vx, vy));
        }
        vx += ndx;
        vy += ndy;
        dx = ndx;
        dy = ndy;
        if (vx, vy) == (x0, y0) && (dx, dy) == (0, -1) {
            break;
        }
    }
    vertices
}

/// ImageJ's corner-counting perimeter of an axis aligned polygon.
pub fn polygon_perimeter(vertices: &[(i32, i32)]) -> f64 {
    let n = vertices.len();
    if n == 0 {
        return 0.0;
    }
    let mut sum_dx = 0;
    let mut sum_dy = 0;
    let mut n_corners = 0;
    let mut dx1 = vertices[0].0 - vertices[n - 1].0;
    let mut dy1 = vertices[0].1 - vertices[n - 1].1;
    let mut side1 = dx1.abs() + dy1.abs();
    let mut corner = false;
    for i in 0..n {
        let next = (i + 1) % n;
        let dx2 = vertices[next].0 - vertices[i].0;
        let dy2 = vertices[next].1 - vertices[i].1;
        sum_dx += dx1.abs();
        sum_dy += dy1.abs();
        let side2 = dx2.abs() + dy2.abs();
        if side1 > 1 || !corner {
            corner = true;
            n_corners += 1;
        } else {
            corner = false;
        }
        dx1 = dx2;
        dy1 = dy2;
        side1 = side2;
    }
    (sum_dx + sum_dy) as f64 - n_corners as f64 * CORNER_CUT
}

/// Perimeter of a mask whose outer contour (pixel centres) has
/// `contour_points` points. Tiny objects use fixed values.
pub fn traced_perimeter(mask: &GrayImage, contour_points: usize) -> f64 {
    match contour_points {
        0 => 0.0,
        1 => 4.0 - 2.0 * CORNER_CUT,
        2 => 6.0 - 3.0 * CORNER_CUT,
        3 => 8.0 - 3.0 * CORNER_CUT,
        4 => 8.0 - 4.0 * CORNER_CUT,
        _ => polygon_perimeter(&trace_outline(mask)),
    }
}

/// `4 pi area / perimeter^2`, capped at 1. Zero perimeter gives 0.
pub fn circularity(area: u64, perimeter: f64) -> f64 {
    if perimeter <= 0.0 {
        return 0.0;
    }
    (4.0 * PI * area as f64 / (perimeter * perimeter)).min(1.0)
}

// mod tests.
