// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Background subtraction by the "rolling ball" algorithm of Stanley
//! Sternberg (Computer 16, 22, 1983), as implemented in ImageJ's
//! BackgroundSubtracter by Michael Schmid, plus its "sliding paraboloid"
//! variant.
//!
//! Imagine the image as a surface whose height is the pixel value. A ball of
//! the given radius is rolled along the underside of the surface; the hull of
//! the volume reached by the ball is the background. For large radii the
//! image is first shrunk (block minimum) and the ball trimmed to a patch, and
//! the background is re-enlarged by bilinear interpolation afterwards.
//!
//! The sliding paraboloid replaces the ball with a paraboloid of the same
//! curvature at its apex, slid along lines in the x, y and both diagonal
//! directions. It needs no shrinking and handles steep backgrounds better.

use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::plane::Gray16Image;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BallType {
    #[default]
    Ball,
    Paraboloid,
}

// Float image as a flat row-major buffer.
struct FloatPlane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl FloatPlane {
    fn from_gray16(image: &Gray16Image) -> Self {
        FloatPlane{width: image.width() as usize,
                   height: image.height() as usize,
                   data: image.iter().map(|&v| v as f32).collect()}
    }

    fn negate(&mut self) {
        for v in self.data.iter_mut() {
            *v = -*v;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Filter3 {
    Maximum,
    Mean,
}

/// Applies a 3x3 maximum or mean, as a 3 pixel filter along x then y.
/// Returns the average amount by which the maximum raised the pixels.
fn filter_3x3(fp: &mut FloatPlane, filter: Filter3) -> f64 {
    let (width, height) = (fp.width, fp.height);
    let mut shift_by = 0.0;
    for y in 0..height {
        shift_by += filter_3(&mut fp.data, width, y * width, 1, filter);
    }
    for x in 0..width {
        shift_by += filter_3(&mut fp.data, height, x, width, filter);
    }
    shift_by / width as f64 / height as f64
}

fn filter_3(pixels: &mut [f32], length: usize, pixel0: usize, inc: usize,
            filter: Filter3) -> f64 {
    let mut shift_by = 0.0;
    let mut v3 = pixels[pixel0] as f64;  // pixel[i + 1]
    let mut v2 = v3;  // pixel[i]
    let mut v1;  // pixel[i - 1]
    let mut p = pixel0;
    for i in 0..length {
        v1 = v2;
        v2 = v3;
        if i < length - 1 {
            v3 = pixels[p + inc] as f64;
        }
        match filter {
            Filter3::Maximum => {
                let max = v1.max(v3).max(v2);
                shift_by += max - v2;
                pixels[p] = max as f32;
            },
            Filter3::Mean => {
                pixels[p] = ((v1 + v2 + v3) * 0.33333333) as f32;
            },
        }
        p += inc;
    }
    shift_by
}

/// The ball, or the trimmed patch of it used on the shrunk image.
struct Ball {
    z: Vec<f32>,
    width: usize,
    shrink_factor: usize,
}

impl Ball {
    fn new(radius: f64) -> Self {
        // Shrink factor and the percentage trimmed off each side of the ball.
        let (shrink_factor, arc_trim_per) = if radius <= 10.0 {
            (1, 24)
        } else if radius <= 30.0 {
            (2, 24)
        } else if radius <= 100.0 {
            (4, 32)
        } else {
            (8, 40)
        };
        let small_radius = (radius / shrink_factor as f64).max(1.0);
        let r_square = small_radius * small_radius;
        let x_trim = (arc_trim_per as f64 * small_radius / 100.0) as i64;
        let half_width = (small_radius - x_trim as f64).round() as i64;
        let width = (2 * half_width + 1) as usize;
        let mut z = Vec::with_capacity(width * width);
        for y in 0..width as i64 {
            for x in 0..width as i64 {
                let xv = x - half_width;
                let yv = y - half_width;
                let temp = r_square - (xv * xv) as f64 - (yv * yv) as f64;
                z.push(if temp > 0.0 { temp.sqrt() as f32 } else { 0.0 });
            }
        }
        Ball{z, width, shrink_factor}
    }
}

/// Each pixel of the shrunk image is the minimum of its block.
fn shrink_image(fp: &FloatPlane, shrink_factor: usize) -> FloatPlane {
    let (width, height) = (fp.width, fp.height);
    let s_width = width.div_ceil(shrink_factor);
    let s_height = height.div_ceil(shrink_factor);
    let mut data = Vec::with_capacity(s_width * s_height);
    for y_small in 0..s_height {
        for x_small in 0..s_width {
            let mut min = f32::MAX;
            let y_end = (shrink_factor * (y_small + 1)).min(height);
            let x_end = (shrink_factor * (x_small + 1)).min(width);
            for y in shrink_factor * y_small..y_end {
                for x in shrink_factor * x_small..x_end {
                    min = min.min(fp.data[x + y * width]);
                }
            }
            data.push(min);
        }
    }
    FloatPlane{width: s_width, height: s_height, data}
}

/// Index of the left/upper small pixel used to interpolate each full pixel,
/// and its weight.
fn make_interpolation_arrays(length: usize, small_length: usize,
                             shrink_factor: usize) -> Vec<(usize, f32)> {
    let sf = shrink_factor as f32;
    (0..length).map(|i| {
        let mut small_index = (i as f32 - sf / 2.0) / sf;
        if small_index >= small_length as f32 - 1.0 {
            small_index = small_length as f32 - 2.0;
        }
        let small_index = small_index.max(0.0) as usize;
        let distance = (i as f32 + 0.5) / sf - (small_index as f32 + 0.5);
        (small_index, 1.0 - distance)
    }).collect()
}

/// Bilinear enlargement of the shrunk background, extrapolating linearly at
/// the borders.
fn enlarge_image(small: &FloatPlane, fp: &mut FloatPlane,
                 shrink_factor: usize) {
    let (width, height) = (fp.width, fp.height);
    let x_interp = make_interpolation_arrays(width, small.width, shrink_factor);
    let y_interp = make_interpolation_arrays(height, small.height,
                                             shrink_factor);
    let x_max = small.width - 1;
    let y_max = small.height - 1;
    let interpolate_line = |small_y: usize, line: &mut [f32]| {
        let row = small_y.min(y_max) * small.width;
        for (x, &(xi, w)) in x_interp.iter().enumerate() {
            line[x] = small.data[row + xi] * w +
                small.data[row + (xi + 1).min(x_max)] * (1.0 - w);
        }
    };
    let mut line0 = vec![0_f32; width];
    let mut line1 = vec![0_f32; width];
    interpolate_line(0, &mut line1);
    let mut y_small_line0: i64 = -1;
    for (y, &(yi, weight)) in y_interp.iter().enumerate() {
        if y_small_line0 < yi as i64 {
            std::mem::swap(&mut line0, &mut line1);
            y_small_line0 += 1;
            interpolate_line(yi + 1, &mut line1);
        }
        let row = &mut fp.data[y * width..(y + 1) * width];
        for (x, v) in row.iter_mut().enumerate() {
            *v = line0[x] * weight + line1[x] * (1.0 - weight);
        }
    }
}

/// Replaces `fp` by the lowest hull the ball reaches from below.
fn roll_ball(ball: &Ball, fp: &mut FloatPlane) {
    let (width, height) = (fp.width as i64, fp.height as i64);
    let ball_width = ball.width as i64;
    let radius = ball_width / 2;
    // The input lines the ball currently touches.
    let mut cache = vec![0_f32; (width * ball_width) as usize];

    for y in -radius..height + radius {
        let next_line_to_read = y + radius;
        if next_line_to_read < height {
            let src = (next_line_to_read * width) as usize;
            let dst = ((next_line_to_read % ball_width) * width) as usize;
            cache[dst..dst + width as usize]
                .copy_from_slice(&fp.data[src..src + width as usize]);
            // Unprocessed pixels start at minus infinity.
            fp.data[src..src + width as usize].fill(-f32::MAX);
        }
        let y0 = (y - radius).max(0);
        let y_ball0 = y0 - y + radius;
        let y_end = (y + radius).min(height - 1);
        for x in -radius..width + radius {
            let x0 = (x - radius).max(0);
            let x_ball0 = x0 - x + radius;
            let x_end = (x + radius).min(width - 1);
            // Height of the ball at this position.
            let mut z = f32::MAX;
            for (yp, y_ball) in (y0..=y_end).zip(y_ball0..) {
                let cache_row = (yp % ball_width) * width;
                for (xp, x_ball) in (x0..=x_end).zip(x_ball0..) {
                    let reduced = cache[(cache_row + xp) as usize] -
                        ball.z[(x_ball + y_ball * ball_width) as usize];
                    if z > reduced {
                        z = reduced;
                    }
                }
            }
            for (yp, y_ball) in (y0..=y_end).zip(y_ball0..) {
                for (xp, x_ball) in (x0..=x_end).zip(x_ball0..) {
                    let z_min =
                        z + ball.z[(x_ball + y_ball * ball_width) as usize];
                    let p = (xp + yp * width) as usize;
                    if fp.data[p] < z_min {
                        fp.data[p] = z_min;
                    }
                }
            }
        }
    }
}

fn rolling_ball_background(fp: &mut FloatPlane, radius: f64, invert: bool,
                           presmooth: bool) {
    let ball = Ball::new(radius);
    let min_size = 2 * ball.shrink_factor;
    let shrink = ball.shrink_factor > 1 &&
        fp.width >= min_size && fp.height >= min_size;
    if invert {
        fp.negate();
    }
    if presmooth {
        filter_3x3(fp, Filter3::Mean);
    }
    if shrink {
        let mut small = shrink_image(fp, ball.shrink_factor);
        roll_ball(&ball, &mut small);
        enlarge_image(&small, fp, ball.shrink_factor);
    } else {
        roll_ball(&ball, fp);
    }
    if invert {
        fp.negate();
    }
}

// Line directions for the sliding paraboloid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    X,
    Y,
    // Parallel to x = y, starting on the x axis.
    Diagonal1A,
    // Parallel to x = y, starting on the y axis.
    Diagonal1B,
    // Parallel to x = -y, starting on the x axis.
    Diagonal2A,
    // Parallel to x = -y, starting at x = width - 1.
    Diagonal2B,
}

struct Paraboloid {
    // Work buffers for `line_slide_parabola()`.
    cache: Vec<f32>,
    next_point: Vec<usize>,
}

impl Paraboloid {
    fn new(fp: &FloatPlane) -> Self {
        let n = fp.width.max(fp.height);
        Paraboloid{cache: vec![0.0; n], next_point: vec![0; n]}
    }

    fn filter_1d(&mut self, fp: &mut FloatPlane, direction: Direction,
                 coeff2: f32) {
        let (width, height) = (fp.width as i64, fp.height as i64);
        let (start_line, n_lines, line_inc, point_inc) = match direction {
            Direction::X => (0, height, width, 1),
            Direction::Y => (0, width, 1, width),
            Direction::Diagonal1A => (0, width - 2, 1, width + 1),
            Direction::Diagonal1B => (1, height - 2, width, width + 1),
            Direction::Diagonal2A => (2, width, 1, width - 1),
            Direction::Diagonal2B => (0, height - 2, width, width - 1),
        };
        for i in start_line..n_lines {
            let mut start_pixel = i * line_inc;
            if direction == Direction::Diagonal2B {
                start_pixel += width - 1;
            }
            let length = match direction {
                Direction::X => width,
                Direction::Y => height,
                Direction::Diagonal1A => height.min(width - i),
                Direction::Diagonal1B => width.min(height - i),
                Direction::Diagonal2A => height.min(i + 1),
                Direction::Diagonal2B => width.min(height - i),
            };
            self.line_slide_parabola(fp, start_pixel, point_inc,
                                     length as usize, coeff2, false);
        }
    }

    /// Slides a parabola along one line from below, replacing the values
    /// between the points it touches. When `corrected_edges` is requested,
    /// also estimates the line's end values as if there were no particles at
    /// the edges, allowing for vignetting as a 6th-order polynomial.
    fn line_slide_parabola(&mut self, fp: &mut FloatPlane, start: i64,
                           inc: i64, length: usize, coeff2: f32,
                           corrected_edges: bool) -> Option<[f32; 2]> {
        if length == 0 {
            return None;
        }
        let pixel = |i: usize| (start + i as i64 * inc) as usize;
        let cache = &mut self.cache;
        let next_point = &mut self.next_point;
        let mut min_value = f32::MAX;
        let mut last_point = 0;
        // First and last points, other than the ends, that are touched.
        let mut first_corner = length - 1;
        let mut last_corner = 0;
        let mut v_previous1 = 0.0;
        let mut v_previous2 = 0.0;
        // Not 2: numeric scatter of the 2nd derivative.
        let curvature_test = 1.999 * coeff2;
        // Only points with suitable local curvature can be touched.
        for i in 0..length {
            let v = fp.data[pixel(i)];
            cache[i] = v;
            if v < min_value {
                min_value = v;
            }
            if i >= 2 && v_previous1 + v_previous1 - v_previous2 - v <
                curvature_test
            {
                next_point[last_point] = i - 1;
                last_point = i - 1;
            }
            v_previous2 = v_previous1;
            v_previous1 = v;
        }
        next_point[last_point] = length - 1;
        next_point[length - 1] = usize::MAX;

        let mut i1 = 0;
        while i1 < length - 1 {
            let v1 = cache[i1];
            let mut min_slope = f32::MAX;
            let mut i2 = 0;
            let mut search_to = length;
            // At 0, the search limit is recalculated.
            let mut recalculate_limit_now: i32 = 0;
            let mut j = next_point[i1];
            while j < search_to {
                let v2 = cache[j];
                let dj = (j - i1) as f32;
                let slope = (v2 - v1) / dj + coeff2 * dj;
                if slope < min_slope {
                    min_slope = slope;
                    i2 = j;
                    recalculate_limit_now = -3;
                }
                if recalculate_limit_now == 0 {
                    let b = (0.5 * min_slope / coeff2) as f64;
                    let rest = ((v1 - min_value) / coeff2) as f64;
                    let max_search =
                        i1 as i64 + (b + (b * b + rest).sqrt() + 1.0) as i64;
                    if max_search > 0 && (max_search as usize) < search_to {
                        search_to = max_search as usize;
                    }
                }
                j = next_point[j];
                recalculate_limit_now += 1;
            }
            if i1 == 0 {
                first_corner = i2;
            }
            if i2 == length - 1 {
                last_corner = i1;
            }
            for j in i1 + 1..i2 {
                let dj = (j - i1) as f32;
                fp.data[pixel(j)] = v1 + dj * (min_slope - dj * coeff2);
            }
            i1 = i2;
        }

        if !corrected_edges {
            return None;
        }
        // Edge particles must be smaller than a quarter of the line.
        if 4 * first_corner >= length {
            first_corner = 0;
        }
        if 4 * (length - 1 - last_corner) >= length {
            last_corner = length - 1;
        }
        if last_corner <= first_corner {
            return None;
        }
        let v1 = cache[first_corner];
        let v2 = cache[last_corner];
        let span = (last_corner - first_corner) as f32;
        let slope = (v2 - v1) / span;
        let value0 = v1 - slope * first_corner as f32;
        let mut coeff6 = 0.0;
        let mid = 0.5 * (last_corner + first_corner) as f32;
        for i in (length + 2) / 3..=(2 * length) / 3 {
            let dx = (i as f32 - mid) * 2.0 / span;
            let poly6 = dx.powi(6) - 1.0;
            if cache[i] < value0 + slope * i as f32 + coeff6 * poly6 {
                coeff6 = -(value0 + slope * i as f32 - cache[i]) / poly6;
            }
        }
        let dx = (first_corner as f32 - mid) * 2.0 / span;
        let edge0 = value0 + coeff6 * (dx.powi(6) - 1.0) +
            coeff2 * (first_corner * first_corner) as f32;
        let dx = (last_corner as f32 - mid) * 2.0 / span;
        let tail = (length - 1 - last_corner) as f32;
        let edge1 = value0 + (length - 1) as f32 * slope +
            coeff6 * (dx.powi(6) - 1.0) + coeff2 * tail * tail;
        Some([edge0, edge1])
    }

    /// Lowers corner pixels that are above the extrapolation of the edges
    /// and diagonals, so corner particles are not taken as background.
    fn correct_corners(&mut self, fp: &mut FloatPlane, coeff2: f32) {
        let (width, height) = (fp.width as i64, fp.height as i64);
        let w = fp.width;
        let h = fp.height;
        let diag_length = w.min(h);
        let coeff2_diag = 2.0 * coeff2;
        let lines = [
            (0, 1, w, coeff2),
            ((height - 1) * width, 1, w, coeff2),
            (0, width, h, coeff2),
            (width - 1, width, h, coeff2),
            (0, 1 + width, diag_length, coeff2_diag),
            (width - 1, width - 1, diag_length, coeff2_diag),
            ((height - 1) * width, 1 - width, diag_length, coeff2_diag),
            (width * height - 1, -1 - width, diag_length, coeff2_diag),
        ];
        let mut edges = [[0.0_f32; 2]; 8];
        for (edge, &(start, inc, length, c2)) in edges.iter_mut().zip(&lines) {
            match self.line_slide_parabola(fp, start, inc, length, c2, true) {
                Some(e) => *edge = e,
                None => return,
            }
        }
        // Corners: (0, 0), (xmax, 0), (0, ymax), (xmax, ymax).
        let corners = [
            edges[0][0] + edges[2][0] + edges[4][0],
            edges[0][1] + edges[3][0] + edges[5][0],
            edges[1][0] + edges[2][1] + edges[6][0],
            edges[1][1] + edges[3][1] + edges[7][0],
        ];
        let offsets = [0, w - 1, (h - 1) * w, w * h - 1];
        for (&offset, &corner) in offsets.iter().zip(&corners) {
            if fp.data[offset] > corner / 3.0 {
                fp.data[offset] = corner / 3.0;
            }
        }
    }
}

fn sliding_paraboloid_background(fp: &mut FloatPlane, radius: f64,
                                 invert: bool, presmooth: bool,
                                 correct_corners: bool) {
    let coeff2 = 0.5 / radius as f32;
    let coeff2_diag = 1.0 / radius as f32;
    if invert {
        fp.negate();
    }
    let mut shift_by = 0.0;
    if presmooth {
        // Maximum removes dust, mean removes noise.
        shift_by = filter_3x3(fp, Filter3::Maximum) as f32;
        filter_3x3(fp, Filter3::Mean);
    }
    let mut paraboloid = Paraboloid::new(fp);
    if correct_corners && fp.width >= 3 && fp.height >= 3 {
        paraboloid.correct_corners(fp, coeff2);
    }
    // Diagonals last: the image is smoother by then, which makes them faster.
    paraboloid.filter_1d(fp, Direction::X, coeff2);
    paraboloid.filter_1d(fp, Direction::Y, coeff2);
    paraboloid.filter_1d(fp, Direction::X, coeff2);
    paraboloid.filter_1d(fp, Direction::Diagonal1A, coeff2_diag);
    paraboloid.filter_1d(fp, Direction::Diagonal1B, coeff2_diag);
    paraboloid.filter_1d(fp, Direction::Diagonal2A, coeff2_diag);
    paraboloid.filter_1d(fp, Direction::Diagonal2B, coeff2_diag);
    paraboloid.filter_1d(fp, Direction::Diagonal1A, coeff2_diag);
    paraboloid.filter_1d(fp, Direction::Diagonal1B, coeff2_diag);

    if invert {
        for v in fp.data.iter_mut() {
            *v = -(*v - shift_by);
        }
    } else if presmooth {
        for v in fp.data.iter_mut() {
            *v -= shift_by;
        }
    }
}

/// Subtracts the background of `image` in place.
///
/// # Arguments
///   `radius` - Ball radius; should be at least the radius of the largest
///       object that is not background.
///   `light_background` - The objects are darker than the background. The
///       result is then offset to the top of the 16 bit range.
///   `presmooth` - Smooth the image (3x3 mean) before computing the
///       background.
pub fn subtract_background(image: &mut Gray16Image, radius: f64,
                           ball_type: BallType, light_background: bool,
                           presmooth: bool) {
    if image.width() == 0 || image.height() == 0 || radius <= 0.0 {
        return;
    }
    let start = Instant::now();
    let background = background(image, radius, ball_type, light_background,
                                presmooth);
    // Includes 0.5 for rounding.
    let offset = if light_background { 65535.5 } else { 0.5 };
    for (p, &bg) in image.iter_mut().zip(&background) {
        let value = *p as f32 - bg + offset;
        *p = value.clamp(0.0, 65535.0) as u16;
    }
    debug!("{:?} background radius {} of {}x{} in {:?}", ball_type, radius,
           image.width(), image.height(), start.elapsed());
}

/// The background of `image`, row-major.
pub fn background(image: &Gray16Image, radius: f64, ball_type: BallType,
                  light_background: bool, presmooth: bool) -> Vec<f32> {
    let mut fp = FloatPlane::from_gray16(image);
    match ball_type {
        BallType::Ball => rolling_ball_background(
            &mut fp, radius, light_background, presmooth),
        BallType::Paraboloid => sliding_paraboloid_background(
            &mut fp, radius, light_background, presmooth, true),
    }
    fp.data
}

// mod tests.
