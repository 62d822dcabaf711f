// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Finds the local maxima of a float image, and optionally segments the
//! image into the catchment basins of those maxima.
//!
//! A maximum is accepted only if it protrudes more than `tolerance` (the
//! prominence) above the saddle towards any higher maximum. Plateaus of equal
//! height are reported once, at the plateau point nearest its centroid.
//!
//! Segmentation ("watershed") treats the inverted image as a landscape in
//! which each accepted maximum is a sink. The image is rescaled to levels
//! 1..254, maxima areas are set to 255, and the 255 areas are dilated one
//! level at a time, in 8 directions per level, never merging two areas. The
//! pixels left between areas become the separation lines. This follows
//! ImageJ's MaximumFinder (Michael Schmid).

use image::GrayImage;
use log::debug;

use crate::plane::GrayF32Image;

const MAXIMUM: u8 = 1;  // Local maximum, not yet analyzed.
const LISTED: u8 = 2;  // In the current flood list.
const PROCESSED: u8 = 4;  // Reached while analyzing a higher maximum.
const MAX_AREA: u8 = 8;  // Within tolerance of an accepted maximum.
const EQUAL: u8 = 16;  // Same height as the maximum being analyzed.
const MAX_POINT: u8 = 32;  // The single point marking an accepted maximum.
const ELIMINATED: u8 = 64;  // Flattened by maxima cleanup.

// Directions clockwise from up: 0 = (x, y-1), 1 = (x+1, y-1), ..,
// 7 = (x-1, y-1).
const DIR_X_OFFSET: [i64; 8] = [0, 1, 1, 1, 0, -1, -1, -1];
const DIR_Y_OFFSET: [i64; 8] = [-1, -1, 0, 1, 1, 1, 0, -1];

const SQRT2: f32 = std::f32::consts::SQRT_2;

/// What `find_maxima()` marks (as 255) in its output mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaximaOutput {
    /// One pixel per maximum.
    SinglePoints,
    /// All pixels within tolerance of each maximum.
    InTolerance,
    /// Watershed particles, background and separation lines 0.
    Segmented,
}

struct Finder<'a> {
    width: usize,
    height: usize,
    pixels: &'a [f32],
    dir_offset: [i64; 8],
}

impl<'a> Finder<'a> {
    fn new(image: &'a GrayF32Image) -> Self {
        let width = image.width() as usize;
        let w = width as i64;
        Finder{width, height: image.height() as usize, pixels: image.as_raw(),
               dir_offset: [-w, -w + 1, 1, w + 1, w, w - 1, -1, -w - 1]}
    }

    fn neighbor(&self, offset: usize, d: usize) -> usize {
        (offset as i64 + self.dir_offset[d]) as usize
    }

    fn is_edge(&self, x: usize, y: usize) -> bool {
        x == 0 || y == 0 || x == self.width - 1 || y == self.height - 1
    }

    // Whether the neighbor of (x, y) in direction `d` is inside the image.
    fn is_within(&self, x: usize, y: usize, d: usize) -> bool {
        let (xmax, ymax) = (self.width - 1, self.height - 1);
        match d {
            0 => y > 0,
            1 => x < xmax && y > 0,
            2 => x < xmax,
            3 => x < xmax && y < ymax,
            4 => y < ymax,
            5 => x > 0 && y < ymax,
            6 => x > 0,
            7 => x > 0 && y > 0,
            _ => false,
        }
    }

    fn value(&self, x: usize, y: usize, is_edm: bool) -> f32 {
        if is_edm {
            self.true_edm_height(x, y)
        } else {
            self.pixels[x + y * self.width]
        }
    }

    /// Estimated height of a ridge or maximum of a distance map, which lies
    /// between the sampled pixels.
    fn true_edm_height(&self, x: usize, y: usize) -> f32 {
        let offset = x + y * self.width;
        let v = self.pixels[offset];
        if self.is_edge(x, y) || v == 0.0 {
            return v;
        }
        let mut true_h = v + 0.5 * SQRT2;
        let mut ridge_or_max = false;
        for d in 0..4 {
            let v1 = self.pixels[self.neighbor(offset, d)];
            let v2 = self.pixels[self.neighbor(offset, d + 4)];
            let mut h = if v >= v1 && v >= v2 {
                ridge_or_max = true;
                (v1 + v2) / 2.0
            } else {
                v1.min(v2)
            };
            h += if d % 2 == 0 { 1.0 } else { SQRT2 };
            if true_h > h {
                true_h = h;
            }
        }
        if ridge_or_max { true_h } else { v }
    }

    /// Marks all local maxima as MAXIMUM and returns them sorted ascending by
    /// value. Each entry holds the scaled value in the upper 32 bits and the
    /// pixel offset in the lower 32 bits.
    fn sorted_max_points(&self, types: &mut [u8], exclude_edges: bool,
                         is_edm: bool, global_min: f32, global_max: f32,
                         threshold: Option<f64>) -> Vec<i64> {
        let mut offsets = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                let i = x + y * self.width;
                let v = self.pixels[i];
                if v == global_min {
                    continue;
                }
                if exclude_edges && self.is_edge(x, y) {
                    continue;
                }
                if let Some(threshold) = threshold {
                    if (v as f64) < threshold {
                        continue;
                    }
                }
                // For a distance map we need both the maxima of the corrected
                // heights and those of the raw values.
                let v_true = self.value(x, y, is_edm);
                let is_max = (0..8).all(|d| {
                    if !self.is_within(x, y, d) {
                        return true;
                    }
                    let x2 = (x as i64 + DIR_X_OFFSET[d]) as usize;
                    let y2 = (y as i64 + DIR_Y_OFFSET[d]) as usize;
                    let v_neighbor = self.pixels[x2 + y2 * self.width];
                    !(v_neighbor > v && self.value(x2, y2, is_edm) > v_true)
                });
                if is_max {
                    types[i] = MAXIMUM;
                    offsets.push((x, y));
                }
            }
        }
        let v_factor = (2e9 / (global_max as f64 - global_min as f64)) as f32;
        let mut max_points: Vec<i64> = offsets.into_iter().map(|(x, y)| {
            let f_value = self.value(x, y, is_edm);
            let i_value = ((f_value - global_min) * v_factor) as i32;
            (i_value as i64) << 32 | (x + y * self.width) as i64
        }).collect();
        max_points.sort_unstable();
        max_points
    }

    /// Floods from each maximum (highest first) over all pixels within
    /// tolerance, deciding whether it is a true maximum and marking
    /// MAX_AREA, MAX_POINT and PROCESSED accordingly. Returns the coordinates
    /// of the accepted maxima, highest first.
    #[allow(clippy::too_many_arguments)]
    fn analyze_and_mark_maxima(&self, types: &mut [u8], max_points: &[i64],
                               exclude_edges: bool, is_edm: bool,
                               tolerance: f64, strict: bool,
                               max_sorting_error: f32) -> Vec<(u32, u32)> {
        let width = self.width;
        let mut p_list = vec![0_usize; width * self.height];
        let mut coordinates = Vec::new();

        for &point in max_points.iter().rev() {
            let mut offset0 = (point & 0xffff_ffff) as usize;
            if types[offset0] & PROCESSED != 0 {
                // Reached from a higher maximum already.
                continue;
            }
            let mut x0 = offset0 % width;
            let mut y0 = offset0 / width;
            let mut v0 = self.value(x0, y0, is_edm);
            loop {
                p_list[0] = offset0;
                types[offset0] |= EQUAL | LISTED;
                let mut list_len = 1;
                let mut list_i = 0;
                let mut is_edge_maximum = self.is_edge(x0, y0);
                let mut sorting_error = false;
                let mut max_possible = true;
                let mut x_equal = x0 as f64;
                let mut y_equal = y0 as f64;
                let mut n_equal = 1;
                'flood: while list_i < list_len {
                    let offset = p_list[list_i];
                    let x = offset % width;
                    let y = offset / width;
                    for d in 0..8 {
                        if !self.is_within(x, y, d) {
                            continue;
                        }
                        let offset2 = self.neighbor(offset, d);
                        if types[offset2] & LISTED != 0 {
                            continue;
                        }
                        if is_edm && self.pixels[offset2] <= 0.0 {
                            continue;  // Background.
                        }
                        if types[offset2] & PROCESSED != 0 {
                            max_possible = false;
                            break 'flood;
                        }
                        let x2 = (x as i64 + DIR_X_OFFSET[d]) as usize;
                        let y2 = (y as i64 + DIR_Y_OFFSET[d]) as usize;
                        let v2 = self.value(x2, y2, is_edm);
                        if v2 > v0 + max_sorting_error {
                            max_possible = false;
                            break 'flood;
                        } else if v2 >= v0 - tolerance as f32 {
                            if v2 > v0 {
                                // Should have been handled first; retry from
                                // the higher point.
                                sorting_error = true;
                                offset0 = offset2;
                                v0 = v2;
                                x0 = x2;
                                y0 = y2;
                            }
                            p_list[list_len] = offset2;
                            list_len += 1;
                            types[offset2] |= LISTED;
                            if self.is_edge(x2, y2) && (strict || v2 >= v0) {
                                is_edge_maximum = true;
                                if exclude_edges {
                                    max_possible = false;
                                    break 'flood;
                                }
                            }
                            if v2 == v0 {
                                types[offset2] |= EQUAL;
                                x_equal += x2 as f64;
                                y_equal += y2 as f64;
                                n_equal += 1;
                            }
                        }
                    }
                    list_i += 1;
                }

                if sorting_error {
                    for &offset in &p_list[..list_len] {
                        types[offset] = 0;
                    }
                    continue;
                }
                let reset_mask =
                    !(if max_possible { LISTED } else { LISTED | EQUAL });
                x_equal /= n_equal as f64;
                y_equal /= n_equal as f64;
                let mut min_dist2 = 1e20;
                let mut nearest_i = 0;
                for (i, &offset) in p_list[..list_len].iter().enumerate() {
                    types[offset] &= reset_mask;
                    types[offset] |= PROCESSED;
                    if max_possible {
                        types[offset] |= MAX_AREA;
                        if types[offset] & EQUAL != 0 {
                            let dx = x_equal - (offset % width) as f64;
                            let dy = y_equal - (offset / width) as f64;
                            let dist2 = dx * dx + dy * dy;
                            if dist2 < min_dist2 {
                                min_dist2 = dist2;
                                nearest_i = i;
                            }
                        }
                    }
                }
                if max_possible {
                    let offset = p_list[nearest_i];
                    types[offset] |= MAX_POINT;
                    if !(exclude_edges && is_edge_maximum) {
                        coordinates.push(((offset % width) as u32,
                                          (offset / width) as u32));
                    }
                }
                break;
            }
        }
        if max_points.is_empty() {
            // No maxima at all: everything is within tolerance.
            types.fill(PROCESSED | MAX_AREA);
        }
        coordinates
    }

    /// Scales the image to levels 1..254 (0 below threshold) with the
    /// maximum areas set to 255, as input for the watershed.
    fn make_8bit(&self, types: &[u8], is_edm: bool, global_min: f32,
                 global_max: f32, threshold: Option<f64>) -> Vec<u8> {
        let (threshold, min_value) = if is_edm {
            (Some(0.5), 1.0)
        } else {
            (threshold, threshold.unwrap_or(global_min as f64))
        };
        let global_max = global_max as f64;
        let offset = min_value -
            (global_max - min_value) * (1.0 / 253.0 / 2.0 - 1e-6);
        let mut factor = 253.0 / (global_max - min_value);
        if is_edm && factor > 1.0 {
            factor = 1.0;  // No better resolution for a distance map.
        }
        self.pixels.iter().zip(types).map(|(&raw, &t)| {
            if threshold.is_some_and(|th| (raw as f64) < th) {
                0
            } else if t & MAX_AREA != 0 {
                255
            } else {
                let v = 1.0 + ((raw as f64 - offset) * factor).round();
                v.clamp(1.0, 254.0) as u8
            }
        }).collect()
    }

    /// Flattens the maxima that were not accepted: from each one, descends
    /// level by level until touching an accepted maximum area, then sets
    /// everything above that saddle to the saddle level.
    fn cleanup_maxima(&self, out: &mut [u8], types: &mut [u8],
                      max_points: &[i64]) {
        let width = self.width;
        let mut p_list = vec![0_usize; width * self.height];
        for &point in max_points.iter().rev() {
            let offset0 = (point & 0xffff_ffff) as usize;
            if types[offset0] & (MAX_AREA | ELIMINATED) != 0 {
                continue;
            }
            let level = out[offset0] as i32;
            let mut lo_level = level + 1;
            p_list[0] = offset0;
            types[offset0] |= LISTED;
            let mut list_len = 1;
            let mut last_len = 1;
            let mut saddle_found = false;
            while !saddle_found && lo_level > 0 {
                lo_level -= 1;
                last_len = list_len;
                let mut list_i = 0;
                'level: while list_i < list_len {
                    let offset = p_list[list_i];
                    let x = offset % width;
                    let y = offset / width;
                    for d in 0..8 {
                        if !self.is_within(x, y, d) {
                            continue;
                        }
                        let offset2 = self.neighbor(offset, d);
                        let t = types[offset2];
                        if t & LISTED != 0 {
                            continue;
                        }
                        let v2 = out[offset2] as i32;
                        if t & MAX_AREA != 0 ||
                            (t & ELIMINATED != 0 && v2 >= lo_level)
                        {
                            saddle_found = true;
                            break 'level;
                        } else if v2 >= lo_level && t & ELIMINATED == 0 {
                            p_list[list_len] = offset2;
                            list_len += 1;
                            types[offset2] |= LISTED;
                        }
                    }
                    list_i += 1;
                }
            }
            for &offset in &p_list[..list_len] {
                types[offset] &= !LISTED;
            }
            for &offset in &p_list[..last_len] {
                out[offset] = lo_level as u8;
                types[offset] |= ELIMINATED;
            }
        }
    }

    /// Dilates the 255 areas of `out` level by level, highest first.
    fn watershed_segment(&self, out: &mut [u8]) {
        let (width, height) = (self.width, self.height);
        let mut histogram = [0_usize; 256];
        for &v in out.iter() {
            histogram[v as usize] += 1;
        }
        let mut level_start = [0_usize; 256];
        let mut highest_value = 0;
        let mut offset = 0;
        for v in 1..255 {
            level_start[v] = offset;
            offset += histogram[v];
            if histogram[v] > 0 {
                highest_value = v;
            }
        }
        // Pixel offsets of levels 1..254, grouped by level.
        let mut coordinates = vec![0_usize; offset];
        let mut level_offset = [0_usize; 256];
        for (i, &v) in out.iter().enumerate() {
            let v = v as usize;
            if v > 0 && v < 255 {
                coordinates[level_start[v] + level_offset[v]] = i;
                level_offset[v] += 1;
            }
        }

        let table = make_fate_table();
        let mut set_points = Vec::new();
        // Diagonal directions first.
        const DIRECTION_SEQUENCE: [usize; 8] = [7, 3, 1, 5, 0, 4, 2, 6];
        for level in (1..=highest_value).rev() {
            let mut remaining = histogram[level];
            let mut idle = 0;
            while remaining > 0 && idle < 8 {
                let mut d_index = 0;
                loop {
                    let n = self.process_level(
                        DIRECTION_SEQUENCE[d_index % 8], out, &table,
                        level_start[level], remaining, &mut coordinates,
                        &mut set_points);
                    remaining -= n;
                    if n > 0 {
                        idle = 0;
                    }
                    d_index += 1;
                    let more = remaining > 0 && idle < 8;
                    idle += 1;
                    if !more {
                        break;
                    }
                }
            }
            if remaining > 0 && level > 1 {
                let mut next_level = level;
                loop {
                    next_level -= 1;
                    if next_level <= 1 || histogram[next_level] != 0 {
                        break;
                    }
                }
                // Unreached pixels at the image border or next to the
                // background move on to the next level; others become lines.
                let mut new_next_level_end =
                    level_start[next_level] + histogram[next_level];
                let start = level_start[level];
                for p in start..start + remaining {
                    let offset = coordinates[p];
                    let x = offset % width;
                    let y = offset / width;
                    let add_to_next = x == 0 || y == 0 || x == width - 1 ||
                        y == height - 1 ||
                        (0..8).any(|d| self.is_within(x, y, d) &&
                                   out[self.neighbor(offset, d)] == 0);
                    if add_to_next {
                        coordinates[new_next_level_end] = offset;
                        new_next_level_end += 1;
                    }
                }
                histogram[next_level] =
                    new_next_level_end - level_start[next_level];
            }
        }
    }

    /// One dilation pass in direction `pass` over the pending pixels of a
    /// level. Pixels that stay pending are compacted to the front of the
    /// level's list. Returns the number of pixels set to 255.
    #[allow(clippy::too_many_arguments)]
    fn process_level(&self, pass: usize, out: &mut [u8], fate_table: &[u8; 256],
                     level_start: usize, level_n_points: usize,
                     coordinates: &mut [usize], set_points: &mut Vec<usize>)
                     -> usize {
        let (width, xmax, ymax) = (self.width, self.width - 1, self.height - 1);
        set_points.clear();
        let mut n_unchanged = 0;
        for p in level_start..level_start + level_n_points {
            let offset = coordinates[p];
            let x = offset % width;
            let y = offset / width;
            let set = |o: usize| out[o] == 255;
            let mut index = 0;
            if y > 0 && set(offset - width) {
                index ^= 1;
            }
            if x < xmax && y > 0 && set(offset - width + 1) {
                index ^= 2;
            }
            if x < xmax && set(offset + 1) {
                index ^= 4;
            }
            if x < xmax && y < ymax && set(offset + width + 1) {
                index ^= 8;
            }
            if y < ymax && set(offset + width) {
                index ^= 16;
            }
            if x > 0 && y < ymax && set(offset + width - 1) {
                index ^= 32;
            }
            if x > 0 && set(offset - 1) {
                index ^= 64;
            }
            if x > 0 && y > 0 && set(offset - width - 1) {
                index ^= 128;
            }
            let mask = 1 << pass;
            if fate_table[index] & mask == mask {
                set_points.push(offset);
            } else {
                coordinates[level_start + n_unchanged] = offset;
                n_unchanged += 1;
            }
        }
        for &offset in set_points.iter() {
            out[offset] = 255;
        }
        set_points.len()
    }

    /// Clears (to 0) every particle containing an edge pixel of a maximum
    /// area.
    fn delete_edge_particles(&self, out: &mut [u8], types: &[u8]) {
        let (width, height) = (self.width, self.height);
        let mut stack = Vec::new();
        for y in 0..height {
            for x in 0..width {
                if !self.is_edge(x, y) {
                    continue;
                }
                let offset = x + y * width;
                if types[offset] & MAX_AREA == 0 || out[offset] != 255 {
                    continue;
                }
                out[offset] = 0;
                stack.push(offset);
                while let Some(o) = stack.pop() {
                    let (ox, oy) = (o % width, o / width);
                    for d in 0..8 {
                        if self.is_within(ox, oy, d) {
                            let o2 = self.neighbor(o, d);
                            if out[o2] == 255 {
                                out[o2] = 0;
                                stack.push(o2);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Lookup table for the watershed dilation, indexed by the occupancy of the
/// 8 neighbors (1 = up, 2 = up right, clockwise to 128 = up left). Bit
/// `pass` of an entry tells whether the pixel joins its neighbors' area in
/// dilation direction `pass`. Entries whose set neighbors belong to more than
/// one region are 0.
fn make_fate_table() -> [u8; 256] {
    let mut table = [0_u8; 256];
    for (item, entry) in table.iter_mut().enumerate() {
        let mut is_set = [false; 8];
        for (i, s) in is_set.iter_mut().enumerate() {
            *s = item & (1 << i) != 0;
        }
        for i in 0..8 {
            // Dilate opposite to the set neighbors.
            if is_set[(i + 4) % 8] {
                *entry |= 1 << i;
            }
        }
        // A set side pixel makes its adjacent corners count as set too.
        for i in (0..8).step_by(2) {
            if is_set[i] {
                is_set[(i + 1) % 8] = true;
                is_set[(i + 7) % 8] = true;
            }
        }
        let transitions =
            (0..8).filter(|&i| is_set[i] != is_set[(i + 1) % 8]).count();
        if transitions >= 4 {
            *entry = 0;
        }
    }
    table
}

/// Finds maxima of `image` and returns a mask with the selected `output`
/// marked 255.
///
/// # Arguments
///   `tolerance` - A maximum is accepted only if it is more than this above
///       the saddle towards a higher maximum.
///   `strict` - When false, the global maximum is accepted even if no other
///       pixel is `tolerance` below it. With `exclude_on_edges`, also
///       rejects maxima whose tolerance area touches the edge.
///   `threshold` - Pixels below this value are never maxima, and are
///       background when segmenting.
///   `exclude_on_edges` - Drop maxima (or, when segmenting, particles) at
///       the image edge.
///   `is_edm` - The image is a Euclidean distance map: uses the interpolated
///       ridge height and treats 0 as background.
pub fn find_maxima(image: &GrayF32Image, tolerance: f64, strict: bool,
                   threshold: Option<f64>, output: MaximaOutput,
                   exclude_on_edges: bool, is_edm: bool) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return GrayImage::new(width, height);
    }
    let finder = Finder::new(image);
    let mut types = vec![0_u8; finder.pixels.len()];
    // For segmentation, edge particles are removed afterwards.
    let exclude_edges_now =
        exclude_on_edges && output != MaximaOutput::Segmented;
    let analysis = analyze(&finder, &mut types, tolerance, strict, threshold,
                           exclude_edges_now, is_edm);

    let out = match output {
        MaximaOutput::Segmented => {
            let mut out = finder.make_8bit(
                &types, is_edm, analysis.global_min, analysis.global_max,
                analysis.threshold);
            finder.cleanup_maxima(&mut out, &mut types, &analysis.max_points);
            finder.watershed_segment(&mut out);
            if !is_edm {
                cleanup_extra_lines(&finder, &mut out);
            }
            for v in out.iter_mut() {
                if *v < 255 {
                    *v = 0;
                }
            }
            if exclude_on_edges {
                finder.delete_edge_particles(&mut out, &types);
            }
            out
        },
        MaximaOutput::SinglePoints | MaximaOutput::InTolerance => {
            let mask = if output == MaximaOutput::SinglePoints {
                MAX_POINT
            } else {
                MAX_AREA
            };
            types.iter().map(|&t| if t & mask != 0 { 255 } else { 0 })
                .collect()
        },
    };
    GrayImage::from_raw(width, height, out)
        .unwrap_or_else(|| GrayImage::new(width, height))
}

/// Coordinates of the accepted maxima, highest first.
pub fn find_maxima_points(image: &GrayF32Image, tolerance: f64, strict: bool,
                          exclude_on_edges: bool) -> Vec<(u32, u32)> {
    if image.width() == 0 || image.height() == 0 {
        return Vec::new();
    }
    let finder = Finder::new(image);
    let mut types = vec![0_u8; finder.pixels.len()];
    analyze(&finder, &mut types, tolerance, strict, None, exclude_on_edges,
            false).points
}

struct Analysis {
    global_min: f32,
    global_max: f32,
    // Adjusted for rounding.
    threshold: Option<f64>,
    // All local maxima, ascending.
    max_points: Vec<i64>,
    // Accepted maxima, highest first.
    points: Vec<(u32, u32)>,
}

fn analyze(finder: &Finder, types: &mut [u8], tolerance: f64, strict: bool,
           threshold: Option<f64>, exclude_edges_now: bool, is_edm: bool)
           -> Analysis {
    let (global_min, global_max) = finder.pixels.iter().fold(
        (f32::MAX, -f32::MAX), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let mut maximum_possible = global_max > global_min;
    if strict && (global_max - global_min) as f64 <= tolerance {
        maximum_possible = false;
    }
    let threshold = threshold.map(
        |t| t - (global_max - global_min) as f64 * 1e-6);
    let max_points = if maximum_possible {
        finder.sorted_max_points(types, exclude_edges_now, is_edm, global_min,
                                 global_max, threshold)
    } else {
        Vec::new()
    };
    // The sorted sequence may be off by this much.
    let max_sorting_error = 1.1 * if is_edm {
        SQRT2 / 2.0
    } else {
        (global_max - global_min) / 2e9
    };
    let points = finder.analyze_and_mark_maxima(
        types, &max_points, exclude_edges_now, is_edm, tolerance, strict,
        max_sorting_error);
    debug!("{} of {} local maxima accepted", points.len(), max_points.len());
    Analysis{global_min, global_max, threshold, max_points, points}
}

/// Removes single dots, foreground patches and dangling line ends left by
/// the watershed of images with local minima.
fn cleanup_extra_lines(finder: &Finder, out: &mut [u8]) {
    for y in 0..finder.height {
        for x in 0..finder.width {
            let v = out[x + y * finder.width];
            if v != 255 && v != 0 {
                match n_radii(finder, out, x, y) {
                    0 => out[x + y * finder.width] = 255,
                    1 => remove_line_from(finder, out, x, y),
                    _ => (),
                }
            }
        }
    }
}

// Deletes a line from (x, y) up to the next 4-connected vertex.
fn remove_line_from(finder: &Finder, out: &mut [u8], mut x: usize,
                    mut y: usize) {
    out[x + finder.width * y] = 255;
    loop {
        let mut continues = false;
        for d in (0..8).step_by(2) {
            if !finder.is_within(x, y, d) {
                continue;
            }
            let v = out[finder.neighbor(x + finder.width * y, d)];
            if v != 255 && v != 0 {
                let x2 = (x as i64 + DIR_X_OFFSET[d]) as usize;
                let y2 = (y as i64 + DIR_Y_OFFSET[d]) as usize;
                let n = n_radii(finder, out, x2, y2);
                if n <= 1 {
                    x = x2;
                    y = y2;
                    out[x + finder.width * y] = 255;
                    continues = n == 1;
                    break;
                }
            }
        }
        if !continues {
            break;
        }
    }
}

// Number of 4-connected lines (pixels below 255) radiating from (x, y).
// Pixels outside the image count as line pixels.
fn n_radii(finder: &Finder, out: &[u8], x: usize, y: usize) -> usize {
    let offset = x + y * finder.width;
    let mut transitions = 0;
    let mut prev_set = true;
    let mut first_set = true;
    for d in 0..8 {
        let mut pixel_set = prev_set;
        if finder.is_within(x, y, d) {
            let is_set = out[finder.neighbor(offset, d)] != 255;
            if d & 1 == 0 {
                pixel_set = is_set;
            } else if !is_set {
                pixel_set = false;
            }
        } else {
            pixel_set = true;
        }
        if pixel_set && !prev_set {
            transitions += 1;
        }
        prev_set = pixel_set;
        if d == 0 {
            first_set = pixel_set;
        }
    }
    if first_set && !prev_set {
        transitions += 1;
    }
    transitions
}

// mod tests.
