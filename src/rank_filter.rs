// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Rank filters over a circular neighborhood (after ImageJ's RankFilters by
//! Michael Schmid).
//!
//! The image is copied into a float cache padded by the kernel radius, with
//! out-of-image pixels taking the value of the nearest edge pixel. Each line
//! is filtered left to right and, except for very small kernels, the kernel
//! statistics are updated incrementally:
//! * min/max: only the entering column is examined, unless the leaving column
//!   held the current extremum, in which case the area is rescanned.
//! * mean/variance: running sums, adding the entering column and subtracting
//!   the leaving one.
//! * median: partition around the previous median into above/below buffers
//!   and select from the larger side with Hoare's find algorithm.

use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::plane::Gray16Image;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RankFilterType {
    Mean,
    Min,
    Max,
    Variance,
    #[default]
    Median,
    /// Replaces pixels deviating from the median by more than a threshold.
    Outliers,
    /// Median with radius 1.
    Despeckle,
    /// Integer images have no NaN pixels; leaves the image unchanged.
    RemoveNan,
    /// Minimum then maximum.
    Open,
    /// Maximum then minimum.
    Close,
    /// Input minus its opening (dark background) or closing (light
    /// background).
    TopHat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outliers {
    #[default]
    Bright,
    Dark,
}

/// Secondary parameters; only some filter types use them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RankOptions {
    pub which_outliers: Outliers,
    /// Deviation from the median beyond which a pixel is an outlier.
    pub threshold: f32,
    /// Top-hat: the background is light.
    pub light_background: bool,
    /// Top-hat: return the opening/closing instead of subtracting it.
    pub dont_subtract: bool,
}

impl Default for RankOptions {
    fn default() -> Self {
        RankOptions{which_outliers: Outliers::Bright, threshold: 50.0,
                    light_background: false, dont_subtract: false}
    }
}

/// A circular kernel, as per-line [left, right] x extents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Kernel {
    line_radii: Vec<(i32, i32)>,
    n_points: usize,
    k_radius: usize,
}

impl Kernel {
    /// Radius 0.5 gives the center and its 4 neighbors, radius 1 a 3x3
    /// square. Radii in [1.5, 1.75) and [2.5, 2.85) are bumped up to give
    /// ImageJ's customary kernel sizes.
    pub fn new(radius: f64) -> Self {
        let mut radius = radius.max(0.0);
        if (1.5..1.75).contains(&radius) {
            radius = 1.75;
        } else if (2.5..2.85).contains(&radius) {
            radius = 2.85;
        }
        let r2 = (radius * radius) as i32 + 1;
        let k_radius = ((r2 as f64 + 1e-10).sqrt()) as i32;
        let k_height = (2 * k_radius + 1) as usize;
        let mut line_radii = vec![(0, 0); k_height];
        line_radii[k_radius as usize] = (-k_radius, k_radius);
        let mut n_points = 2 * k_radius + 1;
        for y in 1..=k_radius {
            let dx = ((r2 - y * y) as f64 + 1e-10).sqrt() as i32;
            line_radii[(k_radius - y) as usize] = (-dx, dx);
            line_radii[(k_radius + y) as usize] = (-dx, dx);
            n_points += 4 * dx + 2;
        }
        Kernel{line_radii, n_points: n_points as usize,
               k_radius: k_radius as usize}
    }

    pub fn k_radius(&self) -> usize {
        self.k_radius
    }

    pub fn k_height(&self) -> usize {
        self.line_radii.len()
    }

    pub fn n_points(&self) -> usize {
        self.n_points
    }
}

// The single-pass filters that the multi-step ones are built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pass {
    Mean,
    Min,
    Max,
    Variance,
    Median,
    Outliers,
}

/// Applies `filter` with a kernel of `radius` to `image` in place.
pub fn rank(image: &mut Gray16Image, radius: f64, filter: RankFilterType,
            options: &RankOptions) {
    if image.width() == 0 || image.height() == 0 {
        return;
    }
    let start = Instant::now();
    let kernel = Kernel::new(match filter {
        RankFilterType::Despeckle => 1.0,
        _ => radius,
    });
    let threshold = options.threshold;
    match filter {
        RankFilterType::Mean =>
            filter_pass(image, &kernel, Pass::Mean, 1.0, 0.0),
        RankFilterType::Min =>
            filter_pass(image, &kernel, Pass::Min, -1.0, 0.0),
        RankFilterType::Max =>
            filter_pass(image, &kernel, Pass::Max, 1.0, 0.0),
        RankFilterType::Variance =>
            filter_pass(image, &kernel, Pass::Variance, 1.0, 0.0),
        RankFilterType::Median | RankFilterType::Despeckle =>
            filter_pass(image, &kernel, Pass::Median, 1.0, 0.0),
        RankFilterType::Outliers => {
            // The sign is -1 for bright outliers: compare with the minimum.
            let sign = match options.which_outliers {
                Outliers::Bright => -1.0,
                Outliers::Dark => 1.0,
            };
            filter_pass(image, &kernel, Pass::Outliers, sign, threshold);
        },
        RankFilterType::RemoveNan => (),
        RankFilterType::Open => {
            filter_pass(image, &kernel, Pass::Min, -1.0, 0.0);
            filter_pass(image, &kernel, Pass::Max, 1.0, 0.0);
        },
        RankFilterType::Close => {
            filter_pass(image, &kernel, Pass::Max, 1.0, 0.0);
            filter_pass(image, &kernel, Pass::Min, -1.0, 0.0);
        },
        RankFilterType::TopHat => top_hat(image, &kernel, options),
    }
    debug!("Rank filter {:?} radius {} on {}x{} in {:?}", filter, radius,
           image.width(), image.height(), start.elapsed());
}

fn top_hat(image: &mut Gray16Image, kernel: &Kernel, options: &RankOptions) {
    let snapshot = (!options.dont_subtract).then(|| image.clone());
    if options.light_background {
        filter_pass(image, kernel, Pass::Max, 1.0, 0.0);
        filter_pass(image, kernel, Pass::Min, -1.0, 0.0);
    } else {
        filter_pass(image, kernel, Pass::Min, -1.0, 0.0);
        filter_pass(image, kernel, Pass::Max, 1.0, 0.0);
    }
    if let Some(snapshot) = snapshot {
        // With a light background the result is offset to the top of the
        // range.
        let offset = if options.light_background { 65535.0 } else { 0.0 };
        for (out, &orig) in image.iter_mut().zip(snapshot.iter()) {
            let v = orig as f32 - *out as f32 + offset;
            *out = (v + 0.5) as u16;
        }
    }
}

// Padded float copy of the image. Cache row r, column c holds image pixel
// (c - k_radius, r - k_radius), clamped to the image.
struct Cache {
    data: Vec<f32>,
    width: usize,
}

impl Cache {
    fn new(image: &Gray16Image, k_radius: usize) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let width = w + 2 * k_radius;
        let height = h + 2 * k_radius;
        let pixels = image.as_raw();
        let mut data = Vec::with_capacity(width * height);
        for r in 0..height {
            let y = r.saturating_sub(k_radius).min(h - 1);
            for c in 0..width {
                let x = c.saturating_sub(k_radius).min(w - 1);
                data.push(pixels[x + y * w] as f32);
            }
        }
        Cache{data, width}
    }
}

struct LineState<'a> {
    cache: &'a [f32],
    // Per kernel line, cache indices of the leftmost and rightmost kernel
    // pixel for x = 0.
    pointers: Vec<(usize, usize)>,
}

impl LineState<'_> {
    /// Max of `v * sign` over the kernel at `x`, starting from `max`.
    /// `ignore_right` leaves out the rightmost column.
    fn area_max(&self, x: usize, ignore_right: bool, mut max: f32, sign: f32)
                -> f32 {
        for &(left, right) in &self.pointers {
            let end = right + x + 1 - ignore_right as usize;
            for &v in &self.cache[left + x..end] {
                let v = v * sign;
                if max < v {
                    max = v;
                }
            }
        }
        max
    }

    /// Max of `v * sign` over the column entering the kernel at `x` (right
    /// side) or the column that just left it (left side).
    fn side_max(&self, x: usize, is_right: bool, sign: f32) -> f32 {
        let mut max = -f32::MAX;
        for &(left, right) in &self.pointers {
            let p = if is_right { right + x } else { left + x - 1 };
            let v = self.cache[p] * sign;
            if max < v {
                max = v;
            }
        }
        max
    }

    fn area_sums(&self, x: usize) -> (f64, f64) {
        let mut sum = 0.0;
        let mut sum2 = 0.0;
        for &(left, right) in &self.pointers {
            for &v in &self.cache[left + x..=right + x] {
                let v = v as f64;
                sum += v;
                sum2 += v * v;
            }
        }
        (sum, sum2)
    }

    fn add_side_sums(&self, x: usize, sums: &mut (f64, f64)) {
        for &(left, right) in &self.pointers {
            let v = self.cache[left + x - 1] as f64;
            sums.0 -= v;
            sums.1 -= v * v;
            let v = self.cache[right + x] as f64;
            sums.0 += v;
            sums.1 += v * v;
        }
    }

    fn median(&self, x: usize, above: &mut Vec<f32>, below: &mut Vec<f32>,
              n_points: usize, guess: f32) -> f32 {
        above.clear();
        below.clear();
        for &(left, right) in &self.pointers {
            for &v in &self.cache[left + x..=right + x] {
                if v > guess {
                    above.push(v);
                } else if v < guess {
                    below.push(v);
                }
            }
        }
        let half = n_points / 2;
        if above.len() > half {
            let n = above.len() - half - 1;
            find_nth_lowest(above, n)
        } else if below.len() > half {
            find_nth_lowest(below, half)
        } else {
            guess
        }
    }
}

fn filter_pass(image: &mut Gray16Image, kernel: &Kernel, pass: Pass,
               sign: f32, threshold: f32) {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let k_radius = kernel.k_radius;
    let cache = Cache::new(image, k_radius);
    let max_value = image.iter().copied().max().unwrap_or(0) as f32;
    let small_kernel = k_radius < 2;
    let n_points = kernel.n_points;
    let mut above = Vec::with_capacity(n_points);
    let mut below = Vec::with_capacity(n_points);
    let mut values = vec![0_f32; width];
    let min_or_max = matches!(pass, Pass::Min | Pass::Max);
    let min_or_max_or_outliers = min_or_max || pass == Pass::Outliers;
    let sum_filter = matches!(pass, Pass::Mean | Pass::Variance);

    for y in 0..height {
        let pointers: Vec<(usize, usize)> = kernel.line_radii.iter()
            .enumerate()
            .map(|(i, &(left, right))| {
                let row = (y + i) * cache.width + k_radius;
                ((row as i64 + left as i64) as usize,
                 (row as i64 + right as i64) as usize)
            })
            .collect();
        let line = LineState{cache: &cache.data, pointers};
        let center = (y + k_radius) * cache.width + k_radius;
        let mut max = 0.0_f32;
        let mut sums = (0.0_f64, 0.0_f64);
        let mut median = cache.data[center];
        let mut full_calculation = true;
        for x in 0..width {
            if full_calculation {
                // Small kernels always use the full area.
                full_calculation = small_kernel;
                if min_or_max_or_outliers {
                    max = line.area_max(x, false, -f32::MAX, sign);
                }
                if min_or_max {
                    values[x] = max * sign;
                    continue;
                } else if sum_filter {
                    sums = line.area_sums(x);
                }
            } else if min_or_max_or_outliers {
                let new_points_max = line.side_max(x, true, sign);
                if new_points_max >= max {
                    max = new_points_max;
                } else {
                    let removed_points_max = line.side_max(x, false, sign);
                    if removed_points_max >= max {
                        max = line.area_max(x, true, new_points_max, sign);
                    }
                }
                if min_or_max {
                    values[x] = max * sign;
                    continue;
                }
            } else if sum_filter {
                line.add_side_sums(x, &mut sums);
            }
            values[x] = match pass {
                Pass::Mean => (sums.0 / n_points as f64) as f32,
                Pass::Variance => {
                    let n = n_points as f64;
                    let value = ((sums.1 - sums.0 * sums.0 / n) / n) as f32;
                    // Numeric noise can give values below 0.
                    value.min(max_value).max(0.0)
                },
                Pass::Median => {
                    median = line.median(x, &mut above, &mut below, n_points,
                                         median);
                    median
                },
                Pass::Outliers => {
                    let mut v = cache.data[center + x];
                    // The median can't be beyond the extremum.
                    if v * sign + threshold < max {
                        median = line.median(x, &mut above, &mut below,
                                             n_points, median);
                        if v * sign + threshold < median * sign {
                            v = median;
                        }
                    }
                    v
                },
                Pass::Min | Pass::Max => unreachable!(),
            };
        }
        let out: &mut [u16] = image;
        for (o, &v) in out[y * width..(y + 1) * width].iter_mut().zip(&values) {
            *o = (v + 0.5) as u16;
        }
    }
}

/// Hoare's find: the `n`-th lowest value of `buf` (0 for the lowest).
/// Reorders `buf`.
fn find_nth_lowest(buf: &mut [f32], n: usize) -> f32 {
    let n = n as isize;
    let mut l: isize = 0;
    let mut m: isize = buf.len() as isize - 1;
    let mut med = buf[n as usize];
    while l < m {
        let mut i = l;
        let mut j = m;
        loop {
            while buf[i as usize] < med {
                i += 1;
            }
            while med < buf[j as usize] {
                j -= 1;
            }
            buf.swap(i as usize, j as usize);
            i += 1;
            j -= 1;
            if !(j >= n && i <= n) {
                break;
            }
        }
        if j < n {
            l = i;
        }
        if n < i {
            m = j;
        }
        med = buf[n as usize];
    }
    med
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    fn spot_image(size: u32, background: u16, spot: u16) -> Gray16Image {
        let mut image = Gray16Image::from_pixel(size, size, Luma([background]));
        image.put_pixel(size / 2, size / 2, Luma([spot]));
        image
    }

    #[test]
    fn test_kernel_sizes() {
        let k = Kernel::new(0.5);
        assert_eq!((k.k_radius(), k.k_height(), k.n_points()), (1, 3, 5));
        let k = Kernel::new(1.0);
        assert_eq!((k.k_radius(), k.k_height(), k.n_points()), (1, 3, 9));
        let k = Kernel::new(1.5);
        assert_eq!((k.k_radius(), k.k_height(), k.n_points()), (2, 5, 13));
        let k = Kernel::new(2.0);
        assert_eq!((k.k_radius(), k.n_points()), (2, 21));
    }

    #[test]
    fn test_median_removes_outlier() {
        let mut image = spot_image(5, 1000, 60000);
        rank(&mut image, 1.5, RankFilterType::Median, &RankOptions::default());
        assert_eq!(image.get_pixel(2, 2)[0], 1000);
        assert!(image.pixels().all(|p| p[0] == 1000));
    }

    #[test]
    fn test_find_nth_lowest() {
        let mut buf = vec![5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(find_nth_lowest(&mut buf.clone(), 0), 1.0);
        assert_eq!(find_nth_lowest(&mut buf.clone(), 2), 3.0);
        assert_eq!(find_nth_lowest(&mut buf, 4), 5.0);
    }

    #[test]
    fn test_min_max() {
        let mut image = spot_image(9, 100, 900);
        rank(&mut image, 1.0, RankFilterType::Max, &RankOptions::default());
        // The spot grows to 3x3.
        assert_eq!(image.pixels().filter(|p| p[0] == 900).count(), 9);
        assert_eq!(image.get_pixel(3, 3)[0], 900);
        assert_eq!(image.get_pixel(2, 2)[0], 100);

        rank(&mut image, 1.0, RankFilterType::Min, &RankOptions::default());
        assert_eq!(image.pixels().filter(|p| p[0] == 900).count(), 1);
    }

    #[test]
    fn test_incremental_max_matches_full() {
        let mut image = Gray16Image::from_fn(30, 20, |x, y| {
            Luma([((x * 7919 + y * 104729) % 1000) as u16])
        });
        let original = image.clone();
        rank(&mut image, 3.0, RankFilterType::Max, &RankOptions::default());
        let kernel = Kernel::new(3.0);
        let k = kernel.k_radius() as i64;
        for y in 0..20_i64 {
            for x in 0..30_i64 {
                let mut expected = 0;
                let radii = kernel.line_radii.iter().enumerate();
                for (i, &(left, right)) in radii {
                    let yy = (y + i as i64 - k).clamp(0, 19) as u32;
                    for dx in left..=right {
                        let xx = (x + dx as i64).clamp(0, 29) as u32;
                        expected = expected.max(original.get_pixel(xx, yy)[0]);
                    }
                }
                assert_eq!(image.get_pixel(x as u32, y as u32)[0], expected);
            }
        }
    }

    #[test]
    fn test_mean_and_variance() {
        let mut image = Gray16Image::from_pixel(10, 10, Luma([500]));
        rank(&mut image, 2.0, RankFilterType::Mean, &RankOptions::default());
        assert!(image.pixels().all(|p| p[0] == 500));
        rank(&mut image, 2.0, RankFilterType::Variance,
             &RankOptions::default());
        assert!(image.pixels().all(|p| p[0] == 0));

        let mut image = spot_image(9, 0, 900);
        rank(&mut image, 1.0, RankFilterType::Mean, &RankOptions::default());
        assert_eq!(image.get_pixel(4, 4)[0], 100);
        assert_eq!(image.get_pixel(3, 5)[0], 100);
        assert_eq!(image.get_pixel(2, 2)[0], 0);
    }

    #[test]
    fn test_outliers() {
        let mut image = spot_image(7, 1000, 1030);
        let options = RankOptions{threshold: 50.0, ..RankOptions::default()};
        rank(&mut image, 1.0, RankFilterType::Outliers, &options);
        // Within threshold: kept.
        assert_eq!(image.get_pixel(3, 3)[0], 1030);

        let mut image = spot_image(7, 1000, 2000);
        rank(&mut image, 1.0, RankFilterType::Outliers, &options);
        assert_eq!(image.get_pixel(3, 3)[0], 1000);

        // Dark outliers only.
        let mut image = spot_image(7, 1000, 2000);
        let dark = RankOptions{which_outliers: Outliers::Dark, ..options};
        rank(&mut image, 1.0, RankFilterType::Outliers, &dark);
        assert_eq!(image.get_pixel(3, 3)[0], 2000);
    }

    #[test]
    fn test_open_and_top_hat() {
        let mut image = spot_image(11, 1000, 5000);
        rank(&mut image, 2.0, RankFilterType::Open, &RankOptions::default());
        assert!(image.pixels().all(|p| p[0] == 1000));

        let mut image = spot_image(11, 1000, 5000);
        rank(&mut image, 2.0, RankFilterType::TopHat, &RankOptions::default());
        assert_eq!(image.get_pixel(5, 5)[0], 4000);
        assert_eq!(image.get_pixel(0, 0)[0], 0);

        let mut image = spot_image(11, 5000, 1000);
        let light = RankOptions{light_background: true,
                                ..RankOptions::default()};
        rank(&mut image, 2.0, RankFilterType::TopHat, &light);
        assert_eq!(image.get_pixel(5, 5)[0], 65535 - 4000);
        assert_eq!(image.get_pixel(0, 0)[0], 65535);
    }

    #[test]
    fn test_remove_nan_is_identity() {
        let mut image = spot_image(5, 10, 20);
        let original = image.clone();
        rank(&mut image, 2.0, RankFilterType::RemoveNan,
             &RankOptions::default());
        assert_eq!(image, original);
    }
}  // mod tests.
