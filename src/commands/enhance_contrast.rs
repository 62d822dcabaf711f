// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::image_funcs::min_max;
use crate::object_list::ObjectList;
use crate::plane::{Gray16Image, ImagePlane};

/// Stretches or equalizes the histogram of the plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceContrastSettings {
    /// Percentage of pixels allowed to saturate, split over both ends.
    pub saturated_pixels: f64,
    pub normalize: bool,
    pub equalize_histogram: bool,
}

impl Default for EnhanceContrastSettings {
    fn default() -> Self {
        EnhanceContrastSettings{saturated_pixels: 0.35, normalize: false,
                                equalize_histogram: false}
    }
}

fn full_histogram(image: &Gray16Image) -> Vec<u64> {
    let mut histogram = vec![0_u64; 65536];
    for &v in image.as_raw() {
        histogram[v as usize] += 1;
    }
    histogram
}

/// Linear map of [min, max] onto the full range; values outside clip.
fn set_min_max(image: &mut Gray16Image, min: u16, max: u16) {
    if max <= min {
        return;
    }
    let (min, max) = (min as f64, max as f64);
    for v in image.iter_mut() {
        let scaled = (*v as f64 - min) * 65535.0 / (max - min);
        *v = scaled.clamp(0.0, 65535.0) as u16;
    }
}

/// Lowest and highest levels once `saturated` percent of the pixels are
/// cut off, half at each end.
fn saturated_range(histogram: &[u64], n_pixels: u64, saturated: f64)
                   -> (u16, u16) {
    let threshold = if saturated > 0.0 {
        (n_pixels as f64 * saturated / 200.0) as u64
    } else {
        0
    };
    let mut count = 0;
    let mut low = histogram.len() - 1;
    for (i, &c) in histogram.iter().enumerate() {
        count += c;
        if count > threshold {
            low = i;
            break;
        }
    }
    count = 0;
    let mut high = 0;
    for (i, &c) in histogram.iter().enumerate().rev() {
        count += c;
        if count > threshold {
            high = i;
            break;
        }
    }
    (low as u16, high as u16)
}

/// Stretches the histogram so that `saturated` percent of the pixels
/// saturate. Does nothing to an image with a single level.
pub fn stretch_histogram(image: &mut Gray16Image, saturated: f64) {
    let histogram = full_histogram(image);
    let n_pixels = image.as_raw().len() as u64;
    let (low, high) = saturated_range(&histogram, n_pixels, saturated);
    if high > low {
        set_min_max(image, low, high);
    }
}

// Square root weight; counts below 2 are used as is.
fn weighted(histogram: &[u64], i: usize) -> f64 {
    let h = histogram[i] as f64;
    if h < 2.0 { h } else { h.sqrt() }
}

/// Histogram equalization with square root weights.
pub fn equalize(image: &mut Gray16Image) {
    let histogram = full_histogram(image);
    let max = histogram.len() - 1;
    let mut sum = weighted(&histogram, 0);
    for i in 1..max {
        sum += 2.0 * weighted(&histogram, i);
    }
    sum += weighted(&histogram, max);
    if sum == 0.0 {
        return;
    }
    let scale = max as f64 / sum;
    let mut lut = vec![0_u16; histogram.len()];
    let mut sum = weighted(&histogram, 0);
    for (i, entry) in lut.iter_mut().enumerate().take(max).skip(1) {
        let delta = weighted(&histogram, i);
        sum += delta;
        *entry = (sum * scale).round().min(max as f64) as u16;
        sum += delta;
    }
    lut[max] = max as u16;
    for v in image.iter_mut() {
        *v = lut[*v as usize];
    }
    let (low, high) = min_max(image);
    set_min_max(image, low, high);
}

impl Command for EnhanceContrastSettings {
    fn execute(&self, _ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        if !(0.0..100.0).contains(&self.saturated_pixels) {
            return Err(CommandError::plane(
                Validity::Invalid,
                format!("saturated pixels {}%", self.saturated_pixels)));
        }
        let pixels = image.pixels_mut();
        if self.equalize_histogram {
            equalize(pixels);
        } else {
            stretch_histogram(pixels, self.saturated_pixels);
        }
        if self.normalize {
            let (_, max) = min_max(pixels);
            set_min_max(pixels, 0, max);
        }
        Ok(())
    }
}

// mod tests.
