// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::object_list::ObjectList;
use crate::plane::{Gray16Image, ImagePlane};
use crate::rank_filter::{rank, RankFilterType, RankOptions};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdaptiveMethod {
    /// Local mid gray, unless the local contrast is too low to decide.
    #[default]
    Bernsen,
    /// Object where the pixel is closer to the local maximum than to the
    /// local minimum.
    Contrast,
    Mean,
    Median,
    MidGray,
}

/// Local thresholding: each pixel is compared with a statistic of its
/// neighbourhood of radius `radius`. Object pixels become 65535.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdAdaptiveSettings {
    pub method: AdaptiveMethod,
    pub radius: f64,
    /// Bernsen only: local contrast below this is a uniform region.
    pub contrast_threshold: u16,
    /// Subtracted from the local statistic (Mean, Median, MidGray).
    pub threshold_offset: i32,
}

impl Default for ThresholdAdaptiveSettings {
    fn default() -> Self {
        ThresholdAdaptiveSettings{method: AdaptiveMethod::Bernsen,
                                  radius: 15.0, contrast_threshold: 15,
                                  threshold_offset: 0}
    }
}

fn ranked(image: &Gray16Image, radius: f64, filter: RankFilterType)
          -> Gray16Image {
    let mut result = image.clone();
    rank(&mut result, radius, filter, &RankOptions::default());
    result
}

impl ThresholdAdaptiveSettings {
    /// Binary result of the method on `image`.
    pub fn apply(&self, image: &Gray16Image) -> Gray16Image {
        let offset = self.threshold_offset as i64;
        let mut result = image.clone();
        match self.method {
            AdaptiveMethod::Bernsen | AdaptiveMethod::Contrast |
            AdaptiveMethod::MidGray => {
                let max = ranked(image, self.radius, RankFilterType::Max);
                let min = ranked(image, self.radius, RankFilterType::Min);
                let locals = max.as_raw().iter().zip(min.as_raw());
                for (r, (&hi, &lo)) in result.iter_mut().zip(locals) {
                    let (v, hi, lo) = (*r as i64, hi as i64, lo as i64);
                    let mid = (hi + lo) / 2;
                    let on = match self.method {
                        AdaptiveMethod::Bernsen => {
                            if hi - lo < self.contrast_threshold as i64 {
                                mid >= 32768
                            } else {
                                v >= mid
                            }
                        },
                        AdaptiveMethod::Contrast =>
                            (hi - v).abs() <= (v - lo).abs() && v != 0,
                        _ => v > mid - offset,
                    };
                    *r = if on { u16::MAX } else { 0 };
                }
            },
            AdaptiveMethod::Mean | AdaptiveMethod::Median => {
                let filter = if self.method == AdaptiveMethod::Mean {
                    RankFilterType::Mean
                } else {
                    RankFilterType::Median
                };
                let local = ranked(image, self.radius, filter);
                for (r, &l) in result.iter_mut().zip(local.as_raw()) {
                    let on = *r as i64 > l as i64 - offset;
                    *r = if on { u16::MAX } else { 0 };
                }
            },
        }
        result
    }
}

impl Command for ThresholdAdaptiveSettings {
    fn execute(&self, _ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        if self.radius.is_nan() || self.radius < 0.0 {
            return Err(CommandError::plane(
                Validity::InvalidKernelSize,
                format!("adaptive threshold radius {}", self.radius)));
        }
        let start = Instant::now();
        let binary = self.apply(&image.pixels());
        image.set_pixels(binary);
        image.set_binary(0, u16::MAX);
        debug!("Adaptive threshold {:?} radius {} in {:?}",
               self.method, self.radius, start.elapsed());
        Ok(())
    }
}

// mod tests.
