// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::Instant;

use imageproc::edges::canny;
use imageproc::gradients::sobel_gradients;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::image_funcs::{from_binary8, to_gray8_scaled};
use crate::object_list::ObjectList;
use crate::plane::ImagePlane;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeDetectionMode {
    /// Gradient magnitude.
    #[default]
    Sobel,
    /// Thin binary edges.
    Canny,
}

/// Both modes work on the plane rescaled to 8 bit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeDetectionSettings {
    pub mode: EdgeDetectionMode,
    /// Canny hysteresis thresholds, on the 8-bit gradient.
    pub threshold_low: f32,
    pub threshold_high: f32,
}

impl Default for EdgeDetectionSettings {
    fn default() -> Self {
        EdgeDetectionSettings{mode: EdgeDetectionMode::Sobel,
                              threshold_low: 50.0, threshold_high: 100.0}
    }
}

impl Command for EdgeDetectionSettings {
    fn execute(&self, _ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        if self.threshold_low > self.threshold_high {
            return Err(CommandError::plane(
                Validity::Invalid,
                format!("canny thresholds {} > {}", self.threshold_low,
                        self.threshold_high)));
        }
        let start = Instant::now();
        let gray8 = to_gray8_scaled(&image.pixels());
        match self.mode {
            EdgeDetectionMode::Sobel => {
                image.set_pixels(sobel_gradients(&gray8));
                image.clear_binary();
            },
            EdgeDetectionMode::Canny => {
                let edges = canny(&gray8, self.threshold_low,
                                  self.threshold_high);
                image.set_pixels(from_binary8(&edges));
                image.set_binary(u16::MAX, u16::MAX);
            },
        }
        debug!("{:?} edges in {:?}", self.mode, start.elapsed());
        Ok(())
    }
}

// mod tests.
