// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::commands::{check_kernel_size, Command};
use crate::context::ProcessContext;
use crate::error::CommandError;
use crate::object_list::ObjectList;
use crate::plane::ImagePlane;
use crate::rank_filter::{rank, RankFilterType, RankOptions};

/// Flattens uneven illumination by subtracting the median-filtered plane
/// (saturating at 0).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedianSubtractSettings {
    pub kernel_size: u32,
}

impl Default for MedianSubtractSettings {
    fn default() -> Self {
        MedianSubtractSettings{kernel_size: 5}
    }
}

impl Command for MedianSubtractSettings {
    fn execute(&self, _ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        check_kernel_size(self.kernel_size)?;
        let start = Instant::now();
        let pixels = image.pixels_mut();
        let mut median = pixels.clone();
        rank(&mut median, (self.kernel_size / 2) as f64,
             RankFilterType::Median, &RankOptions::default());
        for (p, m) in pixels.iter_mut().zip(median.iter()) {
            *p = p.saturating_sub(*m);
        }
        debug!("Median subtract k={} in {:?}", self.kernel_size,
               start.elapsed());
        Ok(())
    }
}

// mod tests.
