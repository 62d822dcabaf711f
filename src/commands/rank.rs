// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::object_list::ObjectList;
use crate::plane::ImagePlane;
use crate::rank_filter::{rank, Outliers, RankFilterType, RankOptions};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankFilterSettings {
    pub filter: RankFilterType,
    pub radius: f64,
    /// Outliers only.
    pub threshold: f32,
    pub which_outliers: Outliers,
    /// Top hat only.
    pub light_background: bool,
    pub dont_subtract: bool,
}

impl Default for RankFilterSettings {
    fn default() -> Self {
        let options = RankOptions::default();
        RankFilterSettings{filter: RankFilterType::Median, radius: 2.0,
                           threshold: options.threshold,
                           which_outliers: options.which_outliers,
                           light_background: options.light_background,
                           dont_subtract: options.dont_subtract}
    }
}

impl Command for RankFilterSettings {
    fn execute(&self, _ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        if self.radius.is_nan() || self.radius < 0.0 {
            return Err(CommandError::plane(
                Validity::InvalidKernelSize,
                format!("rank filter radius {}", self.radius)));
        }
        let options = RankOptions{which_outliers: self.which_outliers,
                                  threshold: self.threshold,
                                  light_background: self.light_background,
                                  dont_subtract: self.dont_subtract};
        rank(image.pixels_mut(), self.radius, self.filter, &options);
        Ok(())
    }
}

// mod tests.
