// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::context::ProcessContext;
use crate::edm::watershed;
use crate::error::CommandError;
use crate::image_funcs::{from_binary8, to_binary8};
use crate::object_list::ObjectList;
use crate::plane::ImagePlane;

/// Separates touching particles of the foreground (non-zero pixels) by one
/// pixel wide background lines.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatershedSettings {}

impl Command for WatershedSettings {
    fn execute(&self, _ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        let mask = to_binary8(&image.pixels());
        let split = watershed(&mask);
        let (min, max) = (image.applied_min_threshold,
                          image.applied_max_threshold);
        image.set_pixels(from_binary8(&split));
        image.set_binary(min, max);
        Ok(())
    }
}

// mod tests.
