// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::Instant;

use image::GrayImage;
use imageproc::contours::BorderType;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::context::ProcessContext;
use crate::contour_funcs::{all_contours, fill_contour_mut};
use crate::error::CommandError;
use crate::image_funcs::{from_binary8, to_binary8};
use crate::object_list::ObjectList;
use crate::plane::ImagePlane;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillHolesMode {
    /// Every hole is filled; objects nested inside a hole are absorbed.
    #[default]
    Outer,
    /// Only the holes remain as foreground.
    Inner,
    /// Holes are filled unless another object sits inside them.
    InnerAndOuter,
}

/// Works on the foreground (non-zero pixels) of the plane; the result is
/// binary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillHolesSettings {
    pub mode: FillHolesMode,
}

pub fn fill_holes(mask: &GrayImage, mode: FillHolesMode) -> GrayImage {
    let contours = all_contours(mask);
    let mut holes = GrayImage::new(mask.width(), mask.height());
    for (i, contour) in contours.iter().enumerate() {
        if contour.border_type != BorderType::Hole {
            continue;
        }
        if mode == FillHolesMode::InnerAndOuter &&
            contours.iter().any(|c| c.parent == Some(i))
        {
            continue;
        }
        fill_contour_mut(&mut holes, &contour.points, (0, 0));
    }
    let mut result = mask.clone();
    for (r, (&m, &h)) in result.iter_mut()
        .zip(mask.as_raw().iter().zip(holes.as_raw()))
    {
        let hole = h > 0 && m == 0;
        *r = match mode {
            FillHolesMode::Inner => if hole { 255 } else { 0 },
            _ => if m > 0 || hole { 255 } else { 0 },
        };
    }
    result
}

impl Command for FillHolesSettings {
    fn execute(&self, _ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        let start = Instant::now();
        let mask = to_binary8(&image.pixels());
        let filled = fill_holes(&mask, self.mode);
        let (min, max) = (image.applied_min_threshold,
                          image.applied_max_threshold);
        image.set_pixels(from_binary8(&filled));
        image.set_binary(min, max);
        debug!("Fill holes {:?} in {:?}", self.mode, start.elapsed());
        Ok(())
    }
}

// mod tests.
