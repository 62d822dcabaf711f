// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use serde::{Deserialize, Serialize};

use crate::classes::{ClassId, ClassRef};
use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::CommandError;
use crate::object_list::ObjectList;
use crate::plane::{Gray16Image, ImagePlane};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CombineFunction {
    /// The first mask alone.
    #[default]
    None,
    /// Inverse of the first mask.
    Not,
    And,
    Or,
    Xor,
    /// First and not second.
    AndNot,
}

/// Paints the masks of `classes_in` into a binary plane, optionally combined
/// with the masks of `classes_in_second`. The result replaces the current
/// plane.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectsToImageSettings {
    pub function: CombineFunction,
    pub classes_in: Vec<ClassRef>,
    pub classes_in_second: Vec<ClassRef>,
}

fn rasterize(objects: &ObjectList, classes: impl IntoIterator<Item = ClassId>,
             width: u32, height: u32) -> Gray16Image {
    let mut image = Gray16Image::new(width, height);
    for class_id in classes {
        if let Some(index) = objects.index(class_id) {
            index.create_binary_image(&mut image, None);
        }
    }
    image
}

/// Pixel-wise combination of two binary images.
pub fn combine(first: &Gray16Image, second: &Gray16Image,
               function: CombineFunction) -> Gray16Image {
    let mut result = first.clone();
    for (r, &b) in result.iter_mut().zip(second.as_raw()) {
        let (a, b) = (*r > 0, b > 0);
        let on = match function {
            CombineFunction::None => a,
            CombineFunction::Not => !a,
            CombineFunction::And => a && b,
            CombineFunction::Or => a || b,
            CombineFunction::Xor => a != b,
            CombineFunction::AndNot => a && !b,
        };
        *r = if on { u16::MAX } else { 0 };
    }
    result
}

impl Command for ObjectsToImageSettings {
    fn execute(&self, ctx: &mut ProcessContext, image: &mut ImagePlane,
               objects: &mut ObjectList) -> Result<(), CommandError> {
        let (width, height) = image.dimensions();
        let first = rasterize(objects, ctx.class_ids(&self.classes_in),
                              width, height);
        let second = match self.function {
            CombineFunction::None | CombineFunction::Not =>
                Gray16Image::new(width, height),
            _ => rasterize(objects, ctx.class_ids(&self.classes_in_second),
                           width, height),
        };
        let (min, max) = (image.applied_min_threshold,
                          image.applied_max_threshold);
        image.set_pixels(combine(&first, &second, self.function));
        image.set_binary(min, max);
        Ok(())
    }
}

// mod tests.
