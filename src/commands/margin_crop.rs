// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::image_funcs::crop;
use crate::object_list::ObjectList;
use crate::plane::ImagePlane;

/// Cuts `margin` pixels off every side of the plane. The result is a copy
/// of the inner region.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarginCropSettings {
    pub margin: u32,
}

impl Command for MarginCropSettings {
    fn execute(&self, _ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        if self.margin == 0 {
            return Ok(());
        }
        let (width, height) = image.dimensions();
        let m = self.margin;
        if 2 * m >= width || 2 * m >= height {
            return Err(CommandError::plane(
                Validity::Invalid,
                format!("margin {} too large for {}x{} image", m, width,
                        height)));
        }
        let rect = Rect::at(m as i32, m as i32)
            .of_size(width - 2 * m, height - 2 * m);
        let cropped = crop(&image.pixels(), &rect);
        image.set_pixels(cropped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;
    use crate::context::tests::Fixture;
    use crate::context::IterationContext;
    use crate::plane::Gray16Image;

    #[test]
    fn test_margin_crop() {
        let mut pixels = Gray16Image::new(20, 10);
        pixels.put_pixel(3, 3, Luma([77]));
        let fixture = Fixture::with_planes(vec![pixels]);
        let mut iteration = IterationContext::default();
        let mut image = fixture.current();
        let mut ctx = fixture.context(&mut iteration);

        let settings = MarginCropSettings{margin: 3};
        settings.execute(&mut ctx, &mut image, &mut ObjectList::new())
            .unwrap();
        assert_eq!(image.dimensions(), (14, 4));
        assert_eq!(image.pixels().get_pixel(0, 0)[0], 77);

        let settings = MarginCropSettings{margin: 2};
        let err = settings.execute(&mut ctx, &mut image,
                                   &mut ObjectList::new()).unwrap_err();
        assert_eq!(err.validity, Validity::Invalid);
        assert_eq!(image.dimensions(), (14, 4));
    }
}  // mod tests.
