// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::classes::ClassRef;
use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::histogram_funcs::histogram_mode;
use crate::object_list::ObjectList;
use crate::plane::{ImagePlane, ImageRef};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidatorMode {
    #[default]
    InvalidateImage,
    InvalidateImagePlane,
    InvalidateImagePlaneClass,
}

/// Flags planes whose applied threshold sits too close to the background.
/// The background level is the most frequent value of `image_in` (by
/// default the unprocessed plane); a threshold below `background * factor`
/// raises [Validity::PossibleWrongThreshold].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdValidatorSettings {
    pub image_in: ImageRef,
    pub hist_min_threshold_filter_factor: f32,
    pub mode: ValidatorMode,
    /// Class flagged in [ValidatorMode::InvalidateImagePlaneClass].
    pub class_in: ClassRef,
}

impl Default for ThresholdValidatorSettings {
    fn default() -> Self {
        ThresholdValidatorSettings{image_in: ImageRef::default(),
                                   hist_min_threshold_filter_factor: 1.3,
                                   mode: ValidatorMode::InvalidateImage,
                                   class_in: ClassRef::Default}
    }
}

impl Command for ThresholdValidatorSettings {
    fn execute(&self, ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        if !image.is_binary() {
            return Err(CommandError::plane(
                Validity::Invalid,
                "threshold validator needs a thresholded plane"));
        }
        let original = ctx.load_image(&self.image_in, image)?;
        let mode = histogram_mode(&original.pixels());
        let factor = self.hist_min_threshold_filter_factor as f64;
        let filter = mode as f64 * factor;
        if (image.applied_min_threshold as f64) >= filter {
            return Ok(());
        }
        warn!("Threshold {} below {:.0} (mode {}) in {:?}",
              image.applied_min_threshold, filter, mode, ctx.image.path);
        match self.mode {
            ValidatorMode::InvalidateImage =>
                ctx.set_image_validity(Validity::PossibleWrongThreshold),
            ValidatorMode::InvalidateImagePlane =>
                ctx.set_plane_validity(Validity::PossibleWrongThreshold),
            ValidatorMode::InvalidateImagePlaneClass => {
                if let Some(class_id) = ctx.class_id(self.class_in) {
                    ctx.set_plane_class_validity(
                        class_id, Validity::PossibleWrongThreshold);
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;
    use crate::classes::ClassId;
    use crate::commands::threshold::ThresholdSettings;
    use crate::context::tests::Fixture;
    use crate::context::IterationContext;
    use crate::plane::{Gray16Image, ResolvedPlane};

    fn background_with_spot() -> Gray16Image {
        let mut pixels = Gray16Image::from_pixel(50, 50, Luma([1000]));
        pixels.put_pixel(25, 25, Luma([20000]));
        pixels
    }

    #[test]
    fn test_validator() {
        let fixture = Fixture::with_planes(vec![background_with_spot()]);
        let mut iteration = IterationContext::default();
        let mut ctx = fixture.context(&mut iteration);
        let mut objects = ObjectList::new();

        let validator = ThresholdValidatorSettings{
            mode: ValidatorMode::InvalidateImagePlaneClass,
            class_in: ClassRef::literal(4),
            ..ThresholdValidatorSettings::default()};
        let mut image = fixture.current();
        let err = validator.execute(&mut ctx, &mut image, &mut objects)
            .unwrap_err();
        assert_eq!(err.validity, Validity::Invalid);

        // 1200 < 1.3 * 1000.
        ThresholdSettings{threshold_min: 1200, ..ThresholdSettings::default()}
            .execute(&mut ctx, &mut image, &mut objects).unwrap();
        validator.execute(&mut ctx, &mut image, &mut objects).unwrap();
        assert!(ctx.iteration.validity
                .contains(Validity::PossibleWrongThreshold));
        let record = fixture.sink.image(fixture.image.image_id).unwrap();
        assert!(record.validity.is_empty());
        let flags = record.plane_validity.iter()
            .find(|p| p.plane == ResolvedPlane::new(0, 0, 0) &&
                  p.class_id == Some(ClassId(4)))
            .unwrap();
        assert!(flags.validity.contains(Validity::PossibleWrongThreshold));
    }

    #[test]
    fn test_threshold_high_enough() {
        let fixture = Fixture::with_planes(vec![background_with_spot()]);
        let mut iteration = IterationContext::default();
        let mut ctx = fixture.context(&mut iteration);
        let mut objects = ObjectList::new();
        let mut image = fixture.current();
        ThresholdSettings{threshold_min: 5000, ..ThresholdSettings::default()}
            .execute(&mut ctx, &mut image, &mut objects).unwrap();
        ThresholdValidatorSettings::default()
            .execute(&mut ctx, &mut image, &mut objects).unwrap();
        assert!(ctx.iteration.validity.is_empty());
    }
}  // mod tests.
