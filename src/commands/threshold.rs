// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::Instant;

use image::Luma;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::histogram_funcs::{
    bin_to_value, histogram_256, li_threshold, min_error_threshold,
    moments_threshold, otsu_threshold, renyi_entropy_threshold,
    triangle_threshold};
use crate::object_list::ObjectList;
use crate::plane::{Gray16Image, ImagePlane};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdMethod {
    /// `threshold_min` is used as is.
    #[default]
    Manual,
    Li,
    MinError,
    Triangle,
    Otsu,
    Moments,
    RenyiEntropy,
}

/// Binarizes the plane: pixels in (min, max] become 65535, all others 0.
/// For the automatic methods `min` is the computed threshold, floored by
/// `threshold_min`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSettings {
    pub method: ThresholdMethod,
    pub threshold_min: u16,
    pub threshold_max: u16,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        ThresholdSettings{method: ThresholdMethod::Manual, threshold_min: 0,
                          threshold_max: u16::MAX}
    }
}

impl ThresholdSettings {
    /// The lower bound of the band for `image`.
    pub fn threshold_for(&self, image: &Gray16Image) -> u16 {
        let method: fn(&[u32; 256]) -> u8 = match self.method {
            ThresholdMethod::Manual => return self.clamped(0),
            ThresholdMethod::Li => li_threshold,
            ThresholdMethod::MinError => min_error_threshold,
            ThresholdMethod::Triangle => triangle_threshold,
            ThresholdMethod::Otsu => otsu_threshold,
            ThresholdMethod::Moments => moments_threshold,
            ThresholdMethod::RenyiEntropy => renyi_entropy_threshold,
        };
        let (histogram, min, max) = histogram_256(image);
        // The method's bin is the last one below the threshold.
        self.clamped(bin_to_value(method(&histogram) as u32 + 1, min, max))
    }

    fn clamped(&self, value: u16) -> u16 {
        value.max(self.threshold_min).min(self.threshold_max)
    }
}

impl Command for ThresholdSettings {
    fn execute(&self, ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        let start = Instant::now();
        let pixels = image.pixels_mut();
        let threshold_min = self.threshold_for(pixels);
        let threshold_max = self.threshold_max;
        let mut foreground = 0_u64;
        for p in pixels.pixels_mut() {
            let on = p[0] > threshold_min && p[0] <= threshold_max;
            if on {
                foreground += 1;
            }
            *p = Luma([if on { u16::MAX } else { 0 }]);
        }
        image.set_binary(threshold_min, threshold_max);
        debug!("{:?} threshold {}..{} in {:?}", self.method, threshold_min,
               threshold_max, start.elapsed());
        if foreground == 0 {
            ctx.set_plane_validity(Validity::EmptyMask);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::disc_image;
    use crate::context::tests::Fixture;
    use crate::context::IterationContext;

    fn run(settings: &ThresholdSettings, pixels: Gray16Image)
           -> (ImagePlane, IterationContext) {
        let fixture = Fixture::with_planes(vec![pixels]);
        let mut iteration = IterationContext::default();
        let mut image = fixture.current();
        let mut ctx = fixture.context(&mut iteration);
        settings.execute(&mut ctx, &mut image, &mut ObjectList::new())
            .unwrap();
        (image, iteration)
    }

    #[test]
    fn test_manual() {
        let settings = ThresholdSettings{threshold_min: 1000,
                                         ..ThresholdSettings::default()};
        let (image, iteration) = run(&settings,
                                     disc_image(100, 100, &[(50, 50, 4)]));
        assert!(image.is_binary());
        assert_eq!(image.applied_min_threshold, 1000);
        assert_eq!(image.applied_max_threshold, u16::MAX);
        let pixels = image.pixels();
        assert_eq!(pixels.get_pixel(50, 50)[0], u16::MAX);
        assert_eq!(pixels.get_pixel(10, 10)[0], 0);
        let count = pixels.pixels().filter(|p| p[0] > 0).count();
        assert_eq!(count, 49);
        assert!(iteration.validity.is_empty());
    }

    #[test]
    fn test_band() {
        let mut pixels = Gray16Image::new(3, 1);
        pixels.put_pixel(0, 0, Luma([100]));
        pixels.put_pixel(1, 0, Luma([500]));
        pixels.put_pixel(2, 0, Luma([900]));
        let settings = ThresholdSettings{threshold_min: 100,
                                         threshold_max: 500,
                                         ..ThresholdSettings::default()};
        let (image, _) = run(&settings, pixels);
        let result: Vec<u16> = image.pixels().as_raw().clone();
        assert_eq!(result, vec![0, u16::MAX, 0]);
    }

    #[test]
    fn test_triangle_on_uniform_image() {
        let settings = ThresholdSettings{method: ThresholdMethod::Triangle,
                                         ..ThresholdSettings::default()};
        let (image, iteration) = run(
            &settings, Gray16Image::from_pixel(20, 20, Luma([700])));
        assert_eq!(image.applied_min_threshold, 700);
        assert!(image.pixels().pixels().all(|p| p[0] == 0));
        assert!(iteration.validity.contains(Validity::EmptyMask));
    }

    #[test]
    fn test_auto_threshold_separates_disc() {
        for method in [ThresholdMethod::Triangle, ThresholdMethod::Otsu,
                       ThresholdMethod::Li, ThresholdMethod::MinError,
                       ThresholdMethod::Moments,
                       ThresholdMethod::RenyiEntropy] {
            let settings = ThresholdSettings{method,
                                             ..ThresholdSettings::default()};
            let pixels = disc_image(100, 100, &[(50, 50, 10)]);
            let t = settings.threshold_for(&pixels);
            assert!(t < 30000, "{:?} gave {}", method, t);
            let (image, _) = run(&settings, pixels);
            assert_eq!(image.pixels().get_pixel(50, 50)[0], u16::MAX);
            assert_eq!(image.pixels().get_pixel(5, 5)[0], 0);
        }
    }

    #[test]
    fn test_floor() {
        let settings = ThresholdSettings{method: ThresholdMethod::Otsu,
                                         threshold_min: 40000,
                                         ..ThresholdSettings::default()};
        let pixels = disc_image(100, 100, &[(50, 50, 10)]);
        assert_eq!(settings.threshold_for(&pixels), 40000);
    }
}  // mod tests.
