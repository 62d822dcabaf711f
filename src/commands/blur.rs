// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::Instant;

use image::Luma;
use imageproc::filter::gaussian_blur_f32;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::commands::{check_kernel_size, Command};
use crate::context::ProcessContext;
use crate::error::CommandError;
use crate::object_list::ObjectList;
use crate::plane::{Gray16Image, ImagePlane};
use crate::rank_filter::{rank, RankFilterType, RankOptions};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlurMode {
    #[default]
    Gaussian,
    /// Mean over a square kernel.
    Box,
    /// Median over a circular kernel of radius `kernel_size / 2`.
    Median,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlurSettings {
    pub mode: BlurMode,
    /// Odd kernel width in pixels.
    pub kernel_size: u32,
    /// Gaussian sigma; 0 derives it from the kernel size.
    pub sigma: f32,
    pub repeat: u32,
}

impl Default for BlurSettings {
    fn default() -> Self {
        BlurSettings{mode: BlurMode::Gaussian, kernel_size: 3, sigma: 0.0,
                     repeat: 1}
    }
}

impl BlurSettings {
    /// Sigma of the Gaussian. Without an explicit value the kernel covers
    /// about +-3 sigma, as in OpenCV's getGaussianKernel.
    pub fn gaussian_sigma(&self) -> f32 {
        if self.sigma > 0.0 {
            return self.sigma;
        }
        0.3 * ((self.kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
    }
}

/// Separable mean with edge pixels replicated.
pub fn box_blur(image: &Gray16Image, kernel_size: u32) -> Gray16Image {
    let (width, height) = image.dimensions();
    let r = (kernel_size / 2) as i64;
    let norm = kernel_size as f64;
    let clamp = |v: i64, n: u32| v.clamp(0, n as i64 - 1) as u32;

    let mut horizontal = vec![0.0_f64; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            for dx in -r..=r {
                let xs = clamp(x as i64 + dx, width);
                sum += image.get_pixel(xs, y)[0] as f64;
            }
            horizontal[(y * width + x) as usize] = sum / norm;
        }
    }
    Gray16Image::from_fn(width, height, |x, y| {
        let mut sum = 0.0;
        for dy in -r..=r {
            let yy = clamp(y as i64 + dy, height);
            sum += horizontal[(yy * width + x) as usize];
        }
        Luma([(sum / norm).round().clamp(0.0, 65535.0) as u16])
    })
}

impl Command for BlurSettings {
    fn execute(&self, _ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        check_kernel_size(self.kernel_size)?;
        let start = Instant::now();
        let pixels = image.pixels_mut();
        if pixels.width() == 0 || pixels.height() == 0 {
            return Ok(());
        }
        for _ in 0..self.repeat.max(1) {
            match self.mode {
                BlurMode::Gaussian => {
                    *pixels = gaussian_blur_f32(pixels, self.gaussian_sigma());
                },
                BlurMode::Box => {
                    *pixels = box_blur(pixels, self.kernel_size);
                },
                BlurMode::Median => {
                    rank(pixels, (self.kernel_size / 2) as f64,
                         RankFilterType::Median, &RankOptions::default());
                },
            }
        }
        debug!("{:?} blur k={} in {:?}", self.mode, self.kernel_size,
               start.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::context::tests::Fixture;
    use crate::context::IterationContext;
    use crate::error::Validity;

    fn blurred(settings: &BlurSettings, pixels: Gray16Image)
               -> Result<Gray16Image, CommandError> {
        let fixture = Fixture::with_planes(vec![pixels]);
        let mut iteration = IterationContext::default();
        let mut image = fixture.current();
        let mut ctx = fixture.context(&mut iteration);
        settings.execute(&mut ctx, &mut image, &mut ObjectList::new())?;
        Ok(image.pixels().into_owned())
    }

    fn spike() -> Gray16Image {
        let mut image = Gray16Image::from_pixel(9, 9, Luma([1000]));
        image.put_pixel(4, 4, Luma([10000]));
        image
    }

    #[test]
    fn test_sigma_from_kernel() {
        let settings = BlurSettings{kernel_size: 3, ..BlurSettings::default()};
        assert_abs_diff_eq!(settings.gaussian_sigma(), 0.8, epsilon = 1e-6);
        let settings = BlurSettings{kernel_size: 7, sigma: 2.5,
                                    ..BlurSettings::default()};
        assert_eq!(settings.gaussian_sigma(), 2.5);
    }

    #[test]
    fn test_box() {
        let settings = BlurSettings{mode: BlurMode::Box,
                                    ..BlurSettings::default()};
        let result = blurred(&settings, spike()).unwrap();
        assert_eq!(result.get_pixel(4, 4)[0], 2000);
        assert_eq!(result.get_pixel(3, 3)[0], 2000);
        assert_eq!(result.get_pixel(0, 0)[0], 1000);
    }

    #[test]
    fn test_gaussian_spreads_spike() {
        let result = blurred(&BlurSettings::default(), spike()).unwrap();
        let centre = result.get_pixel(4, 4)[0];
        assert!(centre < 10000 && centre > 1000);
        assert!(result.get_pixel(3, 4)[0] > 1000);
        assert!(result.get_pixel(0, 0)[0].abs_diff(1000) <= 1);
    }

    #[test]
    fn test_median_removes_spike() {
        let settings = BlurSettings{mode: BlurMode::Median,
                                    ..BlurSettings::default()};
        let result = blurred(&settings, spike()).unwrap();
        assert_eq!(result.get_pixel(4, 4)[0], 1000);
    }

    #[test]
    fn test_even_kernel() {
        let settings = BlurSettings{kernel_size: 4, ..BlurSettings::default()};
        let err = blurred(&settings, spike()).unwrap_err();
        assert_eq!(err.validity, Validity::InvalidKernelSize);
    }
}  // mod tests.
