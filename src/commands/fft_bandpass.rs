// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Band pass filter in the frequency domain. The plane is mirrored into a
//! square power of two canvas so the transform does not wrap around, the
//! spectrum is damped with Gaussian factors and the result is cropped back.

use std::f64::consts::PI;
use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::commands::enhance_contrast::stretch_histogram;
use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::object_list::ObjectList;
use crate::plane::{Gray16Image, ImagePlane};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StripeMode {
    #[default]
    None,
    Horizontal,
    Vertical,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FftBandpassSettings {
    /// Structures down to this size (pixels) are suppressed.
    pub filter_large_structure: f64,
    /// Structures up to this size (pixels) are suppressed.
    pub filter_small_structure: f64,
    pub stripes: StripeMode,
    /// Percent; higher values widen the stripe filter.
    pub tolerance_of_direction: f64,
    pub do_scaling: bool,
    pub do_saturation: bool,
}

impl Default for FftBandpassSettings {
    fn default() -> Self {
        FftBandpassSettings{filter_large_structure: 40.0,
                            filter_small_structure: 3.0,
                            stripes: StripeMode::None,
                            tolerance_of_direction: 5.0,
                            do_scaling: true, do_saturation: true}
    }
}

// In place radix-2 transform of one line; `re.len()` is a power of two.
fn fft_line(re: &mut [f64], im: &mut [f64], inverse: bool) {
    let n = re.len();
    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            re.swap(i, j);
            im.swap(i, j);
        }
    }
    let sign = if inverse { 1.0 } else { -1.0 };
    let mut len = 2;
    while len <= n {
        let angle = sign * 2.0 * PI / len as f64;
        let (w_re, w_im) = (angle.cos(), angle.sin());
        for start in (0..n).step_by(len) {
            let (mut c_re, mut c_im) = (1.0, 0.0);
            for k in 0..len / 2 {
                let (a, b) = (start + k, start + k + len / 2);
                let t_re = re[b] * c_re - im[b] * c_im;
                let t_im = re[b] * c_im + im[b] * c_re;
                re[b] = re[a] - t_re;
                im[b] = im[a] - t_im;
                re[a] += t_re;
                im[a] += t_im;
                let next = c_re * w_re - c_im * w_im;
                c_im = c_re * w_im + c_im * w_re;
                c_re = next;
            }
        }
        len <<= 1;
    }
    if inverse {
        for v in re.iter_mut().chain(im.iter_mut()) {
            *v /= n as f64;
        }
    }
}

/// Two dimensional transform of an n x n canvas stored row major.
fn fft_2d(re: &mut [f64], im: &mut [f64], n: usize, inverse: bool) {
    for row in 0..n {
        let range = row * n..(row + 1) * n;
        fft_line(&mut re[range.clone()], &mut im[range], inverse);
    }
    let mut col_re = vec![0.0; n];
    let mut col_im = vec![0.0; n];
    for col in 0..n {
        for row in 0..n {
            col_re[row] = re[row * n + col];
            col_im[row] = im[row * n + col];
        }
        fft_line(&mut col_re, &mut col_im, inverse);
        for row in 0..n {
            re[row * n + col] = col_re[row];
            im[row * n + col] = col_im[row];
        }
    }
}

// Index into a mirrored repetition of 0..size.
fn mirrored(d: i64, size: i64) -> u32 {
    let m = d.rem_euclid(2 * size);
    (if m < size { m } else { 2 * size - 1 - m }) as u32
}

impl FftBandpassSettings {
    /// Gain of the frequency (row, col) of an n x n spectrum.
    fn factor(&self, row: usize, col: usize, n: usize) -> f64 {
        if row == 0 && col == 0 {
            return 1.0;
        }
        let scale = |size: f64| (2.0 * size / n as f64).powi(2);
        let (large, small) = (scale(self.filter_large_structure),
                              scale(self.filter_small_structure));
        let stripes = ((100.0 - self.tolerance_of_direction) / 100.0).powi(2);
        let j = row.min(n - row) as f64;
        let k = col.min(n - col) as f64;
        let g = |f: f64, s: f64| (-(f * f) * s).exp();
        let mut factor = (1.0 - g(j, large) * g(k, large)) *
            g(j, small) * g(k, small);
        match self.stripes {
            StripeMode::None => (),
            StripeMode::Horizontal => factor *= 1.0 - g(k, stripes),
            StripeMode::Vertical => factor *= 1.0 - g(j, stripes),
        }
        factor
    }

    pub fn filter(&self, image: &Gray16Image) -> Gray16Image {
        let (width, height) = image.dimensions();
        let longest = width.max(height) as f64;
        let mut n = 2_usize;
        while (n as f64) < 1.5 * longest {
            n *= 2;
        }
        let x0 = ((n as f64 - width as f64) / 2.0).round() as i64;
        let y0 = ((n as f64 - height as f64) / 2.0).round() as i64;

        let mut re = vec![0.0; n * n];
        let mut im = vec![0.0; n * n];
        for y in 0..n {
            let sy = mirrored(y as i64 - y0, height as i64);
            for x in 0..n {
                let sx = mirrored(x as i64 - x0, width as i64);
                re[y * n + x] = image.get_pixel(sx, sy)[0] as f64;
            }
        }
        fft_2d(&mut re, &mut im, n, false);
        for row in 0..n {
            for col in 0..n {
                let factor = self.factor(row, col, n);
                re[row * n + col] *= factor;
                im[row * n + col] *= factor;
            }
        }
        fft_2d(&mut re, &mut im, n, true);

        let mut result = Gray16Image::from_fn(width, height, |x, y| {
            let i = (y as i64 + y0) as usize * n + (x as i64 + x0) as usize;
            image::Luma([re[i].round().clamp(0.0, 65535.0) as u16])
        });
        if self.do_scaling {
            let saturated = if self.do_saturation { 1.0 } else { 0.0 };
            stretch_histogram(&mut result, saturated);
        }
        result
    }
}

impl Command for FftBandpassSettings {
    fn execute(&self, _ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        if !(self.filter_large_structure >= 0.0 &&
             self.filter_small_structure >= 0.0) {
            return Err(CommandError::plane(
                Validity::InvalidKernelSize,
                format!("band pass {} / {}", self.filter_large_structure,
                        self.filter_small_structure)));
        }
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(());
        }
        let start = Instant::now();
        let filtered = self.filter(&image.pixels());
        image.set_pixels(filtered);
        debug!("FFT band pass {}x{} in {:?}", width, height, start.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use image::Luma;

    use super::*;
    use crate::context::tests::Fixture;
    use crate::context::IterationContext;

    fn unscaled(large: f64, small: f64) -> FftBandpassSettings {
        FftBandpassSettings{filter_large_structure: large,
                            filter_small_structure: small,
                            do_scaling: false,
                            ..FftBandpassSettings::default()}
    }

    #[test]
    fn test_transform_round_trip() {
        let mut re: Vec<f64> = (0..16).map(|i| (i * i % 7) as f64).collect();
        let original = re.clone();
        let mut im = vec![0.0; 16];
        fft_2d(&mut re, &mut im, 4, false);
        // The DC term is the sum.
        assert_abs_diff_eq!(re[0], original.iter().sum::<f64>(),
                            epsilon = 1e-9);
        fft_2d(&mut re, &mut im, 4, true);
        for (a, b) in re.iter().zip(&original) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_flat_image_keeps_mean() {
        let image = Gray16Image::from_pixel(30, 20, Luma([1000]));
        let result = unscaled(40.0, 3.0).filter(&image);
        assert!(result.iter().all(|&v| v.abs_diff(1000) <= 1));
    }

    #[test]
    fn test_removes_gradient_keeps_spot() {
        let mut image = Gray16Image::from_fn(64, 64, |x, _| {
            Luma([1000 + 400 * x as u16])
        });
        for y in 30..34 {
            for x in 30..34 {
                let v = image.get_pixel(x, y)[0];
                image.put_pixel(x, y, Luma([v + 20000]));
            }
        }
        let result = unscaled(8.0, 0.0).filter(&image);
        let before = image.get_pixel(61, 10)[0] - image.get_pixel(2, 10)[0];
        let after = result.get_pixel(61, 10)[0] as i32 -
            result.get_pixel(2, 10)[0] as i32;
        assert!((after.abs() as u16) < before / 4, "{} vs {}", after, before);
        let spot = result.get_pixel(31, 31)[0] as i32;
        let beside = result.get_pixel(31, 20)[0] as i32;
        assert!(spot > beside + 5000, "{} vs {}", spot, beside);
    }

    #[test]
    fn test_stripe_factors() {
        let settings = FftBandpassSettings{
            filter_large_structure: 1e4, filter_small_structure: 0.0,
            stripes: StripeMode::Horizontal,
            ..FftBandpassSettings::default()};
        // Column zero frequencies are removed, the mean is kept.
        assert_eq!(settings.factor(0, 0, 64), 1.0);
        assert_eq!(settings.factor(5, 0, 64), 0.0);
        assert!(settings.factor(0, 5, 64) > 0.99);
        let vertical = FftBandpassSettings{stripes: StripeMode::Vertical,
                                           ..settings};
        assert_eq!(vertical.factor(0, 5, 64), 0.0);
    }

    #[test]
    fn test_execute() {
        let pixels = Gray16Image::from_fn(40, 40, |x, y| {
            Luma([((x * 37 + y * 11) % 200) as u16 * 100])
        });
        let fixture = Fixture::with_planes(vec![pixels]);
        let mut iteration = IterationContext::default();
        let mut image = fixture.current();
        let mut ctx = fixture.context(&mut iteration);
        FftBandpassSettings::default()
            .execute(&mut ctx, &mut image, &mut ObjectList::new()).unwrap();
        assert_eq!(image.dimensions(), (40, 40));
        assert_eq!(image.pixels().iter().copied().max(), Some(65535));

        let settings = FftBandpassSettings{filter_small_structure: f64::NAN,
            ..FftBandpassSettings::default()};
        assert!(settings.execute(&mut ctx, &mut image,
                                 &mut ObjectList::new()).is_err());
    }
}  // mod tests.
