// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::object_list::ObjectList;
use crate::plane::{Gray16Image, ImagePlane, PlaneData, Rgb16Image};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrayscaleMode {
    /// Mean of the three channels.
    Linear,
    /// ITU-R 601 luminance.
    #[default]
    Human,
}

/// Hue in degrees (0..360), saturation and value in 0..=255.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HsvPoint {
    pub hue: f64,
    pub sat: f64,
    pub val: f64,
}

/// Colours inside the hue/saturation triangle a, b, c with a value in
/// [a.val, c.val].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorRange {
    pub point_a: HsvPoint,
    pub point_b: HsvPoint,
    pub point_c: HsvPoint,
}

impl ColorRange {
    pub fn contains(&self, hsv: HsvPoint) -> bool {
        let (lo, hi) = (self.point_a.val.min(self.point_c.val),
                        self.point_a.val.max(self.point_c.val));
        if hsv.val < lo || hsv.val > hi {
            return false;
        }
        let (a, b, c) = (self.point_a, self.point_b, self.point_c);
        let cross = |p: HsvPoint, q: HsvPoint| {
            (q.hue - p.hue) * (hsv.sat - p.sat) -
                (q.sat - p.sat) * (hsv.hue - p.hue)
        };
        let (d1, d2, d3) = (cross(a, b), cross(b, c), cross(c, a));
        let negative = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
        let positive = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
        !(negative && positive)
    }
}

/// Keeps the pixels of an RGB plane whose colour lies in one of `filters`
/// and converts the plane to grayscale. Other pixels become 0.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorFilterSettings {
    pub filters: Vec<ColorRange>,
    pub grayscale_mode: GrayscaleMode,
}

/// Hue (degrees), saturation and value (0..=255) of a 16-bit pixel.
pub fn to_hsv(rgb: [u16; 3]) -> HsvPoint {
    let [r, g, b] = rgb.map(|v| v as f64 / 65535.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let sat = if max == 0.0 { 0.0 } else { delta / max };
    HsvPoint{hue, sat: sat * 255.0, val: max * 255.0}
}

impl ColorFilterSettings {
    pub fn apply(&self, rgb: &Rgb16Image) -> Gray16Image {
        let (width, height) = rgb.dimensions();
        Gray16Image::from_fn(width, height, |x, y| {
            let p = rgb.get_pixel(x, y).0;
            let hsv = to_hsv(p);
            if !self.filters.iter().any(|f| f.contains(hsv)) {
                return image::Luma([0]);
            }
            let [r, g, b] = p.map(|v| v as f64);
            let gray = match self.grayscale_mode {
                GrayscaleMode::Linear => (r + g + b) / 3.0,
                GrayscaleMode::Human => 0.299 * r + 0.587 * g + 0.114 * b,
            };
            image::Luma([gray.round().clamp(0.0, 65535.0) as u16])
        })
    }
}

impl Command for ColorFilterSettings {
    fn execute(&self, _ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        if self.filters.is_empty() {
            return Err(CommandError::plane(Validity::Invalid,
                                           "color filter without ranges"));
        }
        let gray = match image.data() {
            PlaneData::Rgb(rgb) => self.apply(rgb),
            PlaneData::Gray(_) => return Err(CommandError::plane(
                Validity::Invalid, "color filter needs an RGB plane")),
        };
        image.set_pixels(gray);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;
    use crate::context::tests::Fixture;
    use crate::context::IterationContext;
    use crate::plane::{PlaneKind, Tile};

    fn reddish() -> ColorRange {
        let point = |hue, sat, val| HsvPoint{hue, sat, val};
        ColorRange{point_a: point(-30.0, 120.0, 50.0),
                   point_b: point(30.0, 120.0, 0.0),
                   point_c: point(0.0, 300.0, 255.0)}
    }

    #[test]
    fn test_hsv() {
        let hsv = to_hsv([65535, 0, 0]);
        assert_eq!((hsv.hue, hsv.sat, hsv.val), (0.0, 255.0, 255.0));
        assert_eq!(to_hsv([0, 65535, 0]).hue, 120.0);
        assert_eq!(to_hsv([0, 0, 65535]).hue, 240.0);
        let gray = to_hsv([1000, 1000, 1000]);
        assert_eq!(gray.sat, 0.0);
    }

    #[test]
    fn test_triangle() {
        let range = reddish();
        let hsv = |hue, sat, val| HsvPoint{hue, sat, val};
        assert!(range.contains(hsv(0.0, 200.0, 100.0)));
        // Inside the triangle but too dark.
        assert!(!range.contains(hsv(0.0, 200.0, 20.0)));
        assert!(!range.contains(hsv(120.0, 200.0, 100.0)));
        assert!(!range.contains(hsv(0.0, 50.0, 100.0)));
    }

    #[test]
    fn test_keeps_red_pixels() {
        let fixture = Fixture::new(1);
        let mut iteration = IterationContext::default();
        let mut ctx = fixture.context(&mut iteration);
        let mut rgb = Rgb16Image::new(3, 1);
        rgb.put_pixel(0, 0, Rgb([40000, 2000, 1000]));
        rgb.put_pixel(1, 0, Rgb([2000, 40000, 1000]));
        rgb.put_pixel(2, 0, Rgb([3000, 3000, 3000]));
        let mut image = ImagePlane::new(fixture.current().id, Tile::new(0, 0),
                                        0, PlaneData::Rgb(rgb));
        let settings = ColorFilterSettings{
            filters: vec![reddish()], grayscale_mode: GrayscaleMode::Linear};
        settings.execute(&mut ctx, &mut image, &mut ObjectList::new())
            .unwrap();
        assert_eq!(image.kind(), PlaneKind::Grayscale);
        assert_eq!(image.pixels().as_raw(), &vec![14333, 0, 0]);

        // Grayscale planes are rejected.
        let mut gray = fixture.current();
        assert!(settings.execute(&mut ctx, &mut gray, &mut ObjectList::new())
                .is_err());
        assert!(ColorFilterSettings::default()
                .execute(&mut ctx, &mut image, &mut ObjectList::new())
                .is_err());
    }
}  // mod tests.
