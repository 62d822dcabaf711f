// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Circle detection. Edges of the 8-bit rendition of the plane vote for the
//! centres of circles of every radius in range; accumulator peaks become disc
//! shaped objects.

use std::time::Instant;

use image::{GrayImage, Luma};
use imageproc::edges::canny;
use imageproc::point::Point;
use imageproc::rect::Rect;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::classes::ClassRef;
use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::image_funcs::to_gray8_scaled;
use crate::object_list::ObjectList;
use crate::plane::ImagePlane;
use crate::roi::Roi;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoughTransformSettings {
    pub class_out: ClassRef,
    pub min_radius: u32,
    pub max_radius: u32,
    /// Minimum distance between the centres of two circles.
    pub min_distance: u32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Fraction of a circle's outline that must be covered by edges.
    pub min_votes: f64,
}

impl Default for HoughTransformSettings {
    fn default() -> Self {
        HoughTransformSettings{class_out: ClassRef::Default, min_radius: 5,
                               max_radius: 50, min_distance: 10,
                               canny_low: 50.0, canny_high: 100.0,
                               min_votes: 0.3}
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Circle {
    pub x: u32,
    pub y: u32,
    pub radius: u32,
    /// Covered fraction of the outline.
    pub score: f64,
}

/// Offsets of the pixels whose distance from the origin rounds to `radius`.
fn ring(radius: u32) -> Vec<(i32, i32)> {
    let r = radius as i32;
    let mut offsets = Vec::new();
    for dy in -r - 1..=r + 1 {
        for dx in -r - 1..=r + 1 {
            let d = ((dx * dx + dy * dy) as f64).sqrt();
            if (d - radius as f64).abs() < 0.5 {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}

/// Circles in an edge image, best first.
pub fn find_circles(edges: &GrayImage, min_radius: u32, max_radius: u32,
                    min_distance: u32, min_votes: f64) -> Vec<Circle> {
    let (width, height) = edges.dimensions();
    let edge_pixels: Vec<(i32, i32)> = edges.enumerate_pixels()
        .filter(|(_, _, p)| p[0] > 0)
        .map(|(x, y, _)| (x as i32, y as i32))
        .collect();
    let mut candidates = Vec::new();
    let mut accumulator = vec![0_u32; (width * height) as usize];
    for radius in min_radius.max(1)..=max_radius {
        let offsets = ring(radius);
        accumulator.iter_mut().for_each(|v| *v = 0);
        for &(ex, ey) in &edge_pixels {
            for &(dx, dy) in &offsets {
                let (cx, cy) = (ex + dx, ey + dy);
                if cx >= 0 && cy >= 0 && cx < width as i32 &&
                    cy < height as i32
                {
                    accumulator[(cy as u32 * width + cx as u32) as usize] += 1;
                }
            }
        }
        let needed = min_votes * offsets.len() as f64;
        for (i, &votes) in accumulator.iter().enumerate() {
            if votes > 0 && votes as f64 >= needed {
                candidates.push(Circle{
                    x: i as u32 % width, y: i as u32 / width, radius,
                    score: votes as f64 / offsets.len() as f64});
            }
        }
    }
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score)
                       .then(a.radius.cmp(&b.radius)));
    let min_d2 = (min_distance as i64).pow(2);
    let mut circles: Vec<Circle> = Vec::new();
    for c in candidates {
        let far = circles.iter().all(|k| {
            let dx = k.x as i64 - c.x as i64;
            let dy = k.y as i64 - c.y as i64;
            dx * dx + dy * dy >= min_d2
        });
        if far {
            circles.push(c);
        }
    }
    circles
}

impl Command for HoughTransformSettings {
    fn execute(&self, ctx: &mut ProcessContext, image: &mut ImagePlane,
               objects: &mut ObjectList) -> Result<(), CommandError> {
        let start = Instant::now();
        if self.min_radius > self.max_radius {
            return Err(CommandError::plane(
                Validity::Invalid,
                format!("radius range {}..{} is empty", self.min_radius,
                        self.max_radius)));
        }
        let class_id = match ctx.class_id(self.class_out) {
            Some(c) => c,
            None => return Ok(()),
        };
        let edges = canny(&to_gray8_scaled(&image.pixels()), self.canny_low,
                          self.canny_high);
        let circles = find_circles(&edges, self.min_radius, self.max_radius,
                                   self.min_distance, self.min_votes);
        let tile_info = ctx.tile_info();
        let plane = ctx.pipeline.plane;
        for circle in &circles {
            let seed = GrayImage::from_pixel(1, 1, Luma([255]));
            let mut roi = Roi::new(
                class_id, plane, circle.score as f32,
                Rect::at(circle.x as i32, circle.y as i32).of_size(1, 1),
                seed, vec![Point::new(0, 0)], &tile_info);
            if roi.draw_circle(2 * circle.radius + 1) {
                objects.push(roi);
            }
        }
        debug!("Hough found {} circles in {:?}", circles.len(),
               start.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::classes::ClassId;
    use crate::commands::tests::disc_image;
    use crate::context::tests::Fixture;
    use crate::context::IterationContext;
    use crate::plane::Gray16Image;

    fn run(pixels: Gray16Image, settings: &HoughTransformSettings)
           -> Result<ObjectList, CommandError> {
        let fixture = Fixture::with_planes(vec![pixels]);
        let mut iteration = IterationContext::default();
        let mut image = fixture.current();
        let mut ctx = fixture.context(&mut iteration);
        let mut objects = ObjectList::new();
        settings.execute(&mut ctx, &mut image, &mut objects)?;
        Ok(objects)
    }

    #[test]
    fn test_ring() {
        let offsets = ring(10);
        assert!(offsets.contains(&(10, 0)));
        assert!(offsets.contains(&(0, -10)));
        assert!(!offsets.contains(&(0, 0)));
        assert!(offsets.len() > 50 && offsets.len() < 90);
    }

    #[test]
    fn test_finds_disc() {
        let settings = HoughTransformSettings{
            class_out: ClassRef::literal(6), min_radius: 8, max_radius: 14,
            ..HoughTransformSettings::default()};
        let objects = run(disc_image(100, 100, &[(50, 50, 10)]), &settings)
            .unwrap();
        assert_eq!(objects.count(ClassId(6)), 1);
        let roi = objects.iter().next().unwrap();
        assert_abs_diff_eq!(roi.centroid().0, 50.0, epsilon = 1.5);
        assert_abs_diff_eq!(roi.centroid().1, 50.0, epsilon = 1.5);
        assert!(roi.area() > 200 && roi.area() < 500, "{}", roi.area());
    }

    #[test]
    fn test_flat_image() {
        let settings = HoughTransformSettings::default();
        let objects = run(Gray16Image::new(40, 40), &settings).unwrap();
        assert!(objects.is_empty());

        let settings = HoughTransformSettings{
            min_radius: 9, max_radius: 3, ..HoughTransformSettings::default()};
        let err = run(Gray16Image::new(40, 40), &settings).unwrap_err();
        assert_eq!(err.validity, Validity::Invalid);
    }
}  // mod tests.
