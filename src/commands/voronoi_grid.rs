// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::Instant;

use image::{GrayImage, Luma};
use imageproc::rect::Rect;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::classes::ClassRef;
use crate::commands::Command;
use crate::context::ProcessContext;
use crate::contour_funcs::{fill_contour, foreground_bounds,
                           longest_outer_contour, mask_and};
use crate::error::CommandError;
use crate::object_list::ObjectList;
use crate::plane::{Gray16Image, ImagePlane};
use crate::roi::Roi;

/// Splits the tile into the Voronoi cells of the centres of the objects of
/// `points_classes_in`. Each surviving cell becomes an object of
/// `class_out`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoronoiGridSettings {
    pub points_classes_in: Vec<ClassRef>,
    /// Cells are cut to the foreground of these classes, if any.
    pub mask_classes_in: Vec<ClassRef>,
    pub class_out: ClassRef,
    /// Cells are cut to a disc of this radius around their seed; negative
    /// means unlimited.
    pub max_radius: i32,
    pub exclude_areas_without_point: bool,
    pub exclude_areas_at_the_edge: bool,
    pub min_area_size: u64,
    pub max_area_size: u64,
}

impl Default for VoronoiGridSettings {
    fn default() -> Self {
        VoronoiGridSettings{points_classes_in: vec![ClassRef::Default],
                            mask_classes_in: Vec::new(),
                            class_out: ClassRef::Default,
                            max_radius: -1,
                            exclude_areas_without_point: true,
                            exclude_areas_at_the_edge: true,
                            min_area_size: 0, max_area_size: u64::MAX}
    }
}

const NO_SEED: u32 = u32::MAX;

/// Index of the nearest seed for every pixel, row major. Pixels farther
/// than `max_radius` (when not negative) from every seed get NO_SEED.
/// Seeds are sorted into square buckets which are visited ring by ring.
pub fn nearest_seeds(seeds: &[(i32, i32)], width: u32, height: u32,
                     max_radius: i32) -> Vec<u32> {
    let mut labels = vec![NO_SEED; (width * height) as usize];
    if seeds.is_empty() {
        return labels;
    }
    let area = width as f64 * height as f64;
    let bucket = (area / seeds.len() as f64).sqrt().ceil().max(8.0) as i32;
    let cols = (width as i32 + bucket - 1) / bucket;
    let rows = (height as i32 + bucket - 1) / bucket;
    let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); (cols * rows) as usize];
    for (i, &(x, y)) in seeds.iter().enumerate() {
        let bx = (x / bucket).clamp(0, cols - 1);
        let by = (y / bucket).clamp(0, rows - 1);
        buckets[(by * cols + bx) as usize].push(i as u32);
    }
    let limit = if max_radius >= 0 {
        Some(max_radius as i64 * max_radius as i64)
    } else {
        None
    };
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let (bx, by) = (x / bucket, y / bucket);
            let mut best: Option<(i64, u32)> = None;
            let mut ring = 0;
            loop {
                for cy in by - ring..=by + ring {
                    for cx in bx - ring..=bx + ring {
                        let on_ring = (cy - by).abs() == ring ||
                            (cx - bx).abs() == ring;
                        if !on_ring || cx < 0 || cy < 0 || cx >= cols ||
                            cy >= rows {
                            continue;
                        }
                        for &s in &buckets[(cy * cols + cx) as usize] {
                            let (sx, sy) = seeds[s as usize];
                            let (dx, dy) = ((sx - x) as i64, (sy - y) as i64);
                            let d = dx * dx + dy * dy;
                            // Ties go to the lower seed index.
                            if best.map_or(true,
                                           |(bd, bs)| d < bd ||
                                           (d == bd && s < bs)) {
                                best = Some((d, s));
                            }
                        }
                    }
                }
                // Seeds beyond this ring are at least `ring * bucket` away.
                let reach = ring as i64 * bucket as i64;
                let done = match best {
                    Some((d, _)) => d <= reach * reach,
                    None => false,
                };
                if done || (ring > cols && ring > rows) {
                    break;
                }
                ring += 1;
            }
            if let Some((d, s)) = best {
                if limit.map_or(true, |l| d <= l) {
                    labels[(y as u32 * width + x as u32) as usize] = s;
                }
            }
        }
    }
    labels
}

/// Masks of the cells in `labels`, as (bounding box, mask) per seed.
/// Pixels where `restrict` is 0 are left out. Empty cells are None.
fn cell_masks(labels: &[u32], n_seeds: usize, width: u32,
              restrict: Option<&Gray16Image>)
              -> Vec<Option<(Rect, GrayImage)>> {
    let mut bounds: Vec<Option<(u32, u32, u32, u32)>> = vec![None; n_seeds];
    for (i, &label) in labels.iter().enumerate() {
        if label == NO_SEED {
            continue;
        }
        let (x, y) = (i as u32 % width, i as u32 / width);
        if restrict.is_some_and(|r| r.get_pixel(x, y)[0] == 0) {
            continue;
        }
        let b = &mut bounds[label as usize];
        *b = Some(match *b {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x),
                                       y1.max(y)),
        });
    }
    bounds.iter().enumerate().map(|(seed, b)| {
        let (x0, y0, x1, y1) = (*b)?;
        let mut mask = GrayImage::new(x1 - x0 + 1, y1 - y0 + 1);
        for (mx, my, p) in mask.enumerate_pixels_mut() {
            let (x, y) = (x0 + mx, y0 + my);
            let inside = labels[(y * width + x) as usize] == seed as u32 &&
                restrict.map_or(true, |r| r.get_pixel(x, y)[0] > 0);
            if inside {
                *p = Luma([255]);
            }
        }
        let rect = Rect::at(x0 as i32, y0 as i32).of_size(mask.width(),
                                                          mask.height());
        Some((rect, mask))
    }).collect()
}

// Keeps the largest connected part of a cell cut by a mask.
fn largest_part(rect: Rect, mask: GrayImage) -> Option<(Rect, GrayImage)> {
    let contour = longest_outer_contour(&mask)?;
    let (w, h) = mask.dimensions();
    let filled = fill_contour(&contour, w, h);
    let kept = mask_and(&mask, &filled);
    let bounds = foreground_bounds(&kept)?;
    let cropped = image::imageops::crop_imm(
        &kept, bounds.left() as u32, bounds.top() as u32, bounds.width(),
        bounds.height()).to_image();
    let rect = Rect::at(rect.left() + bounds.left(), rect.top() + bounds.top())
        .of_size(bounds.width(), bounds.height());
    Some((rect, cropped))
}

impl Command for VoronoiGridSettings {
    fn execute(&self, ctx: &mut ProcessContext, image: &mut ImagePlane,
               objects: &mut ObjectList) -> Result<(), CommandError> {
        let start = Instant::now();
        let class_id = match ctx.class_id(self.class_out) {
            Some(c) => c,
            None => return Ok(()),
        };
        let (width, height) = image.dimensions();
        let point_classes = ctx.class_ids(&self.points_classes_in);
        let points: Vec<&Roi> = objects.iter()
            .filter(|r| point_classes.contains(&r.class_id)).collect();
        let seeds: Vec<(i32, i32)> = points.iter().map(|r| {
            let b = r.bbox();
            (b.left() + b.width() as i32 / 2, b.top() + b.height() as i32 / 2)
        }).collect();
        let labels = nearest_seeds(&seeds, width, height, self.max_radius);

        let mask_classes = ctx.class_ids(&self.mask_classes_in);
        let restrict = if mask_classes.is_empty() {
            None
        } else {
            let mut mask = Gray16Image::new(width, height);
            for class_id in &mask_classes {
                if let Some(index) = objects.index(*class_id) {
                    index.create_binary_image(&mut mask, None);
                }
            }
            Some(mask)
        };

        let tile_info = ctx.tile_info();
        let plane = ctx.pipeline.plane;
        let mut cells = Vec::new();
        let masks = cell_masks(&labels, seeds.len(), width, restrict.as_ref());
        for cell in masks.into_iter().flatten() {
            let (rect, mask) = if restrict.is_some() {
                match largest_part(cell.0, cell.1) {
                    Some(part) => part,
                    None => continue,
                }
            } else {
                cell
            };
            let contour = longest_outer_contour(&mask).unwrap_or_default();
            let roi = Roi::new(class_id, plane, 1.0, rect, mask, contour,
                               &tile_info);
            if self.keep(&roi, &points, width, height) {
                cells.push(roi);
            }
        }
        let n_cells = cells.len();
        for roi in cells {
            objects.push(roi);
        }
        debug!("Voronoi grid of {} points kept {} cells in {:?}",
               seeds.len(), n_cells, start.elapsed());
        Ok(())
    }
}

impl VoronoiGridSettings {
    fn keep(&self, cell: &Roi, points: &[&Roi], width: u32, height: u32)
            -> bool {
        let area = cell.area();
        if area < self.min_area_size || area > self.max_area_size {
            return false;
        }
        let b = cell.bbox();
        let at_edge = b.left() <= 0 || b.top() <= 0 ||
            b.right() >= width as i32 - 1 || b.bottom() >= height as i32 - 1;
        if self.exclude_areas_at_the_edge && at_edge {
            return false;
        }
        if self.exclude_areas_without_point &&
            !points.iter().any(|p| cell.is_intersecting(p, 0.1)) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::ClassId;
    use crate::context::tests::Fixture;
    use crate::context::IterationContext;
    use crate::spatial_index::tests::square;

    fn run(settings: &VoronoiGridSettings, mut objects: ObjectList)
           -> ObjectList {
        let fixture = Fixture::new(1);
        let mut iteration = IterationContext::default();
        let mut image = fixture.current();
        let mut ctx = fixture.context(&mut iteration);
        settings.execute(&mut ctx, &mut image, &mut objects).unwrap();
        objects
    }

    fn open_grid() -> VoronoiGridSettings {
        VoronoiGridSettings{points_classes_in: vec![ClassRef::literal(1)],
                            class_out: ClassRef::literal(5),
                            exclude_areas_at_the_edge: false,
                            ..VoronoiGridSettings::default()}
    }

    #[test]
    fn test_nearest_seeds() {
        let labels = nearest_seeds(&[(2, 2), (7, 2)], 10, 5, -1);
        assert_eq!(labels[0], 0);
        assert_eq!(labels[9], 1);
        // Equidistant from both seeds at x = 4.5; x = 4 is closer to 0.
        assert_eq!(labels[4], 0);
        assert_eq!(labels[5], 1);

        let limited = nearest_seeds(&[(2, 2)], 10, 5, 2);
        assert_eq!(limited[2 * 10 + 4], 0);
        assert_eq!(limited[2 * 10 + 5], NO_SEED);
        assert!(nearest_seeds(&[], 4, 4, -1).iter().all(|&l| l == NO_SEED));
    }

    #[test]
    fn test_matches_brute_force() {
        let seeds: Vec<(i32, i32)> = (0..40)
            .map(|i| ((i * 37) % 97, (i * 53) % 89)).collect();
        let labels = nearest_seeds(&seeds, 100, 90, -1);
        for (i, &label) in labels.iter().enumerate() {
            let (x, y) = ((i % 100) as i32, (i / 100) as i32);
            let d = |s: (i32, i32)| (s.0 - x).pow(2) + (s.1 - y).pow(2);
            let best = seeds.iter().map(|&s| d(s)).min().unwrap();
            assert_eq!(d(seeds[label as usize]), best, "pixel {} {}", x, y);
        }
    }

    #[test]
    fn test_cells_cover_tile() {
        let mut objects = ObjectList::new();
        objects.push(square(1, 20, 20, 4));
        objects.push(square(1, 70, 20, 4));
        objects.push(square(1, 45, 70, 4));
        let objects = run(&open_grid(), objects);
        assert_eq!(objects.count(ClassId(5)), 3);
        let total: u64 = objects.iter()
            .filter(|r| r.class_id == ClassId(5)).map(|r| r.area()).sum();
        assert_eq!(total, 100 * 100);
    }

    #[test]
    fn test_filters() {
        let mut objects = ObjectList::new();
        objects.push(square(1, 20, 20, 4));
        objects.push(square(1, 70, 20, 4));
        objects.push(square(1, 45, 70, 4));
        // Every cell of three seeds reaches the border.
        let edge = VoronoiGridSettings{exclude_areas_at_the_edge: true,
                                       ..open_grid()};
        assert_eq!(run(&edge, objects).count(ClassId(5)), 0);

        let mut objects = ObjectList::new();
        objects.push(square(1, 48, 48, 4));
        // Disc of radius 10 around the seed at (50, 50).
        let disc = VoronoiGridSettings{max_radius: 10,
                                       exclude_areas_at_the_edge: true,
                                       ..open_grid()};
        let result = run(&disc, objects);
        assert_eq!(result.count(ClassId(5)), 1);
        let cell = result.iter().find(|r| r.class_id == ClassId(5))
            .unwrap();
        assert!(cell.area() > 300 && cell.area() < 330, "{}", cell.area());

        let mut objects = ObjectList::new();
        objects.push(square(1, 48, 48, 4));
        let small = VoronoiGridSettings{max_radius: 10, max_area_size: 100,
                                        ..open_grid()};
        assert_eq!(run(&small, objects).count(ClassId(5)), 0);
    }

    #[test]
    fn test_cells_cut_to_mask() {
        let mut objects = ObjectList::new();
        objects.push(square(1, 10, 10, 4));
        objects.push(square(1, 80, 80, 4));
        // Cell area only where class 2 lies; the far seed has none.
        objects.push(square(2, 5, 5, 20));
        let settings = VoronoiGridSettings{
            mask_classes_in: vec![ClassRef::literal(2)], ..open_grid()};
        let objects = run(&settings, objects);
        assert_eq!(objects.count(ClassId(5)), 1);
        let cell = objects.iter().find(|r| r.class_id == ClassId(5))
            .unwrap();
        assert_eq!(cell.area(), 400);
        assert_eq!(*cell.bbox(), Rect::at(5, 5).of_size(20, 20));
    }
}  // mod tests.
