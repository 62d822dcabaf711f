// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! A single detected object ("region of interest").

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::point::Point;
use imageproc::rect::Rect;
use serde::Serialize;

use crate::classes::ClassId;
use crate::contour_funcs::{
    bounding_rect, count_foreground, fill_contour_mut, foreground_bounds,
    longest_outer_contour};
use crate::image_funcs::clip_rect;
use crate::perimeter::{circularity, traced_perimeter};
use crate::plane::{Gray16Image, ImageId, ResolvedPlane, Tile, TileInfo};

pub type ObjectId = u64;
pub type TrackingId = u64;

// Process wide counters. Ids are never reused; zero is never handed out.
static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TRACKING_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_object_id() -> ObjectId {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

pub fn next_tracking_id() -> TrackingId {
    NEXT_TRACKING_ID.fetch_add(1, Ordering::Relaxed)
}

/// Intensity statistics of the masked region in one image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Intensity {
    pub sum: f64,
    pub avg: f64,
    pub min: u16,
    pub max: u16,
}

/// Distances to a peer object, in global pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Distance {
    pub centroid_to_centroid: f64,
    pub centroid_to_surface_min: f64,
    pub centroid_to_surface_max: f64,
    pub surface_to_surface_min: f64,
    pub surface_to_surface_max: f64,
}

/// Pixel-wise intersection of two object masks.
#[derive(Debug)]
pub struct IntersectingMask {
    /// Intersection of the bounding boxes, tile coordinates.
    pub rect: Rect,
    pub mask: GrayImage,
    pub intersecting_pixels: u64,
    /// intersecting_pixels / min(area, peer area).
    pub ratio: f64,
}

#[derive(Clone, Debug)]
pub struct Roi {
    object_id: ObjectId,
    pub class_id: ClassId,
    pub plane: ResolvedPlane,
    pub confidence: f32,
    pub parent: Option<ObjectId>,
    pub tracking_id: TrackingId,

    bbox: Rect,
    bbox_real: Rect,
    mask: GrayImage,
    contour: Vec<Point<i32>>,
    tile: Tile,
    tile_size: (u32, u32),
    image_size: (u32, u32),

    area: u64,
    perimeter: f64,
    circularity: f64,
    centroid: (f64, f64),

    intensity: BTreeMap<ImageId, Intensity>,
    distances: BTreeMap<ObjectId, Distance>,
    linked: BTreeSet<ObjectId>,
}

impl Roi {
    /// `bbox` is in tile coordinates; `mask` has the size of `bbox` and
    /// `contour` is relative to the mask.
    pub fn new(class_id: ClassId, plane: ResolvedPlane, confidence: f32,
               bbox: Rect, mask: GrayImage, contour: Vec<Point<i32>>,
               tile_info: &TileInfo) -> Self {
        assert_eq!(mask.dimensions(), (bbox.width(), bbox.height()),
                   "Mask does not match bounding box {:?}", bbox);
        let mut roi = Roi{
            object_id: next_object_id(), class_id, plane, confidence,
            parent: None, tracking_id: 0,
            bbox, bbox_real: bbox, mask, contour,
            tile: tile_info.tile, tile_size: tile_info.tile_size,
            image_size: tile_info.image_size,
            area: 0, perimeter: 0.0, circularity: 0.0, centroid: (0.0, 0.0),
            intensity: BTreeMap::new(), distances: BTreeMap::new(),
            linked: BTreeSet::new()};
        roi.derive_metrics();
        roi
    }

    /// Builds an object from a contour given in tile coordinates. The mask is
    /// the filled contour restricted to the foreground of `binary`, when
    /// given. Returns None if nothing remains.
    pub fn from_contour(class_id: ClassId, plane: ResolvedPlane,
                        confidence: f32, contour: &[Point<i32>],
                        binary: Option<&GrayImage>, tile_info: &TileInfo)
                        -> Option<Self> {
        let rect = bounding_rect(contour)?;
        let mut mask = GrayImage::new(rect.width(), rect.height());
        fill_contour_mut(&mut mask, contour, (rect.left(), rect.top()));
        if let Some(binary) = binary {
            for (x, y, p) in mask.enumerate_pixels_mut() {
                let bx = (rect.left() + x as i32) as u32;
                let by = (rect.top() + y as i32) as u32;
                if binary.get_pixel(bx, by)[0] == 0 {
                    *p = Luma([0]);
                }
            }
        }
        if count_foreground(&mask) == 0 {
            return None;
        }
        let local: Vec<Point<i32>> = contour.iter()
            .map(|p| Point::new(p.x - rect.left(), p.y - rect.top())).collect();
        Some(Roi::new(class_id, plane, confidence, rect, mask, local,
                      tile_info))
    }

    fn derive_metrics(&mut self) {
        self.bbox_real = Rect::at(
            self.bbox.left() + (self.tile.x * self.tile_size.0) as i32,
            self.bbox.top() + (self.tile.y * self.tile_size.1) as i32)
            .of_size(self.bbox.width(), self.bbox.height());
        let mut area = 0_u64;
        let (mut sum_x, mut sum_y) = (0_u64, 0_u64);
        for (x, y, p) in self.mask.enumerate_pixels() {
            if p[0] > 0 {
                area += 1;
                sum_x += x as u64;
                sum_y += y as u64;
            }
        }
        self.area = area;
        self.centroid = if area > 0 {
            (self.bbox.left() as f64 + sum_x as f64 / area as f64,
             self.bbox.top() as f64 + sum_y as f64 / area as f64)
        } else {
            (self.bbox.left() as f64 + (self.bbox.width() as f64 - 1.0) / 2.0,
             self.bbox.top() as f64 + (self.bbox.height() as f64 - 1.0) / 2.0)
        };
        self.perimeter = if area > 0 {
            traced_perimeter(&self.mask, self.contour.len())
        } else {
            0.0
        };
        self.circularity = circularity(area, self.perimeter);
    }

    pub fn object_id(&self) -> ObjectId { self.object_id }
    pub fn bbox(&self) -> &Rect { &self.bbox }
    pub fn bbox_real(&self) -> &Rect { &self.bbox_real }
    pub fn mask(&self) -> &GrayImage { &self.mask }
    pub fn contour(&self) -> &[Point<i32>] { &self.contour }
    pub fn tile(&self) -> Tile { self.tile }
    pub fn area(&self) -> u64 { self.area }
    pub fn perimeter(&self) -> f64 { self.perimeter }
    pub fn circularity(&self) -> f64 { self.circularity }
    pub fn intensity(&self) -> &BTreeMap<ImageId, Intensity> { &self.intensity }
    pub fn distances(&self) -> &BTreeMap<ObjectId, Distance> { &self.distances }
    pub fn linked(&self) -> &BTreeSet<ObjectId> { &self.linked }

    /// Moment centroid in tile coordinates.
    pub fn centroid(&self) -> (f64, f64) { self.centroid }

    /// Moment centroid in global image coordinates.
    pub fn centroid_real(&self) -> (f64, f64) {
        (self.centroid.0 + (self.bbox_real.left() - self.bbox.left()) as f64,
         self.centroid.1 + (self.bbox_real.top() - self.bbox.top()) as f64)
    }

    pub fn add_linked(&mut self, ids: impl IntoIterator<Item = ObjectId>) {
        self.linked.extend(ids);
    }

    pub fn retain_linked(&mut self, keep: impl Fn(ObjectId) -> bool) {
        self.linked.retain(|id| keep(*id));
    }

    /// Deep copy that keeps the object id; used when an object moves.
    pub fn clone_as(&self, class_id: Option<ClassId>,
                    parent: Option<ObjectId>) -> Roi {
        let mut roi = self.clone();
        if let Some(class_id) = class_id {
            roi.class_id = class_id;
        }
        if parent.is_some() {
            roi.parent = parent;
        }
        roi
    }

    /// Deep copy with a fresh object id; used when an object is duplicated.
    pub fn copy_as(&self, class_id: Option<ClassId>,
                   parent: Option<ObjectId>) -> Roi {
        let mut roi = self.clone_as(class_id, parent);
        roi.object_id = next_object_id();
        roi
    }

    /// Masks are compared on the intersection of the bounding boxes. Both
    /// objects must belong to the same tile. Returns None if the boxes do not
    /// overlap.
    pub fn intersecting_mask(&self, peer: &Roi) -> Option<IntersectingMask> {
        let rect = self.bbox.intersect(peer.bbox)?;
        let mut mask = GrayImage::new(rect.width(), rect.height());
        let (ox1, oy1) = (rect.left() - self.bbox.left(),
                          rect.top() - self.bbox.top());
        let (ox2, oy2) = (rect.left() - peer.bbox.left(),
                          rect.top() - peer.bbox.top());
        let mut intersecting_pixels = 0;
        for y in 0..rect.height() as i32 {
            for x in 0..rect.width() as i32 {
                let on1 = self.mask.get_pixel((x + ox1) as u32,
                                              (y + oy1) as u32)[0] > 0;
                let on2 = peer.mask.get_pixel((x + ox2) as u32,
                                              (y + oy2) as u32)[0] > 0;
                if on1 && on2 {
                    mask.put_pixel(x as u32, y as u32, Luma([255]));
                    intersecting_pixels += 1;
                }
            }
        }
        let smallest = self.area.min(peer.area);
        let ratio = if smallest > 0 {
            intersecting_pixels as f64 / smallest as f64
        } else {
            0.0
        };
        Some(IntersectingMask{rect, mask, intersecting_pixels, ratio})
    }

    pub fn is_intersecting(&self, peer: &Roi, min_overlap: f64) -> bool {
        match self.intersecting_mask(peer) {
            Some(m) => m.intersecting_pixels > 0 && m.ratio >= min_overlap,
            None => false,
        }
    }

    /// New object covering the pixels both masks share, or None if the
    /// overlap is empty or below `min_overlap`. The object's confidence is
    /// the overlap ratio.
    pub fn calc_intersection(&self, peer: &Roi, min_overlap: f64,
                             plane: ResolvedPlane, class_id: ClassId)
                             -> Option<Roi> {
        let m = self.intersecting_mask(peer)?;
        if m.intersecting_pixels == 0 || m.ratio < min_overlap {
            return None;
        }
        let contour = longest_outer_contour(&m.mask).unwrap_or_default();
        let tile_info = self.tile_info();
        Some(Roi::new(class_id, plane, m.ratio as f32, m.rect, m.mask, contour,
                      &tile_info))
    }

    fn tile_info(&self) -> TileInfo {
        TileInfo{tile: self.tile, tile_size: self.tile_size,
                 nr_of_tiles: (1, 1), image_size: self.image_size,
                 original_image_size: self.image_size}
    }

    /// Records intensity statistics of `image` (the tile's pixels) under the
    /// mask. Measuring the same image id again returns the stored value.
    pub fn measure_intensity(&mut self, image_id: ImageId, image: &Gray16Image)
                             -> Intensity {
        if let Some(existing) = self.intensity.get(&image_id) {
            return *existing;
        }
        let result = self.intensity_in(image);
        self.intensity.insert(image_id, result);
        result
    }

    /// Intensity statistics under the mask, without recording them.
    pub fn intensity_in(&self, image: &Gray16Image) -> Intensity {
        let mut result = Intensity::default();
        let mut count = 0_u64;
        let (width, height) = image.dimensions();
        let mut min = u16::MAX;
        let mut max = 0;
        for (x, y, p) in self.mask.enumerate_pixels() {
            if p[0] == 0 {
                continue;
            }
            let ix = self.bbox.left() + x as i32;
            let iy = self.bbox.top() + y as i32;
            if ix < 0 || iy < 0 || ix >= width as i32 || iy >= height as i32 {
                continue;
            }
            let v = image.get_pixel(ix as u32, iy as u32)[0];
            result.sum += v as f64;
            min = min.min(v);
            max = max.max(v);
            count += 1;
        }
        if count > 0 {
            result.avg = result.sum / count as f64;
            result.min = min;
            result.max = max;
        }
        result
    }

    fn contour_real(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        let (ox, oy) = (self.bbox_real.left() as f64,
                        self.bbox_real.top() as f64);
        self.contour.iter().map(move |p| (p.x as f64 + ox, p.y as f64 + oy))
    }

    /// Distances to `peer` in global coordinates, stored under the peer's id.
    pub fn measure_distance(&mut self, peer: &Roi) -> Distance {
        let dist = |a: (f64, f64), b: (f64, f64)| {
            ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
        };
        let c1 = self.centroid_real();
        let c2 = peer.centroid_real();
        let mut d = Distance{centroid_to_centroid: dist(c1, c2),
                             ..Distance::default()};

        let mut min = f64::INFINITY;
        let mut max: f64 = 0.0;
        for p in peer.contour_real() {
            let v = dist(c1, p);
            min = min.min(v);
            max = max.max(v);
        }
        if min.is_finite() {
            d.centroid_to_surface_min = min;
            d.centroid_to_surface_max = max;
        }

        let mut min = f64::INFINITY;
        let mut max: f64 = 0.0;
        for a in self.contour_real() {
            for b in peer.contour_real() {
                let v = dist(a, b);
                min = min.min(v);
                max = max.max(v);
            }
        }
        if min.is_finite() {
            d.surface_to_surface_min = min;
            d.surface_to_surface_max = max;
        }
        self.distances.insert(peer.object_id, d);
        d
    }

    /// Replaces the geometry by `mask` placed with its top-left corner at
    /// (x, y) in tile coordinates, clipped to the tile. Returns false and
    /// leaves the object untouched if nothing remains.
    fn replace_geometry(&mut self, x: i32, y: i32, mask: &GrayImage) -> bool {
        let (w, h) = mask.dimensions();
        let size = self.image_size;
        let clipped = match clip_rect(x, y, w as i32, h as i32, size) {
            Some(r) => r,
            None => return false,
        };
        let cropped = imageops::crop_imm(
            mask, (clipped.left() - x) as u32, (clipped.top() - y) as u32,
            clipped.width(), clipped.height()).to_image();
        // Shrink to the foreground.
        let tight = match foreground_bounds(&cropped) {
            Some(r) => r,
            None => return false,
        };
        let cropped = imageops::crop_imm(
            &cropped, tight.left() as u32, tight.top() as u32,
            tight.width(), tight.height()).to_image();
        self.contour = longest_outer_contour(&cropped).unwrap_or_default();
        self.mask = cropped;
        self.bbox = Rect::at(clipped.left() + tight.left(),
                             clipped.top() + tight.top())
            .of_size(tight.width(), tight.height());
        self.derive_metrics();
        true
    }

    /// Scales the mask around the bounding box centre (nearest neighbour).
    pub fn resize(&mut self, scale_x: f32, scale_y: f32) -> bool {
        let (w, h) = self.mask.dimensions();
        let new_w = ((w as f32 * scale_x) as i32).max(1) as u32;
        let new_h = ((h as f32 * scale_y) as i32).max(1) as u32;
        let scaled = if (new_w, new_h) == (w, h) {
            self.mask.clone()
        } else {
            imageops::resize(&self.mask, new_w, new_h, FilterType::Nearest)
        };
        let move_x = ((new_w as f32 - w as f32) / 2.0).ceil() as i32;
        let move_y = ((new_h as f32 - h as f32) / 2.0).ceil() as i32;
        self.replace_geometry(self.bbox.left() - move_x,
                              self.bbox.top() - move_y, &scaled)
    }

    /// Replaces the mask by a disc of the given diameter centred on the
    /// centroid.
    pub fn draw_circle(&mut self, diameter: u32) -> bool {
        let d = diameter.max(1);
        let centre = (d as f64 - 1.0) / 2.0;
        let r2 = (d as f64 / 2.0).powi(2);
        let disc = GrayImage::from_fn(d, d, |x, y| {
            let dx = x as f64 - centre;
            let dy = y as f64 - centre;
            Luma([if dx * dx + dy * dy <= r2 { 255 } else { 0 }])
        });
        let x = (self.centroid.0 - centre).round() as i32;
        let y = (self.centroid.1 - centre).round() as i32;
        self.replace_geometry(x, y, &disc)
    }

    /// Replaces the mask by the ellipse with the same second moments.
    pub fn fit_ellipse(&mut self) -> bool {
        if self.contour.len() < 5 || self.area == 0 {
            let size = self.bbox.width().max(self.bbox.height());
            return self.draw_circle(size);
        }
        let (cx, cy) = self.centroid;
        let (mut mu20, mut mu02, mut mu11) = (0.0, 0.0, 0.0);
        for (x, y, p) in self.mask.enumerate_pixels() {
            if p[0] > 0 {
                let dx = self.bbox.left() as f64 + x as f64 - cx;
                let dy = self.bbox.top() as f64 + y as f64 - cy;
                mu20 += dx * dx;
                mu02 += dy * dy;
                mu11 += dx * dy;
            }
        }
        let n = self.area as f64;
        let (mu20, mu02, mu11) = (mu20 / n, mu02 / n, mu11 / n);
        let common = ((mu20 - mu02).powi(2) + 4.0 * mu11 * mu11).sqrt();
        let l1 = (mu20 + mu02 + common) / 2.0;
        let l2 = ((mu20 + mu02 - common) / 2.0).max(0.0);
        // A filled ellipse with semi-axis a has variance a^2 / 4 along it.
        let a = (2.0 * l1.sqrt()).max(0.5);
        let b = (2.0 * l2.sqrt()).max(0.5);
        let theta = 0.5 * (2.0 * mu11).atan2(mu20 - mu02);
        let (sin, cos) = theta.sin_cos();
        let ex = (a * a * cos * cos + b * b * sin * sin).sqrt();
        let ey = (a * a * sin * sin + b * b * cos * cos).sqrt();

        let x0 = (cx - ex).floor() as i32;
        let y0 = (cy - ey).floor() as i32;
        let w = ((cx + ex).ceil() as i32 - x0 + 1) as u32;
        let h = ((cy + ey).ceil() as i32 - y0 + 1) as u32;
        let ellipse = GrayImage::from_fn(w, h, |x, y| {
            let dx = (x0 + x as i32) as f64 - cx;
            let dy = (y0 + y as i32) as f64 - cy;
            let u = (dx * cos + dy * sin) / a;
            let v = (-dx * sin + dy * cos) / b;
            Luma([if u * u + v * v <= 1.0 { 255 } else { 0 }])
        });
        self.replace_geometry(x0, y0, &ellipse)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use imageproc::gray_image;

    use super::*;
    use crate::perimeter::CORNER_CUT;

    pub fn tile_info(width: u32, height: u32) -> TileInfo {
        TileInfo{tile: Tile::new(0, 0), tile_size: (width, height),
                 nr_of_tiles: (1, 1), image_size: (width, height),
                 original_image_size: (width, height)}
    }

    fn square(x: i32, y: i32, size: u32) -> Roi {
        let mask = GrayImage::from_pixel(size, size, Luma([255]));
        let contour = longest_outer_contour(&mask).unwrap();
        Roi::new(ClassId(1), ResolvedPlane::default(), 1.0,
                 Rect::at(x, y).of_size(size, size), mask, contour,
                 &tile_info(100, 100))
    }

    #[test]
    fn test_metrics() {
        let roi = square(10, 20, 10);
        assert_eq!(roi.area(), 100);
        assert_abs_diff_eq!(roi.perimeter(), 40.0 - 4.0 * CORNER_CUT,
                            epsilon = 1e-9);
        assert!(roi.circularity() > 0.0 && roi.circularity() <= 1.0);
        assert_abs_diff_eq!(roi.centroid().0, 14.5, epsilon = 1e-9);
        assert_abs_diff_eq!(roi.centroid().1, 24.5, epsilon = 1e-9);
        assert!(roi.object_id() > 0);
    }

    #[test]
    fn test_real_bbox_uses_tile_offset() {
        let mask = gray_image!(
            255, 255, 255;
            255, 255, 255);
        let info = TileInfo{tile: Tile::new(2, 1), tile_size: (100, 50),
                            nr_of_tiles: (3, 3), image_size: (100, 50),
                            original_image_size: (300, 150)};
        let roi = Roi::new(ClassId(1), ResolvedPlane::default(), 1.0,
                           Rect::at(5, 6).of_size(3, 2), mask, vec![], &info);
        assert_eq!(*roi.bbox_real(), Rect::at(205, 56).of_size(3, 2));
        assert_abs_diff_eq!(roi.centroid_real().0, 206.0, epsilon = 1e-9);
    }

    #[test]
    #[should_panic]
    fn test_mask_size_mismatch() {
        Roi::new(ClassId(1), ResolvedPlane::default(), 1.0,
                 Rect::at(0, 0).of_size(3, 3), GrayImage::new(2, 2), vec![],
                 &tile_info(10, 10));
    }

    #[test]
    fn test_clone_and_copy() {
        let roi = square(0, 0, 4);
        let moved = roi.clone_as(Some(ClassId(7)), None);
        assert_eq!(moved.object_id(), roi.object_id());
        assert_eq!(moved.class_id, ClassId(7));
        let copied = roi.copy_as(None, Some(roi.object_id()));
        assert_ne!(copied.object_id(), roi.object_id());
        assert_eq!(copied.parent, Some(roi.object_id()));
        assert_eq!(copied.class_id, ClassId(1));
    }

    #[test]
    fn test_intersection() {
        let a = square(0, 0, 10);
        let b = square(5, 0, 10);
        let c = square(50, 50, 4);
        let inter = a.calc_intersection(&b, 0.3, ResolvedPlane::default(),
                                        ClassId(9)).unwrap();
        assert_eq!(inter.area(), 50);
        assert_eq!(*inter.bbox(), Rect::at(5, 0).of_size(5, 10));
        assert_abs_diff_eq!(inter.confidence as f64, 0.5, epsilon = 1e-6);
        assert!(a.is_intersecting(&b, 0.5));
        assert!(!a.is_intersecting(&b, 0.6));
        assert!(a.calc_intersection(&b, 0.6, ResolvedPlane::default(),
                                    ClassId(9)).is_none());
        assert!(!a.is_intersecting(&c, 0.0));
    }

    #[test]
    fn test_intersection_keeps_outline() {
        let a = square(10, 10, 10);
        let b = square(15, 15, 10);
        let inter = a.calc_intersection(&b, 0.0, ResolvedPlane::default(),
                                        ClassId(9)).unwrap();
        assert_eq!(inter.area(), 25);
        assert_eq!(inter.contour().len(), 16);
        assert_abs_diff_eq!(inter.perimeter(), 20.0 - 4.0 * CORNER_CUT,
                            epsilon = 1e-9);
        assert!(inter.circularity() > 0.0);
    }

    #[test]
    fn test_measure_intensity() {
        let mut roi = square(1, 1, 2);
        let mut image = Gray16Image::from_pixel(4, 4, Luma([10]));
        image.put_pixel(2, 2, Luma([50]));
        let id = ImageId::default();
        let first = roi.measure_intensity(id, &image);
        assert_eq!(first.sum, 80.0);
        assert_eq!(first.avg, 20.0);
        assert_eq!((first.min, first.max), (10, 50));
        // Second call with changed pixels keeps the stored value.
        image.put_pixel(1, 1, Luma([1000]));
        assert_eq!(roi.measure_intensity(id, &image), first);
        assert_eq!(roi.intensity().len(), 1);
    }

    #[test]
    fn test_measure_distance() {
        let mut a = square(0, 0, 3);
        let b = square(10, 0, 3);
        let d = a.measure_distance(&b);
        assert_abs_diff_eq!(d.centroid_to_centroid, 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(d.surface_to_surface_min, 8.0, epsilon = 1e-9);
        assert_abs_diff_eq!(d.centroid_to_surface_min, 9.0, epsilon = 1e-9);
        assert!(d.surface_to_surface_max > d.surface_to_surface_min);
        assert_eq!(a.distances().get(&b.object_id()), Some(&d));
    }

    #[test]
    fn test_resize_identity() {
        let mut roi = square(20, 20, 6);
        let before = roi.clone();
        assert!(roi.resize(1.0, 1.0));
        assert_eq!(roi.bbox(), before.bbox());
        assert_eq!(roi.mask(), before.mask());
        assert_eq!(roi.area(), before.area());
        assert_abs_diff_eq!(roi.perimeter(), before.perimeter(),
                            epsilon = 1e-9);
        assert!(roi.perimeter() > 0.0);
        assert_abs_diff_eq!(roi.centroid().0, before.centroid().0,
                            epsilon = 1.0);
    }

    #[test]
    fn test_resize_grows_and_clips() {
        let mut roi = square(20, 20, 6);
        assert!(roi.resize(2.0, 2.0));
        assert_eq!(*roi.bbox(), Rect::at(17, 17).of_size(12, 12));
        assert_eq!(roi.area(), 144);

        let mut edge = square(0, 0, 6);
        assert!(edge.resize(2.0, 2.0));
        assert_eq!(*edge.bbox(), Rect::at(0, 0).of_size(9, 9));
        assert_eq!(edge.area(), 81);
    }

    #[test]
    fn test_draw_circle() {
        let mut roi = square(40, 40, 3);
        assert!(roi.draw_circle(9));
        assert_eq!(roi.bbox().width(), 9);
        assert_abs_diff_eq!(roi.centroid().0, 41.0, epsilon = 0.5);
        assert!(roi.circularity() > 0.8);

        // Clipped at the tile border.
        let mut corner = square(0, 0, 1);
        assert!(corner.draw_circle(3));
        assert_eq!(corner.bbox().left(), 0);
    }

    #[test]
    fn test_fit_ellipse_small_contour_falls_back() {
        let mut roi = square(10, 10, 2);
        assert_eq!(roi.contour().len(), 4);
        assert!(roi.fit_ellipse());
        assert_eq!(roi.bbox().width(), 2);
    }

    #[test]
    fn test_fit_ellipse() {
        // 20x4 bar becomes an elongated ellipse.
        let mask = GrayImage::from_pixel(20, 4, Luma([255]));
        let contour = longest_outer_contour(&mask).unwrap();
        let mut roi = Roi::new(ClassId(1), ResolvedPlane::default(), 1.0,
                               Rect::at(30, 30).of_size(20, 4), mask, contour,
                               &tile_info(100, 100));
        assert!(roi.fit_ellipse());
        assert!(roi.bbox().width() > 3 * roi.bbox().height());
        assert_abs_diff_eq!(roi.centroid().0, 39.5, epsilon = 1.0);
        assert_abs_diff_eq!(roi.centroid().1, 31.5, epsilon = 1.0);
    }
}  // mod tests.
