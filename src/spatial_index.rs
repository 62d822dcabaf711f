// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Objects of one class, bucketed in a uniform grid so that overlap queries
//! only compare objects sharing a cell.
//!
//! Objects live in an arena; a slot index stays valid until that object is
//! erased and slots are never reused. Mutation requires `&mut`, so inserts
//! are exclusive by construction; share an index between threads behind a
//! `Mutex`.

use std::collections::{BTreeSet, HashMap, HashSet};

use image::Luma;

use crate::classes::ClassId;
use crate::plane::{Gray16Image, ResolvedPlane};
use crate::roi::{ObjectId, Roi};

pub const DEFAULT_CELL_SIZE: i32 = 100;

pub type CellKey = (i32, i32);

#[derive(Clone, Debug)]
pub struct SpatialIndex {
    cell_size: i32,
    rois: Vec<Option<Roi>>,
    len: usize,
    grid: HashMap<CellKey, Vec<usize>>,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        SpatialIndex::new()
    }
}

/// Filter on the class of an object; None accepts every class.
fn accepts(classes: Option<&BTreeSet<ClassId>>, roi: &Roi) -> bool {
    classes.map_or(true, |c| c.contains(&roi.class_id))
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::with_cell_size(DEFAULT_CELL_SIZE)
    }

    pub fn with_cell_size(cell_size: i32) -> Self {
        assert!(cell_size > 0, "Cell size must be positive");
        SpatialIndex{cell_size, rois: Vec::new(), len: 0, grid: HashMap::new()}
    }

    /// Every cell the bounding box touches: x / cs ..= (x + w) / cs, same
    /// for y.
    fn cells_of(&self, roi: &Roi) -> impl Iterator<Item = CellKey> {
        let bbox = roi.bbox();
        let cs = self.cell_size;
        let x0 = bbox.left().div_euclid(cs);
        let x1 = (bbox.left() + bbox.width() as i32).div_euclid(cs);
        let y0 = bbox.top().div_euclid(cs);
        let y1 = (bbox.top() + bbox.height() as i32).div_euclid(cs);
        (y0..=y1).flat_map(move |cy| (x0..=x1).map(move |cx| (cx, cy)))
    }

    /// Adds an object; returns its slot.
    pub fn push(&mut self, roi: Roi) -> usize {
        let slot = self.rois.len();
        let cells: Vec<CellKey> = self.cells_of(&roi).collect();
        for cell in cells {
            self.grid.entry(cell).or_default().push(slot);
        }
        self.rois.push(Some(roi));
        self.len += 1;
        slot
    }

    /// Removes the object in `slot` from the arena and from every cell that
    /// references it. Cells left empty are dropped.
    pub fn erase(&mut self, slot: usize) -> Option<Roi> {
        let roi = self.rois.get_mut(slot)?.take()?;
        let cells: Vec<CellKey> = self.cells_of(&roi).collect();
        for cell in cells {
            if let Some(slots) = self.grid.get_mut(&cell) {
                slots.retain(|&s| s != slot);
                if slots.is_empty() {
                    self.grid.remove(&cell);
                }
            }
        }
        self.len -= 1;
        Some(roi)
    }

    pub fn get(&self, slot: usize) -> Option<&Roi> {
        self.rois.get(slot)?.as_ref()
    }

    /// Mutable access. The bounding box must not be changed through this
    /// reference; re-insert the object instead.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Roi> {
        self.rois.get_mut(slot)?.as_mut()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Objects in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Roi> {
        self.rois.iter().flatten()
    }

    pub fn iter_slots(&self) -> impl Iterator<Item = (usize, &Roi)> {
        self.rois.iter().enumerate()
            .filter_map(|(slot, roi)| roi.as_ref().map(|r| (slot, r)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Roi> {
        self.rois.iter_mut().flatten()
    }

    /// Empties the index, returning its objects in insertion order.
    pub fn drain(&mut self) -> Vec<Roi> {
        self.grid.clear();
        self.len = 0;
        std::mem::take(&mut self.rois).into_iter().flatten().collect()
    }

    pub fn cell(&self, key: CellKey) -> Option<&[usize]> {
        self.grid.get(&key).map(|v| v.as_slice())
    }

    pub fn cell_keys(&self) -> impl Iterator<Item = &CellKey> {
        self.grid.keys()
    }

    /// Pairs (self slot, other slot) whose bounding boxes overlap. Each pair
    /// is reported once, ordered by slots.
    pub fn detect_collisions(&self, other: &SpatialIndex)
                             -> Vec<(usize, usize)> {
        assert_eq!(self.cell_size, other.cell_size,
                   "Indices use different cell sizes");
        let mut seen = HashSet::new();
        for (key, mine) in &self.grid {
            let theirs = match other.grid.get(key) {
                Some(t) => t,
                None => continue,
            };
            for &a in mine {
                for &b in theirs {
                    if seen.contains(&(a, b)) {
                        continue;
                    }
                    let (ra, rb) = match (self.get(a), other.get(b)) {
                        (Some(ra), Some(rb)) => (ra, rb),
                        _ => continue,
                    };
                    if ra.bbox().intersect(*rb.bbox()).is_some() {
                        seen.insert((a, b));
                    }
                }
            }
        }
        let mut pairs: Vec<(usize, usize)> = seen.into_iter().collect();
        pairs.sort_unstable();
        pairs
    }

    /// Intersects objects of this index with those of `other`. Every object
    /// takes part in at most one intersection. Each resulting object gets
    /// class `class_id` and links both inputs plus everything they already
    /// link. Returns the new objects and the ids of all participants.
    pub fn calc_colocalization(&self, other: &SpatialIndex,
                               classes_me: Option<&BTreeSet<ClassId>>,
                               classes_other: &BTreeSet<ClassId>,
                               min_overlap: f64, plane: ResolvedPlane,
                               class_id: ClassId)
                               -> (Vec<Roi>, BTreeSet<ObjectId>) {
        let mut used_me = HashSet::new();
        let mut used_other = HashSet::new();
        let mut participants = BTreeSet::new();
        let mut result = Vec::new();
        for (a, b) in self.detect_collisions(other) {
            if used_me.contains(&a) || used_other.contains(&b) {
                continue;
            }
            let (ra, rb) = match (self.get(a), other.get(b)) {
                (Some(ra), Some(rb)) => (ra, rb),
                _ => continue,
            };
            if !accepts(classes_me, ra) ||
                !classes_other.contains(&rb.class_id)
            {
                continue;
            }
            if let Some(mut roi) = ra.calc_intersection(rb, min_overlap, plane,
                                                        class_id) {
                roi.add_linked([ra.object_id(), rb.object_id()]);
                roi.add_linked(ra.linked().iter().copied());
                roi.add_linked(rb.linked().iter().copied());
                used_me.insert(a);
                used_other.insert(b);
                participants.insert(ra.object_id());
                participants.insert(rb.object_id());
                result.push(roi);
            }
        }
        (result, participants)
    }

    /// For every object of this index passing `classes_me`, the first object
    /// of `other` (class in `classes_other`) it overlaps by at least
    /// `min_overlap`. Returns (self slot, id of the intersecting object).
    pub fn find_intersecting(&self, other: &SpatialIndex,
                             classes_me: Option<&BTreeSet<ClassId>>,
                             classes_other: &BTreeSet<ClassId>,
                             min_overlap: f64) -> Vec<(usize, ObjectId)> {
        let mut found: Vec<(usize, ObjectId)> = Vec::new();
        let mut done = HashSet::new();
        for (a, b) in self.detect_collisions(other) {
            if done.contains(&a) {
                continue;
            }
            let (ra, rb) = match (self.get(a), other.get(b)) {
                (Some(ra), Some(rb)) => (ra, rb),
                _ => continue,
            };
            if !accepts(classes_me, ra) ||
                !classes_other.contains(&rb.class_id)
            {
                continue;
            }
            if ra.is_intersecting(rb, min_overlap) {
                done.insert(a);
                found.push((a, rb.object_id()));
            }
        }
        found
    }

    /// Stamps u16::MAX into `image` under the mask of every object passing
    /// `classes`.
    pub fn create_binary_image(&self, image: &mut Gray16Image,
                               classes: Option<&BTreeSet<ClassId>>) {
        let (width, height) = image.dimensions();
        for roi in self.iter().filter(|r| accepts(classes, r)) {
            let bbox = roi.bbox();
            for (x, y, p) in roi.mask().enumerate_pixels() {
                if p[0] == 0 {
                    continue;
                }
                let ix = bbox.left() + x as i32;
                let iy = bbox.top() + y as i32;
                if ix >= 0 && iy >= 0 && ix < width as i32 &&
                    iy < height as i32
                {
                    image.put_pixel(ix as u32, iy as u32, Luma([u16::MAX]));
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use image::GrayImage;
    use imageproc::rect::Rect;

    use super::*;
    use crate::contour_funcs::longest_outer_contour;
    use crate::plane::{Tile, TileInfo};

    fn tile_info() -> TileInfo {
        TileInfo{tile: Tile::new(0, 0), tile_size: (400, 400),
                 nr_of_tiles: (1, 1), image_size: (400, 400),
                 original_image_size: (400, 400)}
    }

    pub fn square(class: u16, x: i32, y: i32, size: u32) -> Roi {
        let mask = GrayImage::from_pixel(size, size, Luma([255]));
        let contour = longest_outer_contour(&mask).unwrap();
        Roi::new(ClassId(class), ResolvedPlane::default(), 1.0,
                 Rect::at(x, y).of_size(size, size), mask, contour,
                 &tile_info())
    }

    fn check_grid(index: &SpatialIndex) {
        for (slot, roi) in index.iter_slots() {
            for cell in index.cells_of(roi) {
                assert!(index.cell(cell).unwrap().contains(&slot));
            }
        }
        for key in index.cell_keys() {
            assert!(!index.cell(*key).unwrap().is_empty());
        }
    }

    #[test]
    fn test_push_covers_cells() {
        let mut index = SpatialIndex::new();
        let slot = index.push(square(1, 90, 90, 20));
        assert_eq!(index.len(), 1);
        for key in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            assert_eq!(index.cell(key), Some(&[slot][..]));
        }
        check_grid(&index);
    }

    #[test]
    fn test_erase_removes_empty_cells() {
        let mut index = SpatialIndex::new();
        let a = index.push(square(1, 90, 90, 20));
        let b = index.push(square(1, 10, 10, 5));
        let erased = index.erase(a).unwrap();
        assert_eq!(erased.bbox().left(), 90);
        assert_eq!(index.len(), 1);
        assert!(index.cell((1, 1)).is_none());
        assert_eq!(index.cell((0, 0)), Some(&[b][..]));
        assert!(index.erase(a).is_none());
        assert!(index.get(a).is_none());
        // Slots stay stable.
        assert_eq!(index.get(b).unwrap().bbox().left(), 10);
        check_grid(&index);
    }

    #[test]
    fn test_collisions_after_erase() {
        let mut me = SpatialIndex::new();
        let mut other = SpatialIndex::new();
        let a = me.push(square(1, 90, 90, 20));
        let b = me.push(square(1, 95, 95, 10));
        let far = me.push(square(1, 300, 300, 5));
        other.push(square(2, 100, 100, 20));
        me.erase(a).unwrap();
        // The cells shared with the erased object still hold the survivor.
        assert_eq!(me.cell((0, 0)), Some(&[b][..]));
        assert_eq!(me.cell((1, 1)), Some(&[b][..]));
        assert_eq!(me.cell((3, 3)), Some(&[far][..]));
        assert_eq!(me.detect_collisions(&other), vec![(b, 0)]);
        check_grid(&me);
    }

    #[test]
    fn test_detect_collisions() {
        let mut me = SpatialIndex::new();
        let mut other = SpatialIndex::new();
        me.push(square(1, 90, 90, 20));
        me.push(square(1, 300, 300, 5));
        other.push(square(2, 100, 100, 20));
        other.push(square(2, 150, 10, 5));
        // The first pair shares four cells but is reported once.
        assert_eq!(me.detect_collisions(&other), vec![(0, 0)]);
    }

    #[test]
    fn test_colocalization_uses_each_object_once() {
        let mut me = SpatialIndex::new();
        let mut other = SpatialIndex::new();
        let a = square(1, 10, 10, 10);
        let a_id = a.object_id();
        me.push(a);
        let b1 = square(2, 12, 10, 10);
        let b1_id = b1.object_id();
        other.push(b1);
        other.push(square(2, 8, 10, 10));
        let classes_other = BTreeSet::from([ClassId(2)]);
        let (result, participants) = me.calc_colocalization(
            &other, None, &classes_other, 0.3, ResolvedPlane::default(),
            ClassId(3));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].class_id, ClassId(3));
        assert_eq!(*result[0].linked(), BTreeSet::from([a_id, b1_id]));
        assert_eq!(participants, BTreeSet::from([a_id, b1_id]));
    }

    #[test]
    fn test_colocalization_respects_class_filter() {
        let mut me = SpatialIndex::new();
        let mut other = SpatialIndex::new();
        me.push(square(1, 10, 10, 10));
        other.push(square(2, 12, 10, 10));
        let (result, _) = me.calc_colocalization(
            &other, None, &BTreeSet::from([ClassId(5)]), 0.3,
            ResolvedPlane::default(), ClassId(3));
        assert!(result.is_empty());
    }

    #[test]
    fn test_find_intersecting() {
        let mut me = SpatialIndex::new();
        let mut other = SpatialIndex::new();
        me.push(square(1, 10, 10, 10));
        me.push(square(1, 200, 200, 10));
        let peer = square(2, 15, 10, 10);
        let peer_id = peer.object_id();
        other.push(peer);
        let found = me.find_intersecting(&other, None,
                                         &BTreeSet::from([ClassId(2)]), 0.5);
        assert_eq!(found, vec![(0, peer_id)]);
        assert!(me.find_intersecting(&other, None,
                                     &BTreeSet::from([ClassId(2)]), 0.6)
                .is_empty());
    }

    #[test]
    fn test_create_binary_image() {
        let mut index = SpatialIndex::new();
        index.push(square(1, 1, 1, 2));
        index.push(square(2, 5, 5, 2));
        let mut image = Gray16Image::new(8, 8);
        let classes = BTreeSet::from([ClassId(1)]);
        index.create_binary_image(&mut image, Some(&classes));
        assert_eq!(image.get_pixel(1, 1)[0], u16::MAX);
        assert_eq!(image.get_pixel(2, 2)[0], u16::MAX);
        assert_eq!(image.get_pixel(5, 5)[0], 0);
        let total = image.pixels().filter(|p| p[0] > 0).count();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_drain_keeps_order() {
        let mut index = SpatialIndex::new();
        index.push(square(1, 1, 1, 2));
        index.push(square(1, 50, 5, 2));
        let rois = index.drain();
        assert_eq!(rois.len(), 2);
        assert_eq!(rois[1].bbox().left(), 50);
        assert!(index.is_empty());
        assert_eq!(index.cell_keys().count(), 0);
    }
}  // mod tests.
