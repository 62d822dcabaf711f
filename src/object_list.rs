// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::classes::ClassId;
use crate::roi::{next_tracking_id, ObjectId, Roi, TrackingId};
use crate::spatial_index::SpatialIndex;

/// All objects of an iteration, one [SpatialIndex] per class plus a lookup
/// by object id.
#[derive(Clone, Debug, Default)]
pub struct ObjectList {
    indices: BTreeMap<ClassId, SpatialIndex>,
    lookup: HashMap<ObjectId, (ClassId, usize)>,
}

impl ObjectList {
    pub fn new() -> Self {
        ObjectList::default()
    }

    /// Inserts into the index of the object's class, creating it on first
    /// use.
    pub fn push(&mut self, roi: Roi) -> ObjectId {
        let id = roi.object_id();
        let class_id = roi.class_id;
        if let Some(existing) = self.lookup.get(&id).copied() {
            panic!("Object {} already stored in class {}", id, existing.0);
        }
        let slot = self.indices.entry(class_id).or_default().push(roi);
        self.lookup.insert(id, (class_id, slot));
        id
    }

    pub fn extend(&mut self, rois: impl IntoIterator<Item = Roi>) {
        for roi in rois {
            self.push(roi);
        }
    }

    pub fn erase(&mut self, id: ObjectId) -> Option<Roi> {
        let (class_id, slot) = self.lookup.remove(&id)?;
        let index = self.indices.get_mut(&class_id)?;
        let roi = index.erase(slot);
        if index.is_empty() {
            self.indices.remove(&class_id);
        }
        roi
    }

    /// Removes a whole class, returning its objects in insertion order.
    pub fn erase_class(&mut self, class_id: ClassId) -> Vec<Roi> {
        let mut index = match self.indices.remove(&class_id) {
            Some(index) => index,
            None => return Vec::new(),
        };
        let rois = index.drain();
        for roi in &rois {
            self.lookup.remove(&roi.object_id());
        }
        rois
    }

    pub fn get(&self, id: ObjectId) -> Option<&Roi> {
        let (class_id, slot) = self.lookup.get(&id)?;
        self.indices.get(class_id)?.get(*slot)
    }

    /// The object's geometry and class must not be changed through this
    /// reference; see [ObjectList::change_class].
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Roi> {
        let (class_id, slot) = self.lookup.get(&id)?;
        self.indices.get_mut(class_id)?.get_mut(*slot)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.lookup.contains_key(&id)
    }

    pub fn index(&self, class_id: ClassId) -> Option<&SpatialIndex> {
        self.indices.get(&class_id)
    }

    pub fn classes(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.indices.keys().copied()
    }

    /// Number of objects over all classes.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    pub fn nr_of_classes(&self) -> usize {
        self.indices.len()
    }

    pub fn count(&self, class_id: ClassId) -> usize {
        self.indices.get(&class_id).map_or(0, |i| i.len())
    }

    /// Objects ordered by class, then insertion.
    pub fn iter(&self) -> impl Iterator<Item = &Roi> {
        self.indices.values().flat_map(|i| i.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Roi> {
        self.indices.values_mut().flat_map(|i| i.iter_mut())
    }

    pub fn ids(&self) -> BTreeSet<ObjectId> {
        self.lookup.keys().copied().collect()
    }

    /// Ids of the objects of `class_id`, in insertion order.
    pub fn ids_of_class(&self, class_id: ClassId) -> Vec<ObjectId> {
        self.indices.get(&class_id)
            .map(|i| i.iter().map(|r| r.object_id()).collect())
            .unwrap_or_default()
    }

    /// Moves an object to another class index, keeping its id.
    pub fn change_class(&mut self, id: ObjectId, class_id: ClassId) -> bool {
        let mut roi = match self.erase(id) {
            Some(roi) => roi,
            None => return false,
        };
        roi.class_id = class_id;
        self.push(roi);
        true
    }

    /// Gives the object a tracking id, minting one if it has none, and writes
    /// it into every linked object held by this list. A non-zero `override_id`
    /// is propagated instead. An existing own id is never replaced.
    pub fn assign_tracking_id_to_linked(&mut self, id: ObjectId,
                                        override_id: TrackingId)
                                        -> Option<TrackingId> {
        let roi = self.get_mut(id)?;
        if roi.tracking_id == 0 {
            roi.tracking_id = if override_id != 0 {
                override_id
            } else {
                next_tracking_id()
            };
        }
        let tracking_id =
            if override_id != 0 { override_id } else { roi.tracking_id };
        let linked: Vec<ObjectId> = roi.linked().iter().copied().collect();
        for linked_id in linked {
            if let Some(peer) = self.get_mut(linked_id) {
                peer.tracking_id = tracking_id;
            }
        }
        Some(tracking_id)
    }
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};
    use imageproc::rect::Rect;

    use super::*;
    use crate::plane::{ResolvedPlane, Tile, TileInfo};

    fn square(class: u16, x: i32, y: i32) -> Roi {
        let info = TileInfo{tile: Tile::new(0, 0), tile_size: (200, 200),
                            nr_of_tiles: (1, 1), image_size: (200, 200),
                            original_image_size: (200, 200)};
        Roi::new(ClassId(class), ResolvedPlane::default(), 1.0,
                 Rect::at(x, y).of_size(4, 4),
                 GrayImage::from_pixel(4, 4, Luma([255])), vec![], &info)
    }

    #[test]
    fn test_push_get_erase() {
        let mut list = ObjectList::new();
        let a = list.push(square(1, 0, 0));
        let b = list.push(square(2, 10, 10));
        list.push(square(2, 20, 20));
        assert_eq!(list.len(), 3);
        assert_eq!(list.nr_of_classes(), 2);
        assert_eq!(list.count(ClassId(2)), 2);
        assert_eq!(list.get(b).unwrap().bbox().left(), 10);
        assert!(list.erase(a).is_some());
        assert!(!list.contains(a));
        assert_eq!(list.nr_of_classes(), 1);
        assert!(list.erase(a).is_none());
    }

    #[test]
    fn test_erase_class() {
        let mut list = ObjectList::new();
        list.push(square(1, 0, 0));
        let b = list.push(square(2, 10, 10));
        let removed = list.erase_class(ClassId(2));
        assert_eq!(removed.len(), 1);
        assert!(!list.contains(b));
        assert!(list.index(ClassId(2)).is_none());
        assert!(list.erase_class(ClassId(9)).is_empty());
    }

    #[test]
    fn test_change_class_keeps_id() {
        let mut list = ObjectList::new();
        let a = list.push(square(1, 0, 0));
        assert!(list.change_class(a, ClassId(5)));
        assert_eq!(list.get(a).unwrap().class_id, ClassId(5));
        assert_eq!(list.ids_of_class(ClassId(5)), vec![a]);
        assert_eq!(list.count(ClassId(1)), 0);
    }

    #[test]
    #[should_panic]
    fn test_double_insert() {
        let mut list = ObjectList::new();
        let roi = square(1, 0, 0);
        list.push(roi.clone());
        list.push(roi);
    }

    #[test]
    fn test_tracking_broadcast() {
        let mut list = ObjectList::new();
        let a = list.push(square(1, 0, 0));
        let b = list.push(square(2, 0, 0));
        let mut coloc = square(3, 0, 0);
        coloc.add_linked([a, b]);
        let c = list.push(coloc);
        let tid = list.assign_tracking_id_to_linked(c, 0).unwrap();
        assert_ne!(tid, 0);
        for id in [a, b, c] {
            assert_eq!(list.get(id).unwrap().tracking_id, tid);
        }
        // Existing id is kept.
        assert_eq!(list.assign_tracking_id_to_linked(c, 0), Some(tid));
        // Override is propagated to linked objects only.
        assert_eq!(list.assign_tracking_id_to_linked(c, 777), Some(777));
        assert_eq!(list.get(a).unwrap().tracking_id, 777);
        assert_eq!(list.get(c).unwrap().tracking_id, tid);
    }
}  // mod tests.
