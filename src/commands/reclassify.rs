// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Moves or copies objects to another class. Objects are selected by their
//! class, then filtered by shape, by intensity in some image, and by whether
//! they intersect objects of other classes.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::classes::{ClassId, ClassRef};
use crate::commands::{ids_of_classes, Command};
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::object_list::ObjectList;
use crate::plane::{Gray16Image, ImagePlane, ImageRef};
use crate::roi::{ObjectId, Roi};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReclassifyMode {
    /// The object changes class and keeps its id.
    #[default]
    Move,
    /// A duplicate with a new id is added to the target class.
    Copy,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterLogic {
    #[default]
    ApplyIfMatch,
    ApplyIfNotMatch,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HierarchyMode {
    /// The intersecting object becomes the parent.
    CreateTree,
    #[default]
    KeepExisting,
    Remove,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsFilter {
    pub min_particle_size: u64,
    pub max_particle_size: u64,
    pub min_circularity: f64,
}

impl Default for MetricsFilter {
    fn default() -> Self {
        MetricsFilter{min_particle_size: 0, max_particle_size: u64::MAX,
                      min_circularity: 0.0}
    }
}

impl MetricsFilter {
    pub fn matches(&self, roi: &Roi) -> bool {
        roi.area() >= self.min_particle_size &&
            roi.area() <= self.max_particle_size &&
            roi.circularity() >= self.min_circularity
    }
}

/// Average intensity under the object's mask must lie in
/// `[min_intensity, max_intensity]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntensityFilter {
    pub image_in: ImageRef,
    pub min_intensity: f64,
    pub max_intensity: f64,
}

impl Default for IntensityFilter {
    fn default() -> Self {
        IntensityFilter{image_in: ImageRef::default(), min_intensity: 0.0,
                        max_intensity: u16::MAX as f64}
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntersectionFilter {
    pub classes_with: Vec<ClassRef>,
    /// Fraction of the smaller object that must be covered.
    pub min_intersection: f64,
    pub filter_logic: FilterLogic,
    pub hierarchy: HierarchyMode,
}

impl Default for IntersectionFilter {
    fn default() -> Self {
        IntersectionFilter{classes_with: Vec::new(), min_intersection: 0.1,
                           filter_logic: FilterLogic::ApplyIfMatch,
                           hierarchy: HierarchyMode::KeepExisting}
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclassifySettings {
    pub mode: ReclassifyMode,
    pub classes_in: Vec<ClassRef>,
    /// An undefined target removes moved objects.
    pub class_out: ClassRef,
    pub metrics: MetricsFilter,
    pub intensity: Option<IntensityFilter>,
    pub intersection: Option<IntersectionFilter>,
}

/// For every object of `ids`, the first object of `classes_with` (other than
/// itself) it overlaps by at least `min_intersection`.
fn find_peers(objects: &ObjectList, classes_in: &BTreeSet<ClassId>,
              classes_with: &BTreeSet<ClassId>, min_intersection: f64)
              -> BTreeMap<ObjectId, ObjectId> {
    let mut peers = BTreeMap::new();
    for class_in in classes_in {
        let mine = match objects.index(*class_in) {
            Some(index) => index,
            None => continue,
        };
        for class_with in classes_with {
            let theirs = match objects.index(*class_with) {
                Some(index) => index,
                None => continue,
            };
            for (a, b) in mine.detect_collisions(theirs) {
                let (ra, rb) = match (mine.get(a), theirs.get(b)) {
                    (Some(ra), Some(rb)) => (ra, rb),
                    _ => continue,
                };
                if ra.object_id() == rb.object_id() ||
                    peers.contains_key(&ra.object_id())
                {
                    continue;
                }
                if ra.is_intersecting(rb, min_intersection) {
                    peers.insert(ra.object_id(), rb.object_id());
                }
            }
        }
    }
    peers
}

impl ReclassifySettings {
    fn intensity_matches(&self, roi: &Roi, image: Option<&Gray16Image>)
                         -> bool {
        match (&self.intensity, image) {
            (Some(filter), Some(image)) => {
                let avg = roi.intensity_in(image).avg;
                avg >= filter.min_intensity && avg <= filter.max_intensity
            },
            _ => true,
        }
    }
}

impl Command for ReclassifySettings {
    fn execute(&self, ctx: &mut ProcessContext, image: &mut ImagePlane,
               objects: &mut ObjectList) -> Result<(), CommandError> {
        let classes_in = ctx.class_ids(&self.classes_in);
        let class_out = ctx.class_id(self.class_out);
        let intensity_image = match &self.intensity {
            Some(filter) => Some(ctx.load_image(&filter.image_in, image)?),
            None => None,
        };
        let intensity_pixels = intensity_image.as_ref().map(|i| i.pixels());

        let (peers, logic, hierarchy) = match &self.intersection {
            Some(filter) => {
                let classes_with = ctx.class_ids(&filter.classes_with);
                if classes_with.iter().all(|c| objects.count(*c) == 0) {
                    if let Some(class_id) = class_out {
                        ctx.set_plane_class_validity(
                            class_id, Validity::NoInputObjects);
                    }
                    if filter.filter_logic == FilterLogic::ApplyIfMatch {
                        return Ok(());
                    }
                }
                (Some(find_peers(objects, &classes_in, &classes_with,
                                 filter.min_intersection)),
                 filter.filter_logic, filter.hierarchy)
            },
            None => (None, FilterLogic::ApplyIfMatch,
                     HierarchyMode::KeepExisting),
        };

        let mut changed = 0;
        for id in ids_of_classes(objects, &classes_in) {
            let roi = match objects.get(id) {
                Some(roi) => roi,
                None => continue,
            };
            let peer = peers.as_ref().and_then(|p| p.get(&id).copied());
            if let Some(peers) = &peers {
                let hit = peers.contains_key(&id);
                if hit != (logic == FilterLogic::ApplyIfMatch) {
                    continue;
                }
            }
            if !self.metrics.matches(roi) ||
                !self.intensity_matches(roi, intensity_pixels.as_deref())
            {
                continue;
            }
            let parent = match (hierarchy, peer) {
                (HierarchyMode::CreateTree, Some(peer)) => Some(peer),
                (HierarchyMode::Remove, _) => None,
                _ => roi.parent,
            };
            match (self.mode, class_out) {
                (ReclassifyMode::Move, Some(class_id)) => {
                    if let Some(roi) = objects.get_mut(id) {
                        roi.parent = parent;
                    }
                    objects.change_class(id, class_id);
                },
                (ReclassifyMode::Move, None) => {
                    objects.erase(id);
                },
                (ReclassifyMode::Copy, Some(class_id)) => {
                    let mut copy = roi.copy_as(Some(class_id), None);
                    copy.parent = parent;
                    objects.push(copy);
                },
                (ReclassifyMode::Copy, None) => continue,
            }
            changed += 1;
        }
        debug!("Reclassify {:?}: {} objects to {:?}",
               self.mode, changed, class_out);
        Ok(())
    }
}

// mod tests.
