// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Intersects the objects of several classes. Class 1 is intersected with
//! class 2, the result with class 3 and so on; every surviving intersection
//! becomes an object of `class_out` linking the objects it came from, and all
//! of them share one tracking id.

use std::collections::BTreeSet;
use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::classes::{ClassId, ClassRef};
use crate::commands::reclassify::ReclassifyMode;
use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::object_list::ObjectList;
use crate::plane::ImagePlane;
use crate::roi::ObjectId;
use crate::spatial_index::SpatialIndex;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColocalizationInput {
    pub class_in: ClassRef,
    /// Target for objects of `class_in` that are part of a colocalization.
    pub class_out_coloc: ClassRef,
    /// Target for the others.
    pub class_out_non_coloc: ClassRef,
}

impl Default for ColocalizationInput {
    fn default() -> Self {
        ColocalizationInput{class_in: ClassRef::Default,
                            class_out_coloc: ClassRef::Undefined,
                            class_out_non_coloc: ClassRef::Undefined}
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColocalizationSettings {
    pub inputs: Vec<ColocalizationInput>,
    pub class_out: ClassRef,
    pub min_intersection: f64,
    pub mode: ReclassifyMode,
}

impl Default for ColocalizationSettings {
    fn default() -> Self {
        ColocalizationSettings{inputs: Vec::new(), class_out: ClassRef::Default,
                               min_intersection: 0.3,
                               mode: ReclassifyMode::Move}
    }
}

impl ColocalizationSettings {
    fn reclassify(&self, objects: &mut ObjectList, id: ObjectId,
                  class_id: Option<ClassId>) {
        let class_id = match class_id {
            Some(c) => c,
            None => return,
        };
        match self.mode {
            ReclassifyMode::Move => {
                objects.change_class(id, class_id);
            },
            ReclassifyMode::Copy => {
                if let Some(copy) = objects.get(id)
                    .map(|roi| roi.copy_as(Some(class_id), None))
                {
                    objects.push(copy);
                }
            },
        }
    }
}

impl Command for ColocalizationSettings {
    fn execute(&self, ctx: &mut ProcessContext, _image: &mut ImagePlane,
               objects: &mut ObjectList) -> Result<(), CommandError> {
        let start = Instant::now();
        if self.inputs.len() < 2 {
            return Err(CommandError::plane(
                Validity::Invalid, "colocalization needs two classes or more"));
        }
        let class_out = ctx.class_id(self.class_out).ok_or_else(|| {
            CommandError::plane(Validity::Invalid,
                                "colocalization needs an output class")
        })?;
        let mut classes = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            match ctx.class_id(input.class_in) {
                Some(c) if objects.count(c) > 0 => classes.push(c),
                _ => {
                    ctx.set_plane_class_validity(class_out,
                                                 Validity::NoInputObjects);
                    return Ok(());
                },
            }
        }
        let plane = ctx.pipeline.plane;

        // Two buffers swap roles each step: `current` holds the
        // intersections so far, `next` receives the following step.
        let mut current = SpatialIndex::new();
        let mut next = SpatialIndex::new();
        for (step, class_id) in classes.iter().enumerate().skip(1) {
            let other = match objects.index(*class_id) {
                Some(index) => index,
                None => break,
            };
            let only_this = BTreeSet::from([*class_id]);
            next.drain();
            let (rois, _) = if step == 1 {
                let first = BTreeSet::from([classes[0]]);
                match objects.index(classes[0]) {
                    Some(index) => index.calc_colocalization(
                        other, Some(&first), &only_this,
                        self.min_intersection, plane, class_out),
                    None => break,
                }
            } else {
                current.calc_colocalization(
                    other, None, &only_this, self.min_intersection, plane,
                    class_out)
            };
            for roi in rois {
                next.push(roi);
            }
            std::mem::swap(&mut current, &mut next);
        }

        let mut participants = BTreeSet::new();
        let mut found = 0;
        for mut roi in current.drain() {
            roi.retain_linked(|id| objects.contains(id));
            participants.extend(roi.linked().iter().copied());
            let id = objects.push(roi);
            objects.assign_tracking_id_to_linked(id, 0);
            found += 1;
        }

        for (input, class_id) in self.inputs.iter().zip(&classes) {
            let coloc = ctx.class_id(input.class_out_coloc);
            let non_coloc = ctx.class_id(input.class_out_non_coloc);
            for id in objects.ids_of_class(*class_id) {
                if participants.contains(&id) {
                    self.reclassify(objects, id, coloc);
                } else {
                    self.reclassify(objects, id, non_coloc);
                }
            }
        }
        debug!("Colocalization of {} classes found {} in {:?}",
               classes.len(), found, start.elapsed());
        Ok(())
    }
}

// mod tests.
