// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Turns a labels image (usually the binary output of a threshold) into
//! objects. Each configured entry selects the pixels of one gray value and
//! makes one object per connected component.

use std::time::Instant;

use image::{GrayImage, Luma};
use imageproc::contours::BorderType;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::classes::ClassRef;
use crate::commands::Command;
use crate::context::ProcessContext;
use crate::contour_funcs::all_contours;
use crate::error::{CommandError, Validity};
use crate::object_list::ObjectList;
use crate::plane::ImagePlane;
use crate::roi::Roi;

/// Above this many components the plane is considered noise.
pub const MAX_COMPONENTS: usize = 50000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierEntry {
    pub label_value: u16,
    pub class_out: ClassRef,
    pub min_particle_size: u64,
    pub max_particle_size: u64,
    pub min_circularity: f64,
    /// When non-zero, the object is replaced by a disc of this diameter
    /// around its centroid.
    pub snap_area_size: u32,
}

impl Default for ClassifierEntry {
    fn default() -> Self {
        ClassifierEntry{label_value: u16::MAX, class_out: ClassRef::Default,
                        min_particle_size: 1, max_particle_size: u64::MAX,
                        min_circularity: 0.0, snap_area_size: 0}
    }
}

impl ClassifierEntry {
    pub fn accepts(&self, roi: &Roi) -> bool {
        roi.area() >= self.min_particle_size &&
            roi.area() <= self.max_particle_size &&
            roi.circularity() >= self.min_circularity
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub classes: Vec<ClassifierEntry>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        ClassifierSettings{classes: vec![ClassifierEntry::default()]}
    }
}

impl Command for ClassifierSettings {
    fn execute(&self, ctx: &mut ProcessContext, image: &mut ImagePlane,
               objects: &mut ObjectList) -> Result<(), CommandError> {
        let start = Instant::now();
        let pixels = image.pixels();
        let tile_info = ctx.tile_info();
        let plane = ctx.pipeline.plane;
        let confidence = 1.0;
        for entry in &self.classes {
            let class_id = match ctx.class_id(entry.class_out) {
                Some(c) => c,
                None => continue,
            };
            let (width, height) = pixels.dimensions();
            let mask = GrayImage::from_fn(width, height, |x, y| {
                let on = pixels.get_pixel(x, y)[0] == entry.label_value;
                Luma([if on { 255 } else { 0 }])
            });
            let contours = all_contours(&mask);
            if contours.len() > MAX_COMPONENTS {
                warn!("{} components in {:?}, classifying nothing",
                      contours.len(), ctx.image.path);
                ctx.set_plane_validity(Validity::PossibleNoise);
                continue;
            }
            let mut added = 0;
            for contour in contours.iter().filter(|c| {
                c.border_type == BorderType::Outer && c.parent.is_none()
            }) {
                let mut roi = match Roi::from_contour(
                    class_id, plane, confidence, &contour.points, Some(&mask),
                    &tile_info)
                {
                    Some(roi) => roi,
                    None => continue,
                };
                if entry.snap_area_size > 0 &&
                    !roi.draw_circle(entry.snap_area_size)
                {
                    continue;
                }
                if entry.accepts(&roi) {
                    objects.push(roi);
                    added += 1;
                }
            }
            debug!("Class {} has {} objects", class_id, added);
        }
        debug!("Classifier in {:?}", start.elapsed());
        Ok(())
    }
}

// mod tests.
