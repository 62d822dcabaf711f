// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::classes::ClassRef;
use crate::commands::{ids_of_classes, Command};
use crate::context::ProcessContext;
use crate::error::CommandError;
use crate::object_list::ObjectList;
use crate::plane::{ImageId, ImagePlane, ImageRef, MemoryIdx};
use crate::roi::Roi;

/// Records intensity statistics of every object of `classes_in` in each of
/// `images_in`. `$` measures the plane as processed so far; other references
/// are resolved against the running pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureIntensitySettings {
    pub classes_in: Vec<ClassRef>,
    pub images_in: Vec<ImageRef>,
}

impl Default for MeasureIntensitySettings {
    fn default() -> Self {
        MeasureIntensitySettings{classes_in: vec![ClassRef::Default],
                                 images_in: vec![ImageRef::default()]}
    }
}

impl Command for MeasureIntensitySettings {
    fn execute(&self, ctx: &mut ProcessContext, image: &mut ImagePlane,
               objects: &mut ObjectList) -> Result<(), CommandError> {
        let start = Instant::now();
        let ids = ids_of_classes(objects, &ctx.class_ids(&self.classes_in));
        for image_ref in &self.images_in {
            let key = match image_ref.memory {
                MemoryIdx::Default =>
                    ImageId{memory: MemoryIdx::Default, ..image.id},
                _ => ctx.resolve_image(image_ref),
            };
            let source = ctx.load_image(image_ref, image)?;
            let pixels = source.pixels();
            for id in &ids {
                if let Some(roi) = objects.get_mut(*id) {
                    roi.measure_intensity(key, &pixels);
                }
            }
        }
        debug!("Measured {} objects in {} images in {:?}", ids.len(),
               self.images_in.len(), start.elapsed());
        Ok(())
    }
}

/// Distances from every object of `classes_from` to every object of
/// `classes_to`, stored on the former.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureDistanceSettings {
    pub classes_from: Vec<ClassRef>,
    pub classes_to: Vec<ClassRef>,
}

impl Command for MeasureDistanceSettings {
    fn execute(&self, ctx: &mut ProcessContext, _image: &mut ImagePlane,
               objects: &mut ObjectList) -> Result<(), CommandError> {
        let from = ids_of_classes(objects, &ctx.class_ids(&self.classes_from));
        let peers: Vec<Roi> =
            ids_of_classes(objects, &ctx.class_ids(&self.classes_to))
            .into_iter()
            .filter_map(|id| objects.get(id).cloned())
            .collect();
        let mut pairs = 0;
        for id in from {
            let roi = match objects.get_mut(id) {
                Some(roi) => roi,
                None => continue,
            };
            for peer in peers.iter().filter(|p| p.object_id() != id) {
                roi.measure_distance(peer);
                pairs += 1;
            }
        }
        debug!("Measured {} distances", pairs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::classes::ClassId;
    use crate::context::tests::Fixture;
    use crate::context::IterationContext;
    use crate::spatial_index::tests::square;

    #[test]
    fn test_measure_intensity() {
        let fixture = Fixture::new(2);
        let mut iteration = IterationContext::default();
        let mut image = fixture.current();
        crate::image_funcs::fill(image.pixels_mut(), 7);
        let mut ctx = fixture.context(&mut iteration);
        let mut objects = ObjectList::new();
        let id = objects.push(square(1, 10, 10, 10));
        objects.push(square(2, 30, 30, 5));

        let settings = MeasureIntensitySettings{
            classes_in: vec![ClassRef::literal(1)],
            images_in: vec![
                ImageRef::channel(1),
                ImageRef{memory: MemoryIdx::Default, ..ImageRef::default()},
                ImageRef::default()]};
        settings.execute(&mut ctx, &mut image, &mut objects).unwrap();
        settings.execute(&mut ctx, &mut image, &mut objects).unwrap();

        let roi = objects.get(id).unwrap();
        assert_eq!(roi.intensity().len(), 3);
        let mut averages: Vec<f64> = roi.intensity().values()
            .map(|i| i.avg).collect();
        averages.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(averages, vec![7.0, 100.0, 200.0]);
        let sum: f64 = roi.intensity().values().map(|i| i.sum).sum();
        assert_abs_diff_eq!(sum, 100.0 * 307.0);
        for roi in objects.iter().filter(|r| r.class_id == ClassId(2)) {
            assert!(roi.intensity().is_empty());
        }
    }

    #[test]
    fn test_measure_distance() {
        let fixture = Fixture::new(1);
        let mut iteration = IterationContext::default();
        let mut image = fixture.current();
        let mut ctx = fixture.context(&mut iteration);
        let mut objects = ObjectList::new();
        let a = objects.push(square(1, 10, 10, 10));
        let b = objects.push(square(2, 40, 10, 10));

        MeasureDistanceSettings{classes_from: vec![ClassRef::literal(1)],
                                classes_to: vec![ClassRef::literal(1),
                                                 ClassRef::literal(2)]}
            .execute(&mut ctx, &mut image, &mut objects).unwrap();
        let distances = objects.get(a).unwrap().distances();
        assert_eq!(distances.len(), 1);
        let d = distances[&b];
        assert_abs_diff_eq!(d.centroid_to_centroid, 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(d.surface_to_surface_min, 21.0, epsilon = 1e-9);
        assert!(objects.get(b).unwrap().distances().is_empty());
    }
}  // mod tests.
