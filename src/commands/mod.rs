// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! The operations a pipeline is made of. Each command works on the current
//! image plane and/or the pipeline's object list and reads everything else
//! through the [ProcessContext].
//!
//! Commands never fail the pipeline: a recoverable problem is returned as a
//! [CommandError], the processor records its [Validity] and moves on to the
//! next command.
//!
//! [Validity]: crate::error::Validity

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::classes::ClassId;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::object_list::ObjectList;
use crate::plane::ImagePlane;
use crate::roi::ObjectId;

pub mod blur;
pub mod classifier;
pub mod colocalization;
pub mod color_filter;
pub mod edge_detection;
pub mod enhance_contrast;
pub mod fft_bandpass;
pub mod fill_holes;
pub mod hough_transform;
pub mod image_cache;
pub mod image_math;
pub mod image_saver;
pub mod margin_crop;
pub mod measure;
pub mod median_subtract;
pub mod morphology;
pub mod objects_to_image;
pub mod rank;
pub mod reclassify;
pub mod rolling_ball;
pub mod threshold;
pub mod threshold_adaptive;
pub mod threshold_validator;
pub mod voronoi_grid;
pub mod watershed;

pub trait Command: Send + Sync {
    /// Runs the command on `image` and `objects`, the running pipeline's
    /// current plane and object store. On error both are left as they were
    /// or in a consistent partial state.
    fn execute(&self, ctx: &mut ProcessContext, image: &mut ImagePlane,
               objects: &mut ObjectList) -> Result<(), CommandError>;
}

/// One step of a pipeline as written in the project file, e.g.
/// `{"command": "threshold", "method": "LI", "threshold_min": 100}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandSettings {
    Blur(blur::BlurSettings),
    EdgeDetection(edge_detection::EdgeDetectionSettings),
    MarginCrop(margin_crop::MarginCropSettings),
    MedianSubtract(median_subtract::MedianSubtractSettings),
    RollingBall(rolling_ball::RollingBallSettings),
    EnhanceContrast(enhance_contrast::EnhanceContrastSettings),
    FftBandpass(fft_bandpass::FftBandpassSettings),
    ColorFilter(color_filter::ColorFilterSettings),
    RankFilter(rank::RankFilterSettings),
    Morphology(morphology::MorphologySettings),
    FillHoles(fill_holes::FillHolesSettings),
    Watershed(watershed::WatershedSettings),
    ImageMath(image_math::ImageMathSettings),
    Threshold(threshold::ThresholdSettings),
    ThresholdAdaptive(threshold_adaptive::ThresholdAdaptiveSettings),
    ThresholdValidator(threshold_validator::ThresholdValidatorSettings),
    Classifier(classifier::ClassifierSettings),
    Reclassify(reclassify::ReclassifySettings),
    Colocalization(colocalization::ColocalizationSettings),
    ObjectsToImage(objects_to_image::ObjectsToImageSettings),
    HoughTransform(hough_transform::HoughTransformSettings),
    VoronoiGrid(voronoi_grid::VoronoiGridSettings),
    MeasureIntensity(measure::MeasureIntensitySettings),
    MeasureDistance(measure::MeasureDistanceSettings),
    ImageToCache(image_cache::ImageToCacheSettings),
    ImageFromCache(image_cache::ImageFromCacheSettings),
    ImageSaver(image_saver::ImageSaverSettings),
}

impl CommandSettings {
    pub fn command(&self) -> &dyn Command {
        match self {
            CommandSettings::Blur(c) => c,
            CommandSettings::EdgeDetection(c) => c,
            CommandSettings::MarginCrop(c) => c,
            CommandSettings::MedianSubtract(c) => c,
            CommandSettings::RollingBall(c) => c,
            CommandSettings::EnhanceContrast(c) => c,
            CommandSettings::FftBandpass(c) => c,
            CommandSettings::ColorFilter(c) => c,
            CommandSettings::RankFilter(c) => c,
            CommandSettings::Morphology(c) => c,
            CommandSettings::FillHoles(c) => c,
            CommandSettings::Watershed(c) => c,
            CommandSettings::ImageMath(c) => c,
            CommandSettings::Threshold(c) => c,
            CommandSettings::ThresholdAdaptive(c) => c,
            CommandSettings::ThresholdValidator(c) => c,
            CommandSettings::Classifier(c) => c,
            CommandSettings::Reclassify(c) => c,
            CommandSettings::Colocalization(c) => c,
            CommandSettings::ObjectsToImage(c) => c,
            CommandSettings::HoughTransform(c) => c,
            CommandSettings::VoronoiGrid(c) => c,
            CommandSettings::MeasureIntensity(c) => c,
            CommandSettings::MeasureDistance(c) => c,
            CommandSettings::ImageToCache(c) => c,
            CommandSettings::ImageFromCache(c) => c,
            CommandSettings::ImageSaver(c) => c,
        }
    }

    /// Name used in log messages; matches the `command` tag.
    pub fn name(&self) -> &'static str {
        match self {
            CommandSettings::Blur(_) => "blur",
            CommandSettings::EdgeDetection(_) => "edge_detection",
            CommandSettings::MarginCrop(_) => "margin_crop",
            CommandSettings::MedianSubtract(_) => "median_subtract",
            CommandSettings::RollingBall(_) => "rolling_ball",
            CommandSettings::EnhanceContrast(_) => "enhance_contrast",
            CommandSettings::FftBandpass(_) => "fft_bandpass",
            CommandSettings::ColorFilter(_) => "color_filter",
            CommandSettings::RankFilter(_) => "rank_filter",
            CommandSettings::Morphology(_) => "morphology",
            CommandSettings::FillHoles(_) => "fill_holes",
            CommandSettings::Watershed(_) => "watershed",
            CommandSettings::ImageMath(_) => "image_math",
            CommandSettings::Threshold(_) => "threshold",
            CommandSettings::ThresholdAdaptive(_) => "threshold_adaptive",
            CommandSettings::ThresholdValidator(_) => "threshold_validator",
            CommandSettings::Classifier(_) => "classifier",
            CommandSettings::Reclassify(_) => "reclassify",
            CommandSettings::Colocalization(_) => "colocalization",
            CommandSettings::ObjectsToImage(_) => "objects_to_image",
            CommandSettings::HoughTransform(_) => "hough_transform",
            CommandSettings::VoronoiGrid(_) => "voronoi_grid",
            CommandSettings::MeasureIntensity(_) => "measure_intensity",
            CommandSettings::MeasureDistance(_) => "measure_distance",
            CommandSettings::ImageToCache(_) => "image_to_cache",
            CommandSettings::ImageFromCache(_) => "image_from_cache",
            CommandSettings::ImageSaver(_) => "image_saver",
        }
    }
}

/// Kernels are centred on a pixel and must have an odd, non-zero size.
pub(crate) fn check_kernel_size(kernel_size: u32)
                                -> Result<(), CommandError> {
    if kernel_size == 0 || kernel_size % 2 == 0 {
        return Err(CommandError::plane(
            Validity::InvalidKernelSize,
            format!("kernel size {} must be odd", kernel_size)));
    }
    Ok(())
}

/// Ids of the objects belonging to `classes`, ordered by class.
pub(crate) fn ids_of_classes(objects: &ObjectList,
                             classes: &BTreeSet<ClassId>) -> Vec<ObjectId> {
    classes.iter().flat_map(|c| objects.ids_of_class(*c)).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use image::Luma;

    use super::*;
    use crate::classes::ClassRef;
    use crate::plane::Gray16Image;

    /// Black image with filled discs (cx, cy, radius) of value 30000.
    pub fn disc_image(width: u32, height: u32, discs: &[(i32, i32, i32)])
                      -> Gray16Image {
        let mut image = Gray16Image::new(width, height);
        for &(cx, cy, r) in discs {
            for (x, y, p) in image.enumerate_pixels_mut() {
                let dx = x as i32 - cx;
                let dy = y as i32 - cy;
                if dx * dx + dy * dy <= r * r {
                    *p = Luma([30000]);
                }
            }
        }
        image
    }

    #[test]
    fn test_tagged_settings() {
        let text = r#"[
            {"command": "blur", "mode": "MEDIAN", "kernel_size": 5},
            {"command": "watershed"},
            {"command": "image_to_cache", "memory": "M2",
             "scope": "PIPELINE"},
            {"command": "reclassify", "classes_in": [1, "temp2"],
             "class_out": "$"}
        ]"#;
        let commands: Vec<CommandSettings> =
            serde_json::from_str(text).unwrap();
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[1].name(), "watershed");
        match &commands[3] {
            CommandSettings::Reclassify(r) => {
                assert_eq!(r.classes_in, vec![ClassRef::literal(1),
                                              ClassRef::Temp(2)]);
                assert_eq!(r.class_out, ClassRef::Default);
            },
            other => panic!("unexpected command {:?}", other),
        }
        let again: Vec<CommandSettings> = serde_json::from_str(
            &serde_json::to_string(&commands).unwrap()).unwrap();
        assert_eq!(again, commands);
    }

    #[test]
    fn test_image_and_object_function_tags() {
        let text = r##"[
            {"command": "threshold_adaptive", "method": "MID_GRAY",
             "radius": 7.5},
            {"command": "enhance_contrast", "equalize_histogram": true},
            {"command": "fft_bandpass", "stripes": "VERTICAL"},
            {"command": "color_filter", "grayscale_mode": "LINEAR"},
            {"command": "voronoi_grid", "points_classes_in": [3],
             "max_radius": 40},
            {"command": "image_saver", "name_suffix": "_ctrl",
             "classes_in": [{"class_in": 3, "color": "#00ff00"}]}
        ]"##;
        let commands: Vec<CommandSettings> =
            serde_json::from_str(text).unwrap();
        let names: Vec<_> = commands.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["threshold_adaptive", "enhance_contrast",
                           "fft_bandpass", "color_filter", "voronoi_grid",
                           "image_saver"]);
        match &commands[4] {
            CommandSettings::VoronoiGrid(v) => {
                assert_eq!(v.max_radius, 40);
                assert!(v.exclude_areas_without_point);
            },
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_kernel_size() {
        assert!(check_kernel_size(3).is_ok());
        let err = check_kernel_size(4).unwrap_err();
        assert_eq!(err.validity, Validity::InvalidKernelSize);
        assert!(check_kernel_size(0).is_err());
    }
}  // mod tests.
