// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;
use std::time::Instant;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::classes::{ClassId, ClassRef};
use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::image_funcs::to_gray8_scaled;
use crate::object_list::ObjectList;
use crate::plane::ImagePlane;
use crate::roi::Roi;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Canvas {
    /// The current plane, scaled to 8 bits.
    #[default]
    Image,
    Black,
    White,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaintStyle {
    #[default]
    Outlined,
    Filled,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavedClass {
    pub class_in: ClassRef,
    pub style: PaintStyle,
    pub paint_bounding_box: bool,
    /// "#rrggbb"; the colour of the class when not set.
    pub color: Option<String>,
}

/// Writes an 8-bit RGB PNG of the plane with objects painted on top.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSaverSettings {
    /// The project working directory when not set.
    pub output_folder: Option<PathBuf>,
    pub canvas: Canvas,
    pub classes_in: Vec<SavedClass>,
    pub name_suffix: String,
}

/// Parses "#rrggbb".
pub fn parse_color(color: &str) -> Option<Rgb<u8>> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

fn paint(canvas: &mut RgbImage, roi: &Roi, class: &SavedClass,
         color: Rgb<u8>) {
    let bbox = roi.bbox();
    let (width, height) = canvas.dimensions();
    let mut put = |x: i32, y: i32| {
        if x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height {
            canvas.put_pixel(x as u32, y as u32, color);
        }
    };
    match class.style {
        PaintStyle::Outlined => {
            for p in roi.contour() {
                put(bbox.left() + p.x, bbox.top() + p.y);
            }
        },
        PaintStyle::Filled => {
            for (x, y, p) in roi.mask().enumerate_pixels() {
                if p[0] > 0 {
                    put(bbox.left() + x as i32, bbox.top() + y as i32);
                }
            }
        },
    }
    if class.paint_bounding_box {
        draw_hollow_rect_mut(canvas, *bbox, color);
    }
}

impl ImageSaverSettings {
    fn output_folder(&self, ctx: &ProcessContext) -> Option<PathBuf> {
        self.output_folder.clone()
            .or_else(|| ctx.global.settings.meta.working_directory.clone())
    }

    /// `<stem>__<tile x>x<tile y>__<c>-<z>-<t><suffix>.png`
    pub fn file_name(&self, ctx: &ProcessContext) -> String {
        let stem = ctx.image.path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tile = ctx.iteration.iteration.tile;
        let plane = ctx.pipeline.plane;
        format!("{}__{}x{}__{}-{}-{}{}.png", stem, tile.x, tile.y, plane.c,
                plane.z, plane.t, self.name_suffix)
    }

    fn class_color(&self, ctx: &ProcessContext, class: &SavedClass,
                   class_id: ClassId) -> Rgb<u8> {
        let configured = class.color.clone().or_else(|| {
            ctx.global.settings.classes.iter()
                .find(|c| c.class_id == class_id).map(|c| c.color.clone())
        });
        let fallback = Rgb([128, 128, 128]);
        match configured {
            Some(text) => parse_color(&text).unwrap_or_else(|| {
                warn!("Invalid colour {:?} for class {:?}", text, class_id);
                fallback
            }),
            None => fallback,
        }
    }

    /// The control image, without writing it.
    pub fn render(&self, ctx: &ProcessContext, image: &ImagePlane,
                  objects: &ObjectList) -> RgbImage {
        let (width, height) = image.dimensions();
        let mut canvas = match self.canvas {
            Canvas::Image => {
                let gray = to_gray8_scaled(&image.pixels());
                RgbImage::from_fn(width, height, |x, y| {
                    let v = gray.get_pixel(x, y)[0];
                    Rgb([v, v, v])
                })
            },
            Canvas::Black => RgbImage::new(width, height),
            Canvas::White => RgbImage::from_pixel(width, height,
                                                  Rgb([255, 255, 255])),
        };
        for class in &self.classes_in {
            let Some(class_id) = ctx.class_id(class.class_in) else {
                continue;
            };
            let Some(index) = objects.index(class_id) else {
                continue;
            };
            let color = self.class_color(ctx, class, class_id);
            for roi in index.iter() {
                paint(&mut canvas, roi, class, color);
            }
        }
        canvas
    }
}

impl Command for ImageSaverSettings {
    fn execute(&self, ctx: &mut ProcessContext, image: &mut ImagePlane,
               objects: &mut ObjectList) -> Result<(), CommandError> {
        let start = Instant::now();
        let folder = self.output_folder(ctx).ok_or_else(|| {
            CommandError::plane(Validity::Invalid,
                                "image saver without output folder")
        })?;
        let path = folder.join(self.file_name(ctx));
        let canvas = self.render(ctx, image, objects);
        canvas.save(&path).map_err(|e| {
            CommandError::plane(Validity::CommandFailed,
                                format!("cannot write {:?}: {}", path, e))
        })?;
        debug!("Saved {:?} in {:?}", path, start.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::classes::ClassInfo;
    use crate::config::ProjectSettings;
    use crate::context::tests::Fixture;
    use crate::context::IterationContext;
    use crate::spatial_index::tests::square;

    fn objects() -> ObjectList {
        let mut objects = ObjectList::new();
        objects.push(square(1, 10, 10, 10));
        objects.push(square(2, 50, 50, 6));
        objects
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#ff8000"), Some(Rgb([255, 128, 0])));
        assert_eq!(parse_color("ff8000"), None);
        assert_eq!(parse_color("#ff80"), None);
        assert_eq!(parse_color("#gg0000"), None);
    }

    #[test]
    fn test_render() {
        let mut fixture = Fixture::new(1);
        let mut settings = ProjectSettings::default();
        let mut red = ClassInfo::new(1, "nuclei");
        red.color = "#ff0000".to_string();
        settings.classes.push(red);
        fixture.global.settings = Arc::new(settings);
        let mut iteration = IterationContext::default();
        let image = fixture.current();
        let ctx = fixture.context(&mut iteration);

        let saver = ImageSaverSettings{
            canvas: Canvas::Black,
            classes_in: vec![
                SavedClass{class_in: ClassRef::literal(1),
                           ..SavedClass::default()},
                SavedClass{class_in: ClassRef::literal(2),
                           style: PaintStyle::Filled,
                           color: Some("#00ff00".to_string()),
                           ..SavedClass::default()}],
            ..ImageSaverSettings::default()};
        let canvas = saver.render(&ctx, &image, &objects());
        // Outline only, in the class colour.
        assert_eq!(*canvas.get_pixel(10, 12), Rgb([255, 0, 0]));
        assert_eq!(*canvas.get_pixel(14, 14), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(53, 53), Rgb([0, 255, 0]));
        assert_eq!(*canvas.get_pixel(80, 80), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::new(1);
        let mut iteration = IterationContext::default();
        let mut image = fixture.current();
        let mut ctx = fixture.context(&mut iteration);
        let saver = ImageSaverSettings{
            output_folder: Some(dir.path().to_path_buf()),
            classes_in: vec![SavedClass{class_in: ClassRef::literal(1),
                                        paint_bounding_box: true,
                                        ..SavedClass::default()}],
            name_suffix: "_control".to_string(),
            ..ImageSaverSettings::default()};
        saver.execute(&mut ctx, &mut image, &mut objects()).unwrap();
        let path = dir.path().join("test__0x0__0-0-0_control.png");
        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (100, 100));
        // Default class colour on the box corner.
        assert_eq!(*written.get_pixel(10, 10), Rgb([128, 128, 128]));

        // No folder configured anywhere.
        let saver = ImageSaverSettings::default();
        let err = saver.execute(&mut ctx, &mut image, &mut objects())
            .unwrap_err();
        assert_eq!(err.validity, Validity::Invalid);
    }
}  // mod tests.
