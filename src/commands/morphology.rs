// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Grayscale morphology on 16-bit planes with a rectangular, cross or
//! elliptic structuring element. Pixels outside the image do not take part,
//! so borders neither erode nor dilate.

use std::time::Instant;

use image::Luma;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::commands::{check_kernel_size, Command};
use crate::context::ProcessContext;
use crate::error::CommandError;
use crate::object_list::ObjectList;
use crate::plane::{Gray16Image, ImagePlane};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MorphologyFunction {
    #[default]
    Erode,
    Dilate,
    Open,
    Close,
    /// Dilation minus erosion.
    Gradient,
    /// Image minus its opening.
    Tophat,
    /// Closing minus the image.
    Blackhat,
    /// Binary: keeps pixels where the element fits the foreground and the
    /// one pixel ring around it lies in the background.
    Hitmiss,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MorphologyShape {
    #[default]
    Rect,
    Cross,
    Ellipse,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MorphologySettings {
    pub function: MorphologyFunction,
    pub shape: MorphologyShape,
    pub kernel_size: u32,
    pub iterations: u32,
}

impl Default for MorphologySettings {
    fn default() -> Self {
        MorphologySettings{function: MorphologyFunction::Erode,
                           shape: MorphologyShape::Rect, kernel_size: 3,
                           iterations: 1}
    }
}

/// Offsets (dx, dy) of the structuring element, centred on the origin.
pub fn structuring_element(shape: MorphologyShape, kernel_size: u32)
                           -> Vec<(i32, i32)> {
    let r = (kernel_size / 2) as i32;
    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            let inside = match shape {
                MorphologyShape::Rect => true,
                MorphologyShape::Cross => dx == 0 || dy == 0,
                MorphologyShape::Ellipse => {
                    r == 0 || (dx * dx + dy * dy) as f64 <= (r * r) as f64
                },
            };
            if inside {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}

fn rank_extreme(image: &Gray16Image, element: &[(i32, i32)], max: bool)
                -> Gray16Image {
    let (width, height) = image.dimensions();
    Gray16Image::from_fn(width, height, |x, y| {
        let mut value = if max { 0 } else { u16::MAX };
        for &(dx, dy) in element {
            let xx = x as i32 + dx;
            let yy = y as i32 + dy;
            if xx < 0 || yy < 0 || xx >= width as i32 || yy >= height as i32 {
                continue;
            }
            let v = image.get_pixel(xx as u32, yy as u32)[0];
            value = if max { value.max(v) } else { value.min(v) };
        }
        Luma([value])
    })
}

pub fn erode(image: &Gray16Image, element: &[(i32, i32)], iterations: u32)
             -> Gray16Image {
    let mut result = image.clone();
    for _ in 0..iterations {
        result = rank_extreme(&result, element, false);
    }
    result
}

pub fn dilate(image: &Gray16Image, element: &[(i32, i32)], iterations: u32)
              -> Gray16Image {
    let mut result = image.clone();
    for _ in 0..iterations {
        result = rank_extreme(&result, element, true);
    }
    result
}

fn difference(a: &Gray16Image, b: &Gray16Image) -> Gray16Image {
    Gray16Image::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y)[0].saturating_sub(b.get_pixel(x, y)[0])])
    })
}

fn hit_or_miss(image: &Gray16Image, element: &[(i32, i32)], kernel_size: u32)
               -> Gray16Image {
    let (width, height) = image.dimensions();
    let r = (kernel_size / 2) as i32 + 1;
    // Outside the image counts as background.
    let on = |x: i32, y: i32| {
        x >= 0 && y >= 0 && x < width as i32 && y < height as i32 &&
            image.get_pixel(x as u32, y as u32)[0] > 0
    };
    Gray16Image::from_fn(width, height, |x, y| {
        let (x, y) = (x as i32, y as i32);
        let hit = element.iter().all(|&(dx, dy)| on(x + dx, y + dy));
        let miss = hit && (-r..=r).all(|d| {
            !on(x + d, y - r) && !on(x + d, y + r) &&
                !on(x - r, y + d) && !on(x + r, y + d)
        });
        Luma([if hit && miss { u16::MAX } else { 0 }])
    })
}

impl Command for MorphologySettings {
    fn execute(&self, _ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        check_kernel_size(self.kernel_size)?;
        let start = Instant::now();
        let element = structuring_element(self.shape, self.kernel_size);
        let n = self.iterations.max(1);
        let src = image.pixels().into_owned();
        let result = match self.function {
            MorphologyFunction::Erode => erode(&src, &element, n),
            MorphologyFunction::Dilate => dilate(&src, &element, n),
            MorphologyFunction::Open =>
                dilate(&erode(&src, &element, n), &element, n),
            MorphologyFunction::Close =>
                erode(&dilate(&src, &element, n), &element, n),
            MorphologyFunction::Gradient =>
                difference(&dilate(&src, &element, n),
                           &erode(&src, &element, n)),
            MorphologyFunction::Tophat => {
                let opened = dilate(&erode(&src, &element, n), &element, n);
                difference(&src, &opened)
            },
            MorphologyFunction::Blackhat => {
                let closed = erode(&dilate(&src, &element, n), &element, n);
                difference(&closed, &src)
            },
            MorphologyFunction::Hitmiss =>
                hit_or_miss(&src, &element, self.kernel_size),
        };
        let binary = image.is_binary();
        let (min, max) = (image.applied_min_threshold,
                          image.applied_max_threshold);
        image.set_pixels(result);
        if binary {
            image.set_binary(min, max);
        }
        debug!("{:?} {:?} k={} x{} in {:?}", self.function, self.shape,
               self.kernel_size, n, start.elapsed());
        Ok(())
    }
}

// mod tests.
