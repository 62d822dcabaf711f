// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use image::{GrayImage, Luma};
use imageproc::rect::Rect;

use crate::plane::Gray16Image;

/// Returns (min, max) pixel value. An empty image yields (0, 0).
pub fn min_max(image: &Gray16Image) -> (u16, u16) {
    let mut iter = image.as_raw().iter();
    let first = match iter.next() {
        Some(v) => *v,
        None => return (0, 0),
    };
    iter.fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// Linear rescale of the image's [min, max] range to [0, 255].
pub fn to_gray8_scaled(image: &Gray16Image) -> GrayImage {
    let (lo, hi) = min_max(image);
    let (width, height) = image.dimensions();
    if hi == lo {
        return GrayImage::new(width, height);
    }
    let scale = 255.0 / (hi - lo) as f64;
    let pixels = image.as_raw().iter()
        .map(|&v| ((v - lo) as f64 * scale).round() as u8)
        .collect();
    GrayImage::from_raw(width, height, pixels).unwrap()
}

/// Any non-zero pixel becomes 255.
pub fn to_binary8(image: &Gray16Image) -> GrayImage {
    let (width, height) = image.dimensions();
    let pixels = image.as_raw().iter()
        .map(|&v| if v > 0 { 255 } else { 0 })
        .collect();
    GrayImage::from_raw(width, height, pixels).unwrap()
}

/// Inverse of [to_binary8]: non-zero becomes u16::MAX.
pub fn from_binary8(image: &GrayImage) -> Gray16Image {
    let (width, height) = image.dimensions();
    let pixels = image.as_raw().iter()
        .map(|&v| if v > 0 { u16::MAX } else { 0 })
        .collect();
    Gray16Image::from_raw(width, height, pixels).unwrap()
}

/// Copies the part of `image` covered by `rect`. `rect` must lie inside the
/// image.
pub fn crop(image: &Gray16Image, rect: &Rect) -> Gray16Image {
    let (width, height) = image.dimensions();
    assert!(rect.left() >= 0 && rect.top() >= 0 &&
            rect.right() < width as i32 && rect.bottom() < height as i32,
            "Crop {:?} exceeds {}x{}", rect, width, height);
    image::imageops::crop_imm(image, rect.left() as u32, rect.top() as u32,
                              rect.width(), rect.height()).to_image()
}

/// Rectangle clipped to an image of the given size.
pub fn clip_rect(x: i32, y: i32, width: i32, height: i32,
                 image_size: (u32, u32)) -> Option<Rect> {
    let left = x.max(0);
    let top = y.max(0);
    let right = (x + width).min(image_size.0 as i32);
    let bottom = (y + height).min(image_size.1 as i32);
    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect::at(left, top).of_size((right - left) as u32,
                                     (bottom - top) as u32))
}

pub fn fill(image: &mut Gray16Image, value: u16) {
    for p in image.pixels_mut() {
        *p = Luma([value]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_max() {
        let mut img = Gray16Image::new(3, 2);
        assert_eq!(min_max(&img), (0, 0));
        img.put_pixel(1, 1, Luma([500]));
        img.put_pixel(2, 0, Luma([20]));
        assert_eq!(min_max(&img), (0, 500));
    }

    #[test]
    fn test_to_gray8_scaled() {
        let mut img = Gray16Image::from_pixel(2, 1, Luma([1000]));
        img.put_pixel(1, 0, Luma([3000]));
        let scaled = to_gray8_scaled(&img);
        assert_eq!(scaled.get_pixel(0, 0)[0], 0);
        assert_eq!(scaled.get_pixel(1, 0)[0], 255);

        // Flat image.
        let flat = Gray16Image::from_pixel(2, 2, Luma([7]));
        assert_eq!(to_gray8_scaled(&flat).get_pixel(1, 1)[0], 0);
    }

    #[test]
    fn test_clip_rect() {
        assert_eq!(clip_rect(-2, -2, 5, 5, (10, 10)),
                   Some(Rect::at(0, 0).of_size(3, 3)));
        assert_eq!(clip_rect(8, 8, 5, 5, (10, 10)),
                   Some(Rect::at(8, 8).of_size(2, 2)));
        assert_eq!(clip_rect(12, 0, 5, 5, (10, 10)), None);
    }

    #[test]
    #[should_panic]
    fn test_crop_out_of_bounds() {
        let img = Gray16Image::new(4, 4);
        crop(&img, &Rect::at(2, 2).of_size(4, 4));
    }
}  // mod tests.
