// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::drawing::draw_line_segment_mut;
use imageproc::point::Point;
use imageproc::rect::Rect;

/// Contours of `mask` traced on a copy with a one pixel background border,
/// so components touching the image edge are found too. Points are in the
/// coordinates of `mask`.
fn padded_contours(mask: &GrayImage) -> Vec<Contour<i32>> {
    let (width, height) = mask.dimensions();
    let mut padded = GrayImage::new(width + 2, height + 2);
    image::imageops::replace(&mut padded, mask, 1, 1);
    let mut contours = find_contours::<i32>(&padded);
    for contour in &mut contours {
        for p in &mut contour.points {
            *p = Point::new(p.x - 1, p.y - 1);
        }
    }
    contours
}

/// Outer borders of all connected components (8-connectivity) that do not
/// lie inside a hole of another component. Hole borders are dropped.
pub fn top_level_contours(mask: &GrayImage) -> Vec<Vec<Point<i32>>> {
    padded_contours(mask).into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| c.points)
        .collect()
}

/// All contours with their hierarchy.
pub fn all_contours(mask: &GrayImage) -> Vec<Contour<i32>> {
    padded_contours(mask)
}

/// The outer contour with the most points, if the mask has any foreground.
pub fn longest_outer_contour(mask: &GrayImage) -> Option<Vec<Point<i32>>> {
    padded_contours(mask).into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .max_by_key(|c| c.points.len())
        .map(|c| c.points)
}

/// Smallest rectangle containing all points.
pub fn bounding_rect(points: &[Point<i32>]) -> Option<Rect> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) =
        (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(Rect::at(min_x, min_y).of_size((max_x - min_x + 1) as u32,
                                        (max_y - min_y + 1) as u32))
}

/// Rasterizes the closed polygon through the given pixel centres, boundary
/// included, into a mask of the given size. Points outside are clipped.
pub fn fill_contour(contour: &[Point<i32>], width: u32, height: u32)
                    -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    fill_contour_mut(&mut mask, contour, (0, 0));
    mask
}

/// Like [fill_contour], drawing into an existing mask. `offset` is
/// subtracted from every point first.
pub fn fill_contour_mut(mask: &mut GrayImage, contour: &[Point<i32>],
                        offset: (i32, i32)) {
    let n = contour.len();
    if n == 0 {
        return;
    }
    let (width, height) = mask.dimensions();
    let pts: Vec<(i32, i32)> = contour.iter()
        .map(|p| (p.x - offset.0, p.y - offset.1)).collect();

    // Even-odd scanline fill of the interior.
    let mut crossings: Vec<f64> = Vec::new();
    for y in 0..height as i32 {
        crossings.clear();
        for i in 0..n {
            let (ax, ay) = pts[i];
            let (bx, by) = pts[(i + 1) % n];
            if (ay <= y && by > y) || (by <= y && ay > y) {
                crossings.push(ax as f64 + (y - ay) as f64 *
                               (bx - ax) as f64 / (by - ay) as f64);
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for pair in crossings.chunks_exact(2) {
            let x_start = (pair[0].ceil() as i32).max(0);
            let x_end = (pair[1].floor() as i32).min(width as i32 - 1);
            for x in x_start..=x_end {
                mask.put_pixel(x as u32, y as u32, Luma([255]));
            }
        }
    }
    // The boundary itself.
    for i in 0..n {
        let (ax, ay) = pts[i];
        let (bx, by) = pts[(i + 1) % n];
        draw_line_segment_mut(mask, (ax as f32, ay as f32),
                              (bx as f32, by as f32), Luma([255]));
    }
}

/// Smallest rectangle containing all non-zero pixels.
pub fn foreground_bounds(mask: &GrayImage) -> Option<Rect> {
    let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
    let (mut max_x, mut max_y) = (0, 0);
    let mut any = false;
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] > 0 {
            any = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    if !any {
        return None;
    }
    Some(Rect::at(min_x as i32, min_y as i32).of_size(max_x - min_x + 1,
                                                      max_y - min_y + 1))
}

/// Number of non-zero pixels.
pub fn count_foreground(mask: &GrayImage) -> u64 {
    mask.as_raw().iter().filter(|&&v| v > 0).count() as u64
}

/// Pixel-wise AND of two masks of equal size.
pub fn mask_and(a: &GrayImage, b: &GrayImage) -> GrayImage {
    assert_eq!(a.dimensions(), b.dimensions());
    let pixels = a.as_raw().iter().zip(b.as_raw())
        .map(|(&x, &y)| if x > 0 && y > 0 { 255 } else { 0 })
        .collect();
    GrayImage::from_raw(a.width(), a.height(), pixels).unwrap()
}

#[cfg(test)]
mod tests {
    use imageproc::gray_image;

    use super::*;

    #[test]
    fn test_top_level_contours() {
        let mask = gray_image!(
            255, 255, 255,   0,   0;
            255,   0, 255,   0, 255;
            255, 255, 255,   0,   0);
        let contours = top_level_contours(&mask);
        assert_eq!(contours.len(), 2);
        let longest = longest_outer_contour(&mask).unwrap();
        assert_eq!(bounding_rect(&longest), Some(Rect::at(0, 0).of_size(3, 3)));
    }

    #[test]
    fn test_fill_contour_closes_hole() {
        let mask = gray_image!(
            255, 255, 255, 255;
            255,   0,   0, 255;
            255,   0,   0, 255;
            255, 255, 255, 255);
        let contour = longest_outer_contour(&mask).unwrap();
        let filled = fill_contour(&contour, 4, 4);
        assert_eq!(count_foreground(&filled), 16);
    }

    #[test]
    fn test_fill_degenerate_contours() {
        let single = fill_contour(&[Point::new(1, 1)], 3, 3);
        assert_eq!(count_foreground(&single), 1);
        let line = fill_contour(&[Point::new(0, 1), Point::new(1, 1),
                                  Point::new(2, 1), Point::new(1, 1)], 3, 3);
        assert_eq!(count_foreground(&line), 3);
    }

    #[test]
    fn test_fill_round_trip() {
        // Filling the outer contour of a hole free blob restores it.
        let mask = gray_image!(
              0, 255, 255,   0,   0;
            255, 255, 255, 255,   0;
              0, 255, 255, 255, 255;
              0,   0, 255,   0,   0);
        let contour = longest_outer_contour(&mask).unwrap();
        assert_eq!(fill_contour(&contour, 5, 4), mask);
    }

    #[test]
    fn test_components_on_the_border() {
        let full = GrayImage::from_pixel(10, 10, Luma([255]));
        let contour = longest_outer_contour(&full).unwrap();
        assert_eq!(bounding_rect(&contour),
                   Some(Rect::at(0, 0).of_size(10, 10)));
        assert_eq!(contour.len(), 36);

        let mask = gray_image!(
            255,   0,   0, 255;
              0, 255,   0, 255;
              0,   0,   0,   0);
        let contours = top_level_contours(&mask);
        assert_eq!(contours.len(), 2);
        let diagonal = contours.iter()
            .find(|c| c.contains(&Point::new(0, 0))).unwrap();
        assert!(diagonal.contains(&Point::new(1, 1)));
        assert!(contours.iter().flatten().all(|p| p.x >= 0 && p.y >= 0));
    }

    #[test]
    fn test_mask_and() {
        let a = gray_image!(255, 255, 0);
        let b = gray_image!(0, 255, 255);
        assert_eq!(mask_and(&a, &b), gray_image!(0, 255, 0));
    }

    #[test]
    fn test_empty() {
        let mask = GrayImage::new(4, 4);
        assert!(top_level_contours(&mask).is_empty());
        assert!(longest_outer_contour(&mask).is_none());
        assert_eq!(bounding_rect(&[]), None);
    }
}  // mod tests.
