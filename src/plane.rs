// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Identities of image planes and the plane container itself.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use image::{ImageBuffer, Luma, Rgb};
use serde::{Deserialize, Serialize};

pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;
pub type Rgb16Image = ImageBuffer<Rgb<u16>, Vec<u16>>;
pub type GrayF32Image = ImageBuffer<Luma<f32>, Vec<f32>>;

/// One component of a plane address. `Inherit` takes the value of the
/// iteration currently being processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
         Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum PlaneIndex {
    Inherit,
    Absolute(u32),
}

impl PlaneIndex {
    pub fn resolve(self, current: u32) -> u32 {
        match self {
            PlaneIndex::Inherit => current,
            PlaneIndex::Absolute(n) => n,
        }
    }
}

impl Default for PlaneIndex {
    fn default() -> Self {
        PlaneIndex::Inherit
    }
}

impl TryFrom<i64> for PlaneIndex {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value < 0 {
            Ok(PlaneIndex::Inherit)
        } else if value <= u32::MAX as i64 {
            Ok(PlaneIndex::Absolute(value as u32))
        } else {
            Err(format!("plane index {} too large", value))
        }
    }
}

impl From<PlaneIndex> for i64 {
    fn from(index: PlaneIndex) -> i64 {
        match index {
            PlaneIndex::Inherit => -1,
            PlaneIndex::Absolute(n) => n as i64,
        }
    }
}

/// A plane address whose components may inherit from the current iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
         Serialize, Deserialize)]
#[serde(default)]
pub struct PlaneId {
    pub c: PlaneIndex,
    pub z: PlaneIndex,
    pub t: PlaneIndex,
}

impl PlaneId {
    pub fn inherit() -> Self {
        PlaneId::default()
    }

    pub fn channel(c: u32) -> Self {
        PlaneId{c: PlaneIndex::Absolute(c), ..PlaneId::default()}
    }

    pub fn absolute(c: u32, z: u32, t: u32) -> Self {
        PlaneId{c: PlaneIndex::Absolute(c), z: PlaneIndex::Absolute(z),
                t: PlaneIndex::Absolute(t)}
    }

    pub fn resolve(&self, current: ResolvedPlane) -> ResolvedPlane {
        ResolvedPlane{c: self.c.resolve(current.c),
                      z: self.z.resolve(current.z),
                      t: self.t.resolve(current.t)}
    }
}

/// A fully resolved plane address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
         Serialize, Deserialize)]
pub struct ResolvedPlane {
    pub c: u32,
    pub z: u32,
    pub t: u32,
}

impl ResolvedPlane {
    pub fn new(c: u32, z: u32, t: u32) -> Self {
        ResolvedPlane{c, z, t}
    }
}

impl From<ResolvedPlane> for PlaneId {
    fn from(plane: ResolvedPlane) -> PlaneId {
        PlaneId::absolute(plane.c, plane.z, plane.t)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
         Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZProjection {
    #[default]
    None,
    TakeMiddle,
    Max,
    Min,
    Avg,
}

/// Image cache slot. `None` addresses an image by plane and projection,
/// `Default` (`$`) is the image currently being processed, `Slot(n)` is one
/// of the user slots M0..M15.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
         Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MemoryIdx {
    #[default]
    None,
    Default,
    Slot(u8),
}

pub const NR_OF_MEMORY_SLOTS: u8 = 16;

impl FromStr for MemoryIdx {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "NONE" => Ok(MemoryIdx::None),
            "$" => Ok(MemoryIdx::Default),
            _ => {
                let digits = s.strip_prefix('M').or_else(|| s.strip_prefix('m'))
                    .ok_or_else(|| format!("invalid memory slot {:?}", s))?;
                let n: u8 = digits.parse()
                    .map_err(|_| format!("invalid memory slot {:?}", s))?;
                if n >= NR_OF_MEMORY_SLOTS {
                    return Err(format!("memory slot {:?} out of range", s));
                }
                Ok(MemoryIdx::Slot(n))
            },
        }
    }
}

impl TryFrom<String> for MemoryIdx {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for MemoryIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryIdx::None => write!(f, "none"),
            MemoryIdx::Default => write!(f, "$"),
            MemoryIdx::Slot(n) => write!(f, "M{}", n),
        }
    }
}

impl From<MemoryIdx> for String {
    fn from(idx: MemoryIdx) -> String {
        idx.to_string()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryScope {
    #[default]
    Iteration,
    Pipeline,
}

/// Reference to an image as written in a project; the plane may still
/// inherit components from the current iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize,
         Deserialize)]
#[serde(default)]
pub struct ImageRef {
    pub plane: PlaneId,
    pub projection: ZProjection,
    pub memory: MemoryIdx,
}

impl ImageRef {
    pub fn channel(c: u32) -> Self {
        ImageRef{plane: PlaneId::channel(c), ..ImageRef::default()}
    }
}

/// Resolved identity of an image plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
         Serialize, Deserialize)]
pub struct ImageId {
    pub plane: ResolvedPlane,
    pub projection: ZProjection,
    pub memory: MemoryIdx,
}

impl ImageId {
    pub fn new(plane: ResolvedPlane, projection: ZProjection) -> Self {
        ImageId{plane, projection, memory: MemoryIdx::None}
    }
}

/// Index of a composite tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
         Serialize, Deserialize)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
}

impl Tile {
    pub fn new(x: u32, y: u32) -> Self {
        Tile{x, y}
    }
}

/// Geometry of the tile currently processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileInfo {
    pub tile: Tile,
    /// Configured tile size; identical for all tiles of a run.
    pub tile_size: (u32, u32),
    pub nr_of_tiles: (u32, u32),
    /// Size of the pixel matrix of this tile (edge tiles may be smaller).
    pub image_size: (u32, u32),
    /// Size of the full image.
    pub original_image_size: (u32, u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaneKind {
    Grayscale,
    Rgb,
    Binary,
}

#[derive(Clone, Debug)]
pub enum PlaneData {
    Gray(Gray16Image),
    Rgb(Rgb16Image),
}

impl PlaneData {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            PlaneData::Gray(image) => image.dimensions(),
            PlaneData::Rgb(image) => image.dimensions(),
        }
    }
}

/// A single pixel matrix plus its identity. Metadata is fixed at creation;
/// pixels and threshold information change as commands run.
#[derive(Clone, Debug)]
pub struct ImagePlane {
    pub id: ImageId,
    pub tile: Tile,
    pub series: u32,
    data: PlaneData,
    binary: bool,
    pub applied_min_threshold: u16,
    pub applied_max_threshold: u16,
}

impl ImagePlane {
    pub fn new(id: ImageId, tile: Tile, series: u32, data: PlaneData)
               -> Self {
        ImagePlane{id, tile, series, data, binary: false,
                   applied_min_threshold: 0, applied_max_threshold: 0}
    }

    pub fn gray(id: ImageId, tile: Tile, series: u32, pixels: Gray16Image)
                -> Self {
        Self::new(id, tile, series, PlaneData::Gray(pixels))
    }

    pub fn blank(id: ImageId, tile: Tile, series: u32, width: u32, height: u32)
                 -> Self {
        Self::gray(id, tile, series, Gray16Image::new(width, height))
    }

    pub fn kind(&self) -> PlaneKind {
        if self.binary {
            return PlaneKind::Binary;
        }
        match self.data {
            PlaneData::Gray(_) => PlaneKind::Grayscale,
            PlaneData::Rgb(_) => PlaneKind::Rgb,
        }
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.data.dimensions()
    }

    pub fn data(&self) -> &PlaneData {
        &self.data
    }

    /// Grayscale pixels. An RGB plane yields its luminance.
    pub fn pixels(&self) -> Cow<'_, Gray16Image> {
        match &self.data {
            PlaneData::Gray(image) => Cow::Borrowed(image),
            PlaneData::Rgb(image) => Cow::Owned(luminance(image)),
        }
    }

    /// Mutable grayscale pixels. An RGB plane is converted to luminance
    /// first; image commands work on one channel only.
    pub fn pixels_mut(&mut self) -> &mut Gray16Image {
        if let PlaneData::Rgb(rgb) = &self.data {
            self.data = PlaneData::Gray(luminance(rgb));
        }
        match &mut self.data {
            PlaneData::Gray(image) => image,
            PlaneData::Rgb(_) => unreachable!(),
        }
    }

    pub fn set_pixels(&mut self, pixels: Gray16Image) {
        self.data = PlaneData::Gray(pixels);
    }

    /// Marks the plane as the result of a threshold operation.
    pub fn set_binary(&mut self, threshold_min: u16, threshold_max: u16) {
        self.binary = true;
        self.applied_min_threshold = threshold_min;
        self.applied_max_threshold = threshold_max;
    }

    pub fn clear_binary(&mut self) {
        self.binary = false;
    }
}

/// Synthetic 16-bit luminance of an RGB matrix (ITU-R 601 weights).
pub fn luminance(rgb: &Rgb16Image) -> Gray16Image {
    let (width, height) = rgb.dimensions();
    Gray16Image::from_fn(width, height, |x, y| {
        let p = rgb.get_pixel(x, y).0;
        let value = 0.299 * p[0] as f64 + 0.587 * p[1] as f64 +
            0.114 * p[2] as f64;
        Luma([value.round().clamp(0.0, u16::MAX as f64) as u16])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_id_resolve() {
        let current = ResolvedPlane::new(2, 3, 4);
        assert_eq!(PlaneId::inherit().resolve(current), current);
        assert_eq!(PlaneId::channel(0).resolve(current),
                   ResolvedPlane::new(0, 3, 4));
        assert_eq!(PlaneId::absolute(1, 0, 0).resolve(current),
                   ResolvedPlane::new(1, 0, 0));
    }

    #[test]
    fn test_plane_index_serde() {
        let id: PlaneId = serde_json::from_str(r#"{"c": 1, "z": -1}"#).unwrap();
        assert_eq!(id.c, PlaneIndex::Absolute(1));
        assert_eq!(id.z, PlaneIndex::Inherit);
        assert_eq!(id.t, PlaneIndex::Inherit);
        assert_eq!(serde_json::to_string(&id).unwrap(),
                   r#"{"c":1,"z":-1,"t":-1}"#);
    }

    #[test]
    fn test_memory_idx_parse() {
        assert_eq!("M3".parse::<MemoryIdx>().unwrap(), MemoryIdx::Slot(3));
        assert_eq!("$".parse::<MemoryIdx>().unwrap(), MemoryIdx::Default);
        assert_eq!("none".parse::<MemoryIdx>().unwrap(), MemoryIdx::None);
        assert!("M16".parse::<MemoryIdx>().is_err());
        assert!("X1".parse::<MemoryIdx>().is_err());
        assert_eq!(MemoryIdx::Slot(15).to_string(), "M15");
    }

    #[test]
    fn test_plane_binary_flag() {
        let mut plane = ImagePlane::blank(ImageId::default(), Tile::default(),
                                          0, 4, 4);
        assert_eq!(plane.kind(), PlaneKind::Grayscale);
        plane.set_binary(100, 65535);
        assert_eq!(plane.kind(), PlaneKind::Binary);
        assert_eq!(plane.applied_min_threshold, 100);
    }

    #[test]
    fn test_rgb_luminance() {
        let rgb = Rgb16Image::from_pixel(2, 2, Rgb([1000, 1000, 1000]));
        let mut plane = ImagePlane::new(ImageId::default(), Tile::default(), 0,
                                        PlaneData::Rgb(rgb));
        assert_eq!(plane.kind(), PlaneKind::Rgb);
        assert_eq!(plane.pixels().get_pixel(1, 1)[0], 1000);
        plane.pixels_mut().put_pixel(0, 0, Luma([7]));
        assert_eq!(plane.kind(), PlaneKind::Grayscale);
        assert_eq!(plane.pixels().get_pixel(0, 0)[0], 7);
    }
}  // mod tests.
