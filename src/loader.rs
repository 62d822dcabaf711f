// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Access to image files. The engine only talks to the [PlaneLoader] trait;
//! decoders are assumed not to be thread safe and are serialized through a
//! process wide lock.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use image::DynamicImage;
use imageproc::rect::Rect;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::LoaderError;
use crate::image_funcs::crop;
use crate::plane::{Gray16Image, ResolvedPlane, Tile};

/// Physical size of a pixel (and of a Z step).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSize {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub unit: String,
}

/// Metadata of one series of an image file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub width: u32,
    pub height: u32,
    pub n_channels: u32,
    pub n_z: u32,
    pub n_t: u32,
    pub bits_per_sample: u32,
    pub physical_size: Option<PhysicalSize>,
}

/// The OME style metadata the engine needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OmeInfo {
    pub series: Vec<SeriesInfo>,
}

impl OmeInfo {
    pub fn n_series(&self) -> u32 {
        self.series.len() as u32
    }

    /// Series index clamped to [0, n_series).
    pub fn clamp_series(&self, series: u32) -> u32 {
        series.min(self.n_series().saturating_sub(1))
    }

    pub fn series(&self, series: u32) -> Option<&SeriesInfo> {
        self.series.get(series as usize)
    }
}

/// Part of a plane to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRequest {
    pub tile: Tile,
    pub tile_size: (u32, u32),
}

impl TileRequest {
    /// Pixel rectangle of the tile inside an image of the given size; edge
    /// tiles are cut at the image border.
    pub fn rect(&self, image_size: (u32, u32)) -> Option<Rect> {
        let x = self.tile.x * self.tile_size.0;
        let y = self.tile.y * self.tile_size.1;
        if x >= image_size.0 || y >= image_size.1 {
            return None;
        }
        let w = self.tile_size.0.min(image_size.0 - x);
        let h = self.tile_size.1.min(image_size.1 - y);
        Some(Rect::at(x as i32, y as i32).of_size(w, h))
    }
}

pub trait PlaneLoader: Send + Sync {
    fn open(&self, path: &Path) -> Result<OmeInfo, LoaderError>;

    /// Reads one plane, or one tile of it. Resolution 0 is full size.
    fn load_tile(&self, path: &Path, series: u32, resolution: u32,
                 plane: ResolvedPlane, tile: Option<TileRequest>)
                 -> Result<Gray16Image, LoaderError>;
}

static DECODER_LOCK: Mutex<()> = Mutex::new(());

/// [PlaneLoader::load_tile] under the process wide decoder lock.
pub fn load_tile_locked(loader: &dyn PlaneLoader, path: &Path, series: u32,
                        plane: ResolvedPlane, tile: Option<TileRequest>)
                        -> Result<Gray16Image, LoaderError> {
    let _guard = DECODER_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let start = Instant::now();
    let result = loader.load_tile(path, series, 0, plane, tile);
    debug!("Loaded {:?} c={} z={} t={} tile {:?} in {:?}",
           path, plane.c, plane.z, plane.t, tile.map(|t| t.tile),
           start.elapsed());
    result
}

/// [PlaneLoader::open] under the process wide decoder lock.
pub fn open_locked(loader: &dyn PlaneLoader, path: &Path)
                   -> Result<OmeInfo, LoaderError> {
    let _guard = DECODER_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    loader.open(path)
}

fn check_plane(info: &SeriesInfo, series: u32, n_series: u32,
               plane: ResolvedPlane) -> Result<(), LoaderError> {
    if series >= n_series {
        return Err(LoaderError::SeriesOutOfRange{series, n_series});
    }
    if plane.c >= info.n_channels || plane.z >= info.n_z ||
        plane.t >= info.n_t
    {
        return Err(LoaderError::PlaneOutOfRange{c: plane.c, z: plane.z,
                                                t: plane.t});
    }
    Ok(())
}

fn cut_tile(image: Gray16Image, tile: Option<TileRequest>)
            -> Result<Gray16Image, LoaderError> {
    match tile {
        None => Ok(image),
        Some(request) => {
            let rect = request.rect(image.dimensions()).ok_or_else(|| {
                LoaderError::Read(format!("tile {:?} outside of image",
                                          request.tile))
            })?;
            Ok(crop(&image, &rect))
        },
    }
}

/// Decoded files kept by a [FileLoader] unless told otherwise.
pub const DEFAULT_DECODED_FILES: usize = 8;

/// Loader for the formats the `image` crate decodes (TIFF, PNG, ...). Each
/// file is one series with a single Z and T plane. Colour files expose
/// their red, green and blue components as channels 0, 1 and 2.
///
/// The most recently used decoded files are kept, so iterations of several
/// images running side by side do not decode their files over and over.
pub struct FileLoader {
    capacity: usize,
    // Most recently used first.
    decoded: Mutex<VecDeque<(PathBuf, Arc<DynamicImage>)>>,
    decode_count: AtomicU64,
}

impl Default for FileLoader {
    fn default() -> Self {
        FileLoader::with_capacity(DEFAULT_DECODED_FILES)
    }
}

impl FileLoader {
    pub fn new() -> Self {
        FileLoader::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        FileLoader{capacity: capacity.max(1),
                   decoded: Mutex::new(VecDeque::new()),
                   decode_count: AtomicU64::new(0)}
    }

    /// Number of files decoded so far.
    pub fn decode_count(&self) -> u64 {
        self.decode_count.load(Ordering::Relaxed)
    }

    fn decode(&self, path: &Path) -> Result<Arc<DynamicImage>, LoaderError> {
        let mut decoded = self.decoded.lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = decoded.iter().position(|(p, _)| p == path) {
            if let Some(entry) = decoded.remove(pos) {
                let image = entry.1.clone();
                decoded.push_front(entry);
                return Ok(image);
            }
        }
        let start = Instant::now();
        let image = image::open(path).map_err(|e| LoaderError::Open{
            path: path.to_path_buf(), message: e.to_string()})?;
        self.decode_count.fetch_add(1, Ordering::Relaxed);
        debug!("Decoded {:?} in {:?}", path, start.elapsed());
        let image = Arc::new(image);
        decoded.push_front((path.to_path_buf(), image.clone()));
        decoded.truncate(self.capacity);
        Ok(image)
    }

    fn info_of(image: &DynamicImage) -> SeriesInfo {
        let color = image.color();
        let n_channels = if color.has_color() { 3 } else { 1 };
        SeriesInfo{width: image.width(), height: image.height(), n_channels,
                   n_z: 1, n_t: 1,
                   bits_per_sample: color.bits_per_pixel() as u32 /
                       color.channel_count() as u32,
                   physical_size: None}
    }
}

impl PlaneLoader for FileLoader {
    fn open(&self, path: &Path) -> Result<OmeInfo, LoaderError> {
        let image = self.decode(path)?;
        Ok(OmeInfo{series: vec![Self::info_of(&image)]})
    }

    fn load_tile(&self, path: &Path, series: u32, _resolution: u32,
                 plane: ResolvedPlane, tile: Option<TileRequest>)
                 -> Result<Gray16Image, LoaderError> {
        let image = self.decode(path)?;
        let info = Self::info_of(&image);
        check_plane(&info, series, 1, plane)?;
        let gray = if info.n_channels == 3 {
            let rgb = image.to_rgb16();
            let c = plane.c as usize;
            Gray16Image::from_fn(rgb.width(), rgb.height(),
                                 |x, y| image::Luma([rgb.get_pixel(x, y)[c]]))
        } else {
            image.to_luma16()
        };
        cut_tile(gray, tile)
    }
}

/// Planes held in memory, keyed by a path. Used for synthetic data.
#[derive(Default)]
pub struct MemoryLoader {
    images: HashMap<PathBuf, (SeriesInfo, HashMap<ResolvedPlane, Gray16Image>)>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        MemoryLoader::default()
    }

    /// Registers a single series image of the given stack size. Missing
    /// planes read as zero.
    pub fn insert(&mut self, path: impl Into<PathBuf>, width: u32, height: u32,
                  n_channels: u32, n_z: u32, n_t: u32) {
        let info = SeriesInfo{width, height, n_channels, n_z, n_t,
                              bits_per_sample: 16, physical_size: None};
        self.images.insert(path.into(), (info, HashMap::new()));
    }

    pub fn set_plane(&mut self, path: &Path, plane: ResolvedPlane,
                     pixels: Gray16Image) {
        let (info, planes) = self.images.get_mut(path)
            .unwrap_or_else(|| panic!("Unknown image {:?}", path));
        assert_eq!(pixels.dimensions(), (info.width, info.height));
        planes.insert(plane, pixels);
    }

    pub fn set_physical_size(&mut self, path: &Path, size: PhysicalSize) {
        if let Some((info, _)) = self.images.get_mut(path) {
            info.physical_size = Some(size);
        }
    }
}

impl PlaneLoader for MemoryLoader {
    fn open(&self, path: &Path) -> Result<OmeInfo, LoaderError> {
        let (info, _) = self.images.get(path).ok_or_else(|| LoaderError::Open{
            path: path.to_path_buf(), message: "not registered".to_string()})?;
        Ok(OmeInfo{series: vec![info.clone()]})
    }

    fn load_tile(&self, path: &Path, series: u32, _resolution: u32,
                 plane: ResolvedPlane, tile: Option<TileRequest>)
                 -> Result<Gray16Image, LoaderError> {
        let (info, planes) = self.images.get(path).ok_or_else(|| {
            LoaderError::Open{path: path.to_path_buf(),
                              message: "not registered".to_string()}})?;
        check_plane(info, series, 1, plane)?;
        let image = planes.get(&plane).cloned()
            .unwrap_or_else(|| Gray16Image::new(info.width, info.height));
        cut_tile(image, tile)
    }
}

// mod tests.
