// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Opens an image once per job and produces the starting plane of every
//! pipeline for every iteration (tile, T, Z) of that image.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::Luma;
use log::{debug, warn};

use crate::cache::{CacheKey, ImageCache};
use crate::config::{ImageSetup, PipelineSettings, PipelineSource,
                    PixelSizeMode, TStackHandling, ZStackHandling};
use crate::error::{LoaderError, Validity};
use crate::loader::{load_tile_locked, open_locked, OmeInfo, PlaneLoader,
                    SeriesInfo, TileRequest};
use crate::plane::{Gray16Image, ImageId, ImagePlane, MemoryIdx,
                   ResolvedPlane, Tile, TileInfo, ZProjection};

/// One unit of work: a tile of one T and one Z (group) of the image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Iteration {
    pub tile: Tile,
    pub t: u32,
    pub z: u32,
}

/// The plane a pipeline starts from, plus the problem hit while producing
/// it, if any.
#[derive(Debug)]
pub struct StartImage {
    pub plane: ImagePlane,
    pub validity: Option<Validity>,
}

pub struct PipelineInitializer {
    setup: ImageSetup,
    loader: Arc<dyn PlaneLoader>,
    path: PathBuf,
    series: u32,
    info: SeriesInfo,
    tile_size: (u32, u32),
    nr_of_tiles: (u32, u32),
    tiled: bool,
}

impl PipelineInitializer {
    /// Opens `path` and selects the configured series, clamped to the
    /// series the file has.
    pub fn open(setup: &ImageSetup, loader: Arc<dyn PlaneLoader>, path: &Path)
                -> Result<Self, LoaderError> {
        let ome: OmeInfo = open_locked(loader.as_ref(), path)?;
        if ome.n_series() == 0 {
            return Err(LoaderError::SeriesOutOfRange{series: setup.series,
                                                     n_series: 0});
        }
        let series = ome.clamp_series(setup.series);
        if series != setup.series {
            warn!("{:?} has {} series, using series {} instead of {}",
                  path, ome.n_series(), series, setup.series);
        }
        let info = ome.series(series).cloned().ok_or(
            LoaderError::SeriesOutOfRange{series, n_series: ome.n_series()})?;

        let (width, height) = (info.width, info.height);
        let (tw, th) = (setup.tile.width, setup.tile.height);
        let tiled = width > tw || height > th;
        let (tile_size, nr_of_tiles) = if tiled {
            ((tw, th), (width.div_ceil(tw), height.div_ceil(th)))
        } else {
            ((width, height), (1, 1))
        };
        debug!("Opened {:?}: {}x{} c={} z={} t={}, {}x{} tiles", path, width,
               height, info.n_channels, info.n_z, info.n_t, nr_of_tiles.0,
               nr_of_tiles.1);
        Ok(PipelineInitializer{setup: setup.clone(), loader,
                               path: path.to_path_buf(), series, info,
                               tile_size, nr_of_tiles, tiled})
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn series(&self) -> u32 {
        self.series
    }

    pub fn series_info(&self) -> &SeriesInfo {
        &self.info
    }

    pub fn is_tiled(&self) -> bool {
        self.tiled
    }

    pub fn nr_of_tiles(&self) -> (u32, u32) {
        self.nr_of_tiles
    }

    fn t_count(&self) -> u32 {
        match self.setup.t_stack_handling {
            TStackHandling::ExactOne => 1,
            TStackHandling::EachOne => self.info.n_t.max(1),
        }
    }

    fn z_count(&self) -> u32 {
        match self.setup.z_stack_handling {
            ZStackHandling::ExactOne | ZStackHandling::Projection => 1,
            ZStackHandling::EachOne => self.info.n_z.max(1),
        }
    }

    /// All iterations of the image, tile-major, then T, then Z.
    pub fn iterations(&self) -> Vec<Iteration> {
        let mut iterations = Vec::new();
        for ty in 0..self.nr_of_tiles.1 {
            for tx in 0..self.nr_of_tiles.0 {
                for t in 0..self.t_count() {
                    for z in 0..self.z_count() {
                        iterations.push(Iteration{tile: Tile::new(tx, ty),
                                                  t, z});
                    }
                }
            }
        }
        iterations
    }

    pub fn tile_info(&self, tile: Tile) -> TileInfo {
        let original = (self.info.width, self.info.height);
        let image_size = if self.tiled {
            TileRequest{tile, tile_size: self.tile_size}.rect(original)
                .map(|r| (r.width(), r.height()))
                .unwrap_or((0, 0))
        } else {
            original
        };
        TileInfo{tile, tile_size: self.tile_size,
                 nr_of_tiles: self.nr_of_tiles, image_size,
                 original_image_size: original}
    }

    /// Physical size of one pixel and its unit. X and Y are averaged when
    /// they differ.
    pub fn physical_pixel_size(&self) -> (f64, String) {
        let configured = &self.setup.physical_pixel_size;
        match (configured.mode, &self.info.physical_size) {
            (PixelSizeMode::Auto, Some(size)) =>
                ((size.x + size.y) / 2.0, size.unit.clone()),
            _ => ((configured.width + configured.height) / 2.0,
                  configured.unit.clone()),
        }
    }

    /// Projection a pipeline actually uses. A projecting Z handling without
    /// an explicit mode projects the maximum; iterating every Z never
    /// projects.
    pub fn projection_for(&self, requested: ZProjection) -> ZProjection {
        match self.setup.z_stack_handling {
            ZStackHandling::EachOne => ZProjection::None,
            ZStackHandling::Projection if requested == ZProjection::None =>
                ZProjection::Max,
            _ => requested,
        }
    }

    /// Plane a pipeline reads in `iteration`. Z and T follow the iteration
    /// when each one is processed, otherwise the pipeline's defaults; both
    /// are clamped to the stack. The channel is not clamped.
    pub fn resolve_plane(&self, pipeline: &PipelineSettings,
                         iteration: &Iteration) -> ResolvedPlane {
        let z = match self.setup.z_stack_handling {
            ZStackHandling::EachOne => iteration.z,
            _ => pipeline.z_stack,
        };
        let t = match self.setup.t_stack_handling {
            TStackHandling::EachOne => iteration.t,
            TStackHandling::ExactOne => pipeline.t_stack,
        };
        ResolvedPlane::new(pipeline.c_stack,
                           z.min(self.info.n_z.saturating_sub(1)),
                           t.min(self.info.n_t.saturating_sub(1)))
    }

    fn tile_request(&self, tile: Tile) -> Option<TileRequest> {
        self.tiled.then_some(TileRequest{tile, tile_size: self.tile_size})
    }

    fn load_raw(&self, plane: ResolvedPlane, tile: Tile)
                -> Result<Gray16Image, LoaderError> {
        load_tile_locked(self.loader.as_ref(), &self.path, self.series, plane,
                         self.tile_request(tile))
    }

    /// Reads a plane (or tile) and applies the Z projection.
    pub fn load_plane(&self, plane: ResolvedPlane, projection: ZProjection,
                      tile: Tile) -> Result<ImagePlane, LoaderError> {
        let start = Instant::now();
        let n_z = self.info.n_z.max(1);
        let pixels = match projection {
            ZProjection::None => self.load_raw(plane, tile)?,
            ZProjection::TakeMiddle => self.load_raw(
                ResolvedPlane{z: n_z / 2, ..plane}, tile)?,
            ZProjection::Max | ZProjection::Min => {
                let mut result = self.load_raw(ResolvedPlane{z: 0, ..plane},
                                               tile)?;
                for z in 1..n_z {
                    let next = self.load_raw(ResolvedPlane{z, ..plane}, tile)?;
                    for (acc, p) in result.pixels_mut().zip(next.pixels()) {
                        acc[0] = if projection == ZProjection::Max {
                            acc[0].max(p[0])
                        } else {
                            acc[0].min(p[0])
                        };
                    }
                }
                result
            },
            ZProjection::Avg => {
                let first = self.load_raw(ResolvedPlane{z: 0, ..plane}, tile)?;
                let (width, height) = first.dimensions();
                let mut sums: Vec<u32> =
                    first.as_raw().iter().map(|&v| v as u32).collect();
                for z in 1..n_z {
                    let next = self.load_raw(ResolvedPlane{z, ..plane}, tile)?;
                    for (sum, &v) in sums.iter_mut().zip(next.as_raw()) {
                        *sum += v as u32;
                    }
                }
                Gray16Image::from_fn(width, height, |x, y| {
                    let sum = sums[(y * width + x) as usize];
                    Luma([(sum as f64 / n_z as f64).round() as u16])
                })
            },
        };
        debug!("Plane c={} z={} t={} ({:?}) of {:?} ready in {:?}", plane.c,
               plane.z, plane.t, projection, self.path, start.elapsed());
        Ok(ImagePlane::gray(ImageId::new(plane, projection), tile,
                            self.series, pixels))
    }

    /// Loads through `cache`; a plane already cached is not read again.
    pub fn load_to_cache(&self, cache: &mut ImageCache, plane: ResolvedPlane,
                         projection: ZProjection, tile: Tile)
                         -> Result<Arc<ImagePlane>, LoaderError> {
        let key = CacheKey::Plane{plane, projection, tile};
        if let Some(cached) = cache.get(&key) {
            return Ok(cached);
        }
        let loaded = self.load_plane(plane, projection, tile)?;
        Ok(cache.add(key, loaded))
    }

    fn blank(&self, plane: ResolvedPlane, projection: ZProjection, tile: Tile)
             -> ImagePlane {
        let (width, height) = self.tile_info(tile).image_size;
        ImagePlane::blank(ImageId::new(plane, projection), tile, self.series,
                          width, height)
    }

    /// Produces the plane `pipeline` starts from in `iteration`. Never
    /// fails: problems yield a zero image plus the matching validity kind.
    pub fn init_pipeline(&self, pipeline: &PipelineSettings,
                         iteration: &Iteration, cache: &mut ImageCache,
                         pipeline_cache: &ImageCache) -> StartImage {
        let plane = self.resolve_plane(pipeline, iteration);
        let projection = self.projection_for(pipeline.z_projection);
        let tile = iteration.tile;
        let ok = |plane| StartImage{plane, validity: None};
        match pipeline.source {
            PipelineSource::Blank => ok(self.blank(plane, projection, tile)),
            PipelineSource::FromMemory => {
                let slot = match pipeline.source_memory {
                    MemoryIdx::Slot(slot) => slot,
                    _ => return ok(self.blank(plane, projection, tile)),
                };
                let key = CacheKey::Slot{slot, tile};
                match cache.get(&key).or_else(|| pipeline_cache.get(&key)) {
                    Some(stored) => ok((*stored).clone()),
                    None => {
                        warn!("Pipeline {:?}: memory slot M{} is empty, \
                               starting from a blank image",
                              pipeline.name, slot);
                        ok(self.blank(plane, projection, tile))
                    },
                }
            },
            PipelineSource::FromFile => {
                if plane.c >= self.info.n_channels {
                    warn!("Pipeline {:?}: channel {} not in {:?} ({} channels)",
                          pipeline.name, plane.c, self.path,
                          self.info.n_channels);
                    return StartImage{
                        plane: self.blank(plane, projection, tile),
                        validity: Some(Validity::ChannelOutOfRange)};
                }
                match self.load_to_cache(cache, plane, projection, tile) {
                    Ok(loaded) => ok((*loaded).clone()),
                    Err(e) => {
                        warn!("Pipeline {:?}: {}", pipeline.name, e);
                        StartImage{plane: self.blank(plane, projection, tile),
                                   validity: Some(Validity::ImageNotReadable)}
                    },
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::config::TileSize;
    use crate::loader::{MemoryLoader, PhysicalSize};

    use super::*;

    const PATH: &str = "stack.tif";

    fn loader(width: u32, height: u32, n_c: u32, n_z: u32, n_t: u32)
              -> MemoryLoader {
        let mut loader = MemoryLoader::new();
        loader.insert(PATH, width, height, n_c, n_z, n_t);
        loader
    }

    fn open(setup: &ImageSetup, loader: MemoryLoader) -> PipelineInitializer {
        PipelineInitializer::open(setup, Arc::new(loader), Path::new(PATH))
            .unwrap()
    }

    fn z_stack() -> MemoryLoader {
        let mut loader = loader(4, 4, 1, 3, 1);
        for (z, value) in [(0, 10_u16), (1, 40), (2, 25)] {
            loader.set_plane(Path::new(PATH), ResolvedPlane::new(0, z, 0),
                             Gray16Image::from_pixel(4, 4, Luma([value])));
        }
        loader
    }

    #[test]
    fn test_open_missing_image() {
        let result = PipelineInitializer::open(
            &ImageSetup::default(), Arc::new(MemoryLoader::new()),
            Path::new("nothing.tif"));
        assert!(matches!(result, Err(LoaderError::Open{..})));
    }

    #[test]
    fn test_tiling() {
        let setup = ImageSetup{tile: TileSize{width: 40, height: 30},
                               ..ImageSetup::default()};
        let init = open(&setup, loader(100, 50, 1, 1, 1));
        assert!(init.is_tiled());
        assert_eq!(init.nr_of_tiles(), (3, 2));
        assert_eq!(init.iterations().len(), 6);
        let edge = init.tile_info(Tile::new(2, 1));
        assert_eq!(edge.image_size, (20, 20));
        assert_eq!(edge.tile_size, (40, 30));
        assert_eq!(edge.original_image_size, (100, 50));

        // Small images are one tile of their own size.
        let init = open(&setup, loader(30, 20, 1, 1, 1));
        assert!(!init.is_tiled());
        assert_eq!(init.tile_info(Tile::default()).tile_size, (30, 20));
    }

    #[test]
    fn test_stack_handling() {
        let setup = ImageSetup{z_stack_handling: ZStackHandling::EachOne,
                               t_stack_handling: TStackHandling::EachOne,
                               ..ImageSetup::default()};
        let init = open(&setup, loader(8, 8, 2, 3, 2));
        let iterations = init.iterations();
        assert_eq!(iterations.len(), 6);
        assert_eq!(iterations[4], Iteration{tile: Tile::default(), t: 1, z: 1});
        let pipeline = PipelineSettings{c_stack: 1, z_stack: 2,
                                        ..PipelineSettings::default()};
        assert_eq!(init.resolve_plane(&pipeline, &iterations[4]),
                   ResolvedPlane::new(1, 1, 1));
        assert_eq!(init.projection_for(ZProjection::Max), ZProjection::None);

        let setup = ImageSetup{z_stack_handling: ZStackHandling::Projection,
                               ..ImageSetup::default()};
        let init = open(&setup, loader(8, 8, 2, 3, 2));
        assert_eq!(init.iterations().len(), 1);
        assert_eq!(init.projection_for(ZProjection::None), ZProjection::Max);
        assert_eq!(init.projection_for(ZProjection::Avg), ZProjection::Avg);
        // Defaults beyond the stack are clamped.
        let pipeline = PipelineSettings{z_stack: 7, t_stack: 9,
                                        ..PipelineSettings::default()};
        assert_eq!(init.resolve_plane(&pipeline, &Iteration::default()),
                   ResolvedPlane::new(0, 2, 1));
    }

    #[test]
    fn test_projections() {
        let init = open(&ImageSetup::default(), z_stack());
        let plane = ResolvedPlane::new(0, 0, 0);
        let value = |projection| {
            init.load_plane(plane, projection, Tile::default()).unwrap()
                .pixels().get_pixel(1, 1)[0]
        };
        assert_eq!(value(ZProjection::None), 10);
        assert_eq!(value(ZProjection::TakeMiddle), 40);
        assert_eq!(value(ZProjection::Max), 40);
        assert_eq!(value(ZProjection::Min), 10);
        assert_eq!(value(ZProjection::Avg), 25);
    }

    #[test]
    fn test_load_to_cache() {
        let init = open(&ImageSetup::default(), z_stack());
        let mut cache = ImageCache::new();
        let plane = ResolvedPlane::new(0, 1, 0);
        let a = init.load_to_cache(&mut cache, plane, ZProjection::None,
                                   Tile::default()).unwrap();
        let b = init.load_to_cache(&mut cache, plane, ZProjection::None,
                                   Tile::default()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(a.id, ImageId::new(plane, ZProjection::None));
    }

    #[test]
    fn test_init_pipeline_sources() {
        let init = open(&ImageSetup::default(), z_stack());
        let mut cache = ImageCache::new();
        let mut pipeline_cache = ImageCache::new();
        let iteration = Iteration::default();

        let from_file = PipelineSettings{z_stack: 1,
                                         ..PipelineSettings::default()};
        let start = init.init_pipeline(&from_file, &iteration, &mut cache,
                                       &pipeline_cache);
        assert_eq!(start.validity, None);
        assert_eq!(start.plane.pixels().get_pixel(0, 0)[0], 40);

        let blank = PipelineSettings{source: PipelineSource::Blank,
                                     ..PipelineSettings::default()};
        let start = init.init_pipeline(&blank, &iteration, &mut cache,
                                       &pipeline_cache);
        assert_eq!(start.plane.dimensions(), (4, 4));
        assert_eq!(start.plane.pixels().get_pixel(0, 0)[0], 0);

        let wrong_channel = PipelineSettings{c_stack: 3,
                                             ..PipelineSettings::default()};
        let start = init.init_pipeline(&wrong_channel, &iteration, &mut cache,
                                       &pipeline_cache);
        assert_eq!(start.validity, Some(Validity::ChannelOutOfRange));
        assert_eq!(start.plane.dimensions(), (4, 4));

        let from_memory = PipelineSettings{
            source: PipelineSource::FromMemory,
            source_memory: MemoryIdx::Slot(2), ..PipelineSettings::default()};
        let start = init.init_pipeline(&from_memory, &iteration, &mut cache,
                                       &pipeline_cache);
        assert_eq!(start.plane.pixels().get_pixel(0, 0)[0], 0);
        let mut stored = ImagePlane::blank(ImageId::default(), Tile::default(),
                                           0, 4, 4);
        crate::image_funcs::fill(stored.pixels_mut(), 77);
        pipeline_cache.store(CacheKey::Slot{slot: 2, tile: Tile::default()},
                             stored);
        let start = init.init_pipeline(&from_memory, &iteration, &mut cache,
                                       &pipeline_cache);
        assert_eq!(start.plane.pixels().get_pixel(3, 3)[0], 77);
    }

    #[test]
    fn test_physical_pixel_size() {
        let setup = ImageSetup::default();
        assert_eq!(open(&setup, loader(4, 4, 1, 1, 1)).physical_pixel_size(),
                   (1.0, "um".to_string()));
        let mut calibrated = loader(4, 4, 1, 1, 1);
        calibrated.set_physical_size(Path::new(PATH), PhysicalSize{
            x: 0.5, y: 0.7, z: 2.0, unit: "um".to_string()});
        let (size, _) = open(&setup, calibrated).physical_pixel_size();
        assert_abs_diff_eq!(size, 0.6, epsilon = 1e-12);
    }
}  // mod tests.
