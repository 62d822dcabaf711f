// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! State a command sees while it runs. Four scopes nest: the job
//! ([GlobalContext]), the image ([ImageContext]), the iteration
//! ([IterationContext]) and the pipeline running inside the iteration
//! ([PipelineContext]). [ProcessContext] ties them together for one command.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use log::warn;

use crate::cache::{CacheKey, ImageCache};
use crate::classes::{ClassId, ClassRef};
use crate::config::ProjectSettings;
use crate::error::{CommandError, SinkError, Validity, ValiditySet};
use crate::initializer::{Iteration, PipelineInitializer};
use crate::loader::PlaneLoader;
use crate::object_list::ObjectList;
use crate::plane::{ImageId, ImagePlane, ImageRef, MemoryIdx, MemoryScope,
                   ResolvedPlane, TileInfo, ZProjection};
use crate::sink::{DbImageId, ResultSink};

/// Shared by every worker of a job.
pub struct GlobalContext {
    pub settings: Arc<ProjectSettings>,
    pub loader: Arc<dyn PlaneLoader>,
    pub sink: Arc<dyn ResultSink>,
}

/// One opened image.
pub struct ImageContext {
    pub image_id: DbImageId,
    pub path: PathBuf,
    pub initializer: PipelineInitializer,
    /// Images stored with [MemoryScope::Pipeline]; visible to every
    /// iteration of the image.
    pub pipeline_cache: Mutex<ImageCache>,
}

impl ImageContext {
    pub fn new(image_id: DbImageId, initializer: PipelineInitializer) -> Self {
        ImageContext{image_id, path: initializer.path().to_path_buf(),
                     initializer, pipeline_cache: Mutex::new(ImageCache::new())}
    }

    pub fn pipeline_cache(&self) -> MutexGuard<'_, ImageCache> {
        self.pipeline_cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// State of one iteration; dropped when the iteration ends.
#[derive(Debug, Default)]
pub struct IterationContext {
    pub iteration: Iteration,
    pub cache: ImageCache,
    /// Object stores by id; store 0 holds the objects written to the sink.
    pub object_stores: BTreeMap<u8, ObjectList>,
    /// Every flag raised during the iteration.
    pub validity: ValiditySet,
}

impl IterationContext {
    pub fn new(iteration: Iteration) -> Self {
        IterationContext{iteration, ..IterationContext::default()}
    }
}

/// The pipeline currently running.
#[derive(Clone, Copy, Debug)]
pub struct PipelineContext {
    pub index: usize,
    pub default_class: ClassId,
    pub projection: ZProjection,
    pub plane: ResolvedPlane,
}

pub struct ProcessContext<'a> {
    pub global: &'a GlobalContext,
    pub image: &'a ImageContext,
    pub iteration: &'a mut IterationContext,
    pub pipeline: PipelineContext,
}

impl<'a> ProcessContext<'a> {
    pub fn new(global: &'a GlobalContext, image: &'a ImageContext,
               iteration: &'a mut IterationContext, pipeline: PipelineContext)
               -> Self {
        ProcessContext{global, image, iteration, pipeline}
    }

    /// Resolves inherited plane components against the running pipeline.
    pub fn resolve_image(&self, image_ref: &ImageRef) -> ImageId {
        ImageId{plane: image_ref.plane.resolve(self.pipeline.plane),
                projection: if image_ref.projection == ZProjection::None {
                    self.pipeline.projection
                } else {
                    image_ref.projection
                },
                memory: image_ref.memory}
    }

    /// Looks up an image. `$` is the plane being processed; a memory slot
    /// must have been stored before (iteration scope first, then pipeline
    /// scope); a plane reference is read through the iteration cache.
    pub fn load_image(&mut self, image_ref: &ImageRef, current: &ImagePlane)
                      -> Result<Arc<ImagePlane>, CommandError> {
        let tile = self.iteration.iteration.tile;
        let id = self.resolve_image(image_ref);
        match id.memory {
            MemoryIdx::Default => Ok(Arc::new(current.clone())),
            MemoryIdx::Slot(slot) => {
                let key = CacheKey::Slot{slot, tile};
                self.iteration.cache.get(&key)
                    .or_else(|| self.image.pipeline_cache().get(&key))
                    .ok_or_else(|| CommandError::plane(
                        Validity::Invalid,
                        format!("memory slot M{} is empty", slot)))
            },
            MemoryIdx::None => {
                if id.plane.c >= self.image.initializer.series_info().n_channels
                {
                    return Err(CommandError::plane(
                        Validity::ChannelOutOfRange,
                        format!("channel {} not in image", id.plane.c)));
                }
                self.image.initializer.load_to_cache(
                    &mut self.iteration.cache, id.plane, id.projection, tile)
                    .map_err(|e| CommandError::plane(
                        Validity::ImageNotReadable, e.to_string()))
            },
        }
    }

    fn cache_key(&self, memory: MemoryIdx, image: &ImagePlane)
                 -> Option<CacheKey> {
        let id = ImageId{memory, ..image.id};
        CacheKey::for_image(&id, self.iteration.iteration.tile)
    }

    /// Stores `image` unless the slot is taken. `$` is not a cache slot.
    pub fn add_image_to_cache(&mut self, scope: MemoryScope,
                              memory: MemoryIdx, image: ImagePlane)
                              -> Option<Arc<ImagePlane>> {
        let key = self.cache_key(memory, &image)?;
        Some(match scope {
            MemoryScope::Iteration => self.iteration.cache.add(key, image),
            MemoryScope::Pipeline =>
                self.image.pipeline_cache().add(key, image),
        })
    }

    /// Stores `image`, replacing what the slot held.
    pub fn store_image_to_cache(&mut self, scope: MemoryScope,
                                memory: MemoryIdx, image: ImagePlane)
                                -> Option<Arc<ImagePlane>> {
        let key = self.cache_key(memory, &image)?;
        Some(match scope {
            MemoryScope::Iteration => self.iteration.cache.store(key, image),
            MemoryScope::Pipeline =>
                self.image.pipeline_cache().store(key, image),
        })
    }

    /// Resolves a class reference; None means the reference is switched
    /// off.
    pub fn class_id(&self, class_ref: ClassRef) -> Option<ClassId> {
        class_ref.resolve(self.pipeline.default_class, self.pipeline.index)
    }

    /// Resolves a list of references, dropping those switched off.
    pub fn class_ids<'r>(&self, refs: impl IntoIterator<Item = &'r ClassRef>)
                         -> BTreeSet<ClassId> {
        refs.into_iter().filter_map(|r| self.class_id(*r)).collect()
    }

    pub fn tile_info(&self) -> TileInfo {
        self.image.initializer.tile_info(self.iteration.iteration.tile)
    }

    /// Size of the tile being processed.
    pub fn image_size(&self) -> (u32, u32) {
        self.tile_info().image_size
    }

    pub fn original_image_size(&self) -> (u32, u32) {
        self.tile_info().original_image_size
    }

    pub fn physical_pixel_size(&self) -> (f64, String) {
        self.image.initializer.physical_pixel_size()
    }

    fn report(&self, result: Result<(), SinkError>) {
        if let Err(e) = result {
            warn!("Cannot record validity of {:?}: {}", self.image.path, e);
        }
    }

    pub fn set_image_validity(&mut self, validity: Validity) {
        self.iteration.validity.set(validity);
        self.report(self.global.sink.set_image_validity(self.image.image_id,
                                                        validity));
    }

    pub fn set_plane_validity(&mut self, validity: Validity) {
        self.iteration.validity.set(validity);
        self.report(self.global.sink.set_image_plane_validity(
            self.image.image_id, self.pipeline.plane, validity));
    }

    pub fn set_plane_class_validity(&mut self, class_id: ClassId,
                                    validity: Validity) {
        self.iteration.validity.set(validity);
        self.report(self.global.sink.set_image_plane_class_validity(
            self.image.image_id, self.pipeline.plane, class_id, validity));
    }
}

// mod tests.
