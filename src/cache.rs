// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::HashMap;
use std::sync::Arc;

use crate::plane::{ImageId, ImagePlane, MemoryIdx, ResolvedPlane, Tile,
                   ZProjection};

/// Where an image is kept. Images addressed by plane are keyed by plane and
/// projection, user slots by slot number. Both include the tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Plane { plane: ResolvedPlane, projection: ZProjection, tile: Tile },
    Slot { slot: u8, tile: Tile },
}

impl CacheKey {
    /// Key of a resolved image id. Returns None for `$`, which names the
    /// plane currently being processed and is never cached.
    pub fn for_image(id: &ImageId, tile: Tile) -> Option<CacheKey> {
        match id.memory {
            MemoryIdx::None => Some(CacheKey::Plane{
                plane: id.plane, projection: id.projection, tile}),
            MemoryIdx::Slot(slot) => Some(CacheKey::Slot{slot, tile}),
            MemoryIdx::Default => None,
        }
    }
}

/// Image store of one scope. Planes are shared read-only once stored.
#[derive(Debug, Default)]
pub struct ImageCache {
    images: HashMap<CacheKey, Arc<ImagePlane>>,
}

impl ImageCache {
    pub fn new() -> Self {
        ImageCache::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<ImagePlane>> {
        self.images.get(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.images.contains_key(key)
    }

    /// Stores `image` unless the key is taken; returns the cached plane.
    pub fn add(&mut self, key: CacheKey, image: ImagePlane) -> Arc<ImagePlane> {
        self.images.entry(key).or_insert_with(|| Arc::new(image)).clone()
    }

    /// Stores `image`, replacing any previous entry.
    pub fn store(&mut self, key: CacheKey, image: ImagePlane)
                 -> Arc<ImagePlane> {
        let image = Arc::new(image);
        self.images.insert(key, image.clone());
        image
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<Arc<ImagePlane>> {
        self.images.remove(key)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn clear(&mut self) {
        self.images.clear();
    }
}

// mod tests.
