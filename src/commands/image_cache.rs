// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::context::ProcessContext;
use crate::error::{CommandError, Validity};
use crate::object_list::ObjectList;
use crate::plane::{ImagePlane, ImageRef, MemoryIdx, MemoryScope};

/// Stores a copy of the current plane in a memory slot, replacing what the
/// slot held. Pipeline scope keeps the copy for the remaining iterations of
/// the image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageToCacheSettings {
    pub memory: MemoryIdx,
    pub scope: MemoryScope,
}

impl Default for ImageToCacheSettings {
    fn default() -> Self {
        ImageToCacheSettings{memory: MemoryIdx::Slot(0),
                             scope: MemoryScope::Iteration}
    }
}

impl Command for ImageToCacheSettings {
    fn execute(&self, ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        if !matches!(self.memory, MemoryIdx::Slot(_)) {
            return Err(CommandError::plane(
                Validity::Invalid,
                format!("cannot store to memory {}", self.memory)));
        }
        ctx.store_image_to_cache(self.scope, self.memory, image.clone())
            .ok_or_else(|| CommandError::plane(
                Validity::Invalid, "plane has no cache key"))?;
        debug!("Stored {:?} to {} ({:?})", image.id.plane, self.memory,
               self.scope);
        Ok(())
    }
}

/// Replaces the current plane by the one stored in a memory slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageFromCacheSettings {
    pub memory: MemoryIdx,
}

impl Default for ImageFromCacheSettings {
    fn default() -> Self {
        ImageFromCacheSettings{memory: MemoryIdx::Slot(0)}
    }
}

impl Command for ImageFromCacheSettings {
    fn execute(&self, ctx: &mut ProcessContext, image: &mut ImagePlane,
               _objects: &mut ObjectList) -> Result<(), CommandError> {
        if !matches!(self.memory, MemoryIdx::Slot(_)) {
            return Err(CommandError::plane(
                Validity::Invalid,
                format!("cannot load from memory {}", self.memory)));
        }
        let image_ref = ImageRef{memory: self.memory, ..ImageRef::default()};
        let stored = ctx.load_image(&image_ref, image)?;
        *image = ImagePlane::clone(&stored);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::Fixture;
    use crate::context::IterationContext;
    use crate::image_funcs::fill;

    #[test]
    fn test_store_and_restore() {
        let fixture = Fixture::new(1);
        let mut iteration = IterationContext::default();
        let mut ctx = fixture.context(&mut iteration);
        let mut objects = ObjectList::new();
        let mut image = fixture.current();

        let to_cache = ImageToCacheSettings{memory: MemoryIdx::Slot(2),
                                            scope: MemoryScope::Iteration};
        let from_cache = ImageFromCacheSettings{memory: MemoryIdx::Slot(2)};
        let err = from_cache.execute(&mut ctx, &mut image, &mut objects)
            .unwrap_err();
        assert_eq!(err.validity, Validity::Invalid);

        to_cache.execute(&mut ctx, &mut image, &mut objects).unwrap();
        fill(image.pixels_mut(), 1);
        image.set_binary(1, 1);
        from_cache.execute(&mut ctx, &mut image, &mut objects).unwrap();
        assert_eq!(image.pixels().get_pixel(5, 5)[0], 100);
        assert!(!image.is_binary());

        // Storing again replaces the slot.
        fill(image.pixels_mut(), 42);
        to_cache.execute(&mut ctx, &mut image, &mut objects).unwrap();
        fill(image.pixels_mut(), 0);
        from_cache.execute(&mut ctx, &mut image, &mut objects).unwrap();
        assert_eq!(image.pixels().get_pixel(5, 5)[0], 42);
    }

    #[test]
    fn test_pipeline_scope() {
        let fixture = Fixture::new(1);
        let mut objects = ObjectList::new();
        let mut image = fixture.current();
        {
            let mut iteration = IterationContext::default();
            let mut ctx = fixture.context(&mut iteration);
            ImageToCacheSettings{memory: MemoryIdx::Slot(1),
                                 scope: MemoryScope::Pipeline}
                .execute(&mut ctx, &mut image, &mut objects).unwrap();
        }
        // A later iteration of the same image still sees the slot.
        let mut iteration = IterationContext::default();
        let mut ctx = fixture.context(&mut iteration);
        fill(image.pixels_mut(), 0);
        ImageFromCacheSettings{memory: MemoryIdx::Slot(1)}
            .execute(&mut ctx, &mut image, &mut objects).unwrap();
        assert_eq!(image.pixels().get_pixel(0, 0)[0], 100);

        let err = ImageToCacheSettings{memory: MemoryIdx::Default,
                                       scope: MemoryScope::Iteration}
            .execute(&mut ctx, &mut image, &mut objects).unwrap_err();
        assert_eq!(err.validity, Validity::Invalid);
    }
}  // mod tests.
