//! Ordered pass registry with capability-based broadcasts.

use crate::gpu::Gpu;
use crate::instances::InstanceBatches;
use crate::passes::RenderPass;
use crate::{RenderError, Result};
use std::marker::PhantomData;

/// Typed index of a registered pass.
pub struct PassId<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PassId<T> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for PassId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PassId<T> {}

impl<T> std::fmt::Debug for PassId<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PassId({})", self.index)
    }
}

/// Passes in registration order. Broadcasts visit them in that order and
/// skip passes lacking the capability.
#[derive(Default)]
pub struct PassRegistry {
    passes: Vec<Box<dyn RenderPass>>,
}

impl PassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: RenderPass>(&mut self, pass: T) -> PassId<T> {
        tracing::debug!(pass = pass.name(), index = self.passes.len(), "registered pass");
        self.passes.push(Box::new(pass));
        PassId {
            index: self.passes.len() - 1,
            _marker: PhantomData,
        }
    }

    pub fn get<T: RenderPass>(&self, id: PassId<T>) -> Result<&T> {
        self.passes
            .get(id.index)
            .and_then(|p| (**p).as_any().downcast_ref::<T>())
            .ok_or(RenderError::PassLookup { index: id.index })
    }

    pub fn get_mut<T: RenderPass>(&mut self, id: PassId<T>) -> Result<&mut T> {
        self.passes
            .get_mut(id.index)
            .and_then(|p| (**p).as_any_mut().downcast_mut::<T>())
            .ok_or(RenderError::PassLookup { index: id.index })
    }

    /// Rebuild the surfaces of every resolution-aware pass. Stops at the
    /// first failure.
    pub fn broadcast_resolution(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        let _span = tracing::debug_span!("broadcast_resolution", width, height).entered();
        for pass in &mut self.passes {
            if let Some(aware) = pass.as_resolution_aware() {
                aware.set_resolution(gpu, width, height)?;
            }
        }
        Ok(())
    }

    pub fn broadcast_transforms(&mut self, gpu: &mut dyn Gpu, batches: &InstanceBatches) {
        for pass in &mut self.passes {
            if let Some(aware) = pass.as_transform_aware() {
                aware.set_transforms(gpu, batches);
            }
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn release_all(&mut self, gpu: &mut dyn Gpu) {
        for pass in &mut self.passes {
            pass.release(gpu);
        }
        self.passes.clear();
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::{Addition, ResolutionAware, TransformAware, any_pass};
    use crate::software::SoftwareGpu;
    use orrery_assets::AssetStore;
    use orrery_common::{EntityType, ViewEntity};
    use glam::Mat4;

    #[derive(Default)]
    struct Recorder {
        resolutions: Vec<(u32, u32)>,
        totals: Vec<usize>,
    }

    impl ResolutionAware for Recorder {
        fn set_resolution(&mut self, _gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
            self.resolutions.push((width, height));
            Ok(())
        }
    }

    impl TransformAware for Recorder {
        fn set_transforms(&mut self, _gpu: &mut dyn Gpu, batches: &InstanceBatches) {
            self.totals.push(batches.total());
        }
    }

    impl RenderPass for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn as_resolution_aware(&mut self) -> Option<&mut dyn ResolutionAware> {
            Some(self)
        }

        fn as_transform_aware(&mut self) -> Option<&mut dyn TransformAware> {
            Some(self)
        }

        fn release(&mut self, _gpu: &mut dyn Gpu) {}

        any_pass!();
    }

    /// Neither capability.
    struct Inert;

    impl RenderPass for Inert {
        fn name(&self) -> &'static str {
            "inert"
        }

        fn release(&mut self, _gpu: &mut dyn Gpu) {}

        any_pass!();
    }

    #[test]
    fn broadcasts_reach_only_capable_passes() {
        let mut gpu = SoftwareGpu::new();
        let mut registry = PassRegistry::new();
        registry.add(Inert);
        let recorder = registry.add(Recorder::default());

        registry.broadcast_resolution(&mut gpu, 32, 16).unwrap();
        let entities = vec![
            ViewEntity::new(EntityType::Mars, Mat4::IDENTITY),
            ViewEntity::new(EntityType::Mars, Mat4::IDENTITY),
        ];
        registry.broadcast_transforms(&mut gpu, &InstanceBatches::from_entities(&entities));

        let recorder = registry.get(recorder).unwrap();
        assert_eq!(recorder.resolutions, vec![(32, 16)]);
        assert_eq!(recorder.totals, vec![2]);
        assert_eq!(registry.names(), vec!["inert", "recorder"]);
    }

    #[test]
    fn lookup_with_wrong_registry_fails() {
        let mut first = PassRegistry::new();
        first.add(Inert);
        let id = first.add(Recorder::default());
        let mut second = PassRegistry::new();
        second.add(Inert);
        assert!(matches!(second.get(id), Err(RenderError::PassLookup { index: 1 })));
    }

    #[test]
    fn resize_keeps_live_resources_stable() {
        let mut gpu = SoftwareGpu::new();
        let store = AssetStore::with_builtins();
        let mut registry = PassRegistry::new();
        let add = registry.add(Addition::new(&mut gpu, &store, 8, 8).unwrap());
        let before = gpu.stats();

        registry.broadcast_resolution(&mut gpu, 20, 10).unwrap();
        registry.broadcast_resolution(&mut gpu, 3, 7).unwrap();
        assert_eq!(gpu.stats(), before);
        let output = registry.get(add).unwrap().output();
        let desc = gpu.texture_desc(output).unwrap();
        assert_eq!((desc.width, desc.height), (3, 7));

        registry.release_all(&mut gpu);
        assert_eq!(gpu.stats(), crate::gpu::ResourceStats::default());
        assert!(registry.is_empty());
    }
}
