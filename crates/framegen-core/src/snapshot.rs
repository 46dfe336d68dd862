//! Snapshot Manager: previous-frame copies of the tagged inputs.

use framegen_common::{handles_equal, BufferType, ResourceHandle, ViewportId};
use tracing::debug;

use crate::backend::{ComputeBackend, TaggedResourceRegistry};
use crate::error::Result;
use crate::pyramid::SnapshotFootprint;

/// Tagged buffers of the current frame. Borrowed: valid until the next present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaggedResourceSet {
    pub depth: Option<ResourceHandle>,
    pub motion_vectors: Option<ResourceHandle>,
    pub hud_less: Option<ResourceHandle>,
    pub ui: Option<ResourceHandle>,
}

impl TaggedResourceSet {
    pub fn acquire<R: TaggedResourceRegistry + ?Sized>(registry: &R, viewport: ViewportId) -> Self {
        Self {
            depth: registry.get(BufferType::Depth, viewport),
            motion_vectors: registry.get(BufferType::MotionVectors, viewport),
            hud_less: registry.get(BufferType::HudLessColor, viewport),
            ui: registry.get(BufferType::UiColorAndAlpha, viewport),
        }
    }

    pub fn get(&self, buffer: BufferType) -> Option<ResourceHandle> {
        match buffer {
            BufferType::Depth => self.depth,
            BufferType::MotionVectors => self.motion_vectors,
            BufferType::HudLessColor => self.hud_less,
            BufferType::UiColorAndAlpha => self.ui,
        }
    }

    /// Mandatory buffer types that were not tagged.
    pub fn missing_mandatory(&self) -> Vec<BufferType> {
        BufferType::MANDATORY
            .into_iter()
            .filter(|&b| self.get(b).is_none())
            .collect()
    }
}

#[derive(Debug, Default)]
struct SnapshotSlot {
    /// Identity of the tagged resource the clone was made from.
    source: Option<ResourceHandle>,
    copy: Option<ResourceHandle>,
}

/// One-frame-old clones of depth, hud-less colour and motion vectors.
#[derive(Debug, Default)]
pub struct FrameSnapshot {
    depth: SnapshotSlot,
    hud_less: SnapshotSlot,
    motion_vectors: SnapshotSlot,
}

impl FrameSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, buffer: BufferType) -> Option<&SnapshotSlot> {
        match buffer {
            BufferType::Depth => Some(&self.depth),
            BufferType::HudLessColor => Some(&self.hud_less),
            BufferType::MotionVectors => Some(&self.motion_vectors),
            BufferType::UiColorAndAlpha => None,
        }
    }

    fn slots_mut(&mut self) -> [(BufferType, &mut SnapshotSlot); 3] {
        [
            (BufferType::Depth, &mut self.depth),
            (BufferType::HudLessColor, &mut self.hud_less),
            (BufferType::MotionVectors, &mut self.motion_vectors),
        ]
    }

    /// Previous-frame clone of `buffer`, if one exists.
    pub fn previous(&self, buffer: BufferType) -> Option<ResourceHandle> {
        self.slot(buffer).and_then(|s| s.copy)
    }

    /// Identity the clone of `buffer` was taken from.
    pub fn source(&self, buffer: BufferType) -> Option<ResourceHandle> {
        self.slot(buffer).and_then(|s| s.source)
    }

    /// Replace clones whose tagged source changed identity (or shape).
    ///
    /// Returns whether anything changed; a change means the snapshot does not
    /// hold the previous frame of the current resources.
    pub fn refresh_if_changed<C: ComputeBackend>(
        &mut self,
        backend: &mut C,
        current: &TaggedResourceSet,
        release_delay: u32,
    ) -> Result<bool> {
        let mut changed = false;
        for (buffer, slot) in self.slots_mut() {
            let now = current.get(buffer);
            let stale_shape = match (now, slot.copy) {
                (Some(src), Some(clone)) => backend.describe(src) != backend.describe(clone),
                _ => false,
            };
            let missing_clone = now.is_some() && slot.copy.is_none();
            if handles_equal(now, slot.source) && !stale_shape && !missing_clone {
                continue;
            }

            changed = true;
            debug!(
                buffer = buffer.name(),
                old = ?slot.source,
                new = ?now,
                "Tagged resource changed, refreshing snapshot"
            );
            if let Some(old) = slot.copy.take() {
                backend.destroy_resource(old, release_delay);
            }
            slot.source = now;
            if let Some(src) = now {
                slot.copy = Some(backend.clone_resource(src, buffer.name())?);
            }
        }
        Ok(changed)
    }

    /// Copy the current contents into the clones.
    pub fn advance<C: ComputeBackend>(&mut self, backend: &mut C, current: &TaggedResourceSet) -> Result<()> {
        for (buffer, slot) in self.slots_mut() {
            if let (Some(src), Some(dst)) = (current.get(buffer), slot.copy) {
                if handles_equal(Some(src), slot.source) {
                    backend.copy_resource(dst, src)?;
                }
            }
        }
        Ok(())
    }

    pub fn footprint<C: ComputeBackend>(&self, backend: &C) -> SnapshotFootprint {
        let size = |slot: &SnapshotSlot| {
            slot.copy
                .and_then(|h| backend.describe(h))
                .map(|d| d.size_in_bytes())
        };
        SnapshotFootprint {
            depth: size(&self.depth),
            hud_less: size(&self.hud_less),
            motion_vectors: size(&self.motion_vectors),
        }
    }

    pub fn destroy<C: ComputeBackend>(&mut self, backend: &mut C, release_delay: u32) {
        for (_, slot) in self.slots_mut() {
            if let Some(h) = slot.copy.take() {
                backend.destroy_resource(h, release_delay);
            }
            slot.source = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::{Event, SoftwareBackend, StaticTagRegistry};
    use framegen_common::{Format, TextureDesc};

    fn tagged(backend: &mut SoftwareBackend) -> TaggedResourceSet {
        TaggedResourceSet {
            depth: Some(backend.create_texture(TextureDesc::new(16, 16, Format::D32Float), "depth").unwrap()),
            motion_vectors: Some(
                backend
                    .create_texture(TextureDesc::new(16, 16, Format::Rg16Float), "mvec")
                    .unwrap(),
            ),
            hud_less: Some(
                backend
                    .create_texture(TextureDesc::new(16, 16, Format::Rgba8Unorm), "color")
                    .unwrap(),
            ),
            ui: None,
        }
    }

    #[test]
    fn test_acquire_reports_missing_mandatory() {
        let mut registry = StaticTagRegistry::new();
        let vp = ViewportId(0);
        let h = ResourceHandle::from_raw(9).unwrap();
        registry.tag(vp, BufferType::Depth, h);
        let set = TaggedResourceSet::acquire(&registry, vp);
        assert_eq!(set.depth, Some(h));
        assert_eq!(
            set.missing_mandatory(),
            vec![BufferType::HudLessColor, BufferType::MotionVectors]
        );
    }

    #[test]
    fn test_first_refresh_clones_everything() {
        let mut backend = SoftwareBackend::new();
        let set = tagged(&mut backend);
        let mut snap = FrameSnapshot::new();
        assert!(snap.refresh_if_changed(&mut backend, &set, 0).unwrap());
        for b in BufferType::MANDATORY {
            let prev = snap.previous(b).unwrap();
            assert_ne!(Some(prev), set.get(b));
            assert_eq!(backend.describe(prev), backend.describe(set.get(b).unwrap()));
        }
        assert!(!snap.refresh_if_changed(&mut backend, &set, 0).unwrap());
    }

    #[test]
    fn test_identity_change_replaces_only_that_clone() {
        let mut backend = SoftwareBackend::new();
        let mut set = tagged(&mut backend);
        let mut snap = FrameSnapshot::new();
        snap.refresh_if_changed(&mut backend, &set, 0).unwrap();
        let old_depth = snap.previous(BufferType::Depth).unwrap();
        let old_color = snap.previous(BufferType::HudLessColor).unwrap();

        set.depth = Some(backend.create_texture(TextureDesc::new(16, 16, Format::D32Float), "depth2").unwrap());
        backend.clear_events();
        assert!(snap.refresh_if_changed(&mut backend, &set, 0).unwrap());
        assert!(backend.events().contains(&Event::Destroy(old_depth)));
        assert_ne!(snap.previous(BufferType::Depth), Some(old_depth));
        assert_eq!(snap.source(BufferType::Depth), set.depth);
        assert_eq!(snap.previous(BufferType::HudLessColor), Some(old_color));
    }

    #[test]
    fn test_advance_copies_current_into_clones() {
        let mut backend = SoftwareBackend::new();
        let set = tagged(&mut backend);
        let mut snap = FrameSnapshot::new();
        snap.refresh_if_changed(&mut backend, &set, 0).unwrap();

        let color = set.hud_less.unwrap();
        backend.fill(color, [0.25, 0.5, 0.75, 1.0]).unwrap();
        backend.clear_events();
        snap.advance(&mut backend, &set).unwrap();

        let prev = snap.previous(BufferType::HudLessColor).unwrap();
        assert_eq!(backend.read_texel(prev, 3, 3), Some([0.25, 0.5, 0.75, 1.0]));
        let copies = backend
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Copy { .. }))
            .count();
        assert_eq!(copies, 3);
    }

    #[test]
    fn test_footprint_and_destroy() {
        let mut backend = SoftwareBackend::new();
        let set = tagged(&mut backend);
        let mut snap = FrameSnapshot::new();
        assert_eq!(snap.footprint(&backend), SnapshotFootprint::default());
        snap.refresh_if_changed(&mut backend, &set, 0).unwrap();
        assert_eq!(snap.footprint(&backend).depth, Some(16 * 16 * 4));
        snap.destroy(&mut backend, 0);
        assert!(snap.previous(BufferType::Depth).is_none());
        assert!(snap.source(BufferType::Depth).is_none());
    }
}
