//! In-memory stand-ins for the host's tag registry and constants provider.

use std::collections::HashMap;

use framegen_common::{BufferType, CommonFrameConstants, FrameToken, ResourceHandle, ViewportId};

use crate::backend::{FrameConstantsProvider, TaggedResourceRegistry};

#[derive(Debug, Default)]
pub struct StaticTagRegistry {
    tags: HashMap<(ViewportId, BufferType), ResourceHandle>,
}

impl StaticTagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(&mut self, viewport: ViewportId, buffer: BufferType, handle: ResourceHandle) {
        self.tags.insert((viewport, buffer), handle);
    }

    pub fn untag(&mut self, viewport: ViewportId, buffer: BufferType) {
        self.tags.remove(&(viewport, buffer));
    }
}

impl TaggedResourceRegistry for StaticTagRegistry {
    fn get(&self, buffer: BufferType, viewport: ViewportId) -> Option<ResourceHandle> {
        self.tags.get(&(viewport, buffer)).copied()
    }
}

/// Constants per viewport, optionally overridden for single frames.
#[derive(Debug, Default)]
pub struct StaticConstantsProvider {
    every_frame: HashMap<ViewportId, CommonFrameConstants>,
    per_frame: HashMap<(FrameToken, ViewportId), CommonFrameConstants>,
}

impl StaticConstantsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `constants` for every frame of `viewport`.
    pub fn set(&mut self, viewport: ViewportId, constants: CommonFrameConstants) {
        self.every_frame.insert(viewport, constants);
    }

    pub fn set_for_frame(&mut self, frame: FrameToken, viewport: ViewportId, constants: CommonFrameConstants) {
        self.per_frame.insert((frame, viewport), constants);
    }

    pub fn remove(&mut self, viewport: ViewportId) {
        self.every_frame.remove(&viewport);
        self.per_frame.retain(|(_, v), _| *v != viewport);
    }
}

impl FrameConstantsProvider for StaticConstantsProvider {
    fn get(&self, frame: FrameToken, viewport: ViewportId) -> Option<CommonFrameConstants> {
        self.per_frame
            .get(&(frame, viewport))
            .or_else(|| self.every_frame.get(&viewport))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_frame_overrides_every_frame() {
        let vp = ViewportId(1);
        let mut p = StaticConstantsProvider::new();
        assert!(p.get(FrameToken(1), vp).is_none());
        p.set(vp, CommonFrameConstants::default());
        let mut special = CommonFrameConstants::default();
        special.jitter_offset = [0.25, -0.25];
        p.set_for_frame(FrameToken(2), vp, special);
        assert_eq!(p.get(FrameToken(2), vp), Some(special));
        assert_eq!(p.get(FrameToken(3), vp), Some(CommonFrameConstants::default()));
        p.remove(vp);
        assert!(p.get(FrameToken(2), vp).is_none());
    }

    #[test]
    fn test_tags_are_per_viewport() {
        let mut r = StaticTagRegistry::new();
        let h = ResourceHandle::from_raw(3).unwrap();
        r.tag(ViewportId(0), BufferType::Depth, h);
        assert_eq!(r.get(BufferType::Depth, ViewportId(0)), Some(h));
        assert_eq!(r.get(BufferType::Depth, ViewportId(1)), None);
        r.untag(ViewportId(0), BufferType::Depth);
        assert_eq!(r.get(BufferType::Depth, ViewportId(0)), None);
    }
}
