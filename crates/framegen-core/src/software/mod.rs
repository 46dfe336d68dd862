//! CPU reference backend.
//!
//! Runs every kernel on the CPU and records an ordered event log, so the
//! pipeline and the present state machine can be exercised without a GPU:
//! - `SoftwareBackend` implements `ComputeBackend`
//! - `SoftwarePresenter` implements `PresentBackend` over a ring of images
//! - `StaticTagRegistry` / `StaticConstantsProvider` stand in for the host

mod host;
mod kernels;
mod present;
mod texture;

use std::collections::HashMap;

use framegen_common::{FrameToken, HandleAllocator, ResourceHandle, TextureDesc};
use tracing::{trace, warn};

use crate::backend::{ComputeBackend, PresentApi};
use crate::error::{FrameGenError, Result};
use crate::kernels::Kernel;
use crate::release::DeferredReleaseQueue;

pub use host::{StaticConstantsProvider, StaticTagRegistry};
pub use present::SoftwarePresenter;
pub use texture::{SoftwareTexture, Texels};

/// One observable backend operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Create {
        handle: ResourceHandle,
        desc: TextureDesc,
        name: String,
    },
    /// Release requested; the texture lives until reclaimed.
    Destroy(ResourceHandle),
    Reclaim(ResourceHandle),
    Copy {
        dst: ResourceHandle,
        src: ResourceHandle,
    },
    Dispatch {
        kernel: Kernel,
        groups: [u32; 2],
        writes: Vec<ResourceHandle>,
    },
    Present {
        surface: ResourceHandle,
        api: PresentApi,
        sync_interval: u32,
    },
}

#[derive(Debug)]
pub struct SoftwareBackend {
    textures: HashMap<ResourceHandle, SoftwareTexture>,
    handles: HandleAllocator,
    release: DeferredReleaseQueue<ResourceHandle>,
    frame: FrameToken,
    events: Vec<Event>,
    supported: bool,
    failing_kernel: Option<Kernel>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            handles: HandleAllocator::new(),
            release: DeferredReleaseQueue::new(),
            frame: FrameToken::default(),
            events: Vec::new(),
            supported: true,
            failing_kernel: None,
        }
    }

    /// A backend that reports it cannot run frame generation.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Make every dispatch of `kernel` fail until reset with `None`.
    pub fn set_failing_kernel(&mut self, kernel: Option<Kernel>) {
        self.failing_kernel = kernel;
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub(crate) fn record(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Textures not yet reclaimed, including ones pending release.
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn pending_releases(&self) -> usize {
        self.release.len()
    }

    pub fn texture(&self, handle: ResourceHandle) -> Option<&SoftwareTexture> {
        self.textures.get(&handle)
    }

    fn texture_mut(&mut self, handle: ResourceHandle) -> Result<&mut SoftwareTexture> {
        self.textures
            .get_mut(&handle)
            .ok_or(FrameGenError::UnknownResource(handle))
    }

    pub fn fill(&mut self, handle: ResourceHandle, value: [f32; 4]) -> Result<()> {
        self.texture_mut(handle)?.fill(value);
        Ok(())
    }

    pub fn write_texel(&mut self, handle: ResourceHandle, x: u32, y: u32, value: [f32; 4]) -> Result<()> {
        self.texture_mut(handle)?.store(x, y, value);
        Ok(())
    }

    pub fn read_texel(&self, handle: ResourceHandle, x: u32, y: u32) -> Option<[f32; 4]> {
        self.textures.get(&handle).map(|t| t.load(x, y))
    }

    fn reclaim(&mut self, handles: Vec<ResourceHandle>) {
        for h in handles {
            if self.textures.remove(&h).is_some() {
                trace!(handle = %h, "Reclaimed texture");
                self.events.push(Event::Reclaim(h));
            }
        }
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for SoftwareBackend {
    fn supports_frame_generation(&self) -> bool {
        self.supported
    }

    fn create_texture(&mut self, desc: TextureDesc, name: &str) -> Result<ResourceHandle> {
        let handle = self.handles.allocate();
        self.textures.insert(handle, SoftwareTexture::new(desc));
        self.events.push(Event::Create {
            handle,
            desc,
            name: name.to_string(),
        });
        Ok(handle)
    }

    fn describe(&self, handle: ResourceHandle) -> Option<TextureDesc> {
        self.textures.get(&handle).map(|t| t.desc)
    }

    fn clone_resource(&mut self, src: ResourceHandle, name: &str) -> Result<ResourceHandle> {
        let desc = self.describe(src).ok_or(FrameGenError::UnknownResource(src))?;
        let handle = self.create_texture(desc, name)?;
        self.copy_resource(handle, src)?;
        Ok(handle)
    }

    fn copy_resource(&mut self, dst: ResourceHandle, src: ResourceHandle) -> Result<()> {
        let source = self
            .textures
            .get(&src)
            .ok_or(FrameGenError::UnknownResource(src))?
            .clone();
        let target = self.texture_mut(dst)?;
        if target.desc.extent != source.desc.extent {
            return Err(FrameGenError::incompatible_copy(target.desc, source.desc));
        }
        target.copy_from(&source);
        self.events.push(Event::Copy { dst, src });
        Ok(())
    }

    fn destroy_resource(&mut self, handle: ResourceHandle, frame_delay: u32) {
        if !self.textures.contains_key(&handle) {
            warn!(handle = %handle, "Destroying unknown texture");
            return;
        }
        self.events.push(Event::Destroy(handle));
        self.release.push(handle, self.frame, frame_delay);
    }

    fn dispatch(
        &mut self,
        kernel: Kernel,
        reads: &[ResourceHandle],
        writes: &[ResourceHandle],
        params: &[u8],
        groups: [u32; 2],
    ) -> Result<()> {
        if self.failing_kernel == Some(kernel) {
            return Err(FrameGenError::Backend(format!("{} failed", kernel)));
        }
        if reads.len() != kernel.read_slots() || writes.len() != kernel.write_slots() {
            return Err(FrameGenError::BindingMismatch {
                kernel: kernel.name(),
                expected_reads: kernel.read_slots(),
                expected_writes: kernel.write_slots(),
                reads: reads.len(),
                writes: writes.len(),
            });
        }

        // Outputs leave the map while the kernel borrows the inputs.
        let mut targets = Vec::with_capacity(writes.len());
        for (i, &h) in writes.iter().enumerate() {
            match self.textures.remove(&h) {
                Some(t) => targets.push(t),
                None => {
                    for (&h, t) in writes[..i].iter().zip(targets) {
                        self.textures.insert(h, t);
                    }
                    return Err(FrameGenError::UnknownResource(h));
                }
            }
        }

        let result = match reads
            .iter()
            .map(|h| self.textures.get(h).ok_or(FrameGenError::UnknownResource(*h)))
            .collect::<Result<Vec<_>>>()
        {
            Ok(inputs) => kernels::execute(kernel, &inputs, &mut targets, params),
            Err(e) => Err(e),
        };
        for (&h, t) in writes.iter().zip(targets) {
            self.textures.insert(h, t);
        }
        result?;

        self.events.push(Event::Dispatch {
            kernel,
            groups,
            writes: writes.to_vec(),
        });
        Ok(())
    }

    fn begin_frame(&mut self, frame: FrameToken) {
        self.frame = frame;
        let ready = self.release.collect(frame);
        self.reclaim(ready);
    }

    fn submit(&mut self) -> Result<()> {
        Ok(())
    }

    fn flush_releases(&mut self) {
        let all = self.release.drain_all();
        self.reclaim(all);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framegen_common::Format;

    #[test]
    fn test_deferred_destroy_reclaims_after_delay() {
        let mut b = SoftwareBackend::new();
        b.begin_frame(FrameToken(1));
        let h = b.create_texture(TextureDesc::new(4, 4, Format::R32Float), "t").unwrap();
        b.destroy_resource(h, 2);
        assert!(b.describe(h).is_some());
        b.begin_frame(FrameToken(3));
        assert!(b.describe(h).is_some());
        b.begin_frame(FrameToken(4));
        assert!(b.describe(h).is_none());
        assert_eq!(b.events().last(), Some(&Event::Reclaim(h)));
    }

    #[test]
    fn test_flush_releases_everything() {
        let mut b = SoftwareBackend::new();
        let h = b.create_texture(TextureDesc::new(4, 4, Format::R32Float), "t").unwrap();
        b.destroy_resource(h, 100);
        b.flush_releases();
        assert_eq!(b.live_textures(), 0);
        assert_eq!(b.pending_releases(), 0);
    }

    #[test]
    fn test_copy_requires_matching_extent() {
        let mut b = SoftwareBackend::new();
        let a = b.create_texture(TextureDesc::new(4, 4, Format::Rgba8Unorm), "a").unwrap();
        let c = b.create_texture(TextureDesc::new(8, 4, Format::Rgba8Unorm), "c").unwrap();
        assert!(matches!(
            b.copy_resource(c, a),
            Err(FrameGenError::IncompatibleCopy { .. })
        ));
    }

    #[test]
    fn test_clone_copies_contents() {
        let mut b = SoftwareBackend::new();
        let a = b.create_texture(TextureDesc::new(4, 4, Format::Rgba8Unorm), "a").unwrap();
        b.fill(a, [0.1, 0.2, 0.3, 0.4]).unwrap();
        let c = b.clone_resource(a, "copy").unwrap();
        assert_ne!(a, c);
        assert_eq!(b.read_texel(c, 2, 2), Some([0.1, 0.2, 0.3, 0.4]));
    }

    #[test]
    fn test_dispatch_validates_bindings() {
        let mut b = SoftwareBackend::new();
        let a = b.create_texture(TextureDesc::new(8, 8, Format::R32Uint), "a").unwrap();
        let err = b.dispatch(Kernel::Clear, &[], &[a], &[0; 32], [1, 1]).unwrap_err();
        assert!(matches!(err, FrameGenError::BindingMismatch { kernel: "clear", .. }));
        // the texture survived the failed bind
        assert!(b.describe(a).is_some());
    }

    #[test]
    fn test_unknown_write_target_restores_outputs() {
        let mut b = SoftwareBackend::new();
        let handles: Vec<_> = (0..5)
            .map(|_| b.create_texture(TextureDesc::new(8, 8, Format::R32Uint), "split").unwrap())
            .collect();
        let mut writes = handles.clone();
        writes.push(ResourceHandle::from_raw(999).unwrap());
        let err = b.dispatch(Kernel::Clear, &[], &writes, &[0; 32], [1, 1]).unwrap_err();
        assert!(matches!(err, FrameGenError::UnknownResource(_)));
        assert!(handles.iter().all(|h| b.describe(*h).is_some()));
    }

    #[test]
    fn test_failing_kernel_hook() {
        let mut b = SoftwareBackend::new();
        b.set_failing_kernel(Some(Kernel::Resolve));
        let err = b.dispatch(Kernel::Resolve, &[], &[], &[], [1, 1]).unwrap_err();
        assert!(matches!(err, FrameGenError::Backend(_)));
    }
}
