//! Capabilities the pipeline consumes.
//!
//! The pipeline never talks to a graphics API directly. It drives:
//! - a `ComputeBackend` that owns textures and runs kernels in submission order
//! - a `PresentBackend` that knows the presentable surface and the real present call
//! - a `TaggedResourceRegistry` and a `FrameConstantsProvider` supplied by the host

use framegen_common::{
    BufferType, CommonFrameConstants, FrameToken, ResourceHandle, TextureDesc, ViewportId,
};

use crate::error::Result;
use crate::kernels::Kernel;

/// Resource creation, copies and kernel dispatch on one ordered command stream.
pub trait ComputeBackend {
    /// Whether the device can run every kernel of the pipeline.
    fn supports_frame_generation(&self) -> bool;

    fn create_texture(&mut self, desc: TextureDesc, name: &str) -> Result<ResourceHandle>;

    /// Description of a live resource, owned or imported.
    fn describe(&self, handle: ResourceHandle) -> Option<TextureDesc>;

    /// Allocate a new texture shaped like `src` and copy its contents.
    fn clone_resource(&mut self, src: ResourceHandle, name: &str) -> Result<ResourceHandle>;

    /// Copy `src` into `dst`. Extents must match; formats may differ.
    fn copy_resource(&mut self, dst: ResourceHandle, src: ResourceHandle) -> Result<()>;

    /// Release a resource once `frame_delay` more frames have retired.
    fn destroy_resource(&mut self, handle: ResourceHandle, frame_delay: u32);

    fn dispatch(
        &mut self,
        kernel: Kernel,
        reads: &[ResourceHandle],
        writes: &[ResourceHandle],
        params: &[u8],
        groups: [u32; 2],
    ) -> Result<()>;

    /// Start recording `frame`; reclaims resources whose delay has elapsed.
    fn begin_frame(&mut self, frame: FrameToken);

    /// Flush recorded work to the device.
    fn submit(&mut self) -> Result<()>;

    /// Wait for the device and reclaim every pending release.
    fn flush_releases(&mut self);
}

/// Which presentation entry point a presenter forwards to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentApi {
    #[default]
    Present,
    /// Extended variant accepting `PresentParameters`.
    Present1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Extra arguments of the extended present call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PresentParameters {
    pub dirty_rects: Vec<Rect>,
    pub scroll_rect: Option<Rect>,
    pub scroll_offset: Option<[i32; 2]>,
}

/// The real presentation primitive of the intercepted surface.
pub trait PresentBackend<C: ComputeBackend> {
    fn api(&self) -> PresentApi;

    /// The current presentable surface as a compute resource.
    ///
    /// May change after every `present`; callers re-query it.
    fn surface(&mut self, compute: &mut C) -> Result<ResourceHandle>;

    /// Issue one presentation. `params` is only forwarded by `Present1`.
    fn present(
        &mut self,
        compute: &mut C,
        sync_interval: u32,
        flags: u32,
        params: Option<&PresentParameters>,
    ) -> Result<()>;
}

/// Host registry of per-viewport tagged buffers for the current frame.
pub trait TaggedResourceRegistry {
    fn get(&self, buffer: BufferType, viewport: ViewportId) -> Option<ResourceHandle>;
}

/// Host source of per-frame camera transforms.
pub trait FrameConstantsProvider {
    fn get(&self, frame: FrameToken, viewport: ViewportId) -> Option<CommonFrameConstants>;
}
