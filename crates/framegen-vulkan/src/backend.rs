//! `ComputeBackend` over the host's Vulkan queue.
//!
//! - Owned images live in `GENERAL` layout from creation on, so kernels and
//!   copies never need per-use transitions.
//! - Imported host images are moved to `GENERAL` the first time a
//!   submission touches them and returned to their home layout before it
//!   is submitted.
//! - Destroyed images wait in a frame-keyed release queue; before anything
//!   is reclaimed every in-flight submission of this backend is waited on.

use std::collections::HashMap;

use ash::vk;
use tracing::{debug, info, warn};

use framegen_common::{FrameToken, HandleAllocator, ResourceHandle, TextureDesc};
use framegen_core::{ComputeBackend, DeferredReleaseQueue, FrameGenError, Kernel, Result};

use crate::commands::{self, CommandContext, FRAMES_IN_FLIGHT};
use crate::device::VulkanDevice;
use crate::error::VulkanError;
use crate::memory::{self, GpuImage, Ownership, SharedAllocator};
use crate::pipeline::{self, KernelPipelines};

pub struct VulkanBackend {
    // `Drop::drop` waits for every context before any field is dropped.
    images: HashMap<ResourceHandle, GpuImage>,
    release: DeferredReleaseQueue<GpuImage>,
    pipelines: Option<KernelPipelines>,
    contexts: Vec<CommandContext>,
    current: usize,
    /// Imported images in `GENERAL` for the recording submission.
    borrowed: Vec<ResourceHandle>,
    handles: HandleAllocator,
    frame: FrameToken,
    supported: bool,
    allocator: SharedAllocator,
    device: VulkanDevice,
}

impl VulkanBackend {
    /// Attach to the host device. A device lacking a required capability, or
    /// a build without shaders, yields a backend that reports itself
    /// unsupported rather than an error.
    pub fn new(device: VulkanDevice) -> std::result::Result<Self, VulkanError> {
        let allocator = memory::create_allocator(&device)?;
        let contexts = (0..FRAMES_IN_FLIGHT)
            .map(|_| CommandContext::new(&device, &allocator))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let pipelines = if device.supports_frame_generation() {
            match KernelPipelines::new(device.device()) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(error = %e, "Frame generation pipelines unavailable");
                    None
                }
            }
        } else {
            warn!("Device lacks storage image support required for frame generation");
            None
        };
        let supported = pipelines.is_some();
        info!(supported, "Vulkan frame generation backend ready");

        Ok(Self {
            images: HashMap::new(),
            release: DeferredReleaseQueue::new(),
            pipelines,
            contexts,
            current: 0,
            borrowed: Vec::new(),
            handles: HandleAllocator::new(),
            frame: FrameToken::default(),
            supported,
            allocator,
            device,
        })
    }

    #[inline]
    pub fn device(&self) -> &VulkanDevice {
        &self.device
    }

    pub fn image(&self, handle: ResourceHandle) -> Option<&GpuImage> {
        self.images.get(&handle)
    }

    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    /// Register a host image (tagged buffer or swapchain image).
    ///
    /// `home_layout` is the layout the host keeps the image in between
    /// submissions; it must not be `UNDEFINED`. `storage` says whether the
    /// image was created with `STORAGE` usage. Release the handle with
    /// `destroy_resource`; only the view is destroyed.
    pub fn import_image(
        &mut self,
        image: vk::Image,
        desc: TextureDesc,
        home_layout: vk::ImageLayout,
        storage: bool,
        name: &str,
    ) -> Result<ResourceHandle> {
        let imported = GpuImage::import(&self.device, &self.allocator, image, desc, home_layout, storage, name)?;
        let handle = self.handles.allocate();
        debug!(handle = %handle, name, extent = %desc.extent, format = ?desc.format, "Imported image");
        self.images.insert(handle, imported);
        Ok(handle)
    }

    /// Submit recorded work, signalling `signal` once it completes.
    ///
    /// Always submits when `signal` is non-empty, even with nothing recorded.
    pub fn submit_signalling(&mut self, signal: &[vk::Semaphore]) -> std::result::Result<(), VulkanError> {
        if !self.contexts[self.current].is_recording() {
            if signal.is_empty() {
                return Ok(());
            }
            self.ensure_recording()?;
        }
        self.return_borrowed();
        self.contexts[self.current].submit(self.device.queue(), signal)?;
        self.current = (self.current + 1) % self.contexts.len();
        Ok(())
    }

    fn wait_all(&mut self) -> std::result::Result<(), VulkanError> {
        for ctx in &mut self.contexts {
            ctx.wait()?;
        }
        Ok(())
    }

    /// Drop `ready` once nothing in flight can reference it.
    fn reclaim(&mut self, ready: Vec<GpuImage>) {
        if ready.is_empty() {
            return;
        }
        if let Err(e) = self.wait_all() {
            // Leaking beats destroying memory the GPU may still touch.
            warn!(error = %e, count = ready.len(), "Fence wait failed, leaking released images");
            std::mem::forget(ready);
            return;
        }
        debug!(count = ready.len(), "Reclaiming released images");
        drop(ready);
    }

    fn ensure_recording(&mut self) -> std::result::Result<vk::CommandBuffer, VulkanError> {
        let ctx = &mut self.contexts[self.current];
        if !ctx.is_recording() {
            ctx.begin()?;
        }
        Ok(ctx.command_buffer())
    }

    /// Make `handle` usable in `GENERAL` layout for the recording submission.
    fn touch(&mut self, handle: ResourceHandle) -> Result<()> {
        let cb = self.ensure_recording()?;
        let image = self.images.get(&handle).ok_or(FrameGenError::UnknownResource(handle))?;
        if let Ownership::Imported { home_layout } = image.ownership() {
            if !self.borrowed.contains(&handle) {
                commands::transition(
                    self.device.device(),
                    cb,
                    image.image(),
                    image.subresource_range(),
                    home_layout,
                    vk::ImageLayout::GENERAL,
                );
                self.borrowed.push(handle);
            }
        }
        Ok(())
    }

    /// Put every borrowed import back into its home layout.
    fn return_borrowed(&mut self) {
        let cb = self.contexts[self.current].command_buffer();
        for handle in self.borrowed.drain(..) {
            let Some(image) = self.images.get(&handle) else {
                continue;
            };
            if let Ownership::Imported { home_layout } = image.ownership() {
                commands::transition(
                    self.device.device(),
                    cb,
                    image.image(),
                    image.subresource_range(),
                    vk::ImageLayout::GENERAL,
                    home_layout,
                );
            }
        }
    }

    fn record_copy(&mut self, dst: ResourceHandle, src: ResourceHandle) -> Result<()> {
        self.touch(src)?;
        self.touch(dst)?;
        let cb = self.contexts[self.current].command_buffer();
        let device = self.device.device();
        let source = self.images.get(&src).ok_or(FrameGenError::UnknownResource(src))?;
        let target = self.images.get(&dst).ok_or(FrameGenError::UnknownResource(dst))?;
        let extent = source.desc().extent;

        if source.actual_format() == target.actual_format() {
            let region = vk::ImageCopy::default()
                .src_subresource(source.subresource_layers())
                .dst_subresource(target.subresource_layers())
                .extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });
            // SAFETY: both images are valid and in GENERAL layout.
            unsafe {
                device.cmd_copy_image(
                    cb,
                    source.image(),
                    vk::ImageLayout::GENERAL,
                    target.image(),
                    vk::ImageLayout::GENERAL,
                    &[region],
                );
            }
        } else if !source.actual_format().is_depth() && !target.actual_format().is_depth() {
            let corner = vk::Offset3D {
                x: extent.width as i32,
                y: extent.height as i32,
                z: 1,
            };
            let region = vk::ImageBlit::default()
                .src_subresource(source.subresource_layers())
                .src_offsets([vk::Offset3D::default(), corner])
                .dst_subresource(target.subresource_layers())
                .dst_offsets([vk::Offset3D::default(), corner]);
            // SAFETY: both images are valid colour images in GENERAL layout.
            unsafe {
                device.cmd_blit_image(
                    cb,
                    source.image(),
                    vk::ImageLayout::GENERAL,
                    target.image(),
                    vk::ImageLayout::GENERAL,
                    &[region],
                    vk::Filter::NEAREST,
                );
            }
        } else {
            return Err(FrameGenError::incompatible_copy(target.desc(), source.desc()));
        }
        commands::full_barrier(device, cb);
        Ok(())
    }
}

impl ComputeBackend for VulkanBackend {
    fn supports_frame_generation(&self) -> bool {
        self.supported
    }

    fn create_texture(&mut self, desc: TextureDesc, name: &str) -> Result<ResourceHandle> {
        let image = GpuImage::new(&self.device, &self.allocator, desc, name)?;
        let cb = self.ensure_recording()?;
        commands::transition(
            self.device.device(),
            cb,
            image.image(),
            image.subresource_range(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );
        let handle = self.handles.allocate();
        self.images.insert(handle, image);
        Ok(handle)
    }

    fn describe(&self, handle: ResourceHandle) -> Option<TextureDesc> {
        self.images.get(&handle).map(GpuImage::desc)
    }

    fn clone_resource(&mut self, src: ResourceHandle, name: &str) -> Result<ResourceHandle> {
        let desc = self.describe(src).ok_or(FrameGenError::UnknownResource(src))?;
        let handle = self.create_texture(desc, name)?;
        if let Err(e) = self.record_copy(handle, src) {
            self.destroy_resource(handle, 0);
            return Err(e);
        }
        Ok(handle)
    }

    fn copy_resource(&mut self, dst: ResourceHandle, src: ResourceHandle) -> Result<()> {
        let source = self.describe(src).ok_or(FrameGenError::UnknownResource(src))?;
        let target = self.describe(dst).ok_or(FrameGenError::UnknownResource(dst))?;
        if source.extent != target.extent {
            return Err(FrameGenError::incompatible_copy(target, source));
        }
        self.record_copy(dst, src)
    }

    fn destroy_resource(&mut self, handle: ResourceHandle, frame_delay: u32) {
        let Some(image) = self.images.remove(&handle) else {
            warn!(handle = %handle, "Destroying unknown image");
            return;
        };
        if self.borrowed.contains(&handle) {
            // still GENERAL in the recording submission; hand it back first
            if let Ownership::Imported { home_layout } = image.ownership() {
                let cb = self.contexts[self.current].command_buffer();
                commands::transition(
                    self.device.device(),
                    cb,
                    image.image(),
                    image.subresource_range(),
                    vk::ImageLayout::GENERAL,
                    home_layout,
                );
            }
            self.borrowed.retain(|h| *h != handle);
        }
        self.release.push(image, self.frame, frame_delay);
    }

    fn dispatch(
        &mut self,
        kernel: Kernel,
        reads: &[ResourceHandle],
        writes: &[ResourceHandle],
        params: &[u8],
        groups: [u32; 2],
    ) -> Result<()> {
        if reads.len() != kernel.read_slots() || writes.len() != kernel.write_slots() {
            return Err(FrameGenError::BindingMismatch {
                kernel: kernel.name(),
                expected_reads: kernel.read_slots(),
                expected_writes: kernel.write_slots(),
                reads: reads.len(),
                writes: writes.len(),
            });
        }
        if params.len() != kernel.params_size() {
            return Err(FrameGenError::Backend(format!(
                "{} expects {} parameter bytes, got {}",
                kernel,
                kernel.params_size(),
                params.len()
            )));
        }
        for &h in writes {
            let image = self.images.get(&h).ok_or(FrameGenError::UnknownResource(h))?;
            if !image.storage() {
                return Err(FrameGenError::Backend(format!(
                    "{} cannot write {} ({:?} has no storage support)",
                    kernel,
                    image.name(),
                    image.actual_format()
                )));
            }
        }
        let Some(pipelines) = self.pipelines.as_ref() else {
            return Err(FrameGenError::Unsupported("frame generation pipelines not built".into()));
        };
        let Some(compiled) = pipelines.get(kernel) else {
            return Err(VulkanError::MissingShader(kernel.name()).into());
        };
        let (vk_pipeline, layout, set_layout, sampler) = (
            compiled.pipeline(),
            compiled.pipeline_layout(),
            compiled.descriptor_set_layout(),
            pipelines.sampler(),
        );

        for &h in reads.iter().chain(writes) {
            self.touch(h)?;
        }

        let ctx = &mut self.contexts[self.current];
        let offset = ctx.push_uniforms(params)?;
        let set = ctx.allocate_set(set_layout)?;
        let cb = ctx.command_buffer();
        let uniform_buffer = ctx.uniform_buffer();

        let mut image_infos = Vec::with_capacity(reads.len() + writes.len());
        for &h in reads {
            let image = self.images.get(&h).ok_or(FrameGenError::UnknownResource(h))?;
            image_infos.push(
                vk::DescriptorImageInfo::default()
                    .sampler(sampler)
                    .image_view(image.view())
                    .image_layout(vk::ImageLayout::GENERAL),
            );
        }
        for &h in writes {
            let image = self.images.get(&h).ok_or(FrameGenError::UnknownResource(h))?;
            image_infos.push(
                vk::DescriptorImageInfo::default()
                    .image_view(image.view())
                    .image_layout(vk::ImageLayout::GENERAL),
            );
        }
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(uniform_buffer)
            .offset(offset)
            .range(params.len() as u64)];

        let types = pipeline::binding_types(kernel);
        let mut descriptor_writes: Vec<vk::WriteDescriptorSet> = image_infos
            .iter()
            .zip(&types)
            .enumerate()
            .map(|(binding, (info, ty))| {
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding as u32)
                    .descriptor_type(*ty)
                    .image_info(std::slice::from_ref(info))
            })
            .collect();
        descriptor_writes.push(
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(pipeline::params_binding(kernel))
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info),
        );

        let device = self.device.device();
        // SAFETY: the set was allocated from this submission's pool and the
        // command buffer is recording; every view is live until the release
        // queue has waited for this submission.
        unsafe {
            device.update_descriptor_sets(&descriptor_writes, &[]);
            device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::COMPUTE, vk_pipeline);
            device.cmd_bind_descriptor_sets(cb, vk::PipelineBindPoint::COMPUTE, layout, 0, &[set], &[]);
            device.cmd_dispatch(cb, groups[0], groups[1], 1);
        }
        commands::full_barrier(device, cb);
        Ok(())
    }

    fn begin_frame(&mut self, frame: FrameToken) {
        self.frame = frame;
        let ready = self.release.collect(frame);
        self.reclaim(ready);
    }

    fn submit(&mut self) -> Result<()> {
        self.submit_signalling(&[])?;
        Ok(())
    }

    fn flush_releases(&mut self) {
        if let Err(e) = self.submit_signalling(&[]) {
            warn!(error = %e, "Submit failed while flushing releases");
        }
        let all = self.release.drain_all();
        self.reclaim(all);
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.submit_signalling(&[]) {
            warn!(error = %e, "Final submit failed");
        }
        if let Err(e) = self.wait_all() {
            warn!(error = %e, "Fence wait failed while dropping backend");
        }
        debug!(images = self.images.len(), pending = self.release.len(), "Vulkan backend dropped");
    }
}
