//! `PresentBackend` over a `VkSwapchainKHR`.
//!
//! The host acquires images as usual and reports each index through
//! `set_current_image`. When the pipeline presents twice in one call, the
//! presenter acquires the second image itself; it never acquires after the
//! last present, so the host's next acquire stays valid.

use ash::vk;
use tracing::{debug, trace, warn};

use framegen_common::{Extent2D, Format, ResourceHandle, TextureDesc};
use framegen_core::{ComputeBackend, FrameGenError, PresentApi, PresentBackend, PresentParameters, Rect, Result};

use crate::backend::VulkanBackend;
use crate::error::VulkanError;

pub struct VulkanPresenter {
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<ResourceHandle>,
    /// Signalled by the submission that precedes presenting image `i`.
    render_done: Vec<vk::Semaphore>,
    current: Option<u32>,
    acquire_fence: vk::Fence,
    api: PresentApi,
    incremental_present: bool,
    device: ash::Device,
}

impl VulkanPresenter {
    pub fn new(
        backend: &mut VulkanBackend,
        swapchain: vk::SwapchainKHR,
        format: Format,
        extent: Extent2D,
        api: PresentApi,
    ) -> Result<Self> {
        let device = backend.device().device().clone();
        let loader = ash::khr::swapchain::Device::new(backend.device().instance(), &device);
        // SAFETY: device is valid.
        let acquire_fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(VulkanError::FenceCreation)?;

        let mut this = Self {
            loader,
            swapchain,
            images: Vec::new(),
            render_done: Vec::new(),
            current: None,
            acquire_fence,
            api,
            incremental_present: false,
            device,
        };
        this.import_images(backend, swapchain, format, extent)?;
        Ok(this)
    }

    /// Forward dirty rectangles of `Present1` calls. Requires the host to
    /// have enabled `VK_KHR_incremental_present`.
    pub fn with_incremental_present(mut self, enabled: bool) -> Self {
        self.incremental_present = enabled;
        self
    }

    /// The host recreated its swapchain.
    pub fn recreate(
        &mut self,
        backend: &mut VulkanBackend,
        swapchain: vk::SwapchainKHR,
        format: Format,
        extent: Extent2D,
    ) -> Result<()> {
        self.release(backend);
        self.import_images(backend, swapchain, format, extent)
    }

    /// Hand the swapchain images back to the backend.
    pub fn release(&mut self, backend: &mut VulkanBackend) {
        for handle in self.images.drain(..) {
            backend.destroy_resource(handle, 0);
        }
        self.current = None;
    }

    /// Index the host acquired for the frame it is about to present.
    pub fn set_current_image(&mut self, index: u32) {
        self.current = Some(index);
    }

    pub fn current_image(&self) -> Option<u32> {
        self.current
    }

    pub fn images(&self) -> &[ResourceHandle] {
        &self.images
    }

    fn import_images(
        &mut self,
        backend: &mut VulkanBackend,
        swapchain: vk::SwapchainKHR,
        format: Format,
        extent: Extent2D,
    ) -> Result<()> {
        // SAFETY: swapchain belongs to this device.
        let raw = unsafe { self.loader.get_swapchain_images(swapchain) }.map_err(VulkanError::Swapchain)?;
        let desc = TextureDesc {
            extent,
            format,
        };
        for (i, image) in raw.into_iter().enumerate() {
            let handle = backend.import_image(
                image,
                desc,
                vk::ImageLayout::PRESENT_SRC_KHR,
                false,
                &format!("swapchain_{i}"),
            )?;
            self.images.push(handle);
        }
        while self.render_done.len() < self.images.len() {
            // SAFETY: device is valid.
            let semaphore = unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
                .map_err(VulkanError::SemaphoreCreation)?;
            self.render_done.push(semaphore);
        }
        self.swapchain = swapchain;
        debug!(images = self.images.len(), extent = %extent, format = ?format, "Swapchain imported");
        Ok(())
    }

    fn acquire(&mut self) -> std::result::Result<u32, VulkanError> {
        // SAFETY: swapchain and fence belong to this device; the fence is
        // unsignalled and waited on before reuse.
        unsafe {
            let (index, suboptimal) = self
                .loader
                .acquire_next_image(self.swapchain, u64::MAX, vk::Semaphore::null(), self.acquire_fence)
                .map_err(VulkanError::Swapchain)?;
            self.device
                .wait_for_fences(&[self.acquire_fence], true, u64::MAX)
                .map_err(VulkanError::FenceWait)?;
            self.device.reset_fences(&[self.acquire_fence]).map_err(VulkanError::FenceWait)?;
            if suboptimal {
                debug!(index, "Acquired suboptimal swapchain image");
            }
            Ok(index)
        }
    }
}

/// Dirty rectangles as incremental-present regions. Empty rectangles are
/// dropped; inverted ones are clamped to zero size.
pub fn present_rectangles(rects: &[Rect]) -> Vec<vk::RectLayerKHR> {
    rects
        .iter()
        .filter_map(|r| {
            let width = (r.right - r.left).max(0) as u32;
            let height = (r.bottom - r.top).max(0) as u32;
            (width > 0 && height > 0).then(|| {
                vk::RectLayerKHR::default()
                    .offset(vk::Offset2D { x: r.left, y: r.top })
                    .extent(vk::Extent2D { width, height })
                    .layer(0)
            })
        })
        .collect()
}

impl PresentBackend<VulkanBackend> for VulkanPresenter {
    fn api(&self) -> PresentApi {
        self.api
    }

    fn surface(&mut self, _compute: &mut VulkanBackend) -> Result<ResourceHandle> {
        let index = match self.current {
            Some(index) => index,
            None => {
                let index = self.acquire()?;
                self.current = Some(index);
                index
            }
        };
        self.images
            .get(index as usize)
            .copied()
            .ok_or_else(|| FrameGenError::Present(format!("swapchain image {index} not imported")))
    }

    fn present(
        &mut self,
        compute: &mut VulkanBackend,
        sync_interval: u32,
        flags: u32,
        params: Option<&PresentParameters>,
    ) -> Result<()> {
        let index = self
            .current
            .ok_or_else(|| FrameGenError::Present("no acquired swapchain image".into()))?;
        let semaphore = *self
            .render_done
            .get(index as usize)
            .ok_or_else(|| FrameGenError::Present(format!("swapchain image {index} not imported")))?;
        compute.submit_signalling(&[semaphore])?;
        // present mode is fixed at swapchain creation
        trace!(index, sync_interval, flags, "Present");

        let wait = [semaphore];
        let swapchains = [self.swapchain];
        let indices = [index];
        let mut present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let rectangles = match (self.api, params) {
            (PresentApi::Present1, Some(p)) if self.incremental_present && !p.dirty_rects.is_empty() => {
                present_rectangles(&p.dirty_rects)
            }
            _ => Vec::new(),
        };
        let region = [vk::PresentRegionKHR::default().rectangles(&rectangles)];
        let mut regions = vk::PresentRegionsKHR::default().regions(&region);
        if !rectangles.is_empty() {
            present_info = present_info.push_next(&mut regions);
        }

        self.current = None;
        // SAFETY: queue, swapchain and semaphore belong to this device; the
        // image was acquired and returned to PRESENT_SRC by the submission.
        match unsafe { self.loader.queue_present(compute.device().queue(), &present_info) } {
            Ok(false) => Ok(()),
            Ok(true) => {
                debug!(index, "Presented to suboptimal swapchain");
                Ok(())
            }
            Err(e) => Err(VulkanError::Swapchain(e).into()),
        }
    }
}

impl Drop for VulkanPresenter {
    fn drop(&mut self) {
        if !self.images.is_empty() {
            warn!(images = self.images.len(), "Presenter dropped without release");
        }
        // SAFETY: owned sync objects; waiting for the device covers pending
        // presents that still wait on the semaphores.
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!(error = %e, "Device wait failed while dropping presenter");
            }
            for semaphore in self.render_done.drain(..) {
                self.device.destroy_semaphore(semaphore, None);
            }
            self.device.destroy_fence(self.acquire_fence, None);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_rectangles() {
        let rects = [
            Rect {
                left: 10,
                top: 20,
                right: 110,
                bottom: 70,
            },
            Rect {
                left: 5,
                top: 5,
                right: 5,
                bottom: 50,
            },
            Rect {
                left: 50,
                top: 50,
                right: 40,
                bottom: 60,
            },
        ];
        let out = present_rectangles(&rects);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].offset, vk::Offset2D { x: 10, y: 20 });
        assert_eq!(out[0].extent, vk::Extent2D { width: 100, height: 50 });
        assert_eq!(out[0].layer, 0);
    }

    #[test]
    fn test_no_rectangles() {
        assert!(present_rectangles(&[]).is_empty());
    }
}
