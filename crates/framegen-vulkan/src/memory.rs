//! Images and uniform memory backed by `gpu-allocator`.
//!
//! - `GpuImage`: a pipeline texture, either allocated here or imported from
//!   the host (tagged buffers, swapchain images). Dropping it destroys what
//!   this crate owns and nothing else.
//! - `UniformRing`: host-visible buffer the parameter blocks of one command
//!   buffer are bump-allocated from.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use framegen_common::{Format, TextureDesc};

use crate::device::VulkanDevice;
use crate::error::VulkanError;
use crate::format;

/// `Allocator` needs `&mut self`; images are created from several owners.
pub type SharedAllocator = Arc<Mutex<Allocator>>;

pub fn create_allocator(device: &VulkanDevice) -> Result<SharedAllocator, VulkanError> {
    let mut debug_settings = gpu_allocator::AllocatorDebugSettings::default();
    debug_settings.log_leaks_on_shutdown = true;
    let allocator_desc = gpu_allocator::vulkan::AllocatorCreateDesc {
        instance: device.instance().clone(),
        device: device.device().clone(),
        physical_device: device.physical_device(),
        debug_settings,
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    };

    let allocator =
        Allocator::new(&allocator_desc).map_err(|e| VulkanError::MemoryAllocation(e.to_string()))?;

    info!("Frame generation allocator created");
    Ok(Arc::new(Mutex::new(allocator)))
}

/// Who destroys the `vk::Image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    /// Host image; returned to `home_layout` at the end of every submission.
    Imported { home_layout: vk::ImageLayout },
}

pub struct GpuImage {
    /// What the pipeline asked for.
    desc: TextureDesc,
    /// What was actually allocated; differs from `desc.format` only for
    /// storage fallbacks.
    actual_format: Format,
    image: vk::Image,
    view: vk::ImageView,
    storage: bool,
    allocation: Option<Allocation>,
    ownership: Ownership,
    device: ash::Device,
    allocator: SharedAllocator,
    name: String,
}

impl GpuImage {
    /// Allocate a device-local image usable by every kernel slot.
    pub fn new(
        device: &VulkanDevice,
        allocator: &SharedAllocator,
        desc: TextureDesc,
        name: &str,
    ) -> Result<Self, VulkanError> {
        let mut actual_format = desc.format;
        if !desc.format.is_depth() && !device.supports_storage(actual_format) {
            actual_format = format::storage_fallback(actual_format);
        }
        let storage = !actual_format.is_depth() && device.supports_storage(actual_format);

        let mut usage = vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        if storage {
            usage |= vk::ImageUsageFlags::STORAGE;
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format::to_vk(actual_format))
            .extent(vk::Extent3D {
                width: desc.extent.width.max(1),
                height: desc.extent.height.max(1),
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let vk_device = device.device();
        // SAFETY: device is valid and image_info is fully initialized.
        let image = unsafe { vk_device.create_image(&image_info, None) }
            .map_err(VulkanError::ImageCreation)?;

        // SAFETY: image was just created on this device.
        let requirements = unsafe { vk_device.get_image_memory_requirements(image) };

        let allocation = allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                // SAFETY: image is unbound and unused.
                unsafe { vk_device.destroy_image(image, None) };
                VulkanError::MemoryAllocation(e.to_string())
            })?;

        // SAFETY: allocation satisfies the image's requirements; memory()
        // and offset() name the backing VkDeviceMemory range.
        let bound = unsafe { vk_device.bind_image_memory(image, allocation.memory(), allocation.offset()) };
        let view = bound
            .map_err(VulkanError::ImageCreation)
            .and_then(|()| create_view(vk_device, image, actual_format));
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                if let Err(free) = allocator.lock().free(allocation) {
                    warn!(error = %free, "Failed to free image allocation");
                }
                // SAFETY: image never reached a command buffer.
                unsafe { vk_device.destroy_image(image, None) };
                return Err(e);
            }
        };

        debug!(
            name,
            extent = %desc.extent,
            format = ?desc.format,
            actual = ?actual_format,
            "Allocated image"
        );

        Ok(Self {
            desc,
            actual_format,
            image,
            view,
            storage,
            allocation: Some(allocation),
            ownership: Ownership::Owned,
            device: vk_device.clone(),
            allocator: Arc::clone(allocator),
            name: name.to_string(),
        })
    }

    /// Wrap a host image. Only the view is owned.
    pub fn import(
        device: &VulkanDevice,
        allocator: &SharedAllocator,
        image: vk::Image,
        desc: TextureDesc,
        home_layout: vk::ImageLayout,
        storage: bool,
        name: &str,
    ) -> Result<Self, VulkanError> {
        let view = create_view(device.device(), image, desc.format)?;
        Ok(Self {
            desc,
            actual_format: desc.format,
            image,
            view,
            storage,
            allocation: None,
            ownership: Ownership::Imported { home_layout },
            device: device.device().clone(),
            allocator: Arc::clone(allocator),
            name: name.to_string(),
        })
    }

    #[inline]
    pub fn desc(&self) -> TextureDesc {
        self.desc
    }

    #[inline]
    pub fn actual_format(&self) -> Format {
        self.actual_format
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Whether the image can be bound to a write slot.
    #[inline]
    pub fn storage(&self) -> bool {
        self.storage
    }

    #[inline]
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(format::copy_aspect(self.actual_format))
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1)
    }

    pub fn subresource_layers(&self) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers::default()
            .aspect_mask(format::copy_aspect(self.actual_format))
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1)
    }
}

fn create_view(device: &ash::Device, image: vk::Image, fmt: Format) -> Result<vk::ImageView, VulkanError> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format::to_vk(fmt))
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(format::view_aspect(fmt))
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );
    // SAFETY: image is a valid image of a compatible format.
    unsafe { device.create_image_view(&view_info, None) }.map_err(VulkanError::ImageViewCreation)
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        // SAFETY: the release queue only hands images back once no pending
        // submission references them.
        unsafe { self.device.destroy_image_view(self.view, None) };
        if self.ownership == Ownership::Owned {
            if let Some(allocation) = self.allocation.take() {
                if let Err(e) = self.allocator.lock().free(allocation) {
                    warn!(name = %self.name, error = %e, "Failed to free image allocation");
                }
            }
            // SAFETY: as above; the image is ours.
            unsafe { self.device.destroy_image(self.image, None) };
        }
        debug!(name = %self.name, "Released image");
    }
}

// ---------------------------------------------------------------------------
// UniformRing
// ---------------------------------------------------------------------------

/// Round `offset` up to `alignment` (a power of two, or any non-zero value).
#[inline]
pub fn align_up(offset: u64, alignment: u64) -> u64 {
    let a = alignment.max(1);
    offset.div_ceil(a) * a
}

pub struct UniformRing {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
    cursor: u64,
    alignment: u64,
    device: ash::Device,
    allocator: SharedAllocator,
}

impl UniformRing {
    pub fn new(device: &VulkanDevice, allocator: &SharedAllocator, size: u64) -> Result<Self, VulkanError> {
        let vk_device = device.device();
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: device is valid and buffer_info is fully initialized.
        let buffer = unsafe { vk_device.create_buffer(&buffer_info, None) }
            .map_err(VulkanError::BufferCreation)?;
        // SAFETY: buffer was just created on this device.
        let requirements = unsafe { vk_device.get_buffer_memory_requirements(buffer) };

        let allocation = allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: "framegen_uniforms",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                // SAFETY: buffer is unbound and unused.
                unsafe { vk_device.destroy_buffer(buffer, None) };
                VulkanError::MemoryAllocation(e.to_string())
            })?;

        // SAFETY: allocation satisfies the buffer's requirements.
        if let Err(e) = unsafe { vk_device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) } {
            if let Err(free) = allocator.lock().free(allocation) {
                warn!(error = %free, "Failed to free uniform allocation");
            }
            // SAFETY: buffer never reached a command buffer.
            unsafe { vk_device.destroy_buffer(buffer, None) };
            return Err(VulkanError::BufferCreation(e));
        }

        Ok(Self {
            buffer,
            allocation: Some(allocation),
            size,
            cursor: 0,
            alignment: device.min_uniform_offset_alignment(),
            device: vk_device.clone(),
            allocator: Arc::clone(allocator),
        })
    }

    #[inline]
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    /// Start over; the previous contents must no longer be in use.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Copy `bytes` in and return their offset.
    pub fn push(&mut self, bytes: &[u8]) -> Result<u64, VulkanError> {
        let offset = align_up(self.cursor, self.alignment);
        let end = offset + bytes.len() as u64;
        if end > self.size {
            return Err(VulkanError::UniformRingExhausted(self.size));
        }
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| VulkanError::MemoryAllocation("uniform ring is not host mapped".into()))?;
        mapped[offset as usize..end as usize].copy_from_slice(bytes);
        self.cursor = end;
        Ok(offset)
    }
}

impl Drop for UniformRing {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.allocator.lock().free(allocation) {
                warn!(error = %e, "Failed to free uniform allocation");
            }
        }
        // SAFETY: owned buffer; callers wait for the device before dropping.
        unsafe { self.device.destroy_buffer(self.buffer, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 64), 320);
        assert_eq!(align_up(7, 0), 7);
    }
}
