//! The host's Vulkan device, as seen by the frame generator.
//!
//! The frame generator never creates an instance or device of its own; it
//! records into the host's queue. `VulkanDevice` keeps the handles plus the
//! capability queries the backend needs at startup.

use ash::vk;
use tracing::{debug, info};

use framegen_common::Format;

use crate::format;

/// Host-provided device handles.
#[derive(Clone)]
pub struct VulkanDevice {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    queue_family_index: u32,
    limits: vk::PhysicalDeviceLimits,
}

impl VulkanDevice {
    /// Wrap the host's device. `queue` must belong to `queue_family_index`
    /// and support compute.
    pub fn new(
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family_index: u32,
        queue: vk::Queue,
    ) -> Self {
        // SAFETY: instance and physical device are valid host handles.
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(
            device = %name,
            api = %format!(
                "{}.{}",
                vk::api_version_major(properties.api_version),
                vk::api_version_minor(properties.api_version)
            ),
            queue_family = queue_family_index,
            "Frame generation attached to Vulkan device"
        );
        Self {
            instance,
            physical_device,
            device,
            queue,
            queue_family_index,
            limits: properties.limits,
        }
    }

    #[inline]
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn min_uniform_offset_alignment(&self) -> u64 {
        self.limits.min_uniform_buffer_offset_alignment.max(1)
    }

    pub fn format_features(&self, format: Format) -> vk::FormatFeatureFlags {
        // SAFETY: valid physical device; the query has no side effects.
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format::to_vk(format))
                .optimal_tiling_features
        }
    }

    pub fn supports_storage(&self, format: Format) -> bool {
        self.format_features(format).contains(vk::FormatFeatureFlags::STORAGE_IMAGE)
    }

    /// Every capability the kernels rely on.
    pub fn supports_frame_generation(&self) -> bool {
        // SAFETY: valid physical device; the query has no side effects.
        let features = unsafe { self.instance.get_physical_device_features(self.physical_device) };
        let write_without_format = features.shader_storage_image_write_without_format == vk::TRUE;
        let split_atomics = self
            .format_features(Format::R32Uint)
            .contains(vk::FormatFeatureFlags::STORAGE_IMAGE_ATOMIC);
        let motion = self.supports_storage(Format::Rg32Float);
        let reliability = self.supports_storage(Format::R32Float);
        debug!(
            write_without_format,
            split_atomics, motion, reliability, "Frame generation capability check"
        );
        write_without_format && split_atomics && motion && reliability
    }
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("physical_device", &self.physical_device)
            .field("queue", &self.queue)
            .field("queue_family_index", &self.queue_family_index)
            .finish_non_exhaustive()
    }
}
