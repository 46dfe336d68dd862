//! Vulkan backend for the frame generation pipeline.
//!
//! Runs the kernel catalogue as GLSL compute shaders on the host's queue:
//! - `VulkanBackend` implements `ComputeBackend` (images, copies, dispatch)
//! - `VulkanPresenter` implements `PresentBackend` over a host swapchain
//! - `VulkanDevice` carries the host's instance, device and queue
//!
//! Shaders are compiled at build time by glslc and embedded as SPIR-V.

pub mod backend;
pub mod commands;
pub mod device;
pub mod error;
pub mod format;
pub mod memory;
pub mod pipeline;
pub mod presenter;

pub use backend::VulkanBackend;
pub use device::VulkanDevice;
pub use error::VulkanError;
pub use presenter::VulkanPresenter;
