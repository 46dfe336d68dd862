//! Vulkan-specific error types.

use framegen_common::Format;
use framegen_core::FrameGenError;
use thiserror::Error;

/// Errors from the Vulkan backend.
#[derive(Error, Debug)]
pub enum VulkanError {
    #[error("Shader module {0} was built empty (glslc unavailable at build time)")]
    MissingShader(&'static str),

    #[error("Shader module creation failed: {0}")]
    ShaderCreation(ash::vk::Result),

    #[error("Invalid SPIR-V in {0}")]
    InvalidSpirv(&'static str),

    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(ash::vk::Result),

    #[error("Descriptor pool creation failed: {0}")]
    DescriptorPoolCreation(ash::vk::Result),

    #[error("Descriptor set allocation failed: {0}")]
    DescriptorAllocation(ash::vk::Result),

    #[error("Sampler creation failed: {0}")]
    SamplerCreation(ash::vk::Result),

    #[error("Buffer creation failed: {0}")]
    BufferCreation(ash::vk::Result),

    #[error("Image creation failed: {0}")]
    ImageCreation(ash::vk::Result),

    #[error("Image view creation failed: {0}")]
    ImageViewCreation(ash::vk::Result),

    #[error("Memory allocation failed: {0}")]
    MemoryAllocation(String),

    #[error("Command pool creation failed: {0}")]
    CommandPoolCreation(ash::vk::Result),

    #[error("Command buffer allocation failed: {0}")]
    CommandBufferAllocation(ash::vk::Result),

    #[error("Command buffer recording failed: {0}")]
    CommandBufferRecording(ash::vk::Result),

    #[error("Fence creation failed: {0}")]
    FenceCreation(ash::vk::Result),

    #[error("Semaphore creation failed: {0}")]
    SemaphoreCreation(ash::vk::Result),

    #[error("Fence wait failed: {0}")]
    FenceWait(ash::vk::Result),

    #[error("Queue submit failed: {0}")]
    QueueSubmit(ash::vk::Result),

    #[error("Swapchain operation failed: {0}")]
    Swapchain(ash::vk::Result),

    #[error("Format {0:?} has no Vulkan equivalent")]
    UnsupportedFormat(Format),

    #[error("Uniform ring exhausted ({0} bytes)")]
    UniformRingExhausted(u64),
}

impl From<VulkanError> for FrameGenError {
    fn from(err: VulkanError) -> Self {
        match err {
            VulkanError::MissingShader(_) | VulkanError::InvalidSpirv(_) => {
                FrameGenError::Unsupported(err.to_string())
            }
            VulkanError::Swapchain(_) => FrameGenError::Present(err.to_string()),
            other => FrameGenError::Backend(other.to_string()),
        }
    }
}
