//! Command recording and submission.
//!
//! The backend rotates through `FRAMES_IN_FLIGHT` command contexts, one per
//! submission. Reusing a context first waits on its fence, so its command
//! buffer, descriptor sets and uniform ring are free to overwrite.

use ash::vk;
use tracing::trace;

use crate::device::VulkanDevice;
use crate::error::VulkanError;
use crate::memory::{SharedAllocator, UniformRing};

pub const FRAMES_IN_FLIGHT: usize = 2;

/// Parameter bytes one context can hold; a frame needs about a dozen blocks.
const UNIFORM_RING_SIZE: u64 = 64 * 1024;
const MAX_SETS: u32 = 64;
const MAX_SAMPLED_PER_SET: u32 = 9;
const MAX_STORAGE_PER_SET: u32 = 6;

pub struct CommandContext {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    fence: vk::Fence,
    descriptor_pool: vk::DescriptorPool,
    uniforms: UniformRing,
    recording: bool,
    submitted: bool,
    device: ash::Device,
}

impl CommandContext {
    pub fn new(device: &VulkanDevice, allocator: &SharedAllocator) -> Result<Self, VulkanError> {
        let vk_device = device.device();
        let uniforms = UniformRing::new(device, allocator, UNIFORM_RING_SIZE)?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_family_index())
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        // SAFETY: device is valid.
        let pool = unsafe { vk_device.create_command_pool(&pool_info, None) }
            .map_err(VulkanError::CommandPoolCreation)?;

        let mut this = Self {
            pool,
            buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            uniforms,
            recording: false,
            submitted: false,
            device: vk_device.clone(),
        };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        // SAFETY: pool was created above.
        this.buffer = unsafe { vk_device.allocate_command_buffers(&alloc_info) }
            .map_err(VulkanError::CommandBufferAllocation)?[0];

        // SAFETY: device is valid.
        this.fence = unsafe { vk_device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(VulkanError::FenceCreation)?;

        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(MAX_SETS * MAX_SAMPLED_PER_SET),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(MAX_SETS * MAX_STORAGE_PER_SET),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(MAX_SETS),
        ];
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(MAX_SETS);
        // SAFETY: device is valid.
        this.descriptor_pool = unsafe { vk_device.create_descriptor_pool(&descriptor_pool_info, None) }
            .map_err(VulkanError::DescriptorPoolCreation)?;

        Ok(this)
    }

    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Block until the last submission of this context retired.
    pub fn wait(&mut self) -> Result<(), VulkanError> {
        if self.submitted {
            // SAFETY: the fence belongs to this device and was submitted.
            unsafe {
                self.device
                    .wait_for_fences(&[self.fence], true, u64::MAX)
                    .map_err(VulkanError::FenceWait)?;
                self.device.reset_fences(&[self.fence]).map_err(VulkanError::FenceWait)?;
            }
            self.submitted = false;
        }
        Ok(())
    }

    /// Wait for the previous use, recycle everything and start recording.
    pub fn begin(&mut self) -> Result<(), VulkanError> {
        self.wait()?;
        // SAFETY: nothing allocated from these pools is pending any more.
        unsafe {
            self.device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .map_err(VulkanError::CommandBufferRecording)?;
            self.device
                .reset_descriptor_pool(self.descriptor_pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(VulkanError::DescriptorAllocation)?;
            self.device
                .begin_command_buffer(
                    self.buffer,
                    &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .map_err(VulkanError::CommandBufferRecording)?;
        }
        self.uniforms.reset();
        self.recording = true;
        Ok(())
    }

    /// End recording and submit, signalling `signal` on completion.
    pub fn submit(&mut self, queue: vk::Queue, signal: &[vk::Semaphore]) -> Result<(), VulkanError> {
        if !self.recording {
            return Ok(());
        }
        self.recording = false;
        // SAFETY: command buffer is in the recording state.
        unsafe { self.device.end_command_buffer(self.buffer) }.map_err(VulkanError::CommandBufferRecording)?;

        let buffers = [self.buffer];
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&buffers)
            .signal_semaphores(signal);
        // SAFETY: the queue belongs to this device; the fence is unsignalled.
        unsafe { self.device.queue_submit(queue, &[submit_info], self.fence) }.map_err(VulkanError::QueueSubmit)?;
        self.submitted = true;
        trace!(signal = signal.len(), "Submitted frame generation commands");
        Ok(())
    }

    pub fn allocate_set(&mut self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet, VulkanError> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        // SAFETY: pool and layout are valid.
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(VulkanError::DescriptorAllocation)?;
        Ok(sets[0])
    }

    /// Stage a parameter block; returns its offset in `uniform_buffer()`.
    pub fn push_uniforms(&mut self, bytes: &[u8]) -> Result<u64, VulkanError> {
        self.uniforms.push(bytes)
    }

    #[inline]
    pub fn uniform_buffer(&self) -> vk::Buffer {
        self.uniforms.buffer()
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        if let Err(e) = self.wait() {
            tracing::warn!(error = %e, "Fence wait failed while dropping command context");
        }
        // SAFETY: owned objects; pending work has retired. Null handles are
        // ignored by the destroy calls.
        unsafe {
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

// ---------------------------------------------------------------------------
// Barriers
// ---------------------------------------------------------------------------

/// Make every prior write visible to every later command.
///
/// Kernels and copies of one submission are strictly ordered; the barrier
/// is the same between any pair of them.
pub fn full_barrier(device: &ash::Device, cb: vk::CommandBuffer) {
    let memory_barrier = vk::MemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
        .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);
    // SAFETY: command buffer is recording.
    unsafe {
        device.cmd_pipeline_barrier(
            cb,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::DependencyFlags::empty(),
            &[memory_barrier],
            &[],
            &[],
        );
    }
}

/// Move `image` between layouts, waiting for all prior work.
pub fn transition(
    device: &ash::Device,
    cb: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
        .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range);
    // SAFETY: command buffer is recording; image is valid.
    unsafe {
        device.cmd_pipeline_barrier(
            cb,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}
