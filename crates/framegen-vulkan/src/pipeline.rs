//! Compute pipelines for the kernel catalogue.
//!
//! Every kernel uses one descriptor set laid out as:
//! - bindings `0..reads`: combined image samplers (nearest, clamp)
//! - bindings `reads..reads + writes`: storage images
//! - binding `reads + writes`: the std140 parameter block
//!
//! SPIR-V is compiled by `build.rs` and embedded; an empty module means
//! glslc was missing at build time.

use std::collections::HashMap;
use std::io::Cursor;

use ash::vk;
use tracing::{debug, info};

use framegen_core::Kernel;

use crate::error::VulkanError;

macro_rules! spirv {
    ($name:literal) => {
        include_bytes!(concat!(env!("OUT_DIR"), "/spirv/", $name, ".comp.spv"))
    };
}

/// Embedded SPIR-V of `kernel`.
pub fn spirv(kernel: Kernel) -> &'static [u8] {
    match kernel {
        Kernel::Clear => spirv!("clear"),
        Kernel::Reproject => spirv!("reproject"),
        Kernel::MergeHalf => spirv!("merge_half"),
        Kernel::MergeFull => spirv!("merge_full"),
        Kernel::FirstLeg => spirv!("first_leg"),
        Kernel::Pull => spirv!("pull"),
        Kernel::Push => spirv!("push"),
        Kernel::LastStretch => spirv!("last_stretch"),
        Kernel::Resolve => spirv!("resolve"),
    }
}

/// Descriptor type of every binding of `kernel`, in binding order.
pub fn binding_types(kernel: Kernel) -> Vec<vk::DescriptorType> {
    let mut types = Vec::with_capacity(kernel.read_slots() + kernel.write_slots() + 1);
    types.extend(std::iter::repeat(vk::DescriptorType::COMBINED_IMAGE_SAMPLER).take(kernel.read_slots()));
    types.extend(std::iter::repeat(vk::DescriptorType::STORAGE_IMAGE).take(kernel.write_slots()));
    types.push(vk::DescriptorType::UNIFORM_BUFFER);
    types
}

/// Binding index of the parameter block.
#[inline]
pub fn params_binding(kernel: Kernel) -> u32 {
    (kernel.read_slots() + kernel.write_slots()) as u32
}

// ---------------------------------------------------------------------------
// ComputePipeline
// ---------------------------------------------------------------------------

/// One kernel's pipeline with its layouts. Destroyed in reverse creation order.
pub struct ComputePipeline {
    kernel: Kernel,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    descriptor_set_layout: vk::DescriptorSetLayout,
    device: ash::Device,
}

impl ComputePipeline {
    pub fn new(device: &ash::Device, kernel: Kernel) -> Result<Self, VulkanError> {
        let bytes = spirv(kernel);
        if bytes.is_empty() {
            return Err(VulkanError::MissingShader(kernel.name()));
        }
        let code =
            ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|_| VulkanError::InvalidSpirv(kernel.name()))?;

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = binding_types(kernel)
            .into_iter()
            .enumerate()
            .map(|(i, ty)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(i as u32)
                    .descriptor_type(ty)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        // SAFETY: device is valid; bindings outlive the call.
        let descriptor_set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(VulkanError::PipelineCreation)?;

        let set_layouts = [descriptor_set_layout];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        // SAFETY: set layout was just created on this device.
        let pipeline_layout = match unsafe { device.create_pipeline_layout(&pipeline_layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                // SAFETY: unused layout.
                unsafe { device.destroy_descriptor_set_layout(descriptor_set_layout, None) };
                return Err(VulkanError::PipelineCreation(e));
            }
        };

        let module_info = vk::ShaderModuleCreateInfo::default().code(&code);
        // SAFETY: code is validated SPIR-V words.
        let module = match unsafe { device.create_shader_module(&module_info, None) } {
            Ok(module) => module,
            Err(e) => {
                // SAFETY: unused layouts.
                unsafe {
                    device.destroy_pipeline_layout(pipeline_layout, None);
                    device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                }
                return Err(VulkanError::ShaderCreation(e));
            }
        };

        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main");
        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage_info)
            .layout(pipeline_layout);

        // SAFETY: module and layout are valid; the module may be destroyed
        // once the pipeline exists.
        let created = unsafe {
            let created = device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None);
            device.destroy_shader_module(module, None);
            created
        };
        let pipeline = match created {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                // SAFETY: unused layouts.
                unsafe {
                    device.destroy_pipeline_layout(pipeline_layout, None);
                    device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                }
                return Err(VulkanError::PipelineCreation(e));
            }
        };

        debug!(kernel = kernel.name(), bindings = bindings.len(), "Created compute pipeline");

        Ok(Self {
            kernel,
            pipeline,
            pipeline_layout,
            descriptor_set_layout,
            device: device.clone(),
        })
    }

    #[inline]
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    #[inline]
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    #[inline]
    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.descriptor_set_layout
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        // SAFETY: owned objects; the backend waits for the queue before
        // dropping its pipelines.
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }
        debug!(kernel = self.kernel.name(), "Destroyed compute pipeline");
    }
}

/// Every kernel's pipeline plus the shared nearest-clamp sampler.
pub struct KernelPipelines {
    pipelines: HashMap<Kernel, ComputePipeline>,
    sampler: vk::Sampler,
    device: ash::Device,
}

impl KernelPipelines {
    pub fn new(device: &ash::Device) -> Result<Self, VulkanError> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(0.0);
        // SAFETY: device is valid.
        let sampler = unsafe { device.create_sampler(&sampler_info, None) }.map_err(VulkanError::SamplerCreation)?;

        let mut this = Self {
            pipelines: HashMap::with_capacity(Kernel::ALL.len()),
            sampler,
            device: device.clone(),
        };
        for kernel in Kernel::ALL {
            // on error `this` drops the sampler and the pipelines built so far
            this.pipelines.insert(kernel, ComputePipeline::new(device, kernel)?);
        }
        info!(kernels = Kernel::ALL.len(), "Frame generation pipelines ready");
        Ok(this)
    }

    pub fn get(&self, kernel: Kernel) -> Option<&ComputePipeline> {
        self.pipelines.get(&kernel)
    }

    #[inline]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for KernelPipelines {
    fn drop(&mut self) {
        self.pipelines.clear();
        // SAFETY: owned sampler, no longer referenced by pending work.
        unsafe { self.device.destroy_sampler(self.sampler, None) };
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
