//! Compositing Stage: synthesizes the interpolated frame.

use framegen_common::{Extent2D, FrameGenConfig, ResourceHandle};

use crate::backend::ComputeBackend;
use crate::error::Result;
use crate::kernels::{dispatch_kernel, Kernel, ResolveParams};
use crate::reprojection::MotionField;

/// Everything the resolve kernel samples, plus its output.
#[derive(Debug, Clone, Copy)]
pub struct CompositeInputs {
    pub extent: Extent2D,
    pub prev_color: ResourceHandle,
    pub prev_depth: ResourceHandle,
    pub curr_color: ResourceHandle,
    pub curr_depth: ResourceHandle,
    pub curr_mvec: ResourceHandle,
    pub ui: Option<ResourceHandle>,
    pub field: MotionField,
    pub generated: ResourceHandle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositingStage {
    pub tip_top_distance: f32,
    pub depth_tolerance: f32,
    pub ui_composite: bool,
}

impl CompositingStage {
    pub fn from_config(config: &FrameGenConfig) -> Self {
        Self {
            tip_top_distance: config.tip_top_distance,
            depth_tolerance: config.depth_tolerance,
            ui_composite: config.ui_composite,
        }
    }

    /// Single resolve dispatch writing `inputs.generated`.
    ///
    /// Without a UI buffer the hud-less colour fills the UI slot and the
    /// kernel skips the UI blend.
    pub fn composite<C: ComputeBackend>(&self, backend: &mut C, inputs: &CompositeInputs) -> Result<()> {
        let ui = inputs.ui.filter(|_| self.ui_composite);
        let reads = [
            inputs.prev_color,
            inputs.prev_depth,
            inputs.curr_color,
            inputs.curr_depth,
            inputs.curr_mvec,
            inputs.field.full,
            inputs.field.half_tip,
            inputs.field.half_top_filtered,
            ui.unwrap_or(inputs.curr_color),
        ];
        let params = ResolveParams::new(
            inputs.extent,
            self.tip_top_distance,
            self.depth_tolerance,
            ui.is_some(),
        );
        dispatch_kernel(backend, Kernel::Resolve, &reads, &[inputs.generated], &params, inputs.extent)
    }
}
