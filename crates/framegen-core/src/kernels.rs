//! Compute kernel catalogue.
//!
//! Every stage of the pipeline is expressed as one of these kernels. A kernel
//! is bound with an ordered list of read slots (sampled textures) and write
//! slots (storage images) plus a `#[repr(C)]` parameter block whose layout
//! matches the std140 uniform block of the GLSL kernels.
//!
//! Split accumulators hold `(priority << 16) | q` per pixel:
//! - `priority = 1 + round((1 - depth) * 65534)`; 0 marks an empty texel and a
//!   nearer surface wins the atomic max
//! - `q = clamp(round(component * 16) + 32768, 0, 65535)`

use bytemuck::{Pod, Zeroable};
use framegen_common::{CommonFrameConstants, Extent2D, Mat4, ResourceHandle};
use tracing::trace;

use crate::backend::ComputeBackend;
use crate::error::{FrameGenError, Result};

/// Work-group edge length of every kernel.
pub const TILE_SIZE: u32 = 8;

/// Motion value stored in texels that no reprojected sample reached.
pub const HOLE: [f32; 2] = [1.0e30, 1.0e30];

/// Sub-pixel precision of the split accumulators.
pub const COMPONENT_SCALE: f32 = 16.0;
const COMPONENT_BIAS: f32 = 32768.0;
const PRIORITY_RANGE: f32 = 65534.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Clear,
    Reproject,
    MergeHalf,
    MergeFull,
    FirstLeg,
    Pull,
    Push,
    LastStretch,
    Resolve,
}

impl Kernel {
    pub const ALL: [Kernel; 9] = [
        Kernel::Clear,
        Kernel::Reproject,
        Kernel::MergeHalf,
        Kernel::MergeFull,
        Kernel::FirstLeg,
        Kernel::Pull,
        Kernel::Push,
        Kernel::LastStretch,
        Kernel::Resolve,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Kernel::Clear => "clear",
            Kernel::Reproject => "reproject",
            Kernel::MergeHalf => "merge_half",
            Kernel::MergeFull => "merge_full",
            Kernel::FirstLeg => "first_leg",
            Kernel::Pull => "pull",
            Kernel::Push => "push",
            Kernel::LastStretch => "last_stretch",
            Kernel::Resolve => "resolve",
        }
    }

    /// Number of sampled-texture slots.
    pub fn read_slots(self) -> usize {
        match self {
            Kernel::Clear => 0,
            Kernel::Reproject => 3,
            Kernel::MergeHalf => 5,
            Kernel::MergeFull => 4,
            Kernel::FirstLeg => 1,
            Kernel::Pull => 2,
            Kernel::Push => 4,
            Kernel::LastStretch => 3,
            Kernel::Resolve => 9,
        }
    }

    /// Number of storage-image slots.
    pub fn write_slots(self) -> usize {
        match self {
            Kernel::Clear | Kernel::Reproject => 6,
            Kernel::MergeHalf | Kernel::FirstLeg | Kernel::Pull => 2,
            Kernel::MergeFull | Kernel::Push | Kernel::LastStretch | Kernel::Resolve => 1,
        }
    }

    /// Write slots that hold packed split accumulators (R32Uint, atomic max).
    pub fn writes_split(self) -> bool {
        matches!(self, Kernel::Clear | Kernel::Reproject)
    }

    /// Size of the parameter block the kernel expects.
    pub fn params_size(self) -> usize {
        match self {
            Kernel::Clear => std::mem::size_of::<ClearParams>(),
            Kernel::Reproject | Kernel::MergeHalf | Kernel::MergeFull => {
                std::mem::size_of::<ReprojectParams>()
            }
            Kernel::FirstLeg | Kernel::Pull | Kernel::Push | Kernel::LastStretch => {
                std::mem::size_of::<PushPullParams>()
            }
            Kernel::Resolve => std::mem::size_of::<ResolveParams>(),
        }
    }
}

impl std::fmt::Display for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================
// Parameter blocks
// ============================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ClearParams {
    pub dims: [u32; 2],
    pub tip_top_distance: [f32; 2],
    pub viewport_size: [f32; 2],
    pub viewport_inv: [f32; 2],
}

impl ClearParams {
    pub fn new(extent: Extent2D, tip_top_distance: f32) -> Self {
        let (size, inv) = viewport_terms(extent);
        Self {
            dims: [extent.width, extent.height],
            tip_top_distance: [tip_top_distance, tip_top_distance],
            viewport_size: size,
            viewport_inv: inv,
        }
    }
}

/// Shared by Reproject, MergeHalf and MergeFull.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ReprojectParams {
    pub prev_clip_to_clip: Mat4,
    pub clip_to_prev_clip: Mat4,
    pub dims: [u32; 2],
    pub tip_top_distance: [f32; 2],
    pub viewport_size: [f32; 2],
    pub viewport_inv: [f32; 2],
    pub depth_tolerance: f32,
    pub _pad: [f32; 3],
}

impl ReprojectParams {
    pub fn new(
        extent: Extent2D,
        constants: &CommonFrameConstants,
        tip_top_distance: f32,
        depth_tolerance: f32,
    ) -> Self {
        let (size, inv) = viewport_terms(extent);
        Self {
            prev_clip_to_clip: constants.prev_clip_to_clip,
            clip_to_prev_clip: constants.clip_to_prev_clip,
            dims: [extent.width, extent.height],
            tip_top_distance: [tip_top_distance, tip_top_distance],
            viewport_size: size,
            viewport_inv: inv,
            depth_tolerance,
            _pad: [0.0; 3],
        }
    }
}

/// Dimensions of the two pyramid levels a pull/push kernel works between.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PushPullParams {
    pub finer: [u32; 2],
    pub coarser: [u32; 2],
}

impl PushPullParams {
    pub fn new(finer: Extent2D, coarser: Extent2D) -> Self {
        Self {
            finer: [finer.width, finer.height],
            coarser: [coarser.width, coarser.height],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ResolveParams {
    pub dims: [u32; 2],
    pub tip_top_distance: [f32; 2],
    pub viewport_size: [f32; 2],
    pub viewport_inv: [f32; 2],
    pub depth_tolerance: f32,
    /// Non-zero when the UI slot holds a real UI buffer to composite.
    pub has_ui: u32,
    pub _pad: [u32; 2],
}

impl ResolveParams {
    pub fn new(extent: Extent2D, tip_top_distance: f32, depth_tolerance: f32, has_ui: bool) -> Self {
        let (size, inv) = viewport_terms(extent);
        Self {
            dims: [extent.width, extent.height],
            tip_top_distance: [tip_top_distance, tip_top_distance],
            viewport_size: size,
            viewport_inv: inv,
            depth_tolerance,
            has_ui: has_ui as u32,
            _pad: [0; 2],
        }
    }
}

fn viewport_terms(extent: Extent2D) -> ([f32; 2], [f32; 2]) {
    let w = extent.width.max(1) as f32;
    let h = extent.height.max(1) as f32;
    ([w, h], [1.0 / w, 1.0 / h])
}

/// Work-group counts covering `extent` with 8x8 tiles.
#[inline]
pub fn dispatch_groups(extent: Extent2D) -> [u32; 2] {
    [
        (extent.width + TILE_SIZE - 1) / TILE_SIZE,
        (extent.height + TILE_SIZE - 1) / TILE_SIZE,
    ]
}

/// Bind and dispatch `kernel` over an 8x8 grid covering `grid`.
pub fn dispatch_kernel<C: ComputeBackend + ?Sized, P: Pod>(
    backend: &mut C,
    kernel: Kernel,
    reads: &[ResourceHandle],
    writes: &[ResourceHandle],
    params: &P,
    grid: Extent2D,
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
    let groups = dispatch_groups(grid);
    trace!(kernel = kernel.name(), groups_x = groups[0], groups_y = groups[1], "Dispatch");
    backend.dispatch(kernel, reads, writes, bytemuck::bytes_of(params), groups)
}

// ============================================================
// Split accumulator encoding
// ============================================================

#[inline]
pub fn depth_to_priority(depth: f32) -> u32 {
    1 + ((1.0 - depth).clamp(0.0, 1.0) * PRIORITY_RANGE).round() as u32
}

/// Inverse of `depth_to_priority`, up to quantization.
#[inline]
pub fn priority_to_depth(priority: u32) -> f32 {
    1.0 - (priority.saturating_sub(1)) as f32 / PRIORITY_RANGE
}

#[inline]
pub fn encode_component(component: f32) -> u32 {
    (component * COMPONENT_SCALE + COMPONENT_BIAS).round().clamp(0.0, 65535.0) as u32
}

#[inline]
pub fn decode_component(q: u32) -> f32 {
    (q as f32 - COMPONENT_BIAS) / COMPONENT_SCALE
}

#[inline]
pub fn pack_split(priority: u32, component: f32) -> u32 {
    (priority << 16) | encode_component(component)
}

/// Returns `(priority, component)`. Priority 0 means the texel is empty.
#[inline]
pub fn unpack_split(packed: u32) -> (u32, f32) {
    (packed >> 16, decode_component(packed & 0xffff))
}

#[inline]
pub fn is_hole(v: [f32; 2]) -> bool {
    v[0] >= 1.0e29
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_block_sizes() {
        assert_eq!(std::mem::size_of::<ClearParams>(), 32);
        assert_eq!(std::mem::size_of::<ReprojectParams>(), 176);
        assert_eq!(std::mem::size_of::<PushPullParams>(), 16);
        assert_eq!(std::mem::size_of::<ResolveParams>(), 48);
    }

    #[test]
    fn test_dispatch_groups_round_up() {
        assert_eq!(dispatch_groups(Extent2D::new(1920, 1080)), [240, 135]);
        assert_eq!(dispatch_groups(Extent2D::new(129, 7)), [17, 1]);
        assert_eq!(dispatch_groups(Extent2D::new(0, 0)), [0, 0]);
    }

    #[test]
    fn test_split_encoding() {
        let packed = pack_split(depth_to_priority(0.25), -3.5);
        let (priority, component) = unpack_split(packed);
        assert_eq!(priority, depth_to_priority(0.25));
        assert_eq!(component, -3.5);
        assert!((priority_to_depth(priority) - 0.25).abs() < 1.0e-4);
    }

    #[test]
    fn test_nearer_surface_has_higher_priority() {
        assert!(depth_to_priority(0.1) > depth_to_priority(0.9));
        assert_eq!(depth_to_priority(1.0), 1);
        assert_eq!(depth_to_priority(0.0), 65535);
        // a far sample still beats an empty texel
        assert!(pack_split(depth_to_priority(1.0), 0.0) > 0);
    }

    #[test]
    fn test_component_clamps() {
        assert_eq!(encode_component(1.0e6), 65535);
        assert_eq!(encode_component(-1.0e6), 0);
        assert_eq!(decode_component(encode_component(0.0)), 0.0);
    }

    #[test]
    fn test_slot_counts() {
        assert_eq!(Kernel::Resolve.read_slots(), 9);
        assert_eq!(Kernel::Clear.write_slots(), 6);
        assert!(Kernel::Reproject.writes_split());
        assert!(!Kernel::MergeFull.writes_split());
        assert!(is_hole(HOLE));
        assert!(!is_hole([0.0, 0.0]));
    }
}
