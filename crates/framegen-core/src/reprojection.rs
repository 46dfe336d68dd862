//! Reprojection & Reliability-Pyramid Engine.
//!
//! Turns the sparse current-frame motion vectors into a dense motion field at
//! the interpolated time position:
//! - clear the split accumulators
//! - reproject every pixel into them (full, tip and top positions)
//! - merge the split X/Y channels into full, half-tip and half-top buffers
//! - pull the half-top buffer down the reliability pyramid and push it back
//!   up, filling holes with coarse estimates

use framegen_common::{CommonFrameConstants, Extent2D, FrameGenConfig, ResourceHandle};
use tracing::trace;

use crate::backend::ComputeBackend;
use crate::error::Result;
use crate::kernels::{dispatch_kernel, ClearParams, Kernel, PushPullParams, ReprojectParams};
use crate::pyramid::{PyramidBuffer, ResourcePyramid, PYRAMID_LEVELS};

/// Current-frame inputs of one reprojection pass.
#[derive(Debug, Clone, Copy)]
pub struct ReprojectionInputs {
    /// Output resolution; every full-size buffer has this extent.
    pub extent: Extent2D,
    pub curr_mvec: ResourceHandle,
    pub curr_depth: ResourceHandle,
    pub prev_depth: ResourceHandle,
    pub constants: CommonFrameConstants,
}

/// Dense motion buffers handed to the compositing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionField {
    pub full: ResourceHandle,
    pub half_tip: ResourceHandle,
    /// Hole-filled half-top buffer, or the raw half-top buffer with no pyramid.
    pub half_top_filtered: ResourceHandle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReprojectionEngine {
    /// Pull/push depth, 0..=PYRAMID_LEVELS.
    pub layers: u32,
    pub tip_top_distance: f32,
    pub depth_tolerance: f32,
}

impl ReprojectionEngine {
    pub fn from_config(config: &FrameGenConfig) -> Self {
        Self {
            layers: config.pyramid_layers.min(PYRAMID_LEVELS),
            tip_top_distance: config.tip_top_distance,
            depth_tolerance: config.depth_tolerance,
        }
    }

    /// Run every stage and return the resulting motion field.
    pub fn run<C: ComputeBackend>(
        &self,
        backend: &mut C,
        pyramid: &ResourcePyramid,
        inputs: &ReprojectionInputs,
    ) -> Result<MotionField> {
        self.clear(backend, pyramid, inputs.extent)?;
        self.reproject(backend, pyramid, inputs)?;
        self.merge(backend, pyramid, inputs)?;

        let half_top = pyramid.handle(PyramidBuffer::HalfTop)?;
        let filtered = pyramid.handle(PyramidBuffer::HalfTopFiltered)?;
        let half_top_filtered = self.pull_push(backend, pyramid, half_top, filtered, inputs.extent)?;

        Ok(MotionField {
            full: pyramid.handle(PyramidBuffer::Full)?,
            half_tip: pyramid.handle(PyramidBuffer::HalfTip)?,
            half_top_filtered,
        })
    }

    fn split_handles(pyramid: &ResourcePyramid) -> Result<Vec<ResourceHandle>> {
        PyramidBuffer::SPLIT.iter().map(|&b| pyramid.handle(b)).collect()
    }

    /// Zero the six split accumulators.
    pub fn clear<C: ComputeBackend>(
        &self,
        backend: &mut C,
        pyramid: &ResourcePyramid,
        extent: Extent2D,
    ) -> Result<()> {
        let writes = Self::split_handles(pyramid)?;
        let params = ClearParams::new(extent, self.tip_top_distance);
        dispatch_kernel(backend, Kernel::Clear, &[], &writes, &params, extent)
    }

    /// Scatter current motion into the split accumulators.
    pub fn reproject<C: ComputeBackend>(
        &self,
        backend: &mut C,
        pyramid: &ResourcePyramid,
        inputs: &ReprojectionInputs,
    ) -> Result<()> {
        let writes = Self::split_handles(pyramid)?;
        let reads = [inputs.curr_mvec, inputs.prev_depth, inputs.curr_depth];
        let params = self.reproject_params(inputs);
        dispatch_kernel(backend, Kernel::Reproject, &reads, &writes, &params, inputs.extent)
    }

    /// Resolve the split accumulators into half-tip, half-top and full buffers.
    pub fn merge<C: ComputeBackend>(
        &self,
        backend: &mut C,
        pyramid: &ResourcePyramid,
        inputs: &ReprojectionInputs,
    ) -> Result<()> {
        let params = self.reproject_params(inputs);

        let reads = [
            pyramid.handle(PyramidBuffer::TipX)?,
            pyramid.handle(PyramidBuffer::TipY)?,
            pyramid.handle(PyramidBuffer::TopX)?,
            pyramid.handle(PyramidBuffer::TopY)?,
            inputs.curr_mvec,
        ];
        let writes = [
            pyramid.handle(PyramidBuffer::HalfTip)?,
            pyramid.handle(PyramidBuffer::HalfTop)?,
        ];
        dispatch_kernel(backend, Kernel::MergeHalf, &reads, &writes, &params, inputs.extent)?;

        let reads = [
            pyramid.handle(PyramidBuffer::FullX)?,
            pyramid.handle(PyramidBuffer::FullY)?,
            inputs.curr_mvec,
            inputs.prev_depth,
        ];
        let writes = [pyramid.handle(PyramidBuffer::Full)?];
        dispatch_kernel(backend, Kernel::MergeFull, &reads, &writes, &params, inputs.extent)
    }

    /// Fill holes of `input` through the reliability pyramid.
    ///
    /// Returns the buffer holding the result: `output`, or `input` itself when
    /// `layers == 0`, in which case no pyramid level is touched.
    pub fn pull_push<C: ComputeBackend>(
        &self,
        backend: &mut C,
        pyramid: &ResourcePyramid,
        input: ResourceHandle,
        output: ResourceHandle,
        extent: Extent2D,
    ) -> Result<ResourceHandle> {
        let layers = self.layers.min(PYRAMID_LEVELS);
        if layers == 0 {
            return Ok(input);
        }
        trace!(layers, "Pull/push");

        let lv = |l: u32| extent.level(l);
        let mv1 = pyramid.handle(PyramidBuffer::MotionVectorLv1)?;
        let mv2 = pyramid.handle(PyramidBuffer::MotionVectorLv2)?;
        let mv3 = pyramid.handle(PyramidBuffer::MotionVectorLv3)?;
        let rel1 = pyramid.handle(PyramidBuffer::ReliabilityLv1)?;
        let rel2 = pyramid.handle(PyramidBuffer::ReliabilityLv2)?;
        let rel3 = pyramid.handle(PyramidBuffer::ReliabilityLv3)?;
        let pushed1 = pyramid.handle(PyramidBuffer::PushedLv1)?;
        let pushed2 = pyramid.handle(PyramidBuffer::PushedLv2)?;

        dispatch_kernel(
            backend,
            Kernel::FirstLeg,
            &[input],
            &[mv1, rel1],
            &PushPullParams::new(extent, lv(1)),
            lv(1),
        )?;
        if layers >= 2 {
            dispatch_kernel(
                backend,
                Kernel::Pull,
                &[mv1, rel1],
                &[mv2, rel2],
                &PushPullParams::new(lv(1), lv(2)),
                lv(2),
            )?;
        }
        if layers >= 3 {
            dispatch_kernel(
                backend,
                Kernel::Pull,
                &[mv2, rel2],
                &[mv3, rel3],
                &PushPullParams::new(lv(2), lv(3)),
                lv(3),
            )?;
            dispatch_kernel(
                backend,
                Kernel::Push,
                &[mv2, mv3, rel2, rel3],
                &[pushed2],
                &PushPullParams::new(lv(2), lv(3)),
                lv(2),
            )?;
        }
        if layers >= 2 {
            let coarse = if layers >= 3 { pushed2 } else { mv2 };
            dispatch_kernel(
                backend,
                Kernel::Push,
                &[mv1, coarse, rel1, rel2],
                &[pushed1],
                &PushPullParams::new(lv(1), lv(2)),
                lv(1),
            )?;
        }

        let finest = if layers >= 2 { pushed1 } else { mv1 };
        dispatch_kernel(
            backend,
            Kernel::LastStretch,
            &[input, finest, rel1],
            &[output],
            &PushPullParams::new(extent, lv(1)),
            extent,
        )?;
        Ok(output)
    }

    fn reproject_params(&self, inputs: &ReprojectionInputs) -> ReprojectParams {
        ReprojectParams::new(
            inputs.extent,
            &inputs.constants,
            self.tip_top_distance,
            self.depth_tolerance,
        )
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{dispatch_groups, is_hole};
    use crate::software::{Event, SoftwareBackend};
    use framegen_common::{Format, Status, TextureDesc};

    struct Scene {
        backend: SoftwareBackend,
        pyramid: ResourcePyramid,
        inputs: ReprojectionInputs,
    }

    /// Constant motion `mv` and constant depth over a `w`x`h` output.
    fn scene(w: u32, h: u32, mv: [f32; 2], depth: f32) -> Scene {
        let mut backend = SoftwareBackend::new();
        let mut pyramid = ResourcePyramid::new();
        let extent = Extent2D::new(w, h);
        let mut status = Status::empty();
        pyramid
            .ensure_resources(&mut backend, extent, Format::Rgba8Unorm, 0, &mut status, 0)
            .unwrap();

        let curr_mvec = backend.create_texture(TextureDesc::new(w, h, Format::Rg32Float), "mvec").unwrap();
        let curr_depth = backend.create_texture(TextureDesc::new(w, h, Format::D32Float), "depth").unwrap();
        let prev_depth = backend.create_texture(TextureDesc::new(w, h, Format::D32Float), "prev depth").unwrap();
        backend.fill(curr_mvec, [mv[0], mv[1], 0.0, 0.0]).unwrap();
        backend.fill(curr_depth, [depth, 0.0, 0.0, 0.0]).unwrap();
        backend.fill(prev_depth, [depth, 0.0, 0.0, 0.0]).unwrap();

        Scene {
            backend,
            pyramid,
            inputs: ReprojectionInputs {
                extent,
                curr_mvec,
                curr_depth,
                prev_depth,
                constants: CommonFrameConstants::default(),
            },
        }
    }

    fn engine(layers: u32) -> ReprojectionEngine {
        ReprojectionEngine {
            layers,
            ..ReprojectionEngine::from_config(&FrameGenConfig::default())
        }
    }

    fn motion(backend: &SoftwareBackend, h: ResourceHandle, x: u32, y: u32) -> [f32; 2] {
        let t = backend.read_texel(h, x, y).unwrap();
        [t[0], t[1]]
    }

    fn dispatched(backend: &SoftwareBackend) -> Vec<(Kernel, [u32; 2])> {
        backend
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::Dispatch { kernel, groups, .. } => Some((*kernel, *groups)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_stage_order_with_full_pyramid() {
        let mut s = scene(128, 128, [0.0, 0.0], 0.5);
        s.backend.clear_events();
        engine(3).run(&mut s.backend, &s.pyramid, &s.inputs).unwrap();
        let kernels: Vec<Kernel> = dispatched(&s.backend).into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kernels,
            vec![
                Kernel::Clear,
                Kernel::Reproject,
                Kernel::MergeHalf,
                Kernel::MergeFull,
                Kernel::FirstLeg,
                Kernel::Pull,
                Kernel::Pull,
                Kernel::Push,
                Kernel::Push,
                Kernel::LastStretch,
            ]
        );
    }

    #[test]
    fn test_partial_pyramids() {
        for (layers, expected) in [
            (1, vec![Kernel::FirstLeg, Kernel::LastStretch]),
            (2, vec![Kernel::FirstLeg, Kernel::Pull, Kernel::Push, Kernel::LastStretch]),
        ] {
            let mut s = scene(128, 128, [0.0, 0.0], 0.5);
            s.backend.clear_events();
            engine(layers).run(&mut s.backend, &s.pyramid, &s.inputs).unwrap();
            let kernels: Vec<Kernel> = dispatched(&s.backend)
                .into_iter()
                .map(|(k, _)| k)
                .skip(4)
                .collect();
            assert_eq!(kernels, expected, "layers = {}", layers);
        }
    }

    #[test]
    fn test_zero_layers_passes_input_through() {
        let mut s = scene(128, 128, [3.0, -2.0], 0.5);
        s.backend.clear_events();
        let field = engine(0).run(&mut s.backend, &s.pyramid, &s.inputs).unwrap();
        assert_eq!(field.half_top_filtered, s.pyramid.get(PyramidBuffer::HalfTop).unwrap());

        let touched_levels = dispatched(&s.backend).iter().any(|(k, _)| {
            matches!(k, Kernel::FirstLeg | Kernel::Pull | Kernel::Push | Kernel::LastStretch)
        });
        assert!(!touched_levels);

        // the filtered buffer was never written
        let filtered = s.pyramid.get(PyramidBuffer::HalfTopFiltered).unwrap();
        assert!(!s
            .backend
            .events()
            .iter()
            .any(|e| matches!(e, Event::Dispatch { writes, .. } if writes.contains(&filtered))));
    }

    #[test]
    fn test_level_grids_halve() {
        let mut s = scene(320, 200, [0.0, 0.0], 0.5);
        s.backend.clear_events();
        engine(3).run(&mut s.backend, &s.pyramid, &s.inputs).unwrap();
        let d = dispatched(&s.backend);
        let full = Extent2D::new(320, 200);
        assert_eq!(d[0].1, dispatch_groups(full));
        // first leg, pull 1->2, pull 2->3
        assert_eq!(d[4].1, dispatch_groups(full.level(1)));
        assert_eq!(d[5].1, dispatch_groups(full.level(2)));
        assert_eq!(d[6].1, dispatch_groups(full.level(3)));
        assert_eq!(d[4].1, [20, 13]);
        assert_eq!(d[6].1, [5, 4]);
    }

    // ---------------------------------------------------------
    //  Numerical behaviour
    // ---------------------------------------------------------

    #[test]
    fn test_static_scene_has_zero_motion_and_no_holes() {
        let mut s = scene(128, 128, [0.0, 0.0], 0.5);
        let field = engine(3).run(&mut s.backend, &s.pyramid, &s.inputs).unwrap();
        for (x, y) in [(0, 0), (64, 64), (127, 127)] {
            assert_eq!(motion(&s.backend, field.full, x, y), [0.0, 0.0]);
            assert_eq!(motion(&s.backend, field.half_tip, x, y), [0.0, 0.0]);
            assert_eq!(motion(&s.backend, field.half_top_filtered, x, y), [0.0, 0.0]);
        }
    }

    #[test]
    fn test_translation_leaves_holes_at_the_border() {
        let mut s = scene(128, 128, [4.0, 0.0], 0.5);
        let field = engine(0).run(&mut s.backend, &s.pyramid, &s.inputs).unwrap();
        // previous-frame positions x < 4 were not reached by any current pixel
        assert!(is_hole(motion(&s.backend, field.full, 0, 10)));
        assert_eq!(motion(&s.backend, field.full, 64, 10), [4.0, 0.0]);
        // the midpoint buffers are reached from x + 2
        assert!(is_hole(motion(&s.backend, field.half_top_filtered, 0, 10)));
        assert_eq!(motion(&s.backend, field.half_tip, 64, 10), [4.0, 0.0]);
    }

    #[test]
    fn test_pull_push_fills_holes() {
        let mut s = scene(128, 128, [4.0, 0.0], 0.5);
        let field = engine(3).run(&mut s.backend, &s.pyramid, &s.inputs).unwrap();
        for x in 0..128 {
            let v = motion(&s.backend, field.half_top_filtered, x, 10);
            assert!(!is_hole(v), "hole at x = {}", x);
            assert!((v[0] - 4.0).abs() < 1.0e-4 && v[1].abs() < 1.0e-4, "x = {}: {:?}", x, v);
        }
    }

    #[test]
    fn test_occluded_pixels_do_not_scatter() {
        let mut s = scene(128, 128, [2.0, 0.0], 0.5);
        // previous depth disagrees everywhere
        s.backend.fill(s.inputs.prev_depth, [0.9, 0.0, 0.0, 0.0]).unwrap();
        let field = engine(0).run(&mut s.backend, &s.pyramid, &s.inputs).unwrap();
        assert!(is_hole(motion(&s.backend, field.full, 64, 64)));
        assert!(is_hole(motion(&s.backend, field.half_tip, 64, 64)));
    }

    #[test]
    fn test_nearer_surface_wins_collisions() {
        let mut s = scene(128, 128, [0.0, 0.0], 0.5);
        // a near pixel at (10, 10) moves 4 px; its midpoint lands on the far static pixel (12, 10)
        s.backend.write_texel(s.inputs.curr_mvec, 10, 10, [4.0, 0.0, 0.0, 0.0]).unwrap();
        s.backend.write_texel(s.inputs.curr_depth, 10, 10, [0.2, 0.0, 0.0, 0.0]).unwrap();
        s.backend.write_texel(s.inputs.prev_depth, 14, 10, [0.2, 0.0, 0.0, 0.0]).unwrap();
        let field = engine(0).run(&mut s.backend, &s.pyramid, &s.inputs).unwrap();
        assert_eq!(motion(&s.backend, field.half_tip, 12, 10), [4.0, 0.0]);
        assert_eq!(motion(&s.backend, field.full, 14, 10), [4.0, 0.0]);
        assert_eq!(motion(&s.backend, field.half_tip, 30, 10), [0.0, 0.0]);
    }
}
