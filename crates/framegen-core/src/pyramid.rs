//! Resource Pyramid Manager.
//!
//! Owns every texture the pipeline writes:
//! - the generated frame and the surface backup, in the surface format
//! - six split accumulators (full/tip/top x X/Y), R32Uint at output size
//! - the merged motion buffers (full, half-tip, half-top, filtered half-top)
//! - pull/push levels 1..=3 at `output >> level`, each with a motion and a
//!   reliability buffer; levels 1 and 2 also hold a pushed motion buffer
//!
//! The whole set is created and destroyed together so buffers of different
//! sizes never coexist.

use framegen_common::{Extent2D, Format, ResourceHandle, Status, TextureDesc};
use tracing::{info, warn};

use crate::backend::ComputeBackend;
use crate::error::{FrameGenError, Result};

/// Number of pull/push levels below the output resolution.
pub const PYRAMID_LEVELS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PyramidBuffer {
    GeneratedFrame,
    Backup,
    FullX,
    FullY,
    TipX,
    TipY,
    TopX,
    TopY,
    Full,
    HalfTip,
    HalfTop,
    HalfTopFiltered,
    MotionVectorLv1,
    PushedLv1,
    ReliabilityLv1,
    MotionVectorLv2,
    PushedLv2,
    ReliabilityLv2,
    MotionVectorLv3,
    ReliabilityLv3,
}

impl PyramidBuffer {
    pub const COUNT: usize = 20;

    pub const ALL: [PyramidBuffer; Self::COUNT] = [
        PyramidBuffer::GeneratedFrame,
        PyramidBuffer::Backup,
        PyramidBuffer::FullX,
        PyramidBuffer::FullY,
        PyramidBuffer::TipX,
        PyramidBuffer::TipY,
        PyramidBuffer::TopX,
        PyramidBuffer::TopY,
        PyramidBuffer::Full,
        PyramidBuffer::HalfTip,
        PyramidBuffer::HalfTop,
        PyramidBuffer::HalfTopFiltered,
        PyramidBuffer::MotionVectorLv1,
        PyramidBuffer::PushedLv1,
        PyramidBuffer::ReliabilityLv1,
        PyramidBuffer::MotionVectorLv2,
        PyramidBuffer::PushedLv2,
        PyramidBuffer::ReliabilityLv2,
        PyramidBuffer::MotionVectorLv3,
        PyramidBuffer::ReliabilityLv3,
    ];

    /// Split accumulators in kernel slot order.
    pub const SPLIT: [PyramidBuffer; 6] = [
        PyramidBuffer::FullX,
        PyramidBuffer::FullY,
        PyramidBuffer::TipX,
        PyramidBuffer::TipY,
        PyramidBuffer::TopX,
        PyramidBuffer::TopY,
    ];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            PyramidBuffer::GeneratedFrame => "generated frame",
            PyramidBuffer::Backup => "surface backup",
            PyramidBuffer::FullX => "split full x",
            PyramidBuffer::FullY => "split full y",
            PyramidBuffer::TipX => "split tip x",
            PyramidBuffer::TipY => "split tip y",
            PyramidBuffer::TopX => "split top x",
            PyramidBuffer::TopY => "split top y",
            PyramidBuffer::Full => "reprojected full",
            PyramidBuffer::HalfTip => "reprojected half tip",
            PyramidBuffer::HalfTop => "reprojected half top",
            PyramidBuffer::HalfTopFiltered => "reprojected half top filtered",
            PyramidBuffer::MotionVectorLv1 => "motion vector lv1",
            PyramidBuffer::PushedLv1 => "pushed lv1",
            PyramidBuffer::ReliabilityLv1 => "reliability lv1",
            PyramidBuffer::MotionVectorLv2 => "motion vector lv2",
            PyramidBuffer::PushedLv2 => "pushed lv2",
            PyramidBuffer::ReliabilityLv2 => "reliability lv2",
            PyramidBuffer::MotionVectorLv3 => "motion vector lv3",
            PyramidBuffer::ReliabilityLv3 => "reliability lv3",
        }
    }

    /// Pyramid level; everything not in the pull/push chain is level 0.
    pub fn level(self) -> u32 {
        match self {
            PyramidBuffer::MotionVectorLv1 | PyramidBuffer::PushedLv1 | PyramidBuffer::ReliabilityLv1 => 1,
            PyramidBuffer::MotionVectorLv2 | PyramidBuffer::PushedLv2 | PyramidBuffer::ReliabilityLv2 => 2,
            PyramidBuffer::MotionVectorLv3 | PyramidBuffer::ReliabilityLv3 => 3,
            _ => 0,
        }
    }

    pub fn format(self, surface: Format) -> Format {
        match self {
            PyramidBuffer::GeneratedFrame | PyramidBuffer::Backup => surface,
            PyramidBuffer::FullX
            | PyramidBuffer::FullY
            | PyramidBuffer::TipX
            | PyramidBuffer::TipY
            | PyramidBuffer::TopX
            | PyramidBuffer::TopY => Format::R32Uint,
            PyramidBuffer::ReliabilityLv1 | PyramidBuffer::ReliabilityLv2 | PyramidBuffer::ReliabilityLv3 => {
                Format::R32Float
            }
            _ => Format::Rg32Float,
        }
    }

    pub fn desc(self, extent: Extent2D, surface: Format) -> TextureDesc {
        let e = extent.level(self.level());
        TextureDesc::new(e.width, e.height, self.format(surface))
    }

    pub fn motion_vector(level: u32) -> Option<PyramidBuffer> {
        match level {
            1 => Some(PyramidBuffer::MotionVectorLv1),
            2 => Some(PyramidBuffer::MotionVectorLv2),
            3 => Some(PyramidBuffer::MotionVectorLv3),
            _ => None,
        }
    }
}

/// Bytes held by the previous-frame clones, when they exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotFootprint {
    pub depth: Option<u64>,
    pub hud_less: Option<u64>,
    pub motion_vectors: Option<u64>,
}

/// Estimated video memory of a full pyramid at `extent` plus the snapshot.
///
/// Snapshot clones that do not exist yet are estimated at 8 bytes per pixel for
/// depth and motion vectors and at the generated-frame size for colour.
pub fn estimate_vram_bytes(extent: Extent2D, format: Format, snapshot: SnapshotFootprint) -> u64 {
    let pyramid: u64 = PyramidBuffer::ALL
        .iter()
        .map(|b| b.desc(extent, format).size_in_bytes())
        .sum();
    let generated = PyramidBuffer::GeneratedFrame.desc(extent, format).size_in_bytes();
    pyramid
        + snapshot.depth.unwrap_or(extent.area() * 8)
        + snapshot.hud_less.unwrap_or(generated)
        + snapshot.motion_vectors.unwrap_or(extent.area() * 8)
}

#[derive(Debug)]
struct Allocation {
    extent: Extent2D,
    format: Format,
    handles: Vec<ResourceHandle>,
}

#[derive(Debug, Default)]
pub struct ResourcePyramid {
    allocation: Option<Allocation>,
}

impl ResourcePyramid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_allocated(&self) -> bool {
        self.allocation.is_some()
    }

    pub fn extent(&self) -> Option<Extent2D> {
        self.allocation.as_ref().map(|a| a.extent)
    }

    pub fn format(&self) -> Option<Format> {
        self.allocation.as_ref().map(|a| a.format)
    }

    pub fn get(&self, buffer: PyramidBuffer) -> Option<ResourceHandle> {
        self.allocation.as_ref().map(|a| a.handles[buffer.index()])
    }

    /// Like `get`, for callers that require an allocated pyramid.
    pub fn handle(&self, buffer: PyramidBuffer) -> Result<ResourceHandle> {
        self.get(buffer)
            .ok_or_else(|| FrameGenError::Backend(format!("{} is not allocated", buffer.name())))
    }

    /// All live handles, in `PyramidBuffer::ALL` order.
    pub fn handles(&self) -> &[ResourceHandle] {
        self.allocation.as_ref().map_or(&[], |a| a.handles.as_slice())
    }

    /// Make sure a full pyramid exists for `extent`/`format`.
    ///
    /// Returns `Ok(false)` and raises `RESOLUTION_TOO_LOW` without allocating
    /// when either side is below `min_width_or_height`. An existing set of a
    /// different size or format is destroyed entirely before the new one is
    /// created.
    pub fn ensure_resources<C: ComputeBackend>(
        &mut self,
        backend: &mut C,
        extent: Extent2D,
        format: Format,
        min_width_or_height: u32,
        status: &mut Status,
        release_delay: u32,
    ) -> Result<bool> {
        if extent.is_below(min_width_or_height) {
            if !status.contains(Status::RESOLUTION_TOO_LOW) {
                warn!(
                    width = extent.width,
                    height = extent.height,
                    min = min_width_or_height,
                    "Resolution too low for frame generation"
                );
            }
            *status |= Status::RESOLUTION_TOO_LOW;
            self.destroy(backend, release_delay);
            return Ok(false);
        }
        status.remove(Status::RESOLUTION_TOO_LOW);

        let previous = match &self.allocation {
            Some(a) if a.extent == extent && a.format == format => return Ok(true),
            Some(a) => Some((a.extent, a.format)),
            None => None,
        };
        self.destroy(backend, release_delay);

        let mut handles = Vec::with_capacity(PyramidBuffer::COUNT);
        for buffer in PyramidBuffer::ALL {
            match backend.create_texture(buffer.desc(extent, format), buffer.name()) {
                Ok(h) => handles.push(h),
                Err(e) => {
                    for h in handles {
                        backend.destroy_resource(h, release_delay);
                    }
                    return Err(e);
                }
            }
        }
        self.allocation = Some(Allocation {
            extent,
            format,
            handles,
        });

        match previous {
            Some((old_extent, old_format)) => info!(
                old = %old_extent,
                old_format = ?old_format,
                new = %extent,
                format = ?format,
                "Recreated frame generation resources"
            ),
            None => info!(new = %extent, format = ?format, "Created frame generation resources"),
        }
        Ok(true)
    }

    /// Release every buffer. No-op when nothing is allocated.
    pub fn destroy<C: ComputeBackend>(&mut self, backend: &mut C, release_delay: u32) {
        if let Some(allocation) = self.allocation.take() {
            for h in allocation.handles {
                backend.destroy_resource(h, release_delay);
            }
        }
    }

    /// VRAM estimate for the current allocation, 0 when nothing is allocated.
    pub fn estimated_vram_bytes(&self, snapshot: SnapshotFootprint) -> u64 {
        self.allocation
            .as_ref()
            .map_or(0, |a| estimate_vram_bytes(a.extent, a.format, snapshot))
    }
}

// ============================================================
// Tests
// ============================================================
