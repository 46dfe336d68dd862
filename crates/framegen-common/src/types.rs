//! Identifiers, opaque resource handles, extents and pixel formats.
//!
//! These are plain values shared by the pipeline and every backend:
//! - `ViewportId` / `FrameToken` key per-viewport and per-frame data
//! - `ResourceHandle` is an opaque, comparable reference to a GPU texture
//! - `Format` and `TextureDesc` describe what a backend has to allocate

use std::fmt;
use std::num::NonZeroU64;

/// Identifies an output viewport; each viewport owns one generation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ViewportId(pub u32);

impl fmt::Display for ViewportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewport#{}", self.0)
    }
}

/// Monotonically increasing frame token supplied by the host each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FrameToken(pub u64);

impl FrameToken {
    /// The token following this one.
    #[inline]
    pub fn next(self) -> Self {
        FrameToken(self.0.wrapping_add(1))
    }
}

impl fmt::Display for FrameToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Opaque handle to a texture owned by (or imported into) a compute backend.
///
/// Two handles are the same resource exactly when they compare equal; the
/// numeric value carries no other meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(NonZeroU64);

impl ResourceHandle {
    /// Build a handle from a raw non-zero id. Returns `None` for zero.
    #[inline]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(ResourceHandle)
    }

    /// Raw id, for logging and backend tables.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res#{}", self.0)
    }
}

/// Identity comparison between two optional handles.
///
/// Two absent handles are equal; an absent and a present handle are not.
#[inline]
pub fn handles_equal(a: Option<ResourceHandle>, b: Option<ResourceHandle>) -> bool {
    a == b
}

/// Allocates process-unique handle ids. Backends own one each.
#[derive(Debug)]
pub struct HandleAllocator {
    next: NonZeroU64,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self { next: NonZeroU64::MIN }
    }

    /// Hand out the next unused handle.
    pub fn allocate(&mut self) -> ResourceHandle {
        let handle = ResourceHandle(self.next);
        self.next = self.next.saturating_add(1);
        handle
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// 2D size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of pyramid level `level` (level 0 is this extent).
    #[inline]
    pub fn level(self, level: u32) -> Self {
        Self {
            width: self.width >> level,
            height: self.height >> level,
        }
    }

    /// Pixel count.
    #[inline]
    pub fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when either side is zero.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when either side is below `min`.
    #[inline]
    pub fn is_below(self, min: u32) -> bool {
        self.width < min || self.height < min
    }
}

impl fmt::Display for Extent2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel formats understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba8Srgb,
    Bgra8Srgb,
    Rgb10A2Unorm,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
    Rg32Float,
    R32Float,
    R32Uint,
    D32Float,
    D24UnormS8Uint,
    /// 32-bit float depth with 8-bit stencil padded to 64 bits per pixel.
    D32FloatS8Uint,
}

impl Format {
    /// Storage size of one pixel in bytes.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::Rgba8Unorm
            | Format::Bgra8Unorm
            | Format::Rgba8Srgb
            | Format::Bgra8Srgb
            | Format::Rgb10A2Unorm
            | Format::Rg16Float
            | Format::R32Float
            | Format::R32Uint
            | Format::D32Float
            | Format::D24UnormS8Uint => 4,
            Format::Rgba16Float | Format::Rg32Float | Format::D32FloatS8Uint => 8,
            Format::Rgba32Float => 16,
        }
    }

    /// Number of colour/data channels.
    pub fn channels(self) -> u32 {
        match self {
            Format::R32Float | Format::R32Uint | Format::D32Float => 1,
            Format::Rg16Float | Format::Rg32Float | Format::D24UnormS8Uint | Format::D32FloatS8Uint => 2,
            _ => 4,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Format::D32Float | Format::D24UnormS8Uint | Format::D32FloatS8Uint)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Format::R32Uint)
    }
}

/// Description of a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub extent: Extent2D,
    pub format: Format,
}

impl TextureDesc {
    pub const fn new(width: u32, height: u32, format: Format) -> Self {
        Self {
            extent: Extent2D::new(width, height),
            format,
        }
    }

    /// Bytes occupied by the texture.
    #[inline]
    pub fn size_in_bytes(&self) -> u64 {
        self.extent.area() * self.format.bytes_per_pixel() as u64
    }
}

/// Kinds of externally tagged per-viewport buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    Depth,
    MotionVectors,
    /// Scene colour before the UI was drawn.
    HudLessColor,
    /// UI colour with coverage in alpha; optional.
    UiColorAndAlpha,
}

impl BufferType {
    /// Buffers without which generation cannot run.
    pub const MANDATORY: [BufferType; 3] = [
        BufferType::HudLessColor,
        BufferType::Depth,
        BufferType::MotionVectors,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BufferType::Depth => "depth",
            BufferType::MotionVectors => "motion vectors",
            BufferType::HudLessColor => "hud-less color",
            BufferType::UiColorAndAlpha => "ui color and alpha",
        }
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_allocator_is_unique_and_nonzero() {
        let mut alloc = HandleAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert_ne!(a, b);
        assert_eq!(a.raw(), 1);
        assert_eq!(b.raw(), 2);
        assert!(ResourceHandle::from_raw(0).is_none());
    }

    #[test]
    fn test_handles_equal() {
        let a = ResourceHandle::from_raw(7);
        let b = ResourceHandle::from_raw(7);
        let c = ResourceHandle::from_raw(8);
        assert!(handles_equal(a, b));
        assert!(!handles_equal(a, c));
        assert!(!handles_equal(a, None));
        assert!(handles_equal(None, None));
    }

    #[test]
    fn test_extent_levels_halve() {
        let e = Extent2D::new(1920, 1080);
        assert_eq!(e.level(0), e);
        assert_eq!(e.level(1), Extent2D::new(960, 540));
        assert_eq!(e.level(2), Extent2D::new(480, 270));
        assert_eq!(e.level(3), Extent2D::new(240, 135));
    }

    #[test]
    fn test_extent_is_below() {
        assert!(Extent2D::new(127, 720).is_below(128));
        assert!(Extent2D::new(1280, 64).is_below(128));
        assert!(!Extent2D::new(128, 128).is_below(128));
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(Format::Rgba8Unorm.bytes_per_pixel(), 4);
        assert_eq!(Format::Rg32Float.bytes_per_pixel(), 8);
        assert_eq!(Format::D32FloatS8Uint.bytes_per_pixel(), 8);
        assert_eq!(Format::Rgba32Float.bytes_per_pixel(), 16);
        assert_eq!(TextureDesc::new(10, 10, Format::R32Uint).size_in_bytes(), 400);
    }
}
