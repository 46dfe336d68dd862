//! Error type for fallible pipeline operations.
//!
//! Host-visible failure conditions are reported through the `Status` bitmask;
//! `FrameGenError` covers everything that goes wrong inside a backend call.

use framegen_common::{Extent2D, Format, ResourceHandle, TextureDesc, ViewportId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameGenError {
    /// The compute backend rejected an operation.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("unknown resource {0}")]
    UnknownResource(ResourceHandle),

    #[error("cannot copy {src_extent} {src_format:?} into {dst_extent} {dst_format:?}")]
    IncompatibleCopy {
        dst_extent: Extent2D,
        dst_format: Format,
        src_extent: Extent2D,
        src_format: Format,
    },

    #[error("kernel {kernel} expects {expected_reads} reads and {expected_writes} writes, got {reads} and {writes}")]
    BindingMismatch {
        kernel: &'static str,
        expected_reads: usize,
        expected_writes: usize,
        reads: usize,
        writes: usize,
    },

    #[error("present failed: {0}")]
    Present(String),

    #[error("unknown viewport {0}")]
    UnknownViewport(ViewportId),

    #[error("frame generator has not been started")]
    NotStarted,

    #[error("frame generation unsupported: {0}")]
    Unsupported(String),
}

impl FrameGenError {
    pub fn incompatible_copy(dst: TextureDesc, src: TextureDesc) -> Self {
        FrameGenError::IncompatibleCopy {
            dst_extent: dst.extent,
            dst_format: dst.format,
            src_extent: src.extent,
            src_format: src.format,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameGenError>;
