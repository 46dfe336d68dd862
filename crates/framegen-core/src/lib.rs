//! Frame generation pipeline.
//!
//! Inserts a synthesized frame between two rendered frames at present time:
//! - `pyramid` / `snapshot` own the GPU-side state of a viewport
//! - `reprojection` builds a dense motion field at the midpoint
//! - `compositing` resolves the interpolated image from it
//! - `scheduler` decides per present whether to generate or pass through
//! - `plugin` is the host-facing front
//!
//! Everything runs through the `ComputeBackend` / `PresentBackend` traits;
//! `software` is a CPU implementation of both.

pub mod backend;
pub mod compositing;
pub mod error;
pub mod kernels;
pub mod plugin;
pub mod pyramid;
pub mod release;
pub mod reprojection;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod software;

pub use backend::{
    ComputeBackend, FrameConstantsProvider, PresentApi, PresentBackend, PresentParameters, Rect,
    TaggedResourceRegistry,
};
pub use compositing::{CompositeInputs, CompositingStage};
pub use error::{FrameGenError, Result};
pub use kernels::Kernel;
pub use plugin::{FrameGenerator, PresentOutcome};
pub use pyramid::{PyramidBuffer, ResourcePyramid};
pub use release::DeferredReleaseQueue;
pub use reprojection::{MotionField, ReprojectionEngine, ReprojectionInputs};
pub use scheduler::{HostInputs, PresentRequest, PresentScheduler, SchedulerState};
pub use session::GenerationSession;
pub use snapshot::{FrameSnapshot, TaggedResourceSet};
