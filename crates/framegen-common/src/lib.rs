//! Shared data types for the frame generation pipeline.

pub mod config;
pub mod constants;
pub mod cvar;
pub mod options;
pub mod status;
pub mod types;

pub use config::FrameGenConfig;
pub use constants::{CommonFrameConstants, Mat4, MAT4_IDENTITY};
pub use cvar::{CvarFlags, CvarRegistry};
pub use options::{Flags, Mode, Options, State};
pub use status::Status;
pub use types::{
    handles_equal, BufferType, Extent2D, Format, FrameToken, HandleAllocator, ResourceHandle,
    TextureDesc, ViewportId,
};
