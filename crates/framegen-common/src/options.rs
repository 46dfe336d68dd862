//! Host-facing options and state exchanged per viewport.

use crate::status::Status;
use crate::types::Format;

/// Whether frame generation is enabled for a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Off,
    On,
}

bitflags::bitflags! {
    /// Optional behaviour switches.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        /// Present only the generated frame, never the rendered one.
        const SHOW_ONLY_INTERPOLATED_FRAME = 1 << 0;
        /// Draw the debug overlay (accepted and stored; not rendered here).
        const SHOW_DEBUG_OVERLAY           = 1 << 1;
    }
}

/// Options written by the host with `set_options`.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Specifies which mode should be used.
    pub mode: Mode,
    /// Number of frames generated per rendered frame. Only 1 is supported.
    pub num_frames_to_generate: u32,
    pub flags: Flags,
    /// Expected number of buffers in the swapchain.
    pub num_back_buffers: u32,
    /// Expected size of the depth and motion-vector inputs.
    pub mvec_depth_width: u32,
    pub mvec_depth_height: u32,
    /// Expected size of the swapchain back buffers.
    pub color_width: u32,
    pub color_height: u32,
    pub color_buffer_format: Option<Format>,
    pub mvec_buffer_format: Option<Format>,
    pub depth_buffer_format: Option<Format>,
    pub hud_less_buffer_format: Option<Format>,
    pub ui_buffer_format: Option<Format>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: Mode::Off,
            num_frames_to_generate: 1,
            flags: Flags::empty(),
            num_back_buffers: 0,
            mvec_depth_width: 0,
            mvec_depth_height: 0,
            color_width: 0,
            color_height: 0,
            color_buffer_format: None,
            mvec_buffer_format: None,
            depth_buffer_format: None,
            hud_less_buffer_format: None,
            ui_buffer_format: None,
        }
    }
}

impl Options {
    /// Options with generation switched on and everything else default.
    pub fn enabled() -> Self {
        Self {
            mode: Mode::On,
            ..Default::default()
        }
    }

    /// Whether the rendered frame is presented after the generated one.
    #[inline]
    pub fn presents_rendered_frame(&self) -> bool {
        !self.flags.contains(Flags::SHOW_ONLY_INTERPOLATED_FRAME)
    }
}

/// Snapshot returned by `get_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct State {
    /// Estimated video memory held by the pipeline, in bytes.
    pub estimated_vram_bytes: u64,
    pub status: Status,
    /// Smallest supported output width or height.
    pub min_width_or_height: u32,
    /// Presentations issued since the previous `get_state` call.
    pub frames_presented: u32,
}
