//! Per-viewport generation session.
//!
//! A session owns everything the pipeline keeps between presents for one
//! viewport: the resource pyramid, the previous-frame snapshot, the options
//! written by the host and the status/counter pair read back by `get_state`.

use framegen_common::{Extent2D, Format, Mode, Options, State, Status, ViewportId};
use tracing::{debug, info, warn};

use crate::backend::ComputeBackend;
use crate::error::Result;
use crate::pyramid::{estimate_vram_bytes, ResourcePyramid, SnapshotFootprint};
use crate::scheduler::SchedulerState;
use crate::snapshot::FrameSnapshot;

#[derive(Debug)]
pub struct GenerationSession {
    viewport: ViewportId,
    options: Options,
    status: Status,
    state: SchedulerState,
    /// Presentations issued since the last `take_state`.
    frames_presented: u32,
    /// Presents handled over the session lifetime.
    frame_index: u64,
    extent: Option<Extent2D>,
    format: Option<Format>,
    min_width_or_height: u32,
    estimated_vram_bytes: u64,
    pyramid: ResourcePyramid,
    snapshot: FrameSnapshot,
    ui_missing_reported: bool,
}

impl GenerationSession {
    pub fn new(viewport: ViewportId, min_width_or_height: u32) -> Self {
        Self {
            viewport,
            options: Options::default(),
            status: Status::empty(),
            state: SchedulerState::Uninitialized,
            frames_presented: 0,
            frame_index: 0,
            extent: None,
            format: None,
            min_width_or_height,
            estimated_vram_bytes: 0,
            pyramid: ResourcePyramid::new(),
            snapshot: FrameSnapshot::new(),
            ui_missing_reported: false,
        }
    }

    pub fn viewport(&self) -> ViewportId {
        self.viewport
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SchedulerState) {
        if state != self.state {
            debug!(viewport = %self.viewport, from = ?self.state, to = ?state, "Scheduler state change");
        }
        self.state = state;
    }

    pub fn frames_presented(&self) -> u32 {
        self.frames_presented
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn extent(&self) -> Option<Extent2D> {
        self.extent
    }

    pub fn format(&self) -> Option<Format> {
        self.format
    }

    pub fn min_width_or_height(&self) -> u32 {
        self.min_width_or_height
    }

    pub(crate) fn set_min_width_or_height(&mut self, min: u32) {
        self.min_width_or_height = min;
    }

    pub fn estimated_vram_bytes(&self) -> u64 {
        self.estimated_vram_bytes
    }

    pub fn pyramid(&self) -> &ResourcePyramid {
        &self.pyramid
    }

    pub fn snapshot(&self) -> &FrameSnapshot {
        &self.snapshot
    }

    pub(crate) fn snapshot_mut(&mut self) -> &mut FrameSnapshot {
        &mut self.snapshot
    }

    /// Returns true the first time the UI buffer goes missing.
    pub(crate) fn note_ui_missing(&mut self, missing: bool) -> bool {
        let first = missing && !self.ui_missing_reported;
        self.ui_missing_reported = missing;
        first
    }

    /// Overwrite the options. Only one generated frame per rendered frame is
    /// supported; larger requests are clamped.
    ///
    /// Switching generation back on re-enters `FirstFrame`: the snapshot was
    /// not advanced while it was off.
    pub fn set_options(&mut self, mut options: Options) {
        if options.num_frames_to_generate != 1 {
            warn!(
                viewport = %self.viewport,
                requested = options.num_frames_to_generate,
                "Only one generated frame per rendered frame is supported"
            );
            options.num_frames_to_generate = 1;
        }
        info!(viewport = %self.viewport, mode = ?options.mode, flags = ?options.flags, "Options set");
        debug!(
            back_buffers = options.num_back_buffers,
            color_width = options.color_width,
            color_height = options.color_height,
            mvec_depth_width = options.mvec_depth_width,
            mvec_depth_height = options.mvec_depth_height,
            color_format = ?options.color_buffer_format,
            mvec_format = ?options.mvec_buffer_format,
            depth_format = ?options.depth_buffer_format,
            hud_less_format = ?options.hud_less_buffer_format,
            ui_format = ?options.ui_buffer_format,
            "Options detail"
        );
        if self.options.mode == Mode::Off
            && options.mode == Mode::On
            && matches!(self.state, SchedulerState::Steady | SchedulerState::Degraded)
        {
            self.set_state(SchedulerState::FirstFrame);
        }
        self.options = options;
    }

    /// Output surface changed size or format.
    ///
    /// Tears the pyramid down, drops every status condition except
    /// `UNSUPPORTED_HARDWARE` and re-enters `FirstFrame`.
    pub fn on_resize<C: ComputeBackend>(
        &mut self,
        backend: &mut C,
        extent: Extent2D,
        format: Format,
        release_delay: u32,
    ) -> Result<()> {
        info!(viewport = %self.viewport, extent = %extent, format = ?format, "Output resized");
        self.pyramid.destroy(backend, release_delay);
        self.status &= Status::UNSUPPORTED_HARDWARE;
        self.extent = Some(extent);
        self.format = Some(format);
        self.set_state(SchedulerState::FirstFrame);
        let result = self.ensure_resources(backend, release_delay).map(|_| ());
        self.refresh_vram_estimate(backend);
        result
    }

    /// Allocate the pyramid for the last known output, if possible.
    pub fn ensure_resources<C: ComputeBackend>(&mut self, backend: &mut C, release_delay: u32) -> Result<bool> {
        if self.status.contains(Status::UNSUPPORTED_HARDWARE) {
            return Ok(false);
        }
        let (Some(extent), Some(format)) = (self.extent, self.format) else {
            return Ok(false);
        };
        self.pyramid.ensure_resources(
            backend,
            extent,
            format,
            self.min_width_or_height,
            &mut self.status,
            release_delay,
        )
    }

    pub fn refresh_vram_estimate<C: ComputeBackend>(&mut self, backend: &C) {
        self.estimated_vram_bytes = self.pyramid.estimated_vram_bytes(self.snapshot.footprint(backend));
    }

    /// Count `issued` presentations for this present call.
    pub(crate) fn record_presented(&mut self, issued: u32) {
        self.frames_presented = self.frames_presented.wrapping_add(issued);
        self.frame_index = self.frame_index.wrapping_add(1);
    }

    /// Copy of the current state; resets the presented-frame delta.
    ///
    /// Before anything is allocated, `options` with a colour size yields an
    /// estimate of what generation would cost at that size.
    pub fn take_state(&mut self, options: Option<&Options>) -> State {
        let estimated_vram_bytes = match options {
            Some(o) if !self.pyramid.is_allocated() && o.color_width > 0 && o.color_height > 0 => {
                estimate_vram_bytes(
                    Extent2D::new(o.color_width, o.color_height),
                    o.color_buffer_format.unwrap_or(Format::Rgba8Unorm),
                    SnapshotFootprint::default(),
                )
            }
            _ => self.estimated_vram_bytes,
        };
        let state = State {
            estimated_vram_bytes,
            status: self.status,
            min_width_or_height: self.min_width_or_height,
            frames_presented: self.frames_presented,
        };
        self.frames_presented = 0;
        state
    }

    /// Release every owned resource.
    pub fn destroy<C: ComputeBackend>(&mut self, backend: &mut C, release_delay: u32) {
        self.pyramid.destroy(backend, release_delay);
        self.snapshot.destroy(backend, release_delay);
        self.estimated_vram_bytes = 0;
        self.set_state(SchedulerState::Uninitialized);
    }
}
