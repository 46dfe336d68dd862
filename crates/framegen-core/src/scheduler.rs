//! Present Scheduler.
//!
//! Decides, once per intercepted present, whether the frame passes straight
//! through or gets a generated frame in front of it.
//!
//! State machine:
//! - `Uninitialized` until the output size is known
//! - `FirstFrame` after every resize; always passes through
//! - `Steady` while the status is clear
//! - `Degraded` while any status condition is active (pass-through)
//!
//! No failure escapes as a lost frame: a failed generation falls back to a
//! pass-through present, and the next present retries from scratch.

use framegen_common::{
    BufferType, CommonFrameConstants, FrameGenConfig, FrameToken, ResourceHandle, Status,
};
use tracing::{debug, error, warn};

use crate::backend::{
    ComputeBackend, FrameConstantsProvider, PresentBackend, PresentParameters,
    TaggedResourceRegistry,
};
use crate::compositing::{CompositeInputs, CompositingStage};
use crate::error::{FrameGenError, Result};
use crate::pyramid::PyramidBuffer;
use crate::reprojection::{ReprojectionEngine, ReprojectionInputs};
use crate::session::GenerationSession;
use crate::snapshot::TaggedResourceSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Uninitialized,
    FirstFrame,
    Steady,
    Degraded,
}

/// Host data borrowed for the duration of one present call.
#[derive(Clone, Copy)]
pub struct HostInputs<'a> {
    pub tags: &'a dyn TaggedResourceRegistry,
    pub constants: &'a dyn FrameConstantsProvider,
}

/// Arguments of the intercepted present call.
#[derive(Debug, Clone, Copy)]
pub struct PresentRequest<'a> {
    /// Host frame; selects the frame constants.
    pub frame: FrameToken,
    /// Monotonic present counter; keys deferred releases.
    pub serial: FrameToken,
    pub sync_interval: u32,
    pub flags: u32,
    pub params: Option<&'a PresentParameters>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentScheduler {
    pub engine: ReprojectionEngine,
    pub compositor: CompositingStage,
    pub release_delay: u32,
}

impl PresentScheduler {
    pub fn from_config(config: &FrameGenConfig) -> Self {
        Self {
            engine: ReprojectionEngine::from_config(config),
            compositor: CompositingStage::from_config(config),
            release_delay: config.release_frame_delay,
        }
    }

    /// Handle one present call for `session`. Returns the number of real
    /// presentations issued (1 or 2).
    pub fn present<C: ComputeBackend, P: PresentBackend<C>>(
        &self,
        session: &mut GenerationSession,
        backend: &mut C,
        presenter: &mut P,
        host: &HostInputs<'_>,
        request: &PresentRequest<'_>,
    ) -> Result<u32> {
        let viewport = session.viewport();
        backend.begin_frame(request.serial);

        if session.state() == SchedulerState::Uninitialized {
            self.initialize_from_surface(session, backend, presenter);
        }
        if let Err(e) = session.ensure_resources(backend, self.release_delay) {
            error!(viewport = %viewport, error = %e, "Failed to create frame generation resources");
        }

        // Per-frame conditions are re-evaluated from scratch.
        let previous = session.status();
        let mut status = previous.difference(Status::PER_FRAME);

        let constants = host.constants.get(request.frame, viewport);
        if constants.is_none() {
            status |= Status::COMMON_CONSTANTS_INVALID;
            if !previous.contains(Status::COMMON_CONSTANTS_INVALID) {
                error!(viewport = %viewport, frame = %request.frame, "Common frame constants missing");
            }
        }

        let tagged = TaggedResourceSet::acquire(host.tags, viewport);
        let missing = tagged.missing_mandatory();
        if !missing.is_empty() {
            status |= Status::TAG_RESOURCES_INVALID;
            if !previous.contains(Status::TAG_RESOURCES_INVALID) {
                let names: Vec<_> = missing.iter().map(|b| b.name()).collect();
                error!(viewport = %viewport, missing = ?names, "Tagged resources missing");
            }
        }
        if session.note_ui_missing(tagged.ui.is_none()) {
            warn!(viewport = %viewport, "No UI buffer tagged, UI will not be composited");
        }
        session.set_status(status);

        let changed = match session
            .snapshot_mut()
            .refresh_if_changed(backend, &tagged, self.release_delay)
        {
            Ok(changed) => changed,
            Err(e) => {
                error!(viewport = %viewport, error = %e, "Failed to refresh snapshot");
                true
            }
        };
        session.refresh_vram_estimate(backend);

        let generate = matches!(session.state(), SchedulerState::Steady | SchedulerState::Degraded)
            && status.is_ok()
            && !changed
            && session.pyramid().is_allocated();

        let mut issued = 0;
        let presented = match constants.filter(|_| generate) {
            Some(constants) => {
                match self.present_generated(session, backend, presenter, &tagged, &constants, request, &mut issued) {
                    Err(e) if issued == 0 => {
                        error!(viewport = %viewport, error = %e, "Frame generation failed");
                        Self::pass_through(backend, presenter, request, &mut issued)
                    }
                    Err(e) => {
                        error!(viewport = %viewport, error = %e, issued, "Frame generation failed");
                        Ok(())
                    }
                    Ok(()) => Ok(()),
                }
            }
            None => {
                debug!(viewport = %viewport, status = ?status, changed, state = ?session.state(), "Pass-through frame");
                Self::pass_through(backend, presenter, request, &mut issued)
            }
        };

        if let Err(e) = session.snapshot_mut().advance(backend, &tagged) {
            error!(viewport = %viewport, error = %e, "Failed to advance snapshot");
        }

        session.record_presented(issued);
        if session.state() != SchedulerState::Uninitialized {
            session.set_state(if status.is_ok() {
                SchedulerState::Steady
            } else {
                SchedulerState::Degraded
            });
        }
        // Recorded copies go out even when the present failed.
        let submitted = backend.submit();
        presented?;
        submitted?;
        Ok(issued)
    }

    /// Learn the output size from the presentable surface.
    fn initialize_from_surface<C: ComputeBackend, P: PresentBackend<C>>(
        &self,
        session: &mut GenerationSession,
        backend: &mut C,
        presenter: &mut P,
    ) {
        let desc = presenter
            .surface(backend)
            .and_then(|s| backend.describe(s).ok_or(FrameGenError::UnknownResource(s)));
        match desc {
            Ok(desc) => {
                if let Err(e) = session.on_resize(backend, desc.extent, desc.format, self.release_delay) {
                    error!(viewport = %session.viewport(), error = %e, "Failed to initialize from surface");
                }
            }
            Err(e) => warn!(viewport = %session.viewport(), error = %e, "Surface not available yet"),
        }
    }

    fn pass_through<C: ComputeBackend, P: PresentBackend<C>>(
        backend: &mut C,
        presenter: &mut P,
        request: &PresentRequest<'_>,
        issued: &mut u32,
    ) -> Result<()> {
        presenter.present(backend, request.sync_interval, request.flags, request.params)?;
        *issued += 1;
        Ok(())
    }

    /// Generate the interpolated frame and present it ahead of the real one.
    #[allow(clippy::too_many_arguments)]
    fn present_generated<C: ComputeBackend, P: PresentBackend<C>>(
        &self,
        session: &GenerationSession,
        backend: &mut C,
        presenter: &mut P,
        tagged: &TaggedResourceSet,
        constants: &CommonFrameConstants,
        request: &PresentRequest<'_>,
        issued: &mut u32,
    ) -> Result<()> {
        let pyramid = session.pyramid();
        let snapshot = session.snapshot();
        let extent = pyramid
            .extent()
            .ok_or_else(|| FrameGenError::Backend("pyramid is not allocated".into()))?;

        let current = |b: BufferType| -> Result<ResourceHandle> {
            tagged
                .get(b)
                .ok_or_else(|| FrameGenError::Backend(format!("{} is not tagged", b.name())))
        };
        let previous = |b: BufferType| -> Result<ResourceHandle> {
            snapshot
                .previous(b)
                .ok_or_else(|| FrameGenError::Backend(format!("no previous {}", b.name())))
        };

        let curr_depth = current(BufferType::Depth)?;
        let curr_mvec = current(BufferType::MotionVectors)?;
        let curr_color = current(BufferType::HudLessColor)?;
        let prev_depth = previous(BufferType::Depth)?;

        let field = self.engine.run(
            backend,
            pyramid,
            &ReprojectionInputs {
                extent,
                curr_mvec,
                curr_depth,
                prev_depth,
                constants: *constants,
            },
        )?;

        let generated = pyramid.handle(PyramidBuffer::GeneratedFrame)?;
        let backup = pyramid.handle(PyramidBuffer::Backup)?;
        self.compositor.composite(
            backend,
            &CompositeInputs {
                extent,
                prev_color: previous(BufferType::HudLessColor)?,
                prev_depth,
                curr_color,
                curr_depth,
                curr_mvec,
                ui: tagged.ui,
                field,
                generated,
            },
        )?;

        let surface = presenter.surface(backend)?;
        backend.copy_resource(backup, surface)?;
        backend.copy_resource(surface, generated)?;
        if let Err(e) = presenter.present(backend, request.sync_interval, request.flags, request.params) {
            if let Err(restore) = backend.copy_resource(surface, backup) {
                warn!(error = %restore, "Failed to restore the rendered frame");
            }
            return Err(e);
        }
        *issued += 1;

        if !session.options().presents_rendered_frame() {
            return Ok(());
        }

        // The swapchain may have moved on to another image.
        let surface = presenter.surface(backend)?;
        backend.copy_resource(surface, backup)?;
        presenter.present(backend, request.sync_interval, request.flags, request.params)?;
        *issued += 1;
        Ok(())
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PresentApi;
    use crate::kernels::Kernel;
    use crate::software::{
        Event, SoftwareBackend, SoftwarePresenter, StaticConstantsProvider, StaticTagRegistry,
    };
    use framegen_common::{Format, Options, TextureDesc, ViewportId};

    const VP: ViewportId = ViewportId(0);

    struct Rig {
        backend: SoftwareBackend,
        presenter: SoftwarePresenter,
        session: GenerationSession,
        tags: StaticTagRegistry,
        constants: StaticConstantsProvider,
        scheduler: PresentScheduler,
        frame: u64,
    }

    impl Rig {
        fn new() -> Self {
            let mut backend = SoftwareBackend::new();
            let desc = TextureDesc::new(128, 128, Format::Rgba8Unorm);
            let presenter = SoftwarePresenter::new(&mut backend, PresentApi::Present, desc, 3).unwrap();
            let mut tags = StaticTagRegistry::new();
            for (buffer, format) in [
                (BufferType::Depth, Format::D32Float),
                (BufferType::MotionVectors, Format::Rg16Float),
                (BufferType::HudLessColor, Format::Rgba8Unorm),
            ] {
                let h = backend
                    .create_texture(TextureDesc::new(128, 128, format), buffer.name())
                    .unwrap();
                tags.tag(VP, buffer, h);
            }
            let mut constants = StaticConstantsProvider::new();
            constants.set(VP, CommonFrameConstants::default());
            let mut session = GenerationSession::new(VP, 128);
            session.set_options(Options::enabled());
            let config = FrameGenConfig {
                release_frame_delay: 0,
                ..Default::default()
            };
            Self {
                backend,
                presenter,
                session,
                tags,
                constants,
                scheduler: PresentScheduler::from_config(&config),
                frame: 0,
            }
        }

        fn present(&mut self) -> Result<u32> {
            self.frame += 1;
            let host = HostInputs {
                tags: &self.tags,
                constants: &self.constants,
            };
            let request = PresentRequest {
                frame: FrameToken(self.frame),
                serial: FrameToken(self.frame),
                sync_interval: 1,
                flags: 0,
                params: None,
            };
            self.scheduler
                .present(&mut self.session, &mut self.backend, &mut self.presenter, &host, &request)
        }

        fn tagged(&self, buffer: BufferType) -> ResourceHandle {
            self.tags.get(buffer, VP).unwrap()
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut rig = Rig::new();
        assert_eq!(rig.session.state(), SchedulerState::Uninitialized);
        assert_eq!(rig.present().unwrap(), 1);
        assert_eq!(rig.session.extent(), Some(framegen_common::Extent2D::new(128, 128)));
        assert_eq!(rig.session.state(), SchedulerState::Steady);

        rig.constants.remove(VP);
        assert_eq!(rig.present().unwrap(), 1);
        assert_eq!(rig.session.state(), SchedulerState::Degraded);

        rig.constants.set(VP, CommonFrameConstants::default());
        assert_eq!(rig.present().unwrap(), 2);
        assert_eq!(rig.session.state(), SchedulerState::Steady);
    }

    #[test]
    fn test_generated_frame_shown_before_rendered_frame() {
        let mut rig = Rig::new();
        let color = rig.tagged(BufferType::HudLessColor);
        rig.backend.fill(color, [0.2, 0.2, 0.2, 1.0]).unwrap();
        rig.present().unwrap();

        // the rendered frame sits on the surface when present is intercepted
        rig.backend.fill(color, [0.6, 0.6, 0.6, 1.0]).unwrap();
        let surface = rig.presenter.current_image().unwrap();
        rig.backend.fill(surface, [0.6, 0.6, 0.6, 1.0]).unwrap();
        assert_eq!(rig.present().unwrap(), 2);

        let shown = rig.presenter.presented();
        let generated = shown[shown.len() - 2];
        let rendered = shown[shown.len() - 1];
        let g = rig.backend.read_texel(generated, 64, 64).unwrap();
        assert!((g[0] - 0.4).abs() < 1.0e-5, "{:?}", g);
        let r = rig.backend.read_texel(rendered, 64, 64).unwrap();
        assert_eq!(r, [0.6, 0.6, 0.6, 1.0]);
    }

    #[test]
    fn test_present_failure_restores_surface_and_errors() {
        let mut rig = Rig::new();
        rig.present().unwrap();
        let surface = rig.presenter.current_image().unwrap();
        rig.backend.fill(surface, [0.9, 0.1, 0.1, 1.0]).unwrap();
        rig.presenter.set_fail_presents(true);

        assert!(matches!(rig.present(), Err(FrameGenError::Present(_))));
        assert_eq!(rig.backend.read_texel(surface, 5, 5), Some([0.9, 0.1, 0.1, 1.0]));
        assert_eq!(rig.session.frames_presented(), 1);
    }

    #[test]
    fn test_kernel_failure_degrades_to_single_present() {
        let mut rig = Rig::new();
        rig.present().unwrap();
        rig.backend.set_failing_kernel(Some(Kernel::Resolve));
        assert_eq!(rig.present().unwrap(), 1);
        assert!(rig.session.status().is_ok());

        rig.backend.set_failing_kernel(None);
        assert_eq!(rig.present().unwrap(), 2);
    }

    #[test]
    fn test_pass_through_frames_run_no_kernels() {
        let mut rig = Rig::new();
        rig.present().unwrap();
        rig.tags.untag(VP, BufferType::MotionVectors);
        rig.backend.clear_events();
        assert_eq!(rig.present().unwrap(), 1);
        assert!(rig.session.status().contains(Status::TAG_RESOURCES_INVALID));
        assert!(!rig
            .backend
            .events()
            .iter()
            .any(|e| matches!(e, Event::Dispatch { .. })));
    }

    #[test]
    fn test_snapshot_advances_every_frame() {
        let mut rig = Rig::new();
        let depth = rig.tagged(BufferType::Depth);
        rig.backend.fill(depth, [0.25, 0.0, 0.0, 0.0]).unwrap();
        rig.present().unwrap();
        rig.backend.fill(depth, [0.75, 0.0, 0.0, 0.0]).unwrap();
        rig.present().unwrap();
        let prev = rig.session.snapshot().previous(BufferType::Depth).unwrap();
        assert_eq!(rig.backend.read_texel(prev, 0, 0).unwrap()[0], 0.75);
    }

    #[test]
    fn test_failed_pass_through_still_advances_snapshot() {
        let mut rig = Rig::new();
        let depth = rig.tagged(BufferType::Depth);
        rig.backend.fill(depth, [0.5, 0.0, 0.0, 0.0]).unwrap();
        rig.presenter.set_fail_presents(true);

        assert!(matches!(rig.present(), Err(FrameGenError::Present(_))));
        let prev = rig.session.snapshot().previous(BufferType::Depth).unwrap();
        assert_eq!(rig.backend.read_texel(prev, 0, 0).unwrap()[0], 0.5);
        assert_eq!(rig.session.frame_index(), 1);

        rig.presenter.set_fail_presents(false);
        assert_eq!(rig.present().unwrap(), 2);
    }
}
