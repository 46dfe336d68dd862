//! Plugin front: the entry points a host integration calls.
//!
//! `FrameGenerator` owns the compute backend, the presenter and one
//! `GenerationSession` per viewport, and routes host notifications to the
//! session of the active viewport.

use std::collections::BTreeMap;

use framegen_common::{
    Extent2D, Format, FrameGenConfig, FrameToken, Mode, Options, State, Status, ViewportId,
};
use tracing::{debug, info, warn};

use crate::backend::{ComputeBackend, PresentBackend, PresentParameters};
use crate::error::{FrameGenError, Result};
use crate::scheduler::{HostInputs, PresentRequest, PresentScheduler};
use crate::session::GenerationSession;

/// Result of an intercepted present call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentOutcome {
    /// The host must not issue its own present.
    pub skip_original: bool,
    /// Real presentations issued on the host's behalf.
    pub presented: u32,
}

pub struct FrameGenerator<C: ComputeBackend, P: PresentBackend<C>> {
    backend: C,
    presenter: P,
    config: FrameGenConfig,
    scheduler: PresentScheduler,
    sessions: BTreeMap<ViewportId, GenerationSession>,
    frame: FrameToken,
    /// Intercepted presents so far; keys deferred releases.
    presents: u64,
    viewport: ViewportId,
    started: bool,
    unsupported: bool,
}

fn session_entry<'a>(
    sessions: &'a mut BTreeMap<ViewportId, GenerationSession>,
    viewport: ViewportId,
    config: &FrameGenConfig,
    unsupported: bool,
) -> &'a mut GenerationSession {
    sessions.entry(viewport).or_insert_with(|| {
        debug!(viewport = %viewport, "Creating generation session");
        let mut session = GenerationSession::new(viewport, config.min_width_or_height);
        if unsupported {
            session.set_status(Status::UNSUPPORTED_HARDWARE);
        }
        session
    })
}

impl<C: ComputeBackend, P: PresentBackend<C>> FrameGenerator<C, P> {
    pub fn new(backend: C, presenter: P) -> Self {
        let config = FrameGenConfig::default();
        Self {
            backend,
            presenter,
            scheduler: PresentScheduler::from_config(&config),
            config,
            sessions: BTreeMap::new(),
            frame: FrameToken::default(),
            presents: 0,
            viewport: ViewportId::default(),
            started: false,
            unsupported: false,
        }
    }

    /// Apply `config` and check the device.
    ///
    /// An unsupported device still starts: every session reports
    /// `UNSUPPORTED_HARDWARE` and passes frames through.
    pub fn startup(&mut self, config: FrameGenConfig) -> Result<()> {
        self.config = config;
        self.scheduler = PresentScheduler::from_config(&config);
        self.started = true;
        self.unsupported = !self.backend.supports_frame_generation();

        for session in self.sessions.values_mut() {
            session.set_min_width_or_height(config.min_width_or_height);
            if self.unsupported {
                session.set_status(session.status() | Status::UNSUPPORTED_HARDWARE);
            }
        }

        if self.unsupported {
            warn!("Device cannot run frame generation, frames will pass through");
            return Err(FrameGenError::Unsupported(
                "compute backend does not support frame generation".into(),
            ));
        }
        info!(
            layers = config.pyramid_layers,
            min_width_or_height = config.min_width_or_height,
            release_delay = config.release_frame_delay,
            "Frame generation started"
        );
        Ok(())
    }

    /// Destroy every session and reclaim all resources.
    pub fn shutdown(&mut self) {
        for session in self.sessions.values_mut() {
            session.destroy(&mut self.backend, 0);
        }
        self.sessions.clear();
        self.backend.flush_releases();
        self.started = false;
        info!("Frame generation shut down");
    }

    /// Frame token and viewport of the frame about to be presented.
    pub fn set_constants(&mut self, frame: FrameToken, viewport: ViewportId) {
        if viewport != self.viewport {
            warn!(old = %self.viewport, new = %viewport, "Active viewport changed");
        }
        self.frame = frame;
        self.viewport = viewport;
    }

    pub fn on_swapchain_created(&mut self, extent: Extent2D, format: Format) -> Result<()> {
        info!(extent = %extent, format = ?format, "Swapchain created");
        self.on_resize(extent, format)
    }

    pub fn on_resize(&mut self, extent: Extent2D, format: Format) -> Result<()> {
        if !self.started {
            return Err(FrameGenError::NotStarted);
        }
        let session = session_entry(&mut self.sessions, self.viewport, &self.config, self.unsupported);
        session.on_resize(&mut self.backend, extent, format, self.config.release_frame_delay)
    }

    pub fn on_fullscreen_state(&mut self, fullscreen: bool) {
        info!(fullscreen, "Fullscreen state changed");
    }

    /// Intercepted present of the active viewport.
    pub fn present(
        &mut self,
        host: &HostInputs<'_>,
        sync_interval: u32,
        flags: u32,
        params: Option<&PresentParameters>,
    ) -> Result<PresentOutcome> {
        if !self.started {
            return Err(FrameGenError::NotStarted);
        }
        self.presents += 1;
        let session = session_entry(&mut self.sessions, self.viewport, &self.config, self.unsupported);
        if session.options().mode == Mode::Off {
            debug!(viewport = %self.viewport, "Frame generation off, host presents");
            self.backend.begin_frame(FrameToken(self.presents));
            return Ok(PresentOutcome {
                skip_original: false,
                presented: 0,
            });
        }

        let request = PresentRequest {
            frame: self.frame,
            serial: FrameToken(self.presents),
            sync_interval,
            flags,
            params,
        };
        let presented =
            self.scheduler
                .present(session, &mut self.backend, &mut self.presenter, host, &request)?;
        Ok(PresentOutcome {
            skip_original: true,
            presented,
        })
    }

    pub fn set_options(&mut self, viewport: ViewportId, options: Options) {
        session_entry(&mut self.sessions, viewport, &self.config, self.unsupported).set_options(options);
    }

    /// State of `viewport`; resets its presented-frame delta.
    pub fn get_state(&mut self, viewport: ViewportId, options: Option<&Options>) -> State {
        session_entry(&mut self.sessions, viewport, &self.config, self.unsupported).take_state(options)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn config(&self) -> &FrameGenConfig {
        &self.config
    }

    pub fn session(&self, viewport: ViewportId) -> Option<&GenerationSession> {
        self.sessions.get(&viewport)
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut C {
        &mut self.backend
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ComputeBackend, PresentApi, Rect, TaggedResourceRegistry};
    use crate::kernels::Kernel;
    use crate::pyramid::PyramidBuffer;
    use crate::software::{
        Event, SoftwareBackend, SoftwarePresenter, StaticConstantsProvider, StaticTagRegistry,
    };
    use framegen_common::{BufferType, CommonFrameConstants, Flags, ResourceHandle, TextureDesc};

    const VP: ViewportId = ViewportId(0);

    struct Host {
        fg: FrameGenerator<SoftwareBackend, SoftwarePresenter>,
        tags: StaticTagRegistry,
        constants: StaticConstantsProvider,
        frame: u64,
    }

    fn host_with(backend: SoftwareBackend, api: PresentApi, w: u32, h: u32) -> Host {
        let mut backend = backend;
        let desc = TextureDesc::new(w, h, Format::Rgba8Unorm);
        let presenter = SoftwarePresenter::new(&mut backend, api, desc, 3).unwrap();
        let mut fg = FrameGenerator::new(backend, presenter);
        let _ = fg.startup(FrameGenConfig::default());
        fg.set_constants(FrameToken(0), VP);
        fg.on_swapchain_created(Extent2D::new(w, h), Format::Rgba8Unorm).unwrap();
        fg.set_options(VP, Options::enabled());

        let mut host = Host {
            fg,
            tags: StaticTagRegistry::new(),
            constants: StaticConstantsProvider::new(),
            frame: 0,
        };
        for buffer in BufferType::MANDATORY {
            host.retag(buffer, w, h);
        }
        host.constants.set(VP, CommonFrameConstants::default());
        host
    }

    fn host(w: u32, h: u32) -> Host {
        host_with(SoftwareBackend::new(), PresentApi::Present, w, h)
    }

    impl Host {
        /// Tag a freshly allocated resource for `buffer`.
        fn retag(&mut self, buffer: BufferType, w: u32, h: u32) -> ResourceHandle {
            let format = match buffer {
                BufferType::Depth => Format::D32Float,
                BufferType::MotionVectors => Format::Rg16Float,
                _ => Format::Rgba8Unorm,
            };
            let handle = self
                .fg
                .backend_mut()
                .create_texture(TextureDesc::new(w, h, format), buffer.name())
                .unwrap();
            self.tags.tag(VP, buffer, handle);
            handle
        }

        fn present_at(&mut self, frame: FrameToken, params: Option<&PresentParameters>) -> PresentOutcome {
            self.fg.set_constants(frame, VP);
            let inputs = HostInputs {
                tags: &self.tags,
                constants: &self.constants,
            };
            self.fg.present(&inputs, 1, 0, params).unwrap()
        }

        fn present_with(&mut self, params: Option<&PresentParameters>) -> PresentOutcome {
            self.frame += 1;
            self.present_at(FrameToken(self.frame), params)
        }

        fn present(&mut self) -> u32 {
            self.present_with(None).presented
        }

        fn state(&mut self) -> State {
            self.fg.get_state(VP, None)
        }

        fn present_events(&self) -> usize {
            self.fg
                .backend()
                .events()
                .iter()
                .filter(|e| matches!(e, Event::Present { .. }))
                .count()
        }
    }

    // ---------------------------------------------------------
    //  Present scheduling
    // ---------------------------------------------------------

    #[test]
    fn test_first_frame_passes_through_and_snapshots() {
        let mut h = host(128, 128);
        let outcome = h.present_with(None);
        assert_eq!(outcome, PresentOutcome { skip_original: true, presented: 1 });

        let session = h.fg.session(VP).unwrap();
        for buffer in BufferType::MANDATORY {
            assert_eq!(session.snapshot().source(buffer), h.tags.get(buffer, VP));
            assert!(session.snapshot().previous(buffer).is_some());
        }
        assert!(!h
            .fg
            .backend()
            .events()
            .iter()
            .any(|e| matches!(e, Event::Dispatch { kernel: Kernel::Resolve, .. })));
    }

    #[test]
    fn test_steady_state_presents_twice() {
        let mut h = host(128, 128);
        h.present();
        assert_eq!(h.present(), 2);
        assert_eq!(h.present(), 2);
        assert_eq!(h.present_events(), 5);
        assert_eq!(h.state().frames_presented, 5);
    }

    #[test]
    fn test_show_only_interpolated_presents_once() {
        let mut h = host(128, 128);
        let mut options = Options::enabled();
        options.flags = Flags::SHOW_ONLY_INTERPOLATED_FRAME;
        h.fg.set_options(VP, options);
        h.present();
        assert_eq!(h.present(), 1);
        assert_eq!(h.present(), 1);
        assert_eq!(h.state().frames_presented, 3);
    }

    #[test]
    fn test_get_state_delta_resets() {
        let mut h = host(128, 128);
        h.present();
        h.present();
        assert_ne!(h.state().frames_presented, 0);
        assert_eq!(h.state().frames_presented, 0);
    }

    #[test]
    fn test_identity_change_forces_pass_through() {
        let mut h = host(128, 128);
        h.present();
        h.present();
        for buffer in BufferType::MANDATORY {
            let old_clone = h.fg.session(VP).unwrap().snapshot().previous(buffer);

            let replacement = h.retag(buffer, 128, 128);
            assert_eq!(h.present(), 1, "{}", buffer.name());
            let snapshot = h.fg.session(VP).unwrap().snapshot();
            assert_eq!(snapshot.source(buffer), Some(replacement));
            assert_ne!(snapshot.previous(buffer), old_clone);

            assert_eq!(h.present(), 2, "{}", buffer.name());
        }
    }

    #[test]
    fn test_mode_back_on_restarts_from_fresh_snapshot() {
        let mut h = host(128, 128);
        let color = h.tags.get(BufferType::HudLessColor, VP).unwrap();
        h.fg.backend_mut().fill(color, [0.1, 0.1, 0.1, 1.0]).unwrap();
        h.present();
        h.present();

        h.fg.set_options(VP, Options::default());
        h.fg.backend_mut().fill(color, [0.9, 0.9, 0.9, 1.0]).unwrap();
        for _ in 0..5 {
            assert_eq!(h.present(), 0);
        }

        h.fg.set_options(VP, Options::enabled());
        assert_eq!(h.present(), 1);
        assert_eq!(h.present(), 2);
        let shown = h.fg.presenter().presented();
        let generated = shown[shown.len() - 2];
        let g = h.fg.backend().read_texel(generated, 64, 64).unwrap();
        assert!((g[0] - 0.9).abs() < 1.0e-5, "{:?}", g);
    }

    // ---------------------------------------------------------
    //  Resize and resolution limits
    // ---------------------------------------------------------

    #[test]
    fn test_resize_destroys_before_create_and_restarts() {
        let mut h = host(128, 128);
        h.present();
        h.present();
        let old: Vec<_> = h.fg.session(VP).unwrap().pyramid().handles().to_vec();
        h.fg.backend_mut().clear_events();

        h.fg.on_resize(Extent2D::new(256, 128), Format::Rgba8Unorm).unwrap();
        let events = h.fg.backend().events();
        let first_create = events
            .iter()
            .position(|e| matches!(e, Event::Create { .. }))
            .unwrap();
        let destroyed = events[..first_create]
            .iter()
            .filter(|e| matches!(e, Event::Destroy(d) if old.contains(d)))
            .count();
        assert_eq!(destroyed, old.len());

        let session = h.fg.session(VP).unwrap();
        assert_eq!(session.pyramid().extent(), Some(Extent2D::new(256, 128)));
        assert_eq!(session.state(), crate::scheduler::SchedulerState::FirstFrame);
    }

    #[test]
    fn test_resolution_too_low_passes_through() {
        let mut h = host(64, 64);
        assert_eq!(h.present(), 1);
        assert_eq!(h.present(), 1);
        let state = h.state();
        assert!(state.status.contains(Status::RESOLUTION_TOO_LOW));
        assert_eq!(state.min_width_or_height, 128);
        assert!(!h.fg.session(VP).unwrap().pyramid().is_allocated());
        let pyramid_creates = h
            .fg
            .backend()
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Create { name, .. } if name == PyramidBuffer::Backup.name()))
            .count();
        assert_eq!(pyramid_creates, 0);
    }

    #[test]
    fn test_releases_drain_with_frozen_host_frame() {
        let mut h = host(128, 128);
        let frozen = FrameToken(1);
        h.present_at(frozen, None);
        h.present_at(frozen, None);
        h.fg.on_resize(Extent2D::new(256, 128), Format::Rgba8Unorm).unwrap();
        assert!(h.fg.backend().pending_releases() > 0);

        for _ in 0..=h.fg.config().release_frame_delay {
            h.present_at(frozen, None);
        }
        assert_eq!(h.fg.backend().pending_releases(), 0);
    }

    // ---------------------------------------------------------
    //  Failure conditions
    // ---------------------------------------------------------

    #[test]
    fn test_missing_constants_recovers() {
        let mut h = host(128, 128);
        h.present();
        h.constants.remove(VP);
        assert_eq!(h.present(), 1);
        assert!(h.state().status.contains(Status::COMMON_CONSTANTS_INVALID));

        h.constants.set(VP, CommonFrameConstants::default());
        assert_eq!(h.present(), 2);
        assert!(h.state().status.is_ok());
    }

    #[test]
    fn test_missing_tag_recovers_after_refresh() {
        let mut h = host(128, 128);
        h.present();
        let mvec = h.tags.get(BufferType::MotionVectors, VP).unwrap();
        h.tags.untag(VP, BufferType::MotionVectors);
        assert_eq!(h.present(), 1);
        assert!(h.state().status.contains(Status::TAG_RESOURCES_INVALID));

        h.tags.tag(VP, BufferType::MotionVectors, mvec);
        // the snapshot has to be rebuilt first
        assert_eq!(h.present(), 1);
        assert_eq!(h.present(), 2);
    }

    #[test]
    fn test_missing_ui_is_not_a_failure() {
        let mut h = host(128, 128);
        assert!(h.tags.get(BufferType::UiColorAndAlpha, VP).is_none());
        h.present();
        assert_eq!(h.present(), 2);
        assert!(h.state().status.is_ok());
    }

    #[test]
    fn test_backend_failure_degrades_to_pass_through() {
        let mut h = host(128, 128);
        h.present();
        h.fg.backend_mut().set_failing_kernel(Some(Kernel::Reproject));
        assert_eq!(h.present(), 1);
        h.fg.backend_mut().set_failing_kernel(None);
        assert_eq!(h.present(), 2);
    }

    #[test]
    fn test_unsupported_hardware() {
        let mut h = host_with(SoftwareBackend::unsupported(), PresentApi::Present, 128, 128);
        assert!(h.fg.is_started());
        assert_eq!(h.present(), 1);
        assert_eq!(h.present(), 1);
        assert!(h.state().status.contains(Status::UNSUPPORTED_HARDWARE));
        assert!(!h.fg.session(VP).unwrap().pyramid().is_allocated());
    }

    #[test]
    fn test_startup_reports_unsupported() {
        let mut backend = SoftwareBackend::unsupported();
        let desc = TextureDesc::new(128, 128, Format::Rgba8Unorm);
        let presenter = SoftwarePresenter::new(&mut backend, PresentApi::Present, desc, 2).unwrap();
        let mut fg = FrameGenerator::new(backend, presenter);
        assert!(matches!(
            fg.startup(FrameGenConfig::default()),
            Err(FrameGenError::Unsupported(_))
        ));
    }

    // ---------------------------------------------------------
    //  Host API
    // ---------------------------------------------------------

    #[test]
    fn test_mode_off_leaves_present_to_host() {
        let mut h = host(128, 128);
        h.fg.set_options(VP, Options::default());
        let outcome = h.present_with(None);
        assert_eq!(outcome, PresentOutcome { skip_original: false, presented: 0 });
        assert_eq!(h.present_events(), 0);
    }

    #[test]
    fn test_present_before_startup_fails() {
        let mut backend = SoftwareBackend::new();
        let desc = TextureDesc::new(128, 128, Format::Rgba8Unorm);
        let presenter = SoftwarePresenter::new(&mut backend, PresentApi::Present, desc, 2).unwrap();
        let mut fg = FrameGenerator::new(backend, presenter);
        let tags = StaticTagRegistry::new();
        let constants = StaticConstantsProvider::new();
        let inputs = HostInputs {
            tags: &tags,
            constants: &constants,
        };
        assert!(matches!(fg.present(&inputs, 0, 0, None), Err(FrameGenError::NotStarted)));
        assert!(matches!(
            fg.on_resize(Extent2D::new(128, 128), Format::Rgba8Unorm),
            Err(FrameGenError::NotStarted)
        ));
    }

    #[test]
    fn test_present1_parameters_forwarded() {
        let mut h = host_with(SoftwareBackend::new(), PresentApi::Present1, 128, 128);
        let params = PresentParameters {
            dirty_rects: vec![Rect { left: 0, top: 0, right: 16, bottom: 16 }],
            ..Default::default()
        };
        h.present_with(Some(&params));
        assert_eq!(h.fg.presenter().last_params(), Some(&params));
    }

    #[test]
    fn test_get_state_for_new_viewport_estimates_from_options() {
        let mut h = host(128, 128);
        let mut options = Options::enabled();
        options.color_width = 1920;
        options.color_height = 1080;
        let state = h.fg.get_state(ViewportId(7), Some(&options));
        assert!(state.estimated_vram_bytes > 0);
        assert_eq!(state.frames_presented, 0);
        assert!(h.fg.session(ViewportId(7)).is_some());
    }

    #[test]
    fn test_vram_estimate_reported_after_present() {
        let mut h = host(128, 128);
        h.present();
        let small = h.state().estimated_vram_bytes;
        assert!(small > 0);
    }

    #[test]
    fn test_shutdown_releases_everything_owned() {
        let mut h = host(128, 128);
        h.present();
        h.present();
        h.fg.shutdown();
        // swapchain images and the host's tagged buffers remain
        assert_eq!(h.fg.backend().live_textures(), 3 + BufferType::MANDATORY.len());
        assert_eq!(h.fg.backend().pending_releases(), 0);
        assert!(!h.fg.is_started());
        assert!(h.fg.session(VP).is_none());
    }
}
