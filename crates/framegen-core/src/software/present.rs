//! Presentation over a ring of software swapchain images.

use framegen_common::{ResourceHandle, TextureDesc};

use super::{Event, SoftwareBackend};
use crate::backend::{ComputeBackend, PresentApi, PresentBackend, PresentParameters};
use crate::error::{FrameGenError, Result};

#[derive(Debug)]
pub struct SoftwarePresenter {
    api: PresentApi,
    images: Vec<ResourceHandle>,
    current: usize,
    /// Surfaces in the order they were presented.
    presented: Vec<ResourceHandle>,
    last_params: Option<PresentParameters>,
    fail_presents: bool,
}

impl SoftwarePresenter {
    /// Create `image_count` swapchain images of `desc` on `backend`.
    pub fn new(
        backend: &mut SoftwareBackend,
        api: PresentApi,
        desc: TextureDesc,
        image_count: u32,
    ) -> Result<Self> {
        let mut presenter = Self {
            api,
            images: Vec::new(),
            current: 0,
            presented: Vec::new(),
            last_params: None,
            fail_presents: false,
        };
        presenter.recreate(backend, desc, image_count)?;
        Ok(presenter)
    }

    /// Replace the swapchain images, as a host resize would.
    pub fn recreate(&mut self, backend: &mut SoftwareBackend, desc: TextureDesc, image_count: u32) -> Result<()> {
        for h in self.images.drain(..) {
            backend.destroy_resource(h, 0);
        }
        for i in 0..image_count.max(1) {
            let h = backend.create_texture(desc, &format!("swapchain image {}", i))?;
            self.images.push(h);
        }
        self.current = 0;
        Ok(())
    }

    pub fn images(&self) -> &[ResourceHandle] {
        &self.images
    }

    pub fn current_image(&self) -> Option<ResourceHandle> {
        self.images.get(self.current).copied()
    }

    pub fn presented(&self) -> &[ResourceHandle] {
        &self.presented
    }

    pub fn last_params(&self) -> Option<&PresentParameters> {
        self.last_params.as_ref()
    }

    pub fn set_fail_presents(&mut self, fail: bool) {
        self.fail_presents = fail;
    }
}

impl PresentBackend<SoftwareBackend> for SoftwarePresenter {
    fn api(&self) -> PresentApi {
        self.api
    }

    fn surface(&mut self, compute: &mut SoftwareBackend) -> Result<ResourceHandle> {
        let image = self
            .current_image()
            .ok_or_else(|| FrameGenError::Present("swapchain has no images".into()))?;
        compute
            .describe(image)
            .map(|_| image)
            .ok_or(FrameGenError::UnknownResource(image))
    }

    fn present(
        &mut self,
        compute: &mut SoftwareBackend,
        sync_interval: u32,
        _flags: u32,
        params: Option<&PresentParameters>,
    ) -> Result<()> {
        if self.fail_presents {
            return Err(FrameGenError::Present("device lost".into()));
        }
        let surface = self.surface(compute)?;
        if self.api == PresentApi::Present1 {
            self.last_params = params.cloned();
        }
        compute.record(Event::Present {
            surface,
            api: self.api,
            sync_interval,
        });
        self.presented.push(surface);
        self.current = (self.current + 1) % self.images.len();
        Ok(())
    }
}
