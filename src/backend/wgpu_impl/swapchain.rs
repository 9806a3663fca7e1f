//! wgpu surface management.
//!
//! The driver owns the swapchain here: acquisition, presentation fencing and
//! image layouts are implicit. Only the configuration and the acquire/present
//! pair surface through this module.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use super::conversion::{convert_present_mode, convert_texture_format};
use super::{WgpuContext, WgpuDevice};
use crate::error::{AcquireError, RenderError};
use crate::swapchain::SurfaceConfiguration;

/// A wgpu window surface.
pub(crate) struct WgpuSurface {
    surface: wgpu::Surface<'static>,
    config: Option<wgpu::SurfaceConfiguration>,
    format: Option<wgpu::TextureFormat>,
    generation: u64,
}

impl WgpuSurface {
    pub(crate) fn new<W>(ctx: &WgpuContext, window: &W) -> Result<Self, RenderError>
    where
        W: HasWindowHandle + HasDisplayHandle + Sync,
    {
        // SAFETY: the caller guarantees the window handle outlives the
        // surface; the transmute satisfies wgpu's 'static requirement.
        let surface: wgpu::Surface<'static> = unsafe {
            std::mem::transmute(ctx.instance().create_surface(window).map_err(|e| {
                RenderError::ResourceCreationFailed(format!("failed to create surface: {e}"))
            })?)
        };
        Ok(Self {
            surface,
            config: None,
            format: None,
            generation: 0,
        })
    }

    /// (Re)configure the surface. wgpu recreates the swapchain internally,
    /// migrating from the previous configuration.
    pub(crate) fn configure(
        &mut self,
        device: &WgpuDevice,
        config: &SurfaceConfiguration,
    ) -> Result<(), RenderError> {
        let caps = self.surface.get_capabilities(device.adapter());
        let wanted = convert_texture_format(config.format);
        let format = if caps.formats.contains(&wanted) {
            wanted
        } else {
            *caps.formats.first().ok_or_else(|| {
                RenderError::ResourceCreationFailed(
                    "surface reports no supported formats".to_string(),
                )
            })?
        };
        let wanted_mode = convert_present_mode(config.present_mode);
        let present_mode = if caps.present_modes.contains(&wanted_mode) {
            wanted_mode
        } else {
            wgpu::PresentMode::Fifo
        };

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: config.width,
            height: config.height,
            present_mode,
            desired_maximum_frame_latency: 2,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
        };
        self.surface.configure(device.device(), &surface_config);
        self.config = Some(surface_config);
        self.format = Some(format);
        self.generation += 1;
        log::info!(
            "Configured wgpu surface: {}x{} {:?}",
            config.width,
            config.height,
            format
        );
        Ok(())
    }

    /// The driver does not expose its internal image count.
    pub(crate) fn image_count(&self) -> Option<u32> {
        None
    }

    pub(crate) fn generation(&self) -> Option<u64> {
        self.config.as_ref().map(|_| self.generation)
    }

    pub(crate) fn format(&self) -> Option<wgpu::TextureFormat> {
        self.format
    }

    /// Acquire the next presentable texture, mapping the driver's error
    /// space onto the shared status space.
    pub(crate) fn acquire(&mut self) -> Result<wgpu::SurfaceTexture, AcquireError> {
        if self.config.is_none() {
            return Err(AcquireError::Other("surface not configured".to_string()));
        }
        match self.surface.get_current_texture() {
            Ok(frame) => Ok(frame),
            Err(wgpu::SurfaceError::Outdated) => Err(AcquireError::OutOfDate),
            Err(wgpu::SurfaceError::Lost) => Err(AcquireError::SurfaceLost),
            Err(e) => Err(AcquireError::Other(e.to_string())),
        }
    }
}
