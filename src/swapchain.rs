//! Surface and swapchain management.
//!
//! A [`Surface`] ties a chain of presentable images to a window. It must be
//! configured before use and *reconfigured* (not merely resized) whenever it
//! becomes incompatible with the window, e.g. after a resize; reconfiguration
//! hands the outgoing swapchain to the backend as a migration hint.
//!
//! Image acquisition is driven by renderers as part of their frame loop; the
//! recoverable statuses (`out-of-date`, `surface-lost`) surface from
//! [`crate::Renderer::render`] as [`crate::AcquireError`], telling the caller
//! to reconfigure and retry.

use std::sync::{Arc, RwLock};

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::SurfaceBackend;
use crate::device::GraphicsDevice;
use crate::error::RenderError;
use crate::instance::GraphicsInstance;
use crate::types::TextureFormat;

/// Presentation mode for the swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// No synchronization. May tear, lowest latency.
    Immediate,
    /// Triple buffering. Low latency without tearing.
    Mailbox,
    /// VSync. No tearing, possibly higher latency. Always supported.
    #[default]
    Fifo,
    /// VSync with relaxed timing. May tear if a frame is late.
    FifoRelaxed,
}

/// Configuration for a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceConfiguration {
    /// The texture format for the swapchain images.
    pub format: TextureFormat,
    /// Width of the surface in pixels.
    pub width: u32,
    /// Height of the surface in pixels.
    pub height: u32,
    /// Presentation mode (vsync behavior).
    pub present_mode: PresentMode,
    /// Requested minimum image count; clamped into the adapter-reported
    /// [min, max] range at configuration.
    pub min_image_count: u32,
}

impl SurfaceConfiguration {
    /// Create a configuration with the common defaults.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            format: TextureFormat::Bgra8Unorm,
            width,
            height,
            present_mode: PresentMode::default(),
            min_image_count: 3,
        }
    }

    /// Set the texture format.
    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the present mode.
    pub fn with_present_mode(mut self, present_mode: PresentMode) -> Self {
        self.present_mode = present_mode;
        self
    }

    /// Set the requested minimum image count.
    pub fn with_min_image_count(mut self, count: u32) -> Self {
        self.min_image_count = count;
        self
    }
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Index of the acquired image in the swapchain.
    pub image_index: u32,
    /// The swapchain still works but no longer matches the surface exactly;
    /// may be ignored for one frame.
    pub suboptimal: bool,
}

/// A surface for presenting rendered frames to a window.
///
/// Created by [`GraphicsInstance::create_surface`]; configure with
/// [`Surface::configure`] before building a windowed renderer against it.
pub struct Surface {
    instance: Arc<GraphicsInstance>,
    config: RwLock<Option<SurfaceConfiguration>>,
    backend: RwLock<SurfaceBackend>,
}

impl Surface {
    pub(crate) fn new<W>(instance: Arc<GraphicsInstance>, window: &W) -> Result<Self, RenderError>
    where
        W: HasWindowHandle + HasDisplayHandle + Sync,
    {
        log::info!("Creating surface from window");
        let backend = match instance.backend() {
            #[cfg(feature = "dummy")]
            crate::backend::BackendContext::Dummy(_) => {
                SurfaceBackend::Dummy(crate::backend::dummy::DummySurface::new())
            }
            #[cfg(feature = "vulkan-backend")]
            crate::backend::BackendContext::Vulkan(ctx) => {
                SurfaceBackend::Vulkan(crate::backend::vulkan::VulkanSurface::new(ctx, window)?)
            }
            #[cfg(feature = "wgpu-backend")]
            crate::backend::BackendContext::Wgpu(ctx) => {
                SurfaceBackend::Wgpu(crate::backend::wgpu_impl::WgpuSurface::new(ctx, window)?)
            }
        };
        Ok(Self {
            instance,
            config: RwLock::new(None),
            backend: RwLock::new(backend),
        })
    }

    #[cfg(feature = "dummy")]
    pub(crate) fn new_dummy(instance: Arc<GraphicsInstance>) -> Self {
        Self {
            instance,
            config: RwLock::new(None),
            backend: RwLock::new(SurfaceBackend::Dummy(
                crate::backend::dummy::DummySurface::new(),
            )),
        }
    }

    /// Get the parent graphics instance.
    pub fn instance(&self) -> &Arc<GraphicsInstance> {
        &self.instance
    }

    /// Configure the surface for rendering.
    ///
    /// Must be called before acquiring images, and again whenever
    /// acquisition reports out-of-date or surface-lost. Reconfiguration
    /// passes the outgoing swapchain to the backend so its data can be
    /// migrated.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid for the device's
    /// adapter.
    pub fn configure(
        &self,
        device: &Arc<GraphicsDevice>,
        config: &SurfaceConfiguration,
    ) -> Result<(), RenderError> {
        if config.width == 0 || config.height == 0 {
            return Err(RenderError::InvalidParameter(
                "surface dimensions cannot be zero".to_string(),
            ));
        }

        if let Some(caps) = &device.adapter().surface_caps {
            if !caps.formats.contains(&config.format) {
                return Err(RenderError::InvalidParameter(format!(
                    "unsupported surface format: {:?}",
                    config.format
                )));
            }
        }

        log::info!(
            "Configuring surface: {}x{} {:?} {:?}",
            config.width,
            config.height,
            config.format,
            config.present_mode
        );

        {
            let mut backend = self.backend.write().unwrap();
            match (&mut *backend, device.backend()) {
                #[cfg(feature = "dummy")]
                (SurfaceBackend::Dummy(surface), crate::backend::DeviceBackend::Dummy(_)) => {
                    let caps = device.adapter().surface_caps.clone().ok_or_else(|| {
                        RenderError::Internal("dummy adapter lost surface caps".to_string())
                    })?;
                    surface.configure(&caps, config)?;
                }
                #[cfg(feature = "vulkan-backend")]
                (
                    SurfaceBackend::Vulkan(surface),
                    crate::backend::DeviceBackend::Vulkan(vk_device),
                ) => {
                    // Vulkan surface capabilities are a property of the
                    // (adapter, surface) pair; the backend queries them live.
                    surface.configure(vk_device, config)?;
                }
                #[cfg(feature = "wgpu-backend")]
                (SurfaceBackend::Wgpu(surface), crate::backend::DeviceBackend::Wgpu(wgpu_device)) => {
                    surface.configure(wgpu_device, config)?;
                }
                #[allow(unreachable_patterns)]
                _ => {
                    return Err(RenderError::Internal(
                        "surface and device were created by different backends".to_string(),
                    ))
                }
            }
        }

        *self.config.write().unwrap() = Some(config.clone());
        Ok(())
    }

    /// The current configuration, if set.
    pub fn config(&self) -> Option<SurfaceConfiguration> {
        self.config.read().unwrap().clone()
    }

    /// The number of images in the configured swapchain, clamped into the
    /// adapter-reported range. `None` before configuration and on the
    /// implicit backend, which does not expose its internal image count.
    pub fn image_count(&self) -> Option<u32> {
        let backend = self.backend.read().unwrap();
        match &*backend {
            #[cfg(feature = "dummy")]
            SurfaceBackend::Dummy(surface) => surface.image_count(),
            #[cfg(feature = "vulkan-backend")]
            SurfaceBackend::Vulkan(surface) => surface.image_count(),
            #[cfg(feature = "wgpu-backend")]
            SurfaceBackend::Wgpu(surface) => surface.image_count(),
        }
    }

    /// The surface capabilities the device's adapter reports for this
    /// surface. Absent on the implicit backend, which manages the surface
    /// itself.
    pub fn capabilities(&self, device: &Arc<GraphicsDevice>) -> Option<crate::hardware::SurfaceCaps> {
        let backend = self.backend.read().unwrap();
        match (&*backend, device.backend()) {
            #[cfg(feature = "dummy")]
            (SurfaceBackend::Dummy(_), _) => device.adapter().surface_caps.clone(),
            #[cfg(feature = "vulkan-backend")]
            (SurfaceBackend::Vulkan(surface), crate::backend::DeviceBackend::Vulkan(vk_device)) => {
                surface.capabilities(vk_device).ok()
            }
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// The actual swapchain image format chosen at configuration, which may
    /// differ from the requested one when the adapter does not support it.
    pub fn format(&self) -> Option<TextureFormat> {
        let backend = self.backend.read().unwrap();
        match &*backend {
            #[cfg(feature = "vulkan-backend")]
            SurfaceBackend::Vulkan(surface) => surface.format(),
            #[allow(unreachable_patterns)]
            _ => self.config().map(|c| c.format),
        }
    }

    pub(crate) fn backend(&self) -> std::sync::RwLockReadGuard<'_, SurfaceBackend> {
        self.backend.read().unwrap()
    }

    pub(crate) fn backend_mut(&self) -> std::sync::RwLockWriteGuard<'_, SurfaceBackend> {
        self.backend.write().unwrap()
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("config", &self.config())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_builder() {
        let config = SurfaceConfiguration::new(1920, 1080)
            .with_format(TextureFormat::Rgba8Unorm)
            .with_present_mode(PresentMode::Mailbox)
            .with_min_image_count(2);
        assert_eq!(config.width, 1920);
        assert_eq!(config.height, 1080);
        assert_eq!(config.format, TextureFormat::Rgba8Unorm);
        assert_eq!(config.present_mode, PresentMode::Mailbox);
        assert_eq!(config.min_image_count, 2);
    }

    #[test]
    fn present_mode_default_is_fifo() {
        assert_eq!(PresentMode::default(), PresentMode::Fifo);
    }
}
