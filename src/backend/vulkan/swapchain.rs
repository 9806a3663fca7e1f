//! Vulkan surface and swapchain.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use super::conversion::{
    convert_format_back, convert_present_mode, convert_present_mode_back, convert_texture_format,
};
use super::{VulkanContext, VulkanDevice};
use crate::command::TrackedLayout;
use crate::error::{AcquireError, RenderError};
use crate::hardware::SurfaceCaps;
use crate::swapchain::{AcquiredImage, SurfaceConfiguration};
use crate::types::TextureFormat;

/// The native swapchain plus everything tied to its images.
pub(crate) struct VulkanSwapchainData {
    device: ash::Device,
    swapchain_fn: ash::khr::swapchain::Device,
    pub(crate) swapchain: vk::SwapchainKHR,
    pub(crate) images: Vec<vk::Image>,
    pub(crate) views: Vec<vk::ImageView>,
    pub(crate) layouts: Vec<TrackedLayout>,
    pub(crate) format: vk::Format,
    pub(crate) extent: vk::Extent2D,
}

impl VulkanSwapchainData {
    fn destroy(&mut self) {
        if self.swapchain == vk::SwapchainKHR::null() {
            return;
        }
        unsafe {
            let _ = self.device.device_wait_idle();
            for view in self.views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.swapchain_fn.destroy_swapchain(self.swapchain, None);
            self.swapchain = vk::SwapchainKHR::null();
        }
    }
}

impl Drop for VulkanSwapchainData {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A Vulkan window surface and its current swapchain.
pub(crate) struct VulkanSurface {
    surface: vk::SurfaceKHR,
    surface_fn: ash::khr::surface::Instance,
    swapchain: Option<VulkanSwapchainData>,
    generation: u64,
}

impl VulkanSurface {
    pub(crate) fn new<W>(ctx: &VulkanContext, window: &W) -> Result<Self, RenderError>
    where
        W: HasWindowHandle + HasDisplayHandle + Sync,
    {
        let display_handle = window.display_handle().map_err(|e| {
            RenderError::ResourceCreationFailed(format!("failed to get display handle: {e}"))
        })?;
        let window_handle = window.window_handle().map_err(|e| {
            RenderError::ResourceCreationFailed(format!("failed to get window handle: {e}"))
        })?;

        let surface = unsafe {
            ash_window::create_surface(
                ctx.entry(),
                ctx.instance(),
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!("failed to create surface: {e:?}"))
        })?;

        let surface_fn = ash::khr::surface::Instance::new(ctx.entry(), ctx.instance());

        Ok(Self {
            surface,
            surface_fn,
            swapchain: None,
            generation: 0,
        })
    }

    /// Query the live surface capabilities for this device's adapter.
    pub(crate) fn capabilities(&self, device: &VulkanDevice) -> Result<SurfaceCaps, RenderError> {
        let caps = unsafe {
            self.surface_fn
                .get_physical_device_surface_capabilities(device.physical_device(), self.surface)
        }
        .map_err(|e| RenderError::Internal(format!("surface capability query failed: {e:?}")))?;

        let formats = unsafe {
            self.surface_fn
                .get_physical_device_surface_formats(device.physical_device(), self.surface)
        }
        .map_err(|e| RenderError::Internal(format!("surface format query failed: {e:?}")))?;

        let present_modes = unsafe {
            self.surface_fn
                .get_physical_device_surface_present_modes(device.physical_device(), self.surface)
        }
        .map_err(|e| RenderError::Internal(format!("present mode query failed: {e:?}")))?;

        Ok(SurfaceCaps {
            formats: formats
                .iter()
                .filter_map(|f| convert_format_back(f.format))
                .collect(),
            present_modes: present_modes
                .iter()
                .filter_map(|&m| convert_present_mode_back(m))
                .collect(),
            min_image_count: caps.min_image_count,
            max_image_count: caps.max_image_count,
        })
    }

    /// (Re)create the swapchain for a configuration.
    ///
    /// The outgoing swapchain, when present, is handed to the driver as
    /// `old_swapchain` so backend data migrates; it is destroyed only after
    /// the replacement exists.
    pub(crate) fn configure(
        &mut self,
        device: &VulkanDevice,
        config: &SurfaceConfiguration,
    ) -> Result<(), RenderError> {
        let native_caps = unsafe {
            self.surface_fn
                .get_physical_device_surface_capabilities(device.physical_device(), self.surface)
        }
        .map_err(|e| RenderError::Internal(format!("surface capability query failed: {e:?}")))?;

        let formats = unsafe {
            self.surface_fn
                .get_physical_device_surface_formats(device.physical_device(), self.surface)
        }
        .map_err(|e| RenderError::Internal(format!("surface format query failed: {e:?}")))?;
        let surface_format = formats
            .iter()
            .find(|f| f.format == convert_texture_format(config.format))
            .copied()
            .unwrap_or(formats[0]);

        let present_modes = unsafe {
            self.surface_fn
                .get_physical_device_surface_present_modes(device.physical_device(), self.surface)
        }
        .map_err(|e| RenderError::Internal(format!("present mode query failed: {e:?}")))?;
        let wanted_mode = convert_present_mode(config.present_mode);
        let present_mode = if present_modes.contains(&wanted_mode) {
            wanted_mode
        } else {
            vk::PresentModeKHR::FIFO
        };

        let extent = if native_caps.current_extent.width != u32::MAX {
            native_caps.current_extent
        } else {
            vk::Extent2D {
                width: config.width.clamp(
                    native_caps.min_image_extent.width,
                    native_caps.max_image_extent.width,
                ),
                height: config.height.clamp(
                    native_caps.min_image_extent.height,
                    native_caps.max_image_extent.height,
                ),
            }
        };

        // Clamp the requested count into the adapter-reported range.
        let range = SurfaceCaps {
            formats: Vec::new(),
            present_modes: Vec::new(),
            min_image_count: native_caps.min_image_count,
            max_image_count: native_caps.max_image_count,
        };
        let image_count = range.clamp_image_count(config.min_image_count);

        let old_swapchain = self
            .swapchain
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |s| s.swapchain);

        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(native_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe {
            device
                .swapchain_fn()
                .create_swapchain(&swapchain_info, None)
        }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!("failed to create swapchain: {e:?}"))
        })?;

        // The replacement exists; now the outgoing swapchain can go.
        if let Some(mut old) = self.swapchain.take() {
            old.destroy();
        }

        let images = unsafe { device.swapchain_fn().get_swapchain_images(swapchain) }.map_err(
            |e| {
                RenderError::ResourceCreationFailed(format!(
                    "failed to get swapchain images: {e:?}"
                ))
            },
        )?;

        let views = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                unsafe { device.device().create_image_view(&view_info, None) }
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!(
                    "failed to create swapchain image views: {e:?}"
                ))
            })?;

        let layouts = images.iter().map(|_| TrackedLayout::new()).collect();

        log::info!(
            "Created Vulkan swapchain: {}x{} with {} images",
            extent.width,
            extent.height,
            images.len()
        );

        self.swapchain = Some(VulkanSwapchainData {
            device: device.device().clone(),
            swapchain_fn: device.swapchain_fn().clone(),
            swapchain,
            images,
            views,
            layouts,
            format: surface_format.format,
            extent,
        });
        self.generation += 1;
        Ok(())
    }

    pub(crate) fn image_count(&self) -> Option<u32> {
        self.swapchain.as_ref().map(|s| s.images.len() as u32)
    }

    pub(crate) fn generation(&self) -> Option<u64> {
        self.swapchain.as_ref().map(|_| self.generation)
    }

    pub(crate) fn data(&self) -> Option<&VulkanSwapchainData> {
        self.swapchain.as_ref()
    }

    pub(crate) fn data_mut(&mut self) -> Option<&mut VulkanSwapchainData> {
        self.swapchain.as_mut()
    }

    pub(crate) fn format(&self) -> Option<TextureFormat> {
        self.swapchain.as_ref().and_then(|s| convert_format_back(s.format))
    }

    /// Acquire the next image, to be signalled on `semaphore`.
    ///
    /// The acquired image is not usable until the semaphore wait the
    /// subsequent submission performs.
    pub(crate) fn acquire(
        &mut self,
        semaphore: vk::Semaphore,
    ) -> Result<AcquiredImage, AcquireError> {
        let data = self
            .swapchain
            .as_mut()
            .ok_or_else(|| AcquireError::Other("surface not configured".to_string()))?;
        let result = unsafe {
            data.swapchain_fn.acquire_next_image(
                data.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquiredImage {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(AcquireError::OutOfDate),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Err(AcquireError::SurfaceLost),
            Err(e) => Err(AcquireError::Other(format!("{e:?}"))),
        }
    }

    /// Present an acquired image, waiting on `render_finished`.
    pub(crate) fn present(
        &mut self,
        queue: vk::Queue,
        render_finished: vk::Semaphore,
        image_index: u32,
    ) -> Result<bool, AcquireError> {
        let data = self
            .swapchain
            .as_mut()
            .ok_or_else(|| AcquireError::Other("surface not configured".to_string()))?;
        let swapchains = [data.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [render_finished];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let result = unsafe {
            data.swapchain_fn
                .queue_present(queue, &present_info)
        };
        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(AcquireError::OutOfDate),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Err(AcquireError::SurfaceLost),
            Err(e) => Err(AcquireError::Other(format!("{e:?}"))),
        }
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        self.swapchain = None;
        unsafe {
            self.surface_fn.destroy_surface(self.surface, None);
        }
    }
}
