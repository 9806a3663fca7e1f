//! Vulkan logical device negotiation.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;

use super::VulkanContext;
use crate::error::RenderError;
use crate::hardware::{DeviceExtensions, DeviceFeatures, QueueCaps};

/// The negotiated Vulkan logical device and its queues.
///
/// The feature/extension request was validated against the adapter before
/// this constructor runs; everything enabled here is known-supported.
pub(crate) struct VulkanDevice {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue_families: Vec<vk::QueueFamilyProperties>,
    graphics_queue: vk::Queue,
    command_pool: vk::CommandPool,
    allocator: Option<Arc<Mutex<Allocator>>>,
    swapchain_fn: ash::khr::swapchain::Device,
}

impl VulkanDevice {
    pub(crate) fn new(
        ctx: &VulkanContext,
        adapter_index: usize,
        features: DeviceFeatures,
        extensions: DeviceExtensions,
    ) -> Result<Self, RenderError> {
        let instance = ctx.instance().clone();
        let physical_device = ctx.physical_device(adapter_index);

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let graphics_queue_family = queue_families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .ok_or_else(|| {
                RenderError::ResourceCreationFailed(
                    "adapter exposes no graphics queue family".to_string(),
                )
            })? as u32;

        let queue_priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities);
        let queue_infos = [queue_info];

        let mut device_extensions: Vec<*const std::ffi::c_char> = Vec::new();
        if extensions.contains(DeviceExtensions::SWAPCHAIN) {
            device_extensions.push(ash::khr::swapchain::NAME.as_ptr());
        }

        let enabled_features = vk::PhysicalDeviceFeatures::default()
            .fill_mode_non_solid(features.contains(DeviceFeatures::WIREFRAME))
            .sampler_anisotropy(features.contains(DeviceFeatures::SAMPLER_ANISOTROPY));

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&enabled_features);

        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!("failed to create logical device: {e:?}"))
            })?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| {
            unsafe { device.destroy_device(None) };
            RenderError::ResourceCreationFailed(format!("failed to create allocator: {e}"))
        })?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!("failed to create command pool: {e:?}"))
        })?;

        let swapchain_fn = ash::khr::swapchain::Device::new(&instance, &device);

        log::info!(
            "Created Vulkan device on queue family {graphics_queue_family} \
             (features: {features:?}, extensions: {extensions:?})"
        );

        Ok(Self {
            instance,
            physical_device,
            device,
            queue_families,
            graphics_queue,
            command_pool,
            allocator: Some(Arc::new(Mutex::new(allocator))),
            swapchain_fn,
        })
    }

    pub(crate) fn device(&self) -> &ash::Device {
        &self.device
    }

    pub(crate) fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[allow(dead_code)]
    pub(crate) fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub(crate) fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub(crate) fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub(crate) fn allocator(&self) -> Arc<Mutex<Allocator>> {
        self.allocator
            .clone()
            .expect("allocator already torn down")
    }

    pub(crate) fn swapchain_fn(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_fn
    }

    /// Find a queue family matching the capability mask. Returns `None`
    /// rather than failing so the caller can weaken the mask.
    pub(crate) fn queue_family(
        &self,
        caps: QueueCaps,
        requires_present: bool,
    ) -> Option<(u32, QueueCaps, bool)> {
        for (index, family) in self.queue_families.iter().enumerate() {
            let mut family_caps = QueueCaps::empty();
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                family_caps |= QueueCaps::GRAPHICS;
            }
            if family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
                family_caps |= QueueCaps::COMPUTE;
            }
            if family.queue_flags.contains(vk::QueueFlags::TRANSFER) {
                family_caps |= QueueCaps::TRANSFER;
            }
            // Without a surface to test against, graphics families are the
            // ones that can present on every platform this crate targets.
            let supports_present = family_caps.contains(QueueCaps::GRAPHICS);
            if family_caps.contains(caps) && (!requires_present || supports_present) {
                return Some((index as u32, family_caps, supports_present));
            }
        }
        None
    }

    pub(crate) fn wait_idle(&self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            // The allocator must go before the device it allocates from.
            drop(self.allocator.take());
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
    }
}
