//! Explicit Vulkan backend, built on ash.
//!
//! This backend owns every synchronization decision the API leaves to the
//! application: per-frame semaphores and fences, image layout transitions,
//! and command buffer lifecycles. The front-end state machines in
//! [`crate::command`] and [`crate::frame`] are driven verbatim here.

mod component;
mod conversion;
mod device;
mod renderer;
mod swapchain;
mod sync;

pub(crate) use device::VulkanDevice;
pub(crate) use renderer::VulkanRenderer;
pub(crate) use swapchain::VulkanSurface;

pub(crate) use component::VulkanComponent;

use std::ffi::CStr;

use ash::vk;

use crate::error::RenderError;
use crate::hardware::{
    AdapterInfo, AdapterType, AdapterVendor, DeviceExtensions, DeviceFeatures,
};

/// The Vulkan backend context: entry points, instance, and the adapter set
/// captured at creation.
pub(crate) struct VulkanContext {
    entry: ash::Entry,
    instance: ash::Instance,
    physical_devices: Vec<vk::PhysicalDevice>,
    adapters: Vec<AdapterInfo>,
}

impl VulkanContext {
    pub(crate) fn new() -> Result<Self, RenderError> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| RenderError::BackendUnavailable(e.to_string()))?;

        let app_name = CStr::from_bytes_with_nul(b"render-core\0").unwrap();
        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(app_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        // Enable the surface extension plus whichever platform surface
        // extensions the loader offers; the instance is created before any
        // window exists.
        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(|e| RenderError::BackendUnavailable(e.to_string()))?;
        let wanted: &[&CStr] = &[
            ash::khr::surface::NAME,
            ash::khr::xlib_surface::NAME,
            ash::khr::xcb_surface::NAME,
            ash::khr::wayland_surface::NAME,
            ash::khr::win32_surface::NAME,
            ash::khr::android_surface::NAME,
            ash::ext::metal_surface::NAME,
        ];
        let extensions: Vec<*const std::ffi::c_char> = wanted
            .iter()
            .filter(|name| {
                available.iter().any(|props| {
                    let available_name =
                        unsafe { CStr::from_ptr(props.extension_name.as_ptr()) };
                    available_name == **name
                })
            })
            .map(|name| name.as_ptr())
            .collect();

        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions);

        let instance = unsafe { entry.create_instance(&instance_info, None) }
            .map_err(|e| RenderError::BackendUnavailable(e.to_string()))?;

        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| RenderError::BackendUnavailable(e.to_string()))?;
        if physical_devices.is_empty() {
            unsafe { instance.destroy_instance(None) };
            return Err(RenderError::BackendUnavailable(
                "no Vulkan-capable adapters found".to_string(),
            ));
        }

        let adapters = physical_devices
            .iter()
            .map(|&pdev| query_adapter_info(&instance, pdev))
            .collect();

        Ok(Self {
            entry,
            instance,
            physical_devices,
            adapters,
        })
    }

    pub(crate) fn name(&self) -> &'static str {
        "Vulkan"
    }

    pub(crate) fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub(crate) fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub(crate) fn physical_device(&self, adapter_index: usize) -> vk::PhysicalDevice {
        self.physical_devices[adapter_index]
    }

    pub(crate) fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        self.adapters.clone()
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

/// Capture the immutable adapter description for one physical device.
///
/// Surface capabilities are absent at enumeration time: they are a property
/// of (adapter, surface) and no surface exists yet. The surface queries them
/// live when it is configured.
fn query_adapter_info(instance: &ash::Instance, pdev: vk::PhysicalDevice) -> AdapterInfo {
    let props = unsafe { instance.get_physical_device_properties(pdev) };
    let features = unsafe { instance.get_physical_device_features(pdev) };

    let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
        .to_str()
        .unwrap_or("Unknown Adapter")
        .to_string();

    let device_type = match props.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => AdapterType::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterType::Integrated,
        vk::PhysicalDeviceType::CPU => AdapterType::Software,
        _ => AdapterType::Unknown,
    };

    // Compute is mandatory in Vulkan; the optional bits map to physical
    // device features.
    let mut supported_features = DeviceFeatures::COMPUTE;
    if features.fill_mode_non_solid == vk::TRUE {
        supported_features |= DeviceFeatures::WIREFRAME;
    }
    if features.sampler_anisotropy == vk::TRUE {
        supported_features |= DeviceFeatures::SAMPLER_ANISOTROPY;
    }

    let mut supported_extensions = DeviceExtensions::empty();
    if let Ok(extensions) = unsafe { instance.enumerate_device_extension_properties(pdev) } {
        let has_swapchain = extensions.iter().any(|props| {
            let name = unsafe { CStr::from_ptr(props.extension_name.as_ptr()) };
            name == ash::khr::swapchain::NAME
        });
        if has_swapchain {
            supported_extensions |= DeviceExtensions::SWAPCHAIN;
        }
    }

    log::info!(
        "Found GPU: {name} (type: {device_type:?}, vendor: 0x{:x})",
        props.vendor_id
    );

    AdapterInfo {
        name,
        vendor: AdapterVendor::from_pci_id(props.vendor_id),
        device_type,
        supported_features,
        supported_extensions,
        surface_caps: None,
    }
}
