//! Implicit, driver-managed backend built on wgpu.
//!
//! Synchronization, image layouts and descriptor lifetimes are handled by
//! the driver here; the backend's job is to map the front-end's binding
//! table and render state onto wgpu objects and to keep dynamic resource
//! data flowing through the queue.

mod component;
mod conversion;
mod renderer;
mod swapchain;

pub(crate) use renderer::WgpuRenderer;
pub(crate) use swapchain::WgpuSurface;

pub(crate) use component::WgpuComponent;

use crate::error::RenderError;
use crate::hardware::{
    AdapterInfo, AdapterType, AdapterVendor, DeviceExtensions, DeviceFeatures, QueueCaps,
};

/// The wgpu backend context.
pub(crate) struct WgpuContext {
    instance: wgpu::Instance,
    adapters: Vec<wgpu::Adapter>,
    adapter_infos: Vec<AdapterInfo>,
}

impl WgpuContext {
    pub(crate) fn new() -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapters = instance.enumerate_adapters(wgpu::Backends::all());
        if adapters.is_empty() {
            return Err(RenderError::BackendUnavailable(
                "no wgpu-compatible adapters found".to_string(),
            ));
        }

        let adapter_infos = adapters.iter().map(query_adapter_info).collect();

        Ok(Self {
            instance,
            adapters,
            adapter_infos,
        })
    }

    pub(crate) fn name(&self) -> &'static str {
        "wgpu"
    }

    pub(crate) fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    pub(crate) fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        self.adapter_infos.clone()
    }
}

fn query_adapter_info(adapter: &wgpu::Adapter) -> AdapterInfo {
    let info = adapter.get_info();
    let device_type = match info.device_type {
        wgpu::DeviceType::DiscreteGpu => AdapterType::Discrete,
        wgpu::DeviceType::IntegratedGpu => AdapterType::Integrated,
        wgpu::DeviceType::Cpu => AdapterType::Software,
        _ => AdapterType::Unknown,
    };

    // Compute and anisotropic sampling are core in wgpu; wireframe maps to
    // the line polygon mode feature.
    let mut supported_features = DeviceFeatures::COMPUTE | DeviceFeatures::SAMPLER_ANISOTROPY;
    if adapter
        .features()
        .contains(wgpu::Features::POLYGON_MODE_LINE)
    {
        supported_features |= DeviceFeatures::WIREFRAME;
    }

    log::info!(
        "Found GPU: {} (type: {:?}, backend: {:?})",
        info.name,
        info.device_type,
        info.backend
    );

    AdapterInfo {
        name: info.name.clone(),
        vendor: AdapterVendor::from_pci_id(info.vendor),
        device_type,
        supported_features,
        // Surfaces are always available through the driver.
        supported_extensions: DeviceExtensions::SWAPCHAIN,
        // The implicit backend manages the swapchain itself and reports no
        // surface capability block.
        surface_caps: None,
    }
}

/// The wgpu logical device.
pub(crate) struct WgpuDevice {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl WgpuDevice {
    pub(crate) fn new(
        ctx: &WgpuContext,
        adapter_index: usize,
        features: DeviceFeatures,
    ) -> Result<Self, RenderError> {
        let adapter = ctx.adapters[adapter_index].clone();

        let mut required_features = wgpu::Features::empty();
        if features.contains(DeviceFeatures::WIREFRAME) {
            required_features |= wgpu::Features::POLYGON_MODE_LINE;
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("render-core device"),
            required_features,
            required_limits: wgpu::Limits::default(),
            ..Default::default()
        }))
        .map_err(|e| RenderError::ResourceCreationFailed(format!("device creation failed: {e}")))?;

        log::info!("Created wgpu device on {}", adapter.get_info().name);

        Ok(Self {
            adapter,
            device,
            queue,
        })
    }

    pub(crate) fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub(crate) fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub(crate) fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// wgpu exposes one implicit queue that does everything and presents.
    pub(crate) fn queue_family(
        &self,
        caps: QueueCaps,
        _requires_present: bool,
    ) -> Option<(u32, QueueCaps, bool)> {
        let supported = QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::TRANSFER;
        supported.contains(caps).then_some((0, supported, true))
    }

    pub(crate) fn wait_idle(&self) {
        let _ = self.device.poll(wgpu::PollType::Wait);
    }
}
