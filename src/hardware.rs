//! Hardware enumeration: adapters, device features/extensions, surface
//! capabilities.
//!
//! Everything in this module is a pure query result. Adapter information is
//! captured once when the instance enumerates hardware and never mutated.

use bitflags::bitflags;

use crate::swapchain::PresentMode;
use crate::types::TextureFormat;

bitflags! {
    /// Optional device features an application can request at device creation.
    ///
    /// Every requested feature must be contained in the adapter's supported
    /// set or device creation fails.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceFeatures: u32 {
        /// Non-solid fill rasterization (wireframe rendering).
        const WIREFRAME = 1 << 0;
        /// Anisotropic filtering for sampled images.
        const SAMPLER_ANISOTROPY = 1 << 1;
        /// Compute shader dispatch.
        const COMPUTE = 1 << 2;
    }
}

impl Default for DeviceFeatures {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Optional device extensions an application can request at device creation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceExtensions: u32 {
        /// Presentable swapchain support. Required for window output.
        const SWAPCHAIN = 1 << 0;
    }
}

impl Default for DeviceExtensions {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Capabilities a queue can be requested for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueCaps: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

/// Type of graphics adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterType {
    /// Discrete GPU (dedicated graphics card).
    Discrete,
    /// Integrated GPU (shared with CPU).
    Integrated,
    /// Software renderer.
    Software,
    /// Unknown adapter type.
    Unknown,
}

/// Known PCI vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterVendor {
    Nvidia,
    Amd,
    Intel,
    Other(u32),
}

impl AdapterVendor {
    /// Classify a PCI vendor id.
    pub fn from_pci_id(id: u32) -> Self {
        match id {
            0x10de => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            other => Self::Other(other),
        }
    }
}

/// Surface capabilities reported by an adapter for a window surface.
///
/// Only the explicit backend reports these; the implicit backend manages the
/// surface itself and exposes no capability block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceCaps {
    /// Supported swapchain formats, most preferred first.
    pub formats: Vec<TextureFormat>,
    /// Supported presentation modes.
    pub present_modes: Vec<PresentMode>,
    /// Minimum number of swapchain images.
    pub min_image_count: u32,
    /// Maximum number of swapchain images (0 means no limit).
    pub max_image_count: u32,
}

impl SurfaceCaps {
    /// Clamp a requested image count into the supported range.
    pub fn clamp_image_count(&self, requested: u32) -> u32 {
        let upper = if self.max_image_count == 0 {
            u32::MAX
        } else {
            self.max_image_count
        };
        requested.clamp(self.min_image_count, upper)
    }
}

/// Information about a physical graphics adapter.
///
/// Immutable once queried; lifetime is the process.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Adapter name.
    pub name: String,
    /// Adapter vendor.
    pub vendor: AdapterVendor,
    /// Device type (discrete, integrated, etc.).
    pub device_type: AdapterType,
    /// Features this adapter supports.
    pub supported_features: DeviceFeatures,
    /// Extensions this adapter supports.
    pub supported_extensions: DeviceExtensions,
    /// Surface capabilities, when the backend exposes surfaces.
    pub surface_caps: Option<SurfaceCaps>,
}

impl AdapterInfo {
    /// Rate an adapter for the default device pick.
    ///
    /// Discrete GPUs win over integrated, integrated over software.
    pub fn score(&self) -> u32 {
        match self.device_type {
            AdapterType::Discrete => 2000,
            AdapterType::Integrated => 500,
            AdapterType::Software => 100,
            AdapterType::Unknown => 0,
        }
    }

    /// Whether this adapter supports all of the given features.
    pub fn supports_features(&self, features: DeviceFeatures) -> bool {
        self.supported_features.contains(features)
    }

    /// Whether this adapter supports all of the given extensions.
    pub fn supports_extensions(&self, extensions: DeviceExtensions) -> bool {
        self.supported_extensions.contains(extensions)
    }
}

/// Names of the individual feature bits, for error reporting.
pub(crate) fn feature_names(features: DeviceFeatures) -> Vec<&'static str> {
    let mut names = Vec::new();
    if features.contains(DeviceFeatures::WIREFRAME) {
        names.push("wireframe");
    }
    if features.contains(DeviceFeatures::SAMPLER_ANISOTROPY) {
        names.push("sampler-anisotropy");
    }
    if features.contains(DeviceFeatures::COMPUTE) {
        names.push("compute");
    }
    names
}

/// Names of the individual extension bits, for error reporting.
pub(crate) fn extension_names(extensions: DeviceExtensions) -> Vec<&'static str> {
    let mut names = Vec::new();
    if extensions.contains(DeviceExtensions::SWAPCHAIN) {
        names.push("swapchain");
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(device_type: AdapterType) -> AdapterInfo {
        AdapterInfo {
            name: "Test".to_string(),
            vendor: AdapterVendor::Other(0),
            device_type,
            supported_features: DeviceFeatures::COMPUTE,
            supported_extensions: DeviceExtensions::SWAPCHAIN,
            surface_caps: None,
        }
    }

    #[test]
    fn discrete_outranks_integrated() {
        assert!(adapter(AdapterType::Discrete).score() > adapter(AdapterType::Integrated).score());
        assert!(adapter(AdapterType::Integrated).score() > adapter(AdapterType::Software).score());
    }

    #[test]
    fn feature_containment() {
        let a = adapter(AdapterType::Discrete);
        assert!(a.supports_features(DeviceFeatures::empty()));
        assert!(a.supports_features(DeviceFeatures::COMPUTE));
        assert!(!a.supports_features(DeviceFeatures::WIREFRAME));
    }

    #[test]
    fn image_count_clamping() {
        let caps = SurfaceCaps {
            formats: vec![TextureFormat::Bgra8Unorm],
            present_modes: vec![PresentMode::Fifo],
            min_image_count: 2,
            max_image_count: 4,
        };
        assert_eq!(caps.clamp_image_count(1), 2);
        assert_eq!(caps.clamp_image_count(3), 3);
        assert_eq!(caps.clamp_image_count(9), 4);

        let unbounded = SurfaceCaps {
            max_image_count: 0,
            ..caps
        };
        assert_eq!(unbounded.clamp_image_count(9), 9);
    }

    #[test]
    fn vendor_classification() {
        assert_eq!(AdapterVendor::from_pci_id(0x10de), AdapterVendor::Nvidia);
        assert_eq!(AdapterVendor::from_pci_id(0x1002), AdapterVendor::Amd);
        assert_eq!(AdapterVendor::from_pci_id(0x1234), AdapterVendor::Other(0x1234));
    }
}
