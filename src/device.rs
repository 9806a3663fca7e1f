//! Graphics device.
//!
//! A [`GraphicsDevice`] is an application's negotiated interface to one
//! adapter: exactly the requested feature/extension subset, plus the queues
//! the adapter's families provide. Renderers hold an `Arc` of their device
//! and devices hold an `Arc` of their instance, so the strict
//! child-before-parent destruction order falls out of drop order.

use std::sync::Arc;

use crate::backend::DeviceBackend;
use crate::error::RenderError;
use crate::hardware::{AdapterInfo, DeviceExtensions, DeviceFeatures, QueueCaps};
use crate::instance::GraphicsInstance;
use crate::renderer::{Renderer, RendererDescriptor};

/// A queue exposed by a logical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queue {
    /// Index of the native queue family.
    pub family_index: u32,
    /// Capabilities the family supports.
    pub caps: QueueCaps,
    /// Whether the family can present to a surface.
    pub supports_present: bool,
}

/// A negotiated logical device.
///
/// Created by [`GraphicsInstance::create_device`]. The feature and extension
/// sets returned by [`GraphicsDevice::features`] / [`extensions`] are exactly
/// what was requested and validated at creation.
///
/// [`extensions`]: GraphicsDevice::extensions
pub struct GraphicsDevice {
    instance: Arc<GraphicsInstance>,
    adapter: AdapterInfo,
    features: DeviceFeatures,
    extensions: DeviceExtensions,
    backend: DeviceBackend,
}

impl GraphicsDevice {
    pub(crate) fn new(
        instance: Arc<GraphicsInstance>,
        adapter: AdapterInfo,
        features: DeviceFeatures,
        extensions: DeviceExtensions,
        backend: DeviceBackend,
    ) -> Self {
        Self {
            instance,
            adapter,
            features,
            extensions,
            backend,
        }
    }

    /// Get the parent instance.
    pub fn instance(&self) -> &Arc<GraphicsInstance> {
        &self.instance
    }

    /// Name of the adapter this device was created on.
    pub fn name(&self) -> &str {
        &self.adapter.name
    }

    /// The adapter this device was created on.
    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    /// The features negotiated at creation.
    pub fn features(&self) -> DeviceFeatures {
        self.features
    }

    /// The extensions negotiated at creation.
    pub fn extensions(&self) -> DeviceExtensions {
        self.extensions
    }

    pub(crate) fn backend(&self) -> &DeviceBackend {
        &self.backend
    }

    /// Look up a queue with the requested capabilities.
    ///
    /// Returns `None` rather than failing when no matching queue family
    /// exists, so the caller can fall back to a weaker capability mask.
    pub fn queue(&self, caps: QueueCaps, requires_present: bool) -> Option<Queue> {
        let family = match &self.backend {
            #[cfg(feature = "dummy")]
            DeviceBackend::Dummy(d) => d.queue_family(caps, requires_present),
            #[cfg(feature = "vulkan-backend")]
            DeviceBackend::Vulkan(d) => d.queue_family(caps, requires_present),
            #[cfg(feature = "wgpu-backend")]
            DeviceBackend::Wgpu(d) => d.queue_family(caps, requires_present),
        };
        family.map(|(family_index, caps, supports_present)| Queue {
            family_index,
            caps,
            supports_present,
        })
    }

    /// Block until all submitted GPU work has completed.
    ///
    /// Used at teardown and before destructive edits; after a teardown-time
    /// wait no further GPU work may be issued.
    pub fn wait_idle(&self) {
        self.backend.wait_idle();
    }

    /// Build a renderer from a descriptor.
    ///
    /// This realizes every resource as a backend component, derives the
    /// shader binding table, uploads static resource data, and compiles the
    /// backend pipeline state.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the descriptor is incomplete
    /// (missing shader stages, missing output) or a resource flag
    /// combination is invalid.
    pub fn create_renderer(self: &Arc<Self>, descriptor: RendererDescriptor) -> Result<Renderer, RenderError> {
        Renderer::build(Arc::clone(self), descriptor)
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("name", &self.adapter.name)
            .field("features", &self.features)
            .field("extensions", &self.extensions)
            .finish()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::instance::DeviceRequest;

    fn create_test_device() -> Arc<GraphicsDevice> {
        let instance = GraphicsInstance::with_backend(BackendKind::Dummy).unwrap();
        instance.create_device(&DeviceRequest::new()).unwrap()
    }

    #[test]
    fn zero_feature_device_has_empty_sets() {
        let device = create_test_device();
        assert!(device.features().is_empty());
        assert!(device.extensions().is_empty());
    }

    #[test]
    fn negotiated_features_are_exactly_the_request() {
        let instance = GraphicsInstance::with_backend(BackendKind::Dummy).unwrap();
        let device = instance
            .create_device(&DeviceRequest::new().with_features(DeviceFeatures::COMPUTE))
            .unwrap();
        assert_eq!(device.features(), DeviceFeatures::COMPUTE);
    }

    #[test]
    fn queue_lookup_returns_none_for_unsupported_caps() {
        let device = create_test_device();
        let queue = device.queue(QueueCaps::GRAPHICS, true);
        assert!(queue.is_some());
        assert!(queue.unwrap().supports_present);

        // The dummy device has a single do-everything family; an impossible
        // mask comes back as None, not an error.
        let none = device.queue(QueueCaps::from_bits_retain(1 << 31), false);
        assert!(none.is_none());
    }
}
