//! Graphics instance.
//!
//! The [`GraphicsInstance`] is the explicit context object for the rendering
//! core: it owns the backend state that native APIs would otherwise keep
//! global, is initialized once at startup and torn down once at shutdown,
//! and every call that needs backend state goes through it (or an object
//! holding it). No rendering call is possible outside its lifetime.

use std::sync::{Arc, RwLock, Weak};

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::{self, BackendContext, BackendKind};
use crate::device::GraphicsDevice;
use crate::error::RenderError;
use crate::hardware::{AdapterInfo, DeviceExtensions, DeviceFeatures};
use crate::swapchain::Surface;

/// A request for a logical device.
///
/// Every requested feature and extension must be contained in the chosen
/// adapter's supported set; anything else is a configuration bug and fails
/// device creation before any native object is created.
#[derive(Debug, Clone, Default)]
pub struct DeviceRequest {
    /// Index of the adapter to use (from
    /// [`GraphicsInstance::enumerate_adapters`]); best adapter when `None`.
    pub adapter_index: Option<usize>,
    /// Optional features to enable.
    pub features: DeviceFeatures,
    /// Optional extensions to enable.
    pub extensions: DeviceExtensions,
}

impl DeviceRequest {
    /// Request a device on the best adapter with no optional features.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a specific adapter.
    pub fn with_adapter(mut self, adapter_index: usize) -> Self {
        self.adapter_index = Some(adapter_index);
        self
    }

    /// Request optional features.
    pub fn with_features(mut self, features: DeviceFeatures) -> Self {
        self.features = features;
        self
    }

    /// Request optional extensions.
    pub fn with_extensions(mut self, extensions: DeviceExtensions) -> Self {
        self.extensions = extensions;
        self
    }
}

/// The graphics instance manages adapters, devices and surfaces.
///
/// # Thread Safety
///
/// `GraphicsInstance` is `Send + Sync` and can be shared across threads.
pub struct GraphicsInstance {
    self_ref: RwLock<Weak<GraphicsInstance>>,
    devices: RwLock<Vec<Arc<GraphicsDevice>>>,
    backend: BackendContext,
    adapters: Vec<AdapterInfo>,
}

impl GraphicsInstance {
    /// Create a new graphics instance, trying the real backends first and
    /// falling back to the dummy backend.
    ///
    /// # Errors
    ///
    /// Returns an error if no backend can be initialized.
    pub fn new() -> Result<Arc<Self>, RenderError> {
        Self::with_backend_choice(None)
    }

    /// Create an instance on a specific backend.
    ///
    /// # Errors
    ///
    /// Returns an error if that backend is unavailable.
    pub fn with_backend(kind: BackendKind) -> Result<Arc<Self>, RenderError> {
        Self::with_backend_choice(Some(kind))
    }

    fn with_backend_choice(kind: Option<BackendKind>) -> Result<Arc<Self>, RenderError> {
        log::info!("Creating GraphicsInstance");
        let backend = backend::create_context(kind)?;
        log::info!("Using GPU backend: {}", backend.name());
        let adapters = backend.enumerate_adapters();

        let instance = Arc::new(Self {
            self_ref: RwLock::new(Weak::new()),
            devices: RwLock::new(Vec::new()),
            backend,
            adapters,
        });
        *instance.self_ref.write().unwrap() = Arc::downgrade(&instance);
        Ok(instance)
    }

    pub(crate) fn backend(&self) -> &BackendContext {
        &self.backend
    }

    /// Which backend this instance runs on.
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    fn arc_self(&self) -> Result<Arc<GraphicsInstance>, RenderError> {
        self.self_ref
            .read()
            .unwrap()
            .upgrade()
            .ok_or_else(|| RenderError::Internal("instance has been dropped".to_string()))
    }

    /// Enumerate available graphics adapters.
    ///
    /// A pure query; the adapter set is captured when the instance is
    /// created and never changes.
    pub fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        self.adapters.clone()
    }

    /// Create a logical device.
    ///
    /// Feature and extension validation happens against the chosen adapter
    /// *before* any native device object is created, so a failed request
    /// leaks nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnsupportedFeature`] /
    /// [`RenderError::UnsupportedExtension`] on a validation failure, or a
    /// creation error from the backend.
    pub fn create_device(&self, request: &DeviceRequest) -> Result<Arc<GraphicsDevice>, RenderError> {
        let adapter_index = match request.adapter_index {
            Some(index) => {
                if index >= self.adapters.len() {
                    return Err(RenderError::InvalidParameter(format!(
                        "adapter index {index} out of range ({})",
                        self.adapters.len()
                    )));
                }
                index
            }
            None => self.best_adapter_index()?,
        };
        let adapter = &self.adapters[adapter_index];

        if !adapter.supports_features(request.features) {
            let missing = request.features.difference(adapter.supported_features);
            let err = RenderError::UnsupportedFeature {
                adapter: adapter.name.clone(),
                feature: crate::hardware::feature_names(missing).join(", "),
            };
            log::error!("Device creation rejected: {err}");
            return Err(err);
        }
        if !adapter.supports_extensions(request.extensions) {
            let missing = request.extensions.difference(adapter.supported_extensions);
            let err = RenderError::UnsupportedExtension {
                adapter: adapter.name.clone(),
                extension: crate::hardware::extension_names(missing).join(", "),
            };
            log::error!("Device creation rejected: {err}");
            return Err(err);
        }

        log::info!(
            "Creating device on adapter: {} ({:?})",
            adapter.name,
            adapter.device_type
        );

        let backend = match &self.backend {
            #[cfg(feature = "dummy")]
            BackendContext::Dummy(ctx) => crate::backend::DeviceBackend::Dummy(ctx.create_device()),
            #[cfg(feature = "vulkan-backend")]
            BackendContext::Vulkan(ctx) => crate::backend::DeviceBackend::Vulkan(
                crate::backend::vulkan::VulkanDevice::new(
                    ctx,
                    adapter_index,
                    request.features,
                    request.extensions,
                )?,
            ),
            #[cfg(feature = "wgpu-backend")]
            BackendContext::Wgpu(ctx) => crate::backend::DeviceBackend::Wgpu(
                crate::backend::wgpu_impl::WgpuDevice::new(ctx, adapter_index, request.features)?,
            ),
        };

        let device = Arc::new(GraphicsDevice::new(
            self.arc_self()?,
            adapter.clone(),
            request.features,
            request.extensions,
            backend,
        ));
        self.devices.write().unwrap().push(Arc::clone(&device));
        Ok(device)
    }

    fn best_adapter_index(&self) -> Result<usize, RenderError> {
        self.adapters
            .iter()
            .enumerate()
            .max_by_key(|(_, a)| a.score())
            .map(|(i, _)| i)
            .ok_or_else(|| {
                RenderError::BackendUnavailable(
                    "no graphics adapters found; the machine needs a GPU, CPU renderer or \
                     virtualized device"
                        .to_string(),
                )
            })
    }

    /// Get all devices created by this instance.
    pub fn devices(&self) -> Vec<Arc<GraphicsDevice>> {
        self.devices.read().unwrap().clone()
    }

    /// Get the number of devices created by this instance.
    pub fn device_count(&self) -> usize {
        self.devices.read().unwrap().len()
    }

    /// Create a surface for presenting to a window.
    ///
    /// The window handle must remain valid for the lifetime of the surface.
    ///
    /// # Errors
    ///
    /// Returns an error if surface creation fails.
    pub fn create_surface<W>(&self, window: &W) -> Result<Arc<Surface>, RenderError>
    where
        W: HasWindowHandle + HasDisplayHandle + Sync,
    {
        let instance = self.arc_self()?;
        Ok(Arc::new(Surface::new(instance, window)?))
    }

    /// Create a surface backed by the dummy backend's simulated swapchain,
    /// for tests and headless development.
    ///
    /// # Errors
    ///
    /// Returns an error if this instance is not running on the dummy backend.
    #[cfg(feature = "dummy")]
    pub fn create_test_surface(&self) -> Result<Arc<Surface>, RenderError> {
        if self.backend_kind() != BackendKind::Dummy {
            return Err(RenderError::InvalidParameter(
                "test surfaces are only available on the dummy backend".to_string(),
            ));
        }
        Ok(Arc::new(Surface::new_dummy(self.arc_self()?)))
    }
}

impl std::fmt::Debug for GraphicsInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsInstance")
            .field("backend", &self.backend.name())
            .field("device_count", &self.device_count())
            .finish()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;

    fn dummy_instance() -> Arc<GraphicsInstance> {
        GraphicsInstance::with_backend(BackendKind::Dummy).unwrap()
    }

    #[test]
    fn instance_creation() {
        let instance = dummy_instance();
        assert_eq!(instance.device_count(), 0);
        assert_eq!(instance.backend_kind(), BackendKind::Dummy);
    }

    #[test]
    fn enumerate_adapters_is_nonempty() {
        let instance = dummy_instance();
        let adapters = instance.enumerate_adapters();
        assert!(!adapters.is_empty());
        assert!(adapters[0].surface_caps.is_some());
    }

    #[test]
    fn create_device_tracks_devices() {
        let instance = dummy_instance();
        let device = instance.create_device(&DeviceRequest::new()).unwrap();
        assert_eq!(device.name(), "Dummy Adapter");
        assert_eq!(instance.device_count(), 1);
        assert!(Arc::ptr_eq(device.instance(), &instance));
    }

    #[test]
    fn invalid_adapter_index_is_rejected() {
        let instance = dummy_instance();
        let result = instance.create_device(&DeviceRequest::new().with_adapter(999));
        assert!(result.is_err());
        assert_eq!(instance.device_count(), 0);
    }

    #[test]
    fn unsupported_feature_fails_before_device_creation() {
        let instance = dummy_instance();
        let request = DeviceRequest::new().with_features(DeviceFeatures::WIREFRAME);
        let err = instance.create_device(&request).unwrap_err();
        assert!(matches!(err, RenderError::UnsupportedFeature { .. }));
        // No partial device leaked.
        assert_eq!(instance.device_count(), 0);
    }
}
