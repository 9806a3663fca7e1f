//! Error types for the rendering core.
//!
//! Errors fall into two families. Configuration errors (unsupported device
//! feature, invalid resource flags, missing shader stage) indicate a mismatch
//! between what the application requested and what it validated beforehand;
//! they carry full context and callers are expected to treat them as fatal.
//! Transient surface conditions (out-of-date, lost) are recoverable and are
//! modeled separately as [`AcquireError`] so the render loop can react.

use thiserror::Error;

/// Errors that can occur in the rendering core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The native graphics API could not be initialized.
    #[error("backend initialization failed: {0}")]
    BackendUnavailable(String),
    /// A requested device feature is not supported by the chosen adapter.
    #[error("device feature not supported by adapter '{adapter}': {feature}")]
    UnsupportedFeature { adapter: String, feature: String },
    /// A requested device extension is not supported by the chosen adapter.
    #[error("device extension not supported by adapter '{adapter}': {extension}")]
    UnsupportedExtension { adapter: String, extension: String },
    /// Failed to create a device or resource.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// An invalid parameter or flag combination was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The shader set is missing a required stage or has an invalid combination.
    #[error("invalid shader set: {0}")]
    InvalidShader(String),
    /// Out of GPU memory. There is no eviction or retry policy.
    #[error("out of GPU memory: {0}")]
    OutOfMemory(String),
    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Recoverable outcomes of swapchain image acquisition.
///
/// `OutOfDate` and `SurfaceLost` require the caller to reconfigure the
/// surface (passing the outgoing swapchain as a migration hint) before
/// retrying. Any other failure surfaces as [`AcquireError::Other`] and is
/// fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// The swapchain no longer matches the surface; reconfigure and retry.
    #[error("swapchain out of date, reconfigure the surface")]
    OutOfDate,
    /// The surface itself was lost; reconfigure and retry.
    #[error("surface lost, reconfigure the surface")]
    SurfaceLost,
    /// Unrecoverable acquisition failure.
    #[error("image acquisition failed: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_names_operation() {
        let err = RenderError::UnsupportedFeature {
            adapter: "Test GPU".to_string(),
            feature: "wireframe".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Test GPU"));
        assert!(msg.contains("wireframe"));
    }

    #[test]
    fn acquire_error_display() {
        assert!(AcquireError::OutOfDate.to_string().contains("out of date"));
        assert!(AcquireError::SurfaceLost.to_string().contains("lost"));
    }
}
