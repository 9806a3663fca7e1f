//! Shader artifact consumption.
//!
//! The core does not compile shading language. Per stage it consumes an
//! already-built artifact: SPIR-V words for the explicit backend, or
//! preprocessed WGSL text plus a small binding-metadata block for the
//! implicit backend. Both artifacts for one logical shader are written
//! against the same binding-slot numbering, which the renderer derives
//! identically for every backend.

use crate::error::RenderError;

/// A shader pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// Kind of resource a shader binding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    StorageBuffer,
    SampledImage,
}

/// One entry of the binding-metadata block accompanying text shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderBinding {
    /// Binding slot, matching the renderer's derived slot numbering.
    pub slot: u32,
    /// What the slot binds.
    pub kind: BindingKind,
}

/// A per-stage shader artifact.
#[derive(Debug, Clone)]
pub enum ShaderArtifact {
    /// Pre-compiled SPIR-V, consumed by the explicit backend.
    SpirV(Vec<u32>),
    /// Preprocessed WGSL source plus binding metadata, consumed by the
    /// implicit backend.
    Text {
        source: String,
        bindings: Vec<ShaderBinding>,
    },
}

impl ShaderArtifact {
    /// The SPIR-V words, if this is a binary artifact.
    pub fn spirv(&self) -> Option<&[u32]> {
        match self {
            Self::SpirV(words) => Some(words),
            Self::Text { .. } => None,
        }
    }

    /// The source text, if this is a text artifact.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::SpirV(_) => None,
            Self::Text { source, .. } => Some(source),
        }
    }
}

/// The set of stages making up one shader program.
///
/// A graphics shader must carry a vertex and a fragment stage; a compute
/// shader carries only a compute stage. Any other combination is a
/// configuration error.
#[derive(Debug, Clone, Default)]
pub struct ShaderSet {
    vertex: Option<ShaderArtifact>,
    fragment: Option<ShaderArtifact>,
    compute: Option<ShaderArtifact>,
}

impl ShaderSet {
    /// Create an empty shader set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the artifact for a stage.
    pub fn set_stage(&mut self, stage: ShaderStage, artifact: ShaderArtifact) {
        match stage {
            ShaderStage::Vertex => self.vertex = Some(artifact),
            ShaderStage::Fragment => self.fragment = Some(artifact),
            ShaderStage::Compute => self.compute = Some(artifact),
        }
    }

    /// Builder form of [`ShaderSet::set_stage`].
    pub fn with_stage(mut self, stage: ShaderStage, artifact: ShaderArtifact) -> Self {
        self.set_stage(stage, artifact);
        self
    }

    /// Get the artifact for a stage, if present.
    pub fn stage(&self, stage: ShaderStage) -> Option<&ShaderArtifact> {
        match stage {
            ShaderStage::Vertex => self.vertex.as_ref(),
            ShaderStage::Fragment => self.fragment.as_ref(),
            ShaderStage::Compute => self.compute.as_ref(),
        }
    }

    /// Whether this is a compute shader set.
    pub fn is_compute(&self) -> bool {
        self.compute.is_some()
    }

    /// Validate the stage combination.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidShader`] if a compute stage is combined
    /// with graphics stages, or a graphics set is missing vertex or fragment.
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.compute.is_some() {
            if self.vertex.is_some() || self.fragment.is_some() {
                return Err(RenderError::InvalidShader(
                    "compute shader cannot be combined with vertex/fragment stages".to_string(),
                ));
            }
            return Ok(());
        }
        if self.vertex.is_none() {
            return Err(RenderError::InvalidShader(
                "graphics shader is missing a vertex stage".to_string(),
            ));
        }
        if self.fragment.is_none() {
            return Err(RenderError::InvalidShader(
                "graphics shader is missing a fragment stage".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spirv() -> ShaderArtifact {
        // Magic number only; never executed by tests.
        ShaderArtifact::SpirV(vec![0x0723_0203])
    }

    #[test]
    fn graphics_set_requires_vertex_and_fragment() {
        let set = ShaderSet::new().with_stage(ShaderStage::Vertex, spirv());
        assert!(set.validate().is_err());

        let set = set.with_stage(ShaderStage::Fragment, spirv());
        assert!(set.validate().is_ok());
        assert!(!set.is_compute());
    }

    #[test]
    fn compute_set_stands_alone() {
        let set = ShaderSet::new().with_stage(ShaderStage::Compute, spirv());
        assert!(set.validate().is_ok());
        assert!(set.is_compute());

        let bad = set.with_stage(ShaderStage::Vertex, spirv());
        assert!(bad.validate().is_err());
    }

    #[test]
    fn artifact_accessors() {
        let text = ShaderArtifact::Text {
            source: "fn main() {}".to_string(),
            bindings: vec![ShaderBinding {
                slot: 0,
                kind: BindingKind::StorageBuffer,
            }],
        };
        assert!(text.text().is_some());
        assert!(text.spirv().is_none());
        assert!(spirv().spirv().is_some());
    }
}
