//! The backend-agnostic resource model.
//!
//! A resource is a recipe: the description plus byte payload of data destined
//! for the GPU. It never holds a native handle. When a renderer is built,
//! its device realizes each resource as a backend-native *component* (the
//! actual buffer or image allocation) whose size, format and dimensions
//! always match the resource's declared shape.
//!
//! For dynamic resources the byte store in the resource stays authoritative
//! on the CPU side; backends mirror it into mapped memory (explicit backend)
//! or flush it through the queue (implicit backend).

use bitflags::bitflags;

use crate::types::{Extent2d, TextureFormat};

/// Opaque handle to a resource owned by (or referenced from) a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(pub(crate) usize);

impl ResourceHandle {
    /// Index of this resource within its renderer, in insertion order.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// The manner in which a resource can be read or written once owned by a
/// renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceAccess {
    /// Written once at renderer build via a one-shot transfer; GPU-resident.
    #[default]
    Static,
    /// Always writable, never resized; CPU-visible memory.
    DynamicFixed,
    /// Always writable and resizable; CPU-visible memory.
    DynamicVariable,
}

impl ResourceAccess {
    /// Whether CPU writes after renderer build are legal.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::DynamicFixed | Self::DynamicVariable)
    }
}

bitflags! {
    /// Flags adjusting how a resource is realized and bound.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u32 {
        /// Buffer is used as an index buffer. Not descriptor-relevant.
        const INDEX = 1 << 0;
        /// Buffer is used as a draw-indirect buffer. Not descriptor-relevant.
        const DRAW_INDIRECT = 1 << 1;
        /// Image is used as a render target by some renderer.
        const RENDER_OUTPUT = 1 << 2;
        /// Image is sampled with linear filtering (default is nearest).
        const FILTER_LINEAR = 1 << 3;
        /// Image wraps with repeat addressing (default is clamp-to-edge).
        const WRAP_REPEAT = 1 << 4;
    }
}

impl Default for ResourceFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// A buffer resource: arbitrary bytes interpreted by the shader.
#[derive(Debug, Clone)]
pub struct BufferResource {
    data: Vec<u8>,
    access: ResourceAccess,
    flags: ResourceFlags,
}

impl BufferResource {
    /// Create a buffer resource from raw bytes.
    pub fn from_bytes(data: Vec<u8>, access: ResourceAccess) -> Self {
        Self {
            data,
            access,
            flags: ResourceFlags::empty(),
        }
    }

    /// Create a buffer resource from a typed slice.
    pub fn from_slice<T: bytemuck::NoUninit>(data: &[T], access: ResourceAccess) -> Self {
        Self::from_bytes(bytemuck::cast_slice(data).to_vec(), access)
    }

    /// Set resource flags.
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Read-only view of the byte payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the payload in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub(crate) fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Grow or shrink the byte store. The first `min(old, new)` bytes are
    /// preserved; grown bytes are zero-filled.
    pub(crate) fn resize_bytes(&mut self, new_size: usize) {
        self.data.resize(new_size, 0);
    }
}

/// An image resource: pixels of some format and dimensions.
#[derive(Debug, Clone)]
pub struct ImageResource {
    data: Vec<u8>,
    format: TextureFormat,
    size: Extent2d,
    access: ResourceAccess,
    flags: ResourceFlags,
}

impl ImageResource {
    /// Create an image resource from raw pixel bytes.
    ///
    /// The payload length must equal `width * height * bytes_per_pixel`.
    pub fn from_bytes(
        data: Vec<u8>,
        format: TextureFormat,
        size: Extent2d,
        access: ResourceAccess,
    ) -> Result<Self, crate::error::RenderError> {
        let expected = size.area() * u64::from(format.bytes_per_pixel());
        if data.len() as u64 != expected {
            return Err(crate::error::RenderError::InvalidParameter(format!(
                "image payload is {} bytes but {}x{} {:?} needs {}",
                data.len(),
                size.width,
                size.height,
                format,
                expected
            )));
        }
        Ok(Self {
            data,
            format,
            size,
            access,
            flags: ResourceFlags::empty(),
        })
    }

    /// Create a zero-filled image resource.
    pub fn zeroed(format: TextureFormat, size: Extent2d, access: ResourceAccess) -> Self {
        let byte_len = (size.area() * u64::from(format.bytes_per_pixel())) as usize;
        Self {
            data: vec![0; byte_len],
            format,
            size,
            access,
            flags: ResourceFlags::empty(),
        }
    }

    /// Set resource flags.
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Read-only view of the pixel payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pixel format.
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Dimensions in pixels.
    pub fn size(&self) -> Extent2d {
        self.size
    }

    pub(crate) fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Change dimensions. Pixel bytes are preserved prefix-wise (row layout
    /// is not re-flowed); grown bytes are zero-filled.
    pub(crate) fn resize(&mut self, new_size: Extent2d) {
        self.size = new_size;
        let byte_len = (new_size.area() * u64::from(self.format.bytes_per_pixel())) as usize;
        self.data.resize(byte_len, 0);
    }
}

/// A resource owned by a renderer: either a buffer or an image.
#[derive(Debug, Clone)]
pub enum Resource {
    Buffer(BufferResource),
    Image(ImageResource),
}

impl Resource {
    /// Access policy of the resource.
    pub fn access(&self) -> ResourceAccess {
        match self {
            Resource::Buffer(b) => b.access,
            Resource::Image(i) => i.access,
        }
    }

    /// Resource flags.
    pub fn flags(&self) -> ResourceFlags {
        match self {
            Resource::Buffer(b) => b.flags,
            Resource::Image(i) => i.flags,
        }
    }

    /// Read-only view of the byte payload.
    pub fn data(&self) -> &[u8] {
        match self {
            Resource::Buffer(b) => b.data(),
            Resource::Image(i) => i.data(),
        }
    }

    /// Size of the payload in bytes.
    pub fn byte_size(&self) -> u64 {
        self.data().len() as u64
    }

    /// Whether this resource occupies a slot in the shader-resource binding
    /// table. Index and draw-indirect buffers occupy a component slot but
    /// are never bound through the descriptor table; all images are bound.
    pub fn descriptor_relevant(&self) -> bool {
        match self {
            Resource::Buffer(b) => !b
                .flags
                .intersects(ResourceFlags::INDEX | ResourceFlags::DRAW_INDIRECT),
            Resource::Image(_) => true,
        }
    }

    pub(crate) fn write(&mut self, offset: usize, bytes: &[u8]) {
        match self {
            Resource::Buffer(b) => b.write(offset, bytes),
            Resource::Image(i) => i.write(offset, bytes),
        }
    }
}

impl From<BufferResource> for Resource {
    fn from(value: BufferResource) -> Self {
        Resource::Buffer(value)
    }
}

impl From<ImageResource> for Resource {
    fn from(value: ImageResource) -> Self {
        Resource::Image(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_from_typed_slice() {
        let buf = BufferResource::from_slice(&[1u32, 2, 3, 4], ResourceAccess::DynamicVariable);
        assert_eq!(buf.size(), 16);
        let ints: &[u32] = bytemuck::cast_slice(buf.data());
        assert_eq!(ints, &[1, 2, 3, 4]);
    }

    #[test]
    fn buffer_resize_preserves_and_zero_fills() {
        let mut buf = BufferResource::from_slice(&[1u32, 2, 3, 4], ResourceAccess::DynamicVariable);
        buf.resize_bytes(32);
        let ints: &[u32] = bytemuck::cast_slice(buf.data());
        assert_eq!(ints, &[1, 2, 3, 4, 0, 0, 0, 0]);

        buf.resize_bytes(8);
        let ints: &[u32] = bytemuck::cast_slice(buf.data());
        assert_eq!(ints, &[1, 2]);
    }

    #[test]
    fn image_payload_must_match_shape() {
        let ok = ImageResource::from_bytes(
            vec![0; 16],
            TextureFormat::Rgba8Unorm,
            Extent2d::new(2, 2),
            ResourceAccess::Static,
        );
        assert!(ok.is_ok());

        let bad = ImageResource::from_bytes(
            vec![0; 15],
            TextureFormat::Rgba8Unorm,
            Extent2d::new(2, 2),
            ResourceAccess::Static,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn descriptor_relevance() {
        let storage = Resource::from(BufferResource::from_bytes(
            vec![0; 4],
            ResourceAccess::Static,
        ));
        assert!(storage.descriptor_relevant());

        let index = Resource::from(
            BufferResource::from_bytes(vec![0; 4], ResourceAccess::Static)
                .with_flags(ResourceFlags::INDEX),
        );
        assert!(!index.descriptor_relevant());

        let indirect = Resource::from(
            BufferResource::from_bytes(vec![0; 16], ResourceAccess::Static)
                .with_flags(ResourceFlags::DRAW_INDIRECT),
        );
        assert!(!indirect.descriptor_relevant());

        let image = Resource::from(ImageResource::zeroed(
            TextureFormat::Rgba8Unorm,
            Extent2d::new(1, 1),
            ResourceAccess::Static,
        ));
        assert!(image.descriptor_relevant());
    }
}
