//! wgpu components.
//!
//! Residency is driver-managed here: the backend keeps a CPU shadow of
//! dynamic resource data (the moral equivalent of the explicit backend's
//! persistent mapping) and flushes it through the queue on write. Static
//! resources are uploaded once at creation and keep no shadow.

use std::sync::Mutex;

use super::conversion::{convert_filter, convert_texture_format, convert_wrap_mode};
use crate::error::RenderError;
use crate::resource::{Resource, ResourceAccess, ResourceFlags};
use crate::types::{Extent2d, FilterMode, TextureFormat, WrapMode};

/// wgpu requires copy sizes aligned to 4 bytes; the shadow is padded on
/// upload, never on read.
const COPY_ALIGN: usize = 4;

enum Native {
    Buffer {
        buffer: wgpu::Buffer,
        size: u64,
    },
    Texture {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
        sampler: wgpu::Sampler,
        format: TextureFormat,
        extent: Extent2d,
    },
}

/// A backend-native component realizing exactly one resource.
pub struct WgpuComponent {
    device: wgpu::Device,
    queue: wgpu::Queue,
    access: ResourceAccess,
    flags: ResourceFlags,
    native: Mutex<Native>,
    /// CPU shadow for dynamic components; empty for static ones.
    shadow: Mutex<Vec<u8>>,
}

impl WgpuComponent {
    pub(crate) fn new_buffer(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        resource: &Resource,
    ) -> Result<Self, RenderError> {
        let flags = resource.flags();
        let mut usage = if flags.contains(ResourceFlags::INDEX) {
            wgpu::BufferUsages::INDEX
        } else if flags.contains(ResourceFlags::DRAW_INDIRECT) {
            wgpu::BufferUsages::INDIRECT
        } else {
            wgpu::BufferUsages::STORAGE
        };
        usage |= wgpu::BufferUsages::COPY_DST;

        let buffer = create_buffer(device, resource.byte_size(), usage);
        upload_buffer(queue, &buffer, resource.data());

        let shadow = if resource.access().is_dynamic() {
            resource.data().to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            device: device.clone(),
            queue: queue.clone(),
            access: resource.access(),
            flags,
            native: Mutex::new(Native::Buffer {
                buffer,
                size: resource.byte_size(),
            }),
            shadow: Mutex::new(shadow),
        })
    }

    pub(crate) fn new_texture(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        resource: &Resource,
    ) -> Result<Self, RenderError> {
        let image = match resource {
            Resource::Image(image) => image,
            Resource::Buffer(_) => {
                return Err(RenderError::Internal(
                    "buffer resource handed to texture component".to_string(),
                ))
            }
        };
        let native = create_texture(device, image.format(), image.size(), resource.flags());
        upload_texture(queue, &native, image.data());

        let shadow = if resource.access().is_dynamic() {
            image.data().to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            device: device.clone(),
            queue: queue.clone(),
            access: resource.access(),
            flags: resource.flags(),
            native: Mutex::new(native),
            shadow: Mutex::new(shadow),
        })
    }

    pub(crate) fn is_texture(&self) -> bool {
        matches!(&*self.native.lock().unwrap(), Native::Texture { .. })
    }

    pub(crate) fn size(&self) -> u64 {
        match &*self.native.lock().unwrap() {
            Native::Buffer { size, .. } => *size,
            Native::Texture { extent, format, .. } => {
                extent.area() * u64::from(format.bytes_per_pixel())
            }
        }
    }

    pub(crate) fn buffer(&self) -> Option<wgpu::Buffer> {
        match &*self.native.lock().unwrap() {
            Native::Buffer { buffer, .. } => Some(buffer.clone()),
            Native::Texture { .. } => None,
        }
    }

    pub(crate) fn texture_view(&self) -> Option<wgpu::TextureView> {
        match &*self.native.lock().unwrap() {
            Native::Texture { view, .. } => Some(view.clone()),
            Native::Buffer { .. } => None,
        }
    }

    pub(crate) fn sampler(&self) -> Option<wgpu::Sampler> {
        match &*self.native.lock().unwrap() {
            Native::Texture { sampler, .. } => Some(sampler.clone()),
            Native::Buffer { .. } => None,
        }
    }

    pub(crate) fn texture_format(&self) -> Option<TextureFormat> {
        match &*self.native.lock().unwrap() {
            Native::Texture { format, .. } => Some(*format),
            Native::Buffer { .. } => None,
        }
    }

    pub(crate) fn texture_extent(&self) -> Option<Extent2d> {
        match &*self.native.lock().unwrap() {
            Native::Texture { extent, .. } => Some(*extent),
            Native::Buffer { .. } => None,
        }
    }

    /// Read back the CPU shadow of a dynamic component.
    pub(crate) fn read(&self) -> Option<Vec<u8>> {
        if self.access.is_dynamic() {
            Some(self.shadow.lock().unwrap().clone())
        } else {
            None
        }
    }

    /// Write into a dynamic component: update the shadow, flush the whole
    /// store through the queue.
    pub(crate) fn write(&self, offset: usize, bytes: &[u8]) {
        {
            let mut shadow = self.shadow.lock().unwrap();
            if offset + bytes.len() > shadow.len() {
                return;
            }
            shadow[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        self.flush();
    }

    /// Upload the full shadow to the GPU.
    fn flush(&self) {
        let shadow = self.shadow.lock().unwrap();
        let native = self.native.lock().unwrap();
        match &*native {
            Native::Buffer { buffer, .. } => upload_buffer(&self.queue, buffer, &shadow),
            Native::Texture { .. } => upload_texture(&self.queue, &native, &shadow),
        }
    }

    /// Out-of-place buffer resize: new buffer of the new size, shadow
    /// preserved prefix-wise and zero-filled, then swapped in. The caller
    /// has already drained the device.
    pub(crate) fn resize(&self, new_size: usize) {
        {
            let mut shadow = self.shadow.lock().unwrap();
            shadow.resize(new_size, 0);
        }
        {
            let mut native = self.native.lock().unwrap();
            let usage = if self.flags.contains(ResourceFlags::INDEX) {
                wgpu::BufferUsages::INDEX
            } else if self.flags.contains(ResourceFlags::DRAW_INDIRECT) {
                wgpu::BufferUsages::INDIRECT
            } else {
                wgpu::BufferUsages::STORAGE
            } | wgpu::BufferUsages::COPY_DST;
            *native = Native::Buffer {
                buffer: create_buffer(&self.device, new_size as u64, usage),
                size: new_size as u64,
            };
        }
        self.flush();
    }

    /// Out-of-place texture resize to new dimensions.
    pub(crate) fn resize_image(&self, new_extent: Extent2d, byte_len: usize) {
        {
            let mut shadow = self.shadow.lock().unwrap();
            shadow.resize(byte_len, 0);
        }
        {
            let mut native = self.native.lock().unwrap();
            let format = match &*native {
                Native::Texture { format, .. } => *format,
                Native::Buffer { .. } => return,
            };
            *native = create_texture(&self.device, format, new_extent, self.flags);
        }
        self.flush();
    }
}

fn create_buffer(device: &wgpu::Device, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
    // Zero-sized buffers are rejected; pad to the copy alignment.
    let padded = size.max(COPY_ALIGN as u64).div_ceil(COPY_ALIGN as u64) * COPY_ALIGN as u64;
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("component buffer"),
        size: padded,
        usage,
        mapped_at_creation: false,
    })
}

fn upload_buffer(queue: &wgpu::Queue, buffer: &wgpu::Buffer, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    if data.len() % COPY_ALIGN == 0 {
        queue.write_buffer(buffer, 0, data);
    } else {
        let mut padded = data.to_vec();
        padded.resize(data.len().div_ceil(COPY_ALIGN) * COPY_ALIGN, 0);
        queue.write_buffer(buffer, 0, &padded);
    }
}

fn create_texture(
    device: &wgpu::Device,
    format: TextureFormat,
    extent: Extent2d,
    flags: ResourceFlags,
) -> Native {
    let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
    if flags.contains(ResourceFlags::RENDER_OUTPUT) {
        usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("component texture"),
        size: wgpu::Extent3d {
            width: extent.width.max(1),
            height: extent.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: convert_texture_format(format),
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    let filter = if flags.contains(ResourceFlags::FILTER_LINEAR) {
        FilterMode::Linear
    } else {
        FilterMode::Nearest
    };
    let wrap = if flags.contains(ResourceFlags::WRAP_REPEAT) {
        WrapMode::Repeat
    } else {
        WrapMode::ClampToEdge
    };
    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("component sampler"),
        address_mode_u: convert_wrap_mode(wrap),
        address_mode_v: convert_wrap_mode(wrap),
        address_mode_w: convert_wrap_mode(wrap),
        mag_filter: convert_filter(filter),
        min_filter: convert_filter(filter),
        ..Default::default()
    });

    Native::Texture {
        texture,
        view,
        sampler,
        format,
        extent: Extent2d::new(extent.width.max(1), extent.height.max(1)),
    }
}

fn upload_texture(queue: &wgpu::Queue, native: &Native, data: &[u8]) {
    let Native::Texture {
        texture,
        format,
        extent,
        ..
    } = native
    else {
        return;
    };
    if data.is_empty() {
        return;
    }
    let bytes_per_row = extent.width * format.bytes_per_pixel();
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(bytes_per_row),
            rows_per_image: Some(extent.height),
        },
        wgpu::Extent3d {
            width: extent.width,
            height: extent.height,
            depth_or_array_layers: 1,
        },
    );
}
