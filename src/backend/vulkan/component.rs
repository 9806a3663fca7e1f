//! Vulkan components: the native realization of resources.
//!
//! Residency follows the resource's access policy: static resources are
//! GPU-only and filled through a one-shot transfer; dynamic resources live
//! in CPU-visible memory and stay persistently mapped by the allocator, so
//! a write is a memcpy, not a map/unmap pair.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use super::conversion::{convert_filter, convert_texture_format, convert_wrap_mode};
use crate::command::{ImageLayout, TrackedLayout};
use crate::error::RenderError;
use crate::resource::{Resource, ResourceAccess, ResourceFlags};
use crate::types::{Extent2d, FilterMode, TextureFormat, WrapMode};

/// The native allocation behind one component. Swapped out-of-place on
/// resize; the owning [`VulkanComponent`] handle stays stable.
enum Native {
    Buffer {
        buffer: vk::Buffer,
        allocation: Option<Allocation>,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    },
    Image {
        image: vk::Image,
        view: vk::ImageView,
        sampler: vk::Sampler,
        allocation: Option<Allocation>,
        format: vk::Format,
        extent: vk::Extent2D,
        /// The layout descriptor writes use for this image.
        descriptor_layout: vk::ImageLayout,
    },
}

/// A backend-native component realizing exactly one resource.
pub struct VulkanComponent {
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    access: ResourceAccess,
    flags: ResourceFlags,
    native: Mutex<Native>,
    layout: Mutex<TrackedLayout>,
}

impl VulkanComponent {
    /// Realize a buffer resource.
    pub(crate) fn new_buffer(
        device: &ash::Device,
        allocator: &Arc<Mutex<Allocator>>,
        resource: &Resource,
    ) -> Result<Self, RenderError> {
        let flags = resource.flags();
        let base_usage = if flags.contains(ResourceFlags::INDEX) {
            vk::BufferUsageFlags::INDEX_BUFFER
        } else if flags.contains(ResourceFlags::DRAW_INDIRECT) {
            vk::BufferUsageFlags::INDIRECT_BUFFER
        } else {
            vk::BufferUsageFlags::STORAGE_BUFFER
        };
        let (usage, location) = match resource.access() {
            ResourceAccess::Static => (
                base_usage | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryLocation::GpuOnly,
            ),
            ResourceAccess::DynamicFixed | ResourceAccess::DynamicVariable => {
                (base_usage, MemoryLocation::CpuToGpu)
            }
        };

        let native = create_buffer(device, allocator, resource.byte_size(), usage, location)?;
        let component = Self {
            device: device.clone(),
            allocator: Arc::clone(allocator),
            access: resource.access(),
            flags,
            native: Mutex::new(native),
            layout: Mutex::new(TrackedLayout::new()),
        };
        // Dynamic buffers are CPU-visible; fill them through the mapping.
        if resource.access().is_dynamic() {
            component.write(0, resource.data());
        }
        Ok(component)
    }

    /// Realize an image resource.
    pub(crate) fn new_image(
        device: &ash::Device,
        allocator: &Arc<Mutex<Allocator>>,
        resource: &Resource,
    ) -> Result<Self, RenderError> {
        let image_resource = match resource {
            Resource::Image(image) => image,
            Resource::Buffer(_) => {
                return Err(RenderError::Internal(
                    "buffer resource handed to image component".to_string(),
                ))
            }
        };
        let native = create_image(
            device,
            allocator,
            image_resource.format(),
            image_resource.size(),
            resource.flags(),
            resource.access(),
        )?;
        let component = Self {
            device: device.clone(),
            allocator: Arc::clone(allocator),
            access: resource.access(),
            flags: resource.flags(),
            native: Mutex::new(native),
            layout: Mutex::new(TrackedLayout::new()),
        };
        if resource.access().is_dynamic() {
            component.write(0, resource.data());
        }
        Ok(component)
    }

    pub(crate) fn is_image(&self) -> bool {
        matches!(&*self.native.lock(), Native::Image { .. })
    }

    /// Byte size of the native allocation (buffer size, or tightly packed
    /// image size for images).
    pub(crate) fn size(&self) -> u64 {
        match &*self.native.lock() {
            Native::Buffer { size, .. } => *size,
            Native::Image { extent, format, .. } => {
                let texel = super::conversion::convert_format_back(*format)
                    .map_or(4, |f| f.bytes_per_pixel());
                u64::from(extent.width) * u64::from(extent.height) * u64::from(texel)
            }
        }
    }

    /// The buffer handle, for descriptor writes and draws.
    pub(crate) fn buffer_handle(&self) -> Option<vk::Buffer> {
        match &*self.native.lock() {
            Native::Buffer { buffer, .. } => Some(*buffer),
            Native::Image { .. } => None,
        }
    }

    /// The image descriptor triple (view, sampler, layout).
    pub(crate) fn image_descriptor(&self) -> Option<(vk::ImageView, vk::Sampler, vk::ImageLayout)> {
        match &*self.native.lock() {
            Native::Image {
                view,
                sampler,
                descriptor_layout,
                ..
            } => Some((*view, *sampler, *descriptor_layout)),
            Native::Buffer { .. } => None,
        }
    }

    pub(crate) fn image_handle(&self) -> Option<vk::Image> {
        match &*self.native.lock() {
            Native::Image { image, .. } => Some(*image),
            Native::Buffer { .. } => None,
        }
    }

    pub(crate) fn image_view(&self) -> Option<vk::ImageView> {
        match &*self.native.lock() {
            Native::Image { view, .. } => Some(*view),
            Native::Buffer { .. } => None,
        }
    }

    pub(crate) fn image_format(&self) -> Option<vk::Format> {
        match &*self.native.lock() {
            Native::Image { format, .. } => Some(*format),
            Native::Buffer { .. } => None,
        }
    }

    pub(crate) fn image_extent(&self) -> Option<vk::Extent2D> {
        match &*self.native.lock() {
            Native::Image { extent, .. } => Some(*extent),
            Native::Buffer { .. } => None,
        }
    }

    /// The tracked layout as of the last recorded command.
    pub(crate) fn tracked_layout(&self) -> ImageLayout {
        self.layout.lock().current()
    }

    /// Record a layout transition and return the previous layout.
    pub(crate) fn transition_layout(&self, new_layout: ImageLayout) -> ImageLayout {
        self.layout.lock().transition_to(new_layout)
    }

    /// Write into the persistently mapped allocation of a dynamic component.
    pub(crate) fn write(&self, offset: usize, bytes: &[u8]) {
        let mut native = self.native.lock();
        let allocation = match &mut *native {
            Native::Buffer { allocation, .. } | Native::Image { allocation, .. } => allocation,
        };
        if let Some(allocation) = allocation.as_mut() {
            if let Some(mapped) = allocation.mapped_slice_mut() {
                let end = offset + bytes.len();
                if end <= mapped.len() {
                    mapped[offset..end].copy_from_slice(bytes);
                }
            }
        }
    }

    /// Read back the mapped contents of a CPU-visible component.
    pub(crate) fn read(&self) -> Option<Vec<u8>> {
        let size = self.size() as usize;
        let native = self.native.lock();
        let allocation = match &*native {
            Native::Buffer { allocation, .. } | Native::Image { allocation, .. } => allocation,
        };
        allocation
            .as_ref()
            .and_then(|a| a.mapped_slice())
            .map(|mapped| mapped[..size.min(mapped.len())].to_vec())
    }

    /// Resize a `DynamicVariable` buffer component out-of-place.
    ///
    /// The new allocation receives the first `min(old, new)` bytes of the
    /// old mapping, grown bytes stay zero-filled, and the swap happens only
    /// once the new allocation is fully prepared; the old one is destroyed
    /// after the swap. The caller has already drained the device.
    pub(crate) fn resize(&self, new_size: usize) -> Result<(), RenderError> {
        debug_assert_eq!(
            self.access,
            ResourceAccess::DynamicVariable,
            "resize on a component that is not DynamicVariable"
        );
        let mut native = self.native.lock();
        let (usage, location) = match &*native {
            Native::Buffer {
                usage, location, ..
            } => (*usage, *location),
            Native::Image { .. } => {
                return Err(RenderError::Internal(
                    "image components are resized through resize_image".to_string(),
                ))
            }
        };
        let mut replacement = create_buffer(
            &self.device,
            &self.allocator,
            new_size as u64,
            usage,
            location,
        )?;
        copy_mapped_prefix(&*native, &mut replacement);
        let old = std::mem::replace(&mut *native, replacement);
        destroy_native(&self.device, &self.allocator, old);
        Ok(())
    }

    /// Resize a `DynamicVariable` image component out-of-place to new
    /// dimensions, preserving the prefix of the pixel bytes.
    pub(crate) fn resize_image(&self, new_extent: Extent2d) -> Result<(), RenderError> {
        let mut native = self.native.lock();
        let front_format = match &*native {
            Native::Image { format, .. } => super::conversion::convert_format_back(*format)
                .unwrap_or(TextureFormat::Rgba8Unorm),
            Native::Buffer { .. } => {
                return Err(RenderError::Internal(
                    "buffer components are resized through resize".to_string(),
                ))
            }
        };
        let mut replacement = create_image(
            &self.device,
            &self.allocator,
            front_format,
            new_extent,
            self.flags,
            self.access,
        )?;
        copy_mapped_prefix(&*native, &mut replacement);
        let old = std::mem::replace(&mut *native, replacement);
        destroy_native(&self.device, &self.allocator, old);
        // The fresh image starts undefined again.
        self.layout.lock().transition_to(ImageLayout::Undefined);
        Ok(())
    }
}

impl Drop for VulkanComponent {
    fn drop(&mut self) {
        let native = std::mem::replace(
            &mut *self.native.lock(),
            Native::Buffer {
                buffer: vk::Buffer::null(),
                allocation: None,
                size: 0,
                usage: vk::BufferUsageFlags::empty(),
                location: MemoryLocation::CpuToGpu,
            },
        );
        destroy_native(&self.device, &self.allocator, native);
    }
}

fn create_buffer(
    device: &ash::Device,
    allocator: &Arc<Mutex<Allocator>>,
    size: u64,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
) -> Result<Native, RenderError> {
    // Vulkan forbids zero-sized buffers; keep a one-byte allocation for
    // empty resources so the handle stays valid.
    let alloc_size = size.max(1);
    let buffer_info = vk::BufferCreateInfo::default()
        .size(alloc_size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.create_buffer(&buffer_info, None) }.map_err(map_alloc_err)?;
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let allocation = allocator
        .lock()
        .allocate(&AllocationCreateDesc {
            name: "component buffer",
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| {
            unsafe { device.destroy_buffer(buffer, None) };
            RenderError::OutOfMemory(e.to_string())
        })?;

    unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        .map_err(map_alloc_err)?;

    Ok(Native::Buffer {
        buffer,
        allocation: Some(allocation),
        size,
        usage,
        location,
    })
}

fn create_image(
    device: &ash::Device,
    allocator: &Arc<Mutex<Allocator>>,
    format: TextureFormat,
    extent: Extent2d,
    flags: ResourceFlags,
    access: ResourceAccess,
) -> Result<Native, RenderError> {
    let vk_format = convert_texture_format(format);
    let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
    if flags.contains(ResourceFlags::RENDER_OUTPUT) {
        usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    let (location, tiling, descriptor_layout) = match access {
        ResourceAccess::Static => (
            MemoryLocation::GpuOnly,
            vk::ImageTiling::OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ),
        ResourceAccess::DynamicFixed | ResourceAccess::DynamicVariable => (
            MemoryLocation::CpuToGpu,
            vk::ImageTiling::LINEAR,
            vk::ImageLayout::GENERAL,
        ),
    };

    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: extent.width.max(1),
            height: extent.height.max(1),
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(vk_format)
        .tiling(tiling)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .samples(vk::SampleCountFlags::TYPE_1);

    let image = unsafe { device.create_image(&image_info, None) }.map_err(map_alloc_err)?;
    let requirements = unsafe { device.get_image_memory_requirements(image) };

    let allocation = allocator
        .lock()
        .allocate(&AllocationCreateDesc {
            name: "component image",
            requirements,
            location,
            linear: tiling == vk::ImageTiling::LINEAR,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| {
            unsafe { device.destroy_image(image, None) };
            RenderError::OutOfMemory(e.to_string())
        })?;

    unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
        .map_err(map_alloc_err)?;

    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(vk_format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    let view = unsafe { device.create_image_view(&view_info, None) }.map_err(map_alloc_err)?;

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
    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(convert_filter(filter))
        .min_filter(convert_filter(filter))
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(convert_wrap_mode(wrap))
        .address_mode_v(convert_wrap_mode(wrap))
        .address_mode_w(convert_wrap_mode(wrap))
        .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK);
    let sampler = unsafe { device.create_sampler(&sampler_info, None) }.map_err(map_alloc_err)?;

    Ok(Native::Image {
        image,
        view,
        sampler,
        allocation: Some(allocation),
        format: vk_format,
        extent: vk::Extent2D {
            width: extent.width.max(1),
            height: extent.height.max(1),
        },
        descriptor_layout,
    })
}

/// Copy the mapped byte prefix of `old` into `new`, zero-filling the rest.
/// No-op when either side has no CPU mapping (GPU-only allocations).
fn copy_mapped_prefix(old: &Native, new: &mut Native) {
    let old_bytes = match old {
        Native::Buffer { allocation, .. } | Native::Image { allocation, .. } => allocation
            .as_ref()
            .and_then(|a| a.mapped_slice())
            .map(|s| s.to_vec()),
    };
    let Some(old_bytes) = old_bytes else { return };
    let new_alloc = match new {
        Native::Buffer { allocation, .. } | Native::Image { allocation, .. } => allocation,
    };
    if let Some(new_mapped) = new_alloc.as_mut().and_then(|a| a.mapped_slice_mut()) {
        let copy_len = old_bytes.len().min(new_mapped.len());
        new_mapped[..copy_len].copy_from_slice(&old_bytes[..copy_len]);
        for byte in new_mapped[copy_len..].iter_mut() {
            *byte = 0;
        }
    }
}

fn destroy_native(device: &ash::Device, allocator: &Arc<Mutex<Allocator>>, native: Native) {
    unsafe {
        match native {
            Native::Buffer {
                buffer, allocation, ..
            } => {
                if buffer != vk::Buffer::null() {
                    device.destroy_buffer(buffer, None);
                }
                if let Some(allocation) = allocation {
                    let _ = allocator.lock().free(allocation);
                }
            }
            Native::Image {
                image,
                view,
                sampler,
                allocation,
                ..
            } => {
                device.destroy_sampler(sampler, None);
                device.destroy_image_view(view, None);
                device.destroy_image(image, None);
                if let Some(allocation) = allocation {
                    let _ = allocator.lock().free(allocation);
                }
            }
        }
    }
}

fn map_alloc_err(err: vk::Result) -> RenderError {
    match err {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            RenderError::OutOfMemory(format!("{err:?}"))
        }
        other => RenderError::ResourceCreationFailed(format!("{other:?}")),
    }
}
