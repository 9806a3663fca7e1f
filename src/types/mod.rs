//! Shared descriptor types used by the front-end API and every backend.

mod buffer;
mod common;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage};
pub use common::{
    BlendMode, CompareFunction, CullMode, Extent2d, FilterMode, PrimitiveTopology, WrapMode,
};
pub use texture::{TextureDescriptor, TextureFormat, TextureUsage};
