use num_derive::FromPrimitive;
use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive)]
#[non_exhaustive]
pub enum PixelFormat {
    Unknown,

    R8Unorm,
    R8G8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8UnormSrgb,
    B8G8R8A8Unorm,
    B8G8R8A8UnormSrgb,
    R10G10B10A2Unorm,
    R11G11B10Float,

    R16Uint,
    R16Unorm,
    R16Float,
    R16Typeless,
    R16G16Float,
    R16G16B16A16Float,
    R16G16B16A16Unorm,

    R32Uint,
    R32Float,
    R32Typeless,
    R32G32Float,
    R32G32B32Float,
    R32G32B32A32Float,

    R24G8Typeless,
    R24UnormX8Typeless,
    R32G8X24Typeless,
    R32FloatX8X24Typeless,

    D16Unorm,
    D24UnormS8Uint,
    D32Float,
    D32FloatS8X24Uint,

    Bc1Unorm,
    Bc3Unorm,
    Bc5Unorm,
    Bc7Unorm,
}

impl PixelFormat {
    /// Size of one texel, or of one 4x4 block for block-compressed formats
    pub fn bytes_size(&self) -> u64 {
        match self {
            PixelFormat::Unknown => 0,
            PixelFormat::R8Unorm => 1,
            PixelFormat::R8G8Unorm
            | PixelFormat::R16Uint
            | PixelFormat::R16Unorm
            | PixelFormat::R16Float
            | PixelFormat::R16Typeless
            | PixelFormat::D16Unorm => 2,
            PixelFormat::R8G8B8A8Unorm
            | PixelFormat::R8G8B8A8UnormSrgb
            | PixelFormat::B8G8R8A8Unorm
            | PixelFormat::B8G8R8A8UnormSrgb
            | PixelFormat::R10G10B10A2Unorm
            | PixelFormat::R11G11B10Float
            | PixelFormat::R16G16Float
            | PixelFormat::R32Uint
            | PixelFormat::R32Float
            | PixelFormat::R32Typeless
            | PixelFormat::R24G8Typeless
            | PixelFormat::R24UnormX8Typeless
            | PixelFormat::D24UnormS8Uint
            | PixelFormat::D32Float => 4,
            PixelFormat::R16G16B16A16Float
            | PixelFormat::R16G16B16A16Unorm
            | PixelFormat::R32G32Float
            | PixelFormat::R32G8X24Typeless
            | PixelFormat::R32FloatX8X24Typeless
            | PixelFormat::D32FloatS8X24Uint => 8,
            PixelFormat::R32G32B32Float => 12,
            PixelFormat::R32G32B32A32Float => 16,
            PixelFormat::Bc1Unorm => 8,
            PixelFormat::Bc3Unorm | PixelFormat::Bc5Unorm | PixelFormat::Bc7Unorm => 16,
        }
    }

    pub fn is_block_compressed(&self) -> bool {
        matches!(
            self,
            PixelFormat::Bc1Unorm
                | PixelFormat::Bc3Unorm
                | PixelFormat::Bc5Unorm
                | PixelFormat::Bc7Unorm
        )
    }

    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            PixelFormat::D16Unorm
                | PixelFormat::D24UnormS8Uint
                | PixelFormat::D32Float
                | PixelFormat::D32FloatS8X24Uint
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(
            self,
            PixelFormat::D24UnormS8Uint | PixelFormat::D32FloatS8X24Uint
        )
    }

    /// Number of planes a resource of this format has, depth and stencil are separate planes
    pub fn plane_count(&self) -> u32 {
        match self {
            PixelFormat::D24UnormS8Uint
            | PixelFormat::D32FloatS8X24Uint
            | PixelFormat::R24G8Typeless
            | PixelFormat::R24UnormX8Typeless
            | PixelFormat::R32G8X24Typeless
            | PixelFormat::R32FloatX8X24Typeless => 2,
            _ => 1,
        }
    }

    /// Typeless format a depth texture must be created with to also be sampled
    pub fn depth_resource_format(&self) -> PixelFormat {
        match self {
            PixelFormat::D16Unorm => PixelFormat::R16Typeless,
            PixelFormat::D24UnormS8Uint => PixelFormat::R24G8Typeless,
            PixelFormat::D32Float => PixelFormat::R32Typeless,
            PixelFormat::D32FloatS8X24Uint => PixelFormat::R32G8X24Typeless,
            format => *format,
        }
    }

    /// Colour format used by a shader resource view of a depth texture
    pub fn depth_srv_format(&self) -> PixelFormat {
        match self {
            PixelFormat::D16Unorm => PixelFormat::R16Unorm,
            PixelFormat::D24UnormS8Uint => PixelFormat::R24UnormX8Typeless,
            PixelFormat::D32Float => PixelFormat::R32Float,
            PixelFormat::D32FloatS8X24Uint => PixelFormat::R32FloatX8X24Typeless,
            format => *format,
        }
    }

    /// Bytes of a tightly packed row of `width` texels
    pub fn row_size_in_bytes(&self, width: u32) -> u64 {
        if self.is_block_compressed() {
            ((width as u64 + 3) / 4).max(1) * self.bytes_size()
        } else {
            width as u64 * self.bytes_size()
        }
    }

    /// Number of rows a subresource of `height` texels occupies in memory
    pub fn row_count(&self, height: u32) -> u32 {
        if self.is_block_compressed() {
            ((height + 3) / 4).max(1)
        } else {
            height
        }
    }

    pub fn texture_size_in_bytes(&self, width: u32, height: u32) -> u64 {
        self.row_size_in_bytes(width) * self.row_count(height) as u64
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::B8G8R8A8UnormSrgb => write!(f, "BGRA 8-bit (unorm, sRGB)"),
            PixelFormat::B8G8R8A8Unorm => write!(f, "BGRA 8-bit (unorm)"),
            PixelFormat::R8G8B8A8Unorm => write!(f, "RGBA 8-bit (unorm)"),
            PixelFormat::D32Float => write!(f, "Depth 32-bit (float)"),
            PixelFormat::D24UnormS8Uint => write!(f, "Depth 24-bit (unorm), stencil 8-bit"),
            _ => write!(f, "{:?}", self),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SampleDesc {
    pub count: u32,
    pub quality: u32,
}

impl Default for SampleDesc {
    fn default() -> Self {
        Self {
            count: 1,
            quality: 0,
        }
    }
}

pub mod backend;
pub mod null;
pub mod pipeline_stream;
pub mod utils;

#[cfg(test)]
mod tests {
    use crate::PixelFormat;

    #[test]
    fn depth_formats_map_to_sampleable_formats() {
        assert_eq!(PixelFormat::D32Float.depth_srv_format(), PixelFormat::R32Float);
        assert_eq!(
            PixelFormat::D24UnormS8Uint.depth_srv_format(),
            PixelFormat::R24UnormX8Typeless
        );
        assert_eq!(PixelFormat::D16Unorm.depth_srv_format(), PixelFormat::R16Unorm);
        assert_eq!(
            PixelFormat::D32FloatS8X24Uint.depth_srv_format(),
            PixelFormat::R32FloatX8X24Typeless
        );
        assert_eq!(PixelFormat::D32Float.depth_resource_format(), PixelFormat::R32Typeless);
        assert_eq!(PixelFormat::R8G8B8A8Unorm.depth_srv_format(), PixelFormat::R8G8B8A8Unorm);
    }

    #[test]
    fn block_compressed_rows() {
        assert_eq!(PixelFormat::Bc1Unorm.row_size_in_bytes(16), 32);
        assert_eq!(PixelFormat::Bc7Unorm.row_count(6), 2);
        assert_eq!(PixelFormat::R8G8B8A8Unorm.texture_size_in_bytes(4, 4), 64);
    }
}
