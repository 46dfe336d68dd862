//! Mapping between pipeline formats and `vk::Format`.

use ash::vk;
use framegen_common::Format;

pub fn to_vk(format: Format) -> vk::Format {
    match format {
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::Rgb10A2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::Rg16Float => vk::Format::R16G16_SFLOAT,
        Format::Rg32Float => vk::Format::R32G32_SFLOAT,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::R32Uint => vk::Format::R32_UINT,
        Format::D32Float => vk::Format::D32_SFLOAT,
        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        Format::D32FloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

/// Inverse of `to_vk`, for surfaces and imported images.
pub fn from_vk(format: vk::Format) -> Option<Format> {
    Some(match format {
        vk::Format::R8G8B8A8_UNORM => Format::Rgba8Unorm,
        vk::Format::B8G8R8A8_UNORM => Format::Bgra8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::Rgba8Srgb,
        vk::Format::B8G8R8A8_SRGB => Format::Bgra8Srgb,
        vk::Format::A2B10G10R10_UNORM_PACK32 => Format::Rgb10A2Unorm,
        vk::Format::R16G16B16A16_SFLOAT => Format::Rgba16Float,
        vk::Format::R32G32B32A32_SFLOAT => Format::Rgba32Float,
        vk::Format::R16G16_SFLOAT => Format::Rg16Float,
        vk::Format::R32G32_SFLOAT => Format::Rg32Float,
        vk::Format::R32_SFLOAT => Format::R32Float,
        vk::Format::R32_UINT => Format::R32Uint,
        vk::Format::D32_SFLOAT => Format::D32Float,
        vk::Format::D24_UNORM_S8_UINT => Format::D24UnormS8Uint,
        vk::Format::D32_SFLOAT_S8_UINT => Format::D32FloatS8Uint,
        _ => return None,
    })
}

/// Storage-capable stand-in for formats that usually lack storage support.
///
/// sRGB and BGRA surfaces get an RGBA UNORM image; copies to and from the
/// real surface then go through a blit, which converts.
pub fn storage_fallback(format: Format) -> Format {
    match format {
        Format::Bgra8Unorm | Format::Rgba8Srgb | Format::Bgra8Srgb => Format::Rgba8Unorm,
        other => other,
    }
}

/// Aspects touched by copies.
pub fn copy_aspect(format: Format) -> vk::ImageAspectFlags {
    match format {
        Format::D32Float => vk::ImageAspectFlags::DEPTH,
        Format::D24UnormS8Uint | Format::D32FloatS8Uint => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Aspect of the view kernels sample through.
pub fn view_aspect(format: Format) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Format; 14] = [
        Format::Rgba8Unorm,
        Format::Bgra8Unorm,
        Format::Rgba8Srgb,
        Format::Bgra8Srgb,
        Format::Rgb10A2Unorm,
        Format::Rgba16Float,
        Format::Rgba32Float,
        Format::Rg16Float,
        Format::Rg32Float,
        Format::R32Float,
        Format::R32Uint,
        Format::D32Float,
        Format::D24UnormS8Uint,
        Format::D32FloatS8Uint,
    ];

    #[test]
    fn test_every_format_maps_back() {
        for f in ALL {
            assert_eq!(from_vk(to_vk(f)), Some(f), "{f:?}");
        }
        assert_eq!(from_vk(vk::Format::R5G6B5_UNORM_PACK16), None);
    }

    #[test]
    fn test_storage_fallback_keeps_pixel_size() {
        for f in ALL {
            assert_eq!(storage_fallback(f).bytes_per_pixel(), f.bytes_per_pixel());
        }
        assert_eq!(storage_fallback(Format::Bgra8Srgb), Format::Rgba8Unorm);
        assert_eq!(storage_fallback(Format::Rg32Float), Format::Rg32Float);
    }

    #[test]
    fn test_aspects() {
        assert_eq!(view_aspect(Format::D24UnormS8Uint), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            copy_aspect(Format::D24UnormS8Uint),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(copy_aspect(Format::R32Uint), vk::ImageAspectFlags::COLOR);
    }
}
