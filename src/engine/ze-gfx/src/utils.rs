use crate::backend::{
    CopyableFootprints, PlacedSubresourceFootprint, ResourceDesc, ResourceDimension,
    SubresourceFootprint,
};

pub const TEXTURE_DATA_PITCH_ALIGNMENT: u64 = 256;
pub const TEXTURE_DATA_PLACEMENT_ALIGNMENT: u64 = 512;
pub const CONSTANT_BUFFER_DATA_PLACEMENT_ALIGNMENT: u64 = 256;

pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment == 0 || alignment.is_power_of_two());
    if alignment <= 1 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

pub fn is_aligned(value: u64, alignment: u64) -> bool {
    alignment <= 1 || value & (alignment - 1) == 0
}

/// Size of `mip` of a dimension of `size` texels
pub fn mip_size(size: u64, mip: u32) -> u64 {
    (size >> mip).max(1)
}

/// Layout of each subresource when staged in a linear buffer, following the native placement
/// rules: rows pitched to 256 bytes, subresources placed on 512 bytes boundaries.
pub fn compute_copyable_footprints(
    desc: &ResourceDesc,
    first_subresource: u32,
    num_subresources: u32,
    base_offset: u64,
) -> CopyableFootprints {
    let mut footprints = CopyableFootprints::default();

    if desc.dimension == ResourceDimension::Buffer {
        footprints.layouts.push(PlacedSubresourceFootprint {
            offset: base_offset,
            footprint: SubresourceFootprint {
                format: desc.format,
                width: desc.width as u32,
                height: 1,
                depth: 1,
                row_pitch: align_up(desc.width, TEXTURE_DATA_PITCH_ALIGNMENT) as u32,
            },
        });
        footprints.num_rows.push(1);
        footprints.row_sizes_in_bytes.push(desc.width);
        footprints.total_bytes = desc.width;
        return footprints;
    }

    let mip_levels = desc.mip_levels.max(1) as u32;
    let mut offset = base_offset;
    let mut end = base_offset;
    for subresource in first_subresource..first_subresource + num_subresources {
        let mip = subresource % mip_levels;
        let width = mip_size(desc.width, mip) as u32;
        let height = mip_size(desc.height as u64, mip) as u32;
        let depth = match desc.dimension {
            ResourceDimension::Texture3D => mip_size(desc.depth_or_array_size as u64, mip) as u32,
            _ => 1,
        };

        let row_size = desc.format.row_size_in_bytes(width);
        let row_count = desc.format.row_count(height);
        let row_pitch = align_up(row_size, TEXTURE_DATA_PITCH_ALIGNMENT);

        offset = align_up(offset, TEXTURE_DATA_PLACEMENT_ALIGNMENT);
        footprints.layouts.push(PlacedSubresourceFootprint {
            offset,
            footprint: SubresourceFootprint {
                format: desc.format,
                width,
                height,
                depth,
                row_pitch: row_pitch as u32,
            },
        });
        footprints.num_rows.push(row_count);
        footprints.row_sizes_in_bytes.push(row_size);

        // The last row of the last slice is not padded
        let size = row_pitch * (row_count as u64 * depth as u64 - 1) + row_size;
        end = offset + size;
        offset += row_pitch * row_count as u64 * depth as u64;
    }

    footprints.total_bytes = end - base_offset;
    footprints
}

#[cfg(test)]
mod tests {
    use crate::backend::{ResourceDesc, ResourceDimension, ResourceFlags};
    use crate::utils::{align_up, compute_copyable_footprints};
    use crate::{PixelFormat, SampleDesc};

    #[test]
    fn align() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(13, 1), 13);
    }

    #[test]
    fn texture_footprints() {
        let desc = ResourceDesc {
            dimension: ResourceDimension::Texture2D,
            width: 100,
            height: 10,
            depth_or_array_size: 1,
            mip_levels: 2,
            format: PixelFormat::R8G8B8A8Unorm,
            sample_desc: SampleDesc::default(),
            flags: ResourceFlags::empty(),
        };

        let footprints = compute_copyable_footprints(&desc, 0, 2, 0);
        assert_eq!(footprints.layouts[0].offset, 0);
        assert_eq!(footprints.layouts[0].footprint.row_pitch, 512);
        assert_eq!(footprints.row_sizes_in_bytes[0], 400);
        assert_eq!(footprints.num_rows[1], 5);
        // 10 rows of 512 bytes = 5120, already 512 aligned
        assert_eq!(footprints.layouts[1].offset, 5120);
        assert_eq!(footprints.layouts[1].footprint.width, 50);
        assert_eq!(footprints.total_bytes, 5120 + 256 * 4 + 200);
    }
}
