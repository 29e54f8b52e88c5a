use ze_gfx::backend;
use ze_gfx::backend::{
    DescriptorHeapType, DescriptorRangeType, Device, DeviceError, RootParameter,
    RootSignatureDesc, DESCRIPTOR_RANGE_OFFSET_APPEND, UNBOUNDED_DESCRIPTOR_COUNT,
};

pub const MAX_ROOT_PARAMETERS: usize = 64;

/// A native root signature along with the descriptor table layout contexts need to stage
/// descriptors against it
pub struct RootSignature {
    root_signature: backend::RootSignature,
    desc: RootSignatureDesc,
    view_table_mask: u64,
    sampler_table_mask: u64,
    table_sizes: [u32; MAX_ROOT_PARAMETERS],
}

impl RootSignature {
    pub fn new(device: &dyn Device, desc: RootSignatureDesc, name: &str) -> Result<Self, DeviceError> {
        assert!(
            desc.parameters.len() <= MAX_ROOT_PARAMETERS,
            "root signature {} has {} parameters, at most {} are supported",
            name,
            desc.parameters.len(),
            MAX_ROOT_PARAMETERS
        );

        let root_signature = device.create_root_signature(&desc, name)?;
        let mut view_table_mask = 0;
        let mut sampler_table_mask = 0;
        let mut table_sizes = [0; MAX_ROOT_PARAMETERS];

        for (index, parameter) in desc.parameters.iter().enumerate() {
            if let RootParameter::DescriptorTable { ranges, .. } = parameter {
                let is_sampler_table = ranges
                    .first()
                    .map(|range| range.ty == DescriptorRangeType::Sampler)
                    .unwrap_or(false);
                assert!(
                    ranges
                        .iter()
                        .all(|range| (range.ty == DescriptorRangeType::Sampler) == is_sampler_table),
                    "descriptor table {} of {} mixes samplers with other descriptors",
                    index,
                    name
                );

                if is_sampler_table {
                    sampler_table_mask |= 1 << index;
                } else {
                    view_table_mask |= 1 << index;
                }

                let mut size = 0u32;
                let mut offset = 0u32;
                for range in ranges {
                    if range.offset_in_descriptors_from_table_start != DESCRIPTOR_RANGE_OFFSET_APPEND {
                        offset = range.offset_in_descriptors_from_table_start;
                    }

                    if range.num_descriptors == UNBOUNDED_DESCRIPTOR_COUNT {
                        size = UNBOUNDED_DESCRIPTOR_COUNT;
                        break;
                    }

                    offset += range.num_descriptors;
                    size = size.max(offset);
                }

                table_sizes[index] = size;
            }
        }

        Ok(Self {
            root_signature,
            desc,
            view_table_mask,
            sampler_table_mask,
            table_sizes,
        })
    }

    /// Bit `i` is set when root parameter `i` is a descriptor table of heap type `ty`
    pub fn descriptor_table_mask(&self, ty: DescriptorHeapType) -> u64 {
        match ty {
            DescriptorHeapType::View => self.view_table_mask,
            DescriptorHeapType::Sampler => self.sampler_table_mask,
            DescriptorHeapType::Rtv | DescriptorHeapType::Dsv => 0,
        }
    }

    /// Descriptors in the table at `root_index`, `UNBOUNDED_DESCRIPTOR_COUNT` for bindless tables
    pub fn table_size(&self, root_index: u32) -> u32 {
        self.table_sizes[root_index as usize]
    }

    pub fn table_sizes(&self) -> &[u32; MAX_ROOT_PARAMETERS] {
        &self.table_sizes
    }

    pub fn desc(&self) -> &RootSignatureDesc {
        &self.desc
    }

    pub fn raw(&self) -> &backend::RootSignature {
        &self.root_signature
    }
}

#[cfg(test)]
mod tests {
    use crate::root_signature::RootSignature;
    use ze_gfx::backend::{
        DescriptorHeapType, DescriptorRange, DescriptorRangeType, RootParameter,
        RootSignatureDesc, ShaderVisibility, DESCRIPTOR_RANGE_OFFSET_APPEND,
        UNBOUNDED_DESCRIPTOR_COUNT,
    };
    use ze_gfx::null::NullDevice;

    fn range(ty: DescriptorRangeType, count: u32, offset: u32) -> DescriptorRange {
        DescriptorRange {
            ty,
            num_descriptors: count,
            base_shader_register: 0,
            register_space: 0,
            offset_in_descriptors_from_table_start: offset,
        }
    }

    #[test]
    fn parses_table_layout() {
        let desc = RootSignatureDesc {
            parameters: vec![
                RootParameter::Constants {
                    shader_register: 0,
                    register_space: 0,
                    num_32bit_values: 4,
                    visibility: ShaderVisibility::All,
                },
                RootParameter::DescriptorTable {
                    ranges: vec![
                        range(DescriptorRangeType::Srv, 4, DESCRIPTOR_RANGE_OFFSET_APPEND),
                        range(DescriptorRangeType::Uav, 2, DESCRIPTOR_RANGE_OFFSET_APPEND),
                        range(DescriptorRangeType::Cbv, 1, 10),
                    ],
                    visibility: ShaderVisibility::All,
                },
                RootParameter::DescriptorTable {
                    ranges: vec![range(DescriptorRangeType::Sampler, 3, 0)],
                    visibility: ShaderVisibility::Pixel,
                },
                RootParameter::DescriptorTable {
                    ranges: vec![range(
                        DescriptorRangeType::Srv,
                        UNBOUNDED_DESCRIPTOR_COUNT,
                        0,
                    )],
                    visibility: ShaderVisibility::All,
                },
            ],
            ..Default::default()
        };

        let root_signature = RootSignature::new(&NullDevice::new(), desc, "Test").unwrap();
        assert_eq!(root_signature.descriptor_table_mask(DescriptorHeapType::View), 0b1010);
        assert_eq!(root_signature.descriptor_table_mask(DescriptorHeapType::Sampler), 0b100);
        assert_eq!(root_signature.table_size(1), 11);
        assert_eq!(root_signature.table_size(2), 3);
        assert_eq!(root_signature.table_size(3), UNBOUNDED_DESCRIPTOR_COUNT);
        assert_eq!(root_signature.table_size(0), 0);
    }
}
