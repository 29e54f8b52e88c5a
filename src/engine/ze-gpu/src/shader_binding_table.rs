use crate::context::CommandContext;
use crate::pipeline::StateObject;
use std::sync::Arc;
use ze_gfx::backend::{
    DeviceError, DispatchRaysDesc, GpuVirtualAddressRange, GpuVirtualAddressRangeAndStride,
    ShaderIdentifier, RAYTRACING_SHADER_RECORD_BYTE_ALIGNMENT,
    RAYTRACING_SHADER_TABLE_BYTE_ALIGNMENT, SHADER_IDENTIFIER_SIZE_IN_BYTES,
};
use ze_gfx::utils::align_up;

/// Whole tables are padded to this size
const TABLE_SIZE_ALIGNMENT: u64 = 256;

struct ShaderRecord {
    identifier: ShaderIdentifier,
    local_arguments: Vec<u8>,
}

/// One record size for every entry of a section, large enough for the biggest argument blob
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Section {
    offset: u64,
    record_size: u64,
    count: u64,
}

impl Section {
    fn new(records: &[ShaderRecord], offset: u64) -> Self {
        let largest_arguments = records
            .iter()
            .map(|record| record.local_arguments.len() as u64)
            .max()
            .unwrap_or(0);

        Self {
            offset: align_up(offset, RAYTRACING_SHADER_TABLE_BYTE_ALIGNMENT as u64),
            record_size: align_up(
                SHADER_IDENTIFIER_SIZE_IN_BYTES as u64 + largest_arguments,
                RAYTRACING_SHADER_RECORD_BYTE_ALIGNMENT as u64,
            ),
            count: records.len() as u64,
        }
    }

    fn size(&self) -> u64 {
        self.record_size * self.count
    }

    fn end(&self) -> u64 {
        self.offset + self.size()
    }

    fn range(&self, base_address: u64) -> GpuVirtualAddressRangeAndStride {
        if self.count == 0 {
            return GpuVirtualAddressRangeAndStride::default();
        }

        GpuVirtualAddressRangeAndStride {
            start_address: base_address + self.offset,
            size_in_bytes: self.size(),
            stride_in_bytes: self.record_size,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Layout {
    ray_generation: Section,
    miss: Section,
    hit_groups: Section,
    callable: Section,
    total_size: u64,
}

/// Shader records of a dispatch, uploaded to transient memory when the rays are dispatched
pub struct ShaderBindingTable {
    state_object: Arc<StateObject>,
    ray_generation: Option<ShaderRecord>,
    miss: Vec<ShaderRecord>,
    hit_groups: Vec<ShaderRecord>,
    callable: Vec<ShaderRecord>,
}

impl ShaderBindingTable {
    pub fn new(state_object: Arc<StateObject>) -> Self {
        Self {
            state_object,
            ray_generation: None,
            miss: vec![],
            hit_groups: vec![],
            callable: vec![],
        }
    }

    fn record(&self, export: &str, local_arguments: &[u8]) -> Option<ShaderRecord> {
        self.state_object
            .shader_identifier(export)
            .map(|identifier| ShaderRecord {
                identifier,
                local_arguments: local_arguments.to_vec(),
            })
    }

    /// Returns false when the state object has no such export
    pub fn bind_ray_generation(&mut self, export: &str, local_arguments: &[u8]) -> bool {
        match self.record(export, local_arguments) {
            Some(record) => {
                self.ray_generation = Some(record);
                true
            }
            None => false,
        }
    }

    pub fn add_miss(&mut self, export: &str, local_arguments: &[u8]) -> bool {
        match self.record(export, local_arguments) {
            Some(record) => {
                self.miss.push(record);
                true
            }
            None => false,
        }
    }

    pub fn add_hit_group(&mut self, export: &str, local_arguments: &[u8]) -> bool {
        match self.record(export, local_arguments) {
            Some(record) => {
                self.hit_groups.push(record);
                true
            }
            None => false,
        }
    }

    pub fn add_callable(&mut self, export: &str, local_arguments: &[u8]) -> bool {
        match self.record(export, local_arguments) {
            Some(record) => {
                self.callable.push(record);
                true
            }
            None => false,
        }
    }

    pub fn state_object(&self) -> &Arc<StateObject> {
        &self.state_object
    }

    pub fn reset(&mut self) {
        self.ray_generation = None;
        self.miss.clear();
        self.hit_groups.clear();
        self.callable.clear();
    }

    fn ray_generation_records(&self) -> &[ShaderRecord] {
        match &self.ray_generation {
            Some(record) => std::slice::from_ref(record),
            None => &[],
        }
    }

    fn layout(&self) -> Layout {
        let ray_generation = Section::new(self.ray_generation_records(), 0);
        let miss = Section::new(&self.miss, ray_generation.end());
        let hit_groups = Section::new(&self.hit_groups, miss.end());
        let callable = Section::new(&self.callable, hit_groups.end());

        Layout {
            total_size: align_up(callable.end(), TABLE_SIZE_ALIGNMENT),
            ray_generation,
            miss,
            hit_groups,
            callable,
        }
    }

    /// Bytes the tables take once uploaded
    pub fn size(&self) -> u64 {
        self.layout().total_size
    }

    /// Upload every record and describe the dispatch. The tables are emptied afterwards.
    pub fn commit(
        &mut self,
        context: &mut CommandContext,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<DispatchRaysDesc, DeviceError> {
        assert!(
            self.ray_generation.is_some(),
            "shader binding table of {} has no ray generation shader",
            self.state_object.name()
        );

        let layout = self.layout();
        let mut allocation = context.allocate_upload(
            layout.total_size,
            RAYTRACING_SHADER_TABLE_BYTE_ALIGNMENT as u64,
        )?;

        let sections = [
            (&layout.ray_generation, self.ray_generation_records()),
            (&layout.miss, self.miss.as_slice()),
            (&layout.hit_groups, self.hit_groups.as_slice()),
            (&layout.callable, self.callable.as_slice()),
        ];
        for (section, records) in sections {
            for (index, record) in records.iter().enumerate() {
                let offset = section.offset + index as u64 * section.record_size;
                allocation.write(offset, &record.identifier);
                allocation.write(
                    offset + SHADER_IDENTIFIER_SIZE_IN_BYTES as u64,
                    &record.local_arguments,
                );
            }
        }

        let base_address = allocation.gpu_address();
        let desc = DispatchRaysDesc {
            ray_generation_shader_record: GpuVirtualAddressRange {
                start_address: base_address + layout.ray_generation.offset,
                size_in_bytes: layout.ray_generation.record_size,
            },
            miss_shader_table: layout.miss.range(base_address),
            hit_group_table: layout.hit_groups.range(base_address),
            callable_shader_table: layout.callable.range(base_address),
            width,
            height,
            depth,
        };

        self.reset();
        Ok(desc)
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline::StateObject;
    use crate::shader_binding_table::ShaderBindingTable;
    use std::sync::Arc;
    use ze_gfx::backend::{Device, DxilLibraryDesc, StateObjectDesc};
    use ze_gfx::null::NullDevice;

    fn state_object() -> Arc<StateObject> {
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        Arc::new(
            StateObject::new(
                device,
                &StateObjectDesc {
                    libraries: vec![DxilLibraryDesc {
                        bytecode: Arc::from(&[0u8; 4][..]),
                        exports: vec![
                            "RayGen".to_string(),
                            "Miss".to_string(),
                            "ShadowMiss".to_string(),
                            "Hit".to_string(),
                        ],
                    }],
                    hit_groups: vec![],
                    max_payload_size_in_bytes: 16,
                    max_attribute_size_in_bytes: 8,
                    max_trace_recursion_depth: 1,
                    global_root_signature: None,
                },
                "Raytracing",
            )
            .unwrap(),
        )
    }

    #[test]
    fn sections_are_aligned() {
        let mut sbt = ShaderBindingTable::new(state_object());
        assert!(sbt.bind_ray_generation("RayGen", &[]));
        assert!(sbt.add_miss("Miss", &[1; 8]));
        assert!(sbt.add_miss("ShadowMiss", &[]));
        assert!(sbt.add_hit_group("Hit", &[2; 40]));

        let layout = sbt.layout();
        assert_eq!(layout.ray_generation.offset, 0);
        assert_eq!(layout.ray_generation.record_size, 32);

        // 32 bytes of identifier plus 8 bytes of arguments
        assert_eq!(layout.miss.offset, 64);
        assert_eq!(layout.miss.record_size, 64);

        assert_eq!(layout.hit_groups.offset, 192);
        assert_eq!(layout.hit_groups.record_size, 96);
        assert_eq!(layout.callable.count, 0);
        assert_eq!(sbt.size(), 512);
    }

    #[test]
    fn missing_exports_are_rejected() {
        let mut sbt = ShaderBindingTable::new(state_object());
        assert!(!sbt.add_hit_group("Unknown", &[]));
        assert_eq!(sbt.layout().hit_groups.count, 0);
    }
}
