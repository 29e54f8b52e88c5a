use crate::root_signature::RootSignature;
use ze_gfx::backend;
use ze_gfx::backend::{CommandSignatureDesc, Device, DeviceError, IndirectArgument};

/// Describes the layout of one indirect command inside an argument buffer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandSignatureBuilder {
    arguments: Vec<IndirectArgument>,
    stride: u32,
}

impl CommandSignatureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, argument: IndirectArgument) -> Self {
        self.stride += argument.byte_size();
        self.arguments.push(argument);
        self
    }

    pub fn add_dispatch(self) -> Self {
        self.add(IndirectArgument::Dispatch)
    }

    pub fn add_draw(self) -> Self {
        self.add(IndirectArgument::Draw)
    }

    pub fn add_draw_indexed(self) -> Self {
        self.add(IndirectArgument::DrawIndexed)
    }

    pub fn add_dispatch_mesh(self) -> Self {
        self.add(IndirectArgument::DispatchMesh)
    }

    pub fn add_constants(self, count: u32, root_index: u32, dest_offset: u32) -> Self {
        self.add(IndirectArgument::Constant {
            root_parameter_index: root_index,
            dest_offset_in_32bit_values: dest_offset,
            num_32bit_values: count,
        })
    }

    pub fn add_constant_buffer_view(self, root_index: u32) -> Self {
        self.add(IndirectArgument::ConstantBufferView {
            root_parameter_index: root_index,
        })
    }

    pub fn add_shader_resource_view(self, root_index: u32) -> Self {
        self.add(IndirectArgument::ShaderResourceView {
            root_parameter_index: root_index,
        })
    }

    pub fn add_unordered_access_view(self, root_index: u32) -> Self {
        self.add(IndirectArgument::UnorderedAccessView {
            root_parameter_index: root_index,
        })
    }

    pub fn add_vertex_buffer(self, slot: u32) -> Self {
        self.add(IndirectArgument::VertexBufferView { slot })
    }

    pub fn add_index_buffer(self) -> Self {
        self.add(IndirectArgument::IndexBufferView)
    }

    /// Size in bytes of one command in the argument buffer
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn is_compute(&self) -> bool {
        self.arguments
            .iter()
            .any(|argument| *argument == IndirectArgument::Dispatch)
    }

    /// `root_signature` is required as soon as one argument writes root parameters
    pub fn build(
        self,
        device: &dyn Device,
        root_signature: Option<&RootSignature>,
    ) -> Result<CommandSignature, DeviceError> {
        assert!(!self.arguments.is_empty(), "empty command signature");
        let needs_root_signature = self
            .arguments
            .iter()
            .any(IndirectArgument::needs_root_signature);
        assert!(
            !needs_root_signature || root_signature.is_some(),
            "command signature changes root parameters but has no root signature"
        );

        let is_compute = self.is_compute();
        let desc = CommandSignatureDesc {
            byte_stride: self.stride,
            arguments: self.arguments,
        };
        let signature = device.create_command_signature(
            &desc,
            root_signature
                .filter(|_| needs_root_signature)
                .map(RootSignature::raw),
        )?;

        Ok(CommandSignature {
            signature,
            desc,
            is_compute,
        })
    }
}

pub struct CommandSignature {
    signature: backend::CommandSignature,
    desc: CommandSignatureDesc,
    is_compute: bool,
}

impl CommandSignature {
    pub fn stride(&self) -> u32 {
        self.desc.byte_stride
    }

    /// Commands are bound to the compute pipeline
    pub fn is_compute(&self) -> bool {
        self.is_compute
    }

    pub fn arguments(&self) -> &[IndirectArgument] {
        &self.desc.arguments
    }

    pub fn raw(&self) -> &backend::CommandSignature {
        &self.signature
    }
}

#[cfg(test)]
mod tests {
    use crate::command_signature::CommandSignatureBuilder;
    use crate::root_signature::RootSignature;
    use ze_gfx::backend::{RootParameter, RootSignatureDesc, ShaderVisibility};
    use ze_gfx::null::NullDevice;

    #[test]
    fn stride_sums_argument_sizes() {
        let builder = CommandSignatureBuilder::new()
            .add_constants(3, 0, 0)
            .add_vertex_buffer(0)
            .add_index_buffer()
            .add_draw_indexed();
        assert_eq!(builder.stride(), 12 + 16 + 16 + 20);
        assert!(!builder.is_compute());

        let builder = CommandSignatureBuilder::new()
            .add_constant_buffer_view(1)
            .add_dispatch();
        assert_eq!(builder.stride(), 8 + 12);
        assert!(builder.is_compute());
    }

    #[test]
    fn mesh_dispatch_is_graphics() {
        let device = NullDevice::new();
        let signature = CommandSignatureBuilder::new()
            .add_dispatch_mesh()
            .build(&device, None)
            .unwrap();
        assert_eq!(signature.stride(), 12);
        assert!(!signature.is_compute());
    }

    #[test]
    #[should_panic(expected = "no root signature")]
    fn root_arguments_need_a_root_signature() {
        let device = NullDevice::new();
        let _ = CommandSignatureBuilder::new()
            .add_constants(1, 0, 0)
            .add_draw()
            .build(&device, None);
    }

    #[test]
    fn builds_with_root_signature() {
        let device = NullDevice::new();
        let root_signature = RootSignature::new(
            &device,
            RootSignatureDesc {
                parameters: vec![RootParameter::Constants {
                    shader_register: 0,
                    register_space: 0,
                    num_32bit_values: 1,
                    visibility: ShaderVisibility::All,
                }],
                ..Default::default()
            },
            "Indirect",
        )
        .unwrap();

        let signature = CommandSignatureBuilder::new()
            .add_constants(1, 0, 0)
            .add_dispatch()
            .build(&device, Some(&root_signature))
            .unwrap();
        assert_eq!(signature.stride(), 16);
        assert_eq!(signature.arguments().len(), 2);
    }
}
