use crate::root_signature::RootSignature;
use fnv::{FnvHashMap, FnvHasher};
use parking_lot::Mutex;
use std::hash::Hasher;
use std::sync::Arc;
use ze_core::{ze_verbose, ze_warn};
use ze_gfx::backend;
use ze_gfx::backend::{Device, DeviceError, ShaderIdentifier, StateObjectDesc};
use ze_gfx::pipeline_stream::PipelineStateStream;

pub struct PipelineState {
    pipeline: backend::PipelineState,
    root_signature: Arc<RootSignature>,
    is_compute: bool,
}

impl PipelineState {
    pub fn new(
        device: &dyn Device,
        stream: &PipelineStateStream,
        root_signature: Arc<RootSignature>,
        name: &str,
    ) -> Result<Self, DeviceError> {
        let pipeline = device.create_pipeline_state(stream, root_signature.raw(), name)?;
        Ok(Self {
            pipeline,
            root_signature,
            is_compute: stream.is_compute(),
        })
    }

    pub fn root_signature(&self) -> &Arc<RootSignature> {
        &self.root_signature
    }

    pub fn is_compute(&self) -> bool {
        self.is_compute
    }

    pub fn raw(&self) -> &backend::PipelineState {
        &self.pipeline
    }
}

/// A ray tracing pipeline
pub struct StateObject {
    device: Arc<dyn Device>,
    state_object: backend::StateObject,
    name: String,
}

impl StateObject {
    pub fn new(device: Arc<dyn Device>, desc: &StateObjectDesc, name: &str) -> Result<Self, DeviceError> {
        let state_object = device.create_state_object(desc, name)?;
        Ok(Self {
            device,
            state_object,
            name: name.to_string(),
        })
    }

    pub fn shader_identifier(&self, export: &str) -> Option<ShaderIdentifier> {
        let identifier = self.device.shader_identifier(&self.state_object, export);
        if identifier.is_none() {
            ze_warn!("State object {} has no export named {}", self.name, export);
        }
        identifier
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &backend::StateObject {
        &self.state_object
    }
}

/// Stable hash of a shader define list, two permutations of the same shader never collide
/// unless their defines are equal
pub fn defines_salt(defines: &[String]) -> u64 {
    let mut hasher = FnvHasher::default();
    for define in defines {
        hasher.write(define.as_bytes());
        hasher.write_u8(0);
    }
    hasher.finish()
}

/// Pipelines keyed by `(content hash, defines salt)`
pub struct PipelineStateCache {
    device: Arc<dyn Device>,
    pipelines: Mutex<FnvHashMap<(u64, u64), Arc<PipelineState>>>,
}

impl PipelineStateCache {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            pipelines: Default::default(),
        }
    }

    /// Fetch or create a pipeline. A pipeline that fails to compile is reported and `None`
    /// is returned, the caller is expected to skip the work depending on it.
    pub fn get_or_create(
        &self,
        hash: u64,
        defines: &[String],
        stream: &PipelineStateStream,
        root_signature: &Arc<RootSignature>,
        name: &str,
    ) -> Option<Arc<PipelineState>> {
        let key = (hash, defines_salt(defines));
        if let Some(pipeline) = self.pipelines.lock().get(&key) {
            return Some(pipeline.clone());
        }

        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        match PipelineState::new(&*self.device, stream, root_signature.clone(), name) {
            Ok(pipeline) => {
                ze_verbose!("Created pipeline {} ({:#x})", name, hash);
                let pipeline = Arc::new(pipeline);
                Some(
                    self.pipelines
                        .lock()
                        .entry(key)
                        .or_insert(pipeline)
                        .clone(),
                )
            }
            Err(error) => {
                ze_warn!("Failed to create pipeline {}: {}", name, error);
                None
            }
        }
    }

    /// Forget every permutation built from `hash`, used when its shaders are reloaded
    pub fn invalidate(&self, hash: u64) -> usize {
        let mut pipelines = self.pipelines.lock();
        let before = pipelines.len();
        pipelines.retain(|(pipeline_hash, _), _| *pipeline_hash != hash);
        before - pipelines.len()
    }

    pub fn len(&self) -> usize {
        self.pipelines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline::{defines_salt, PipelineStateCache, StateObject};
    use crate::root_signature::RootSignature;
    use std::sync::Arc;
    use ze_gfx::backend::{Device, DxilLibraryDesc, RootSignatureDesc, StateObjectDesc};
    use ze_gfx::null::NullDevice;
    use ze_gfx::pipeline_stream::{PipelineStateStream, PipelineSubobject};

    fn setup() -> (Arc<dyn Device>, Arc<RootSignature>) {
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        let root_signature =
            Arc::new(RootSignature::new(&*device, RootSignatureDesc::default(), "Empty").unwrap());
        (device, root_signature)
    }

    #[test]
    fn salt_depends_on_defines() {
        let a = defines_salt(&["A".to_string(), "B".to_string()]);
        let b = defines_salt(&["AB".to_string()]);
        assert_ne!(a, b);
        assert_eq!(a, defines_salt(&["A".to_string(), "B".to_string()]));
    }

    #[test]
    fn pipelines_are_cached_per_permutation() {
        let (device, root_signature) = setup();
        let cache = PipelineStateCache::new(device);
        let stream =
            PipelineStateStream::new().with(PipelineSubobject::ComputeShader(Arc::from(&[0u8; 4][..])));

        let first = cache
            .get_or_create(1, &[], &stream, &root_signature, "Compute")
            .unwrap();
        let again = cache
            .get_or_create(1, &[], &stream, &root_signature, "Compute")
            .unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(first.is_compute());

        cache
            .get_or_create(1, &["FAST".to_string()], &stream, &root_signature, "Compute")
            .unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.invalidate(1), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn failed_pipelines_return_none() {
        let (device, root_signature) = setup();
        let cache = PipelineStateCache::new(device);
        assert!(cache
            .get_or_create(2, &[], &PipelineStateStream::new(), &root_signature, "Broken")
            .is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn missing_export_has_no_identifier() {
        let (device, _) = setup();
        let state_object = StateObject::new(
            device,
            &StateObjectDesc {
                libraries: vec![DxilLibraryDesc {
                    bytecode: Arc::from(&[0u8; 4][..]),
                    exports: vec!["RayGen".to_string()],
                }],
                hit_groups: vec![],
                max_payload_size_in_bytes: 16,
                max_attribute_size_in_bytes: 8,
                max_trace_recursion_depth: 1,
                global_root_signature: None,
            },
            "Raytracing",
        )
        .unwrap();

        assert!(state_object.shader_identifier("RayGen").is_some());
        assert!(state_object.shader_identifier("Miss").is_none());
    }
}
