//! The shader cache (§4.4).
//!
//! Loads compiled SPIR-V modules from a root directory, reflects each one
//! with `spirv-reflect` to recover its descriptor-set/binding layout, and
//! hands back live `vk::ShaderModule`s to the pipeline cache. Also watches
//! the source tree for edits and, on `check_for_updates`, shells out to an
//! external compile script — the same hot-reload shape as the teacher's
//! `ShaderManager` timestamp walk, generalized from GLSL-only to the five
//! stage extensions this engine's pipelines use.

use crate::error::ShaderError;
use ash::vk;
use fxhash::FxHashMap;
use spirv_reflect::types::ReflectDescriptorType;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

/// One resolved descriptor binding within a shader module, keyed by its
/// shader-side name with the authoring convention's type-tag prefix
/// stripped (§4.4: "a leading lowercase 'g' followed by uppercase").
#[derive(Debug, Clone)]
pub struct ReflectedBinding {
    pub name: String,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stage_mask: vk::ShaderStageFlags,
}

struct CachedModule {
    module: vk::ShaderModule,
    spirv: Vec<u32>,
    loaded_at: SystemTime,
    sets: FxHashMap<u32, Vec<ReflectedBinding>>,
}

/// Source-extension -> stage-flag table used by `check_for_updates` to
/// decide which edited files matter (§4.4).
const SOURCE_EXTENSIONS: &[&str] = &["vert", "frag", "comp", "rgen", "rchit", "rmiss", "rahit"];

pub struct ShaderCache {
    device: ash::Device,
    spirv_root: PathBuf,
    source_root: PathBuf,
    compile_script: Option<PathBuf>,
    modules: RefCell<FxHashMap<String, CachedModule>>,
    last_scan: RefCell<SystemTime>,
}

impl ShaderCache {
    pub fn new(device: ash::Device, spirv_root: PathBuf, source_root: PathBuf, compile_script: Option<PathBuf>) -> Self {
        ShaderCache {
            device,
            spirv_root,
            source_root,
            compile_script,
            modules: RefCell::new(FxHashMap::default()),
            last_scan: RefCell::new(SystemTime::UNIX_EPOCH),
        }
    }

    /// Loads (or returns the cached) `vk::ShaderModule` for `name`, reflecting
    /// it on first load (§4.5 step 1-2).
    pub fn get_module(&self, name: &str) -> Result<vk::ShaderModule, ShaderError> {
        if let Some(cached) = self.modules.borrow().get(name) {
            return Ok(cached.module);
        }

        let spirv = self.read_spirv(name)?;
        let sets = reflect_sets(name, &spirv)?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&spirv);
        let module = unsafe { self.device.create_shader_module(&create_info, None) }.map_err(|source| ShaderError::ReflectionFailed {
            module: name.to_string(),
            reason: source.to_string(),
        })?;

        self.modules.borrow_mut().insert(
            name.to_string(),
            CachedModule {
                module,
                spirv,
                loaded_at: SystemTime::now(),
                sets,
            },
        );

        Ok(module)
    }

    /// Returns the cached (or newly loaded) raw SPIR-V words for `name`
    /// (§4.4 `get_code`).
    pub fn get_code(&self, name: &str) -> Result<Vec<u32>, ShaderError> {
        self.get_module(name)?;
        Ok(self.modules.borrow().get(name).expect("just inserted").spirv.clone())
    }

    /// Sorted reflection for one descriptor set within a module (§4.4
    /// `get_set_bindings`, used by pipeline construction to build set
    /// layouts).
    pub fn get_set_bindings(&self, module: &str, set_index: u32) -> Result<Vec<ReflectedBinding>, ShaderError> {
        self.get_module(module)?;
        let modules = self.modules.borrow();
        let cached = modules.get(module).expect("just inserted");
        let mut bindings = cached.sets.get(&set_index).cloned().unwrap_or_default();
        bindings.sort_by_key(|b| b.binding);
        Ok(bindings)
    }

    fn read_spirv(&self, name: &str) -> Result<Vec<u32>, ShaderError> {
        let path = self.spirv_root.join(format!("{name}.spv"));
        let bytes = fs::read(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ShaderError::ModuleNotFound(name.to_string())
            } else {
                ShaderError::Io {
                    path: path.display().to_string(),
                    source,
                }
            }
        })?;

        if bytes.len() % 4 != 0 {
            return Err(ShaderError::ReflectionFailed {
                module: name.to_string(),
                reason: "SPIR-V file length is not a multiple of 4 bytes".to_string(),
            });
        }

        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// Walks both the compiled and source directories; if any source file
    /// (one of [`SOURCE_EXTENSIONS`]) has a newer modification time than the
    /// last scan, runs the configured compile script and evicts every
    /// cached module so the next `get_module` call reflects and recreates
    /// from the freshly compiled `.spv` (§4.4, §8 Scenario E).
    pub fn check_for_updates(&self) -> bool {
        let mut newest = *self.last_scan.borrow();
        let mut changed = false;

        if let Ok(entries) = fs::read_dir(&self.source_root) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
                    continue;
                };
                if !SOURCE_EXTENSIONS.contains(&extension) {
                    continue;
                }
                if let Ok(metadata) = entry.metadata() {
                    if let Ok(modified) = metadata.modified() {
                        if modified > *self.last_scan.borrow() {
                            changed = true;
                        }
                        if modified > newest {
                            newest = modified;
                        }
                    }
                }
            }
        }

        *self.last_scan.borrow_mut() = newest;

        if !changed {
            return false;
        }

        if let Some(script) = &self.compile_script {
            match Command::new(script).status() {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    log::warn!("shader compile script exited with {status}");
                }
                Err(source) => {
                    log::warn!("failed to invoke shader compile script `{}`: {source}", script.display());
                }
            }
        }

        self.modules.borrow_mut().clear();
        true
    }
}

impl Drop for ShaderCache {
    fn drop(&mut self) {
        for (_, cached) in self.modules.borrow_mut().drain() {
            unsafe { self.device.destroy_shader_module(cached.module, None) };
        }
    }
}

/// Strips the shader authoring convention's leading type tag (a lowercase
/// letter immediately followed by an uppercase letter, e.g. `gAlbedoMap` ->
/// `AlbedoMap`) from a reflected binding name (§4.4).
fn strip_name_prefix(name: &str) -> &str {
    let mut chars = name.char_indices();
    match (chars.next(), chars.next()) {
        (Some((_, first)), Some((second_index, second))) if first.is_ascii_lowercase() && second.is_ascii_uppercase() => {
            &name[second_index..]
        }
        _ => name,
    }
}

fn reflect_sets(module_name: &str, spirv: &[u32]) -> Result<FxHashMap<u32, Vec<ReflectedBinding>>, ShaderError> {
    let reflected = spirv_reflect::ShaderModule::load_u32_data(spirv).map_err(|reason| ShaderError::ReflectionFailed {
        module: module_name.to_string(),
        reason: reason.to_string(),
    })?;

    let stage_mask = reflect_stage_to_vk(reflected.get_shader_stage());

    let descriptor_sets = reflected
        .enumerate_descriptor_sets(Some("main"))
        .map_err(|reason| ShaderError::ReflectionFailed {
            module: module_name.to_string(),
            reason: reason.to_string(),
        })?;

    let mut sets: FxHashMap<u32, Vec<ReflectedBinding>> = FxHashMap::default();
    for descriptor_set in descriptor_sets {
        let mut bindings = Vec::with_capacity(descriptor_set.bindings.len());
        for binding in descriptor_set.bindings {
            bindings.push(ReflectedBinding {
                name: strip_name_prefix(&binding.name).to_string(),
                binding: binding.binding,
                descriptor_type: reflect_descriptor_type_to_vk(binding.descriptor_type),
                count: binding.count,
                stage_mask,
            });
        }
        sets.insert(descriptor_set.set, bindings);
    }

    Ok(sets)
}

fn reflect_descriptor_type_to_vk(ty: ReflectDescriptorType) -> vk::DescriptorType {
    match ty {
        ReflectDescriptorType::Sampler => vk::DescriptorType::SAMPLER,
        ReflectDescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        ReflectDescriptorType::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        ReflectDescriptorType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        ReflectDescriptorType::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        ReflectDescriptorType::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        ReflectDescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        ReflectDescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        ReflectDescriptorType::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        ReflectDescriptorType::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        ReflectDescriptorType::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
        ReflectDescriptorType::AccelerationStructureKHR => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        ReflectDescriptorType::Undefined => vk::DescriptorType::UNIFORM_BUFFER,
    }
}

fn reflect_stage_to_vk(stage: spirv_reflect::types::ReflectShaderStageFlags) -> vk::ShaderStageFlags {
    use spirv_reflect::types::ReflectShaderStageFlags as R;
    let mut flags = vk::ShaderStageFlags::empty();
    if stage.contains(R::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stage.contains(R::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stage.contains(R::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    if stage.contains(R::RAYGEN_BIT_NV) {
        flags |= vk::ShaderStageFlags::RAYGEN_KHR;
    }
    if stage.contains(R::MISS_BIT_NV) {
        flags |= vk::ShaderStageFlags::MISS_KHR;
    }
    if stage.contains(R::CLOSEST_HIT_BIT_NV) {
        flags |= vk::ShaderStageFlags::CLOSEST_HIT_KHR;
    }
    if stage.contains(R::ANY_HIT_BIT_NV) {
        flags |= vk::ShaderStageFlags::ANY_HIT_KHR;
    }
    if stage.contains(R::INTERSECTION_BIT_NV) {
        flags |= vk::ShaderStageFlags::INTERSECTION_KHR;
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_letter_type_tag() {
        assert_eq!(strip_name_prefix("gAlbedoMap"), "AlbedoMap");
        assert_eq!(strip_name_prefix("bViewProj"), "ViewProj");
    }

    #[test]
    fn leaves_names_without_the_convention_alone() {
        assert_eq!(strip_name_prefix("albedoMap"), "albedoMap");
        assert_eq!(strip_name_prefix("g"), "g");
        assert_eq!(strip_name_prefix(""), "");
    }
}
