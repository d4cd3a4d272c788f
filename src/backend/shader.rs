// Shader module loading
//
// Shaders are compiled to SPIR-V by build.rs and loaded from disk at startup,
// so a missing or corrupt file is an initialization error rather than a
// build break.

use anyhow::{Context, Result};
use ash::vk;
use std::fs::File;
use std::path::Path;

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);

    unsafe { device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

/// Read a `.spv` file and create a shader module from it
pub fn load_shader_module<P: AsRef<Path>>(device: &ash::Device, path: P) -> Result<vk::ShaderModule> {
    let path = path.as_ref();
    let code = read_spirv(path)?;
    log::debug!("Loaded shader {:?} ({} words)", path, code.len());

    create_shader_module(device, &code).with_context(|| format!("Shader {:?}", path))
}

/// SPIR-V is a stream of 4-byte words; `read_spv` handles alignment and
/// endianness and rejects files that are not a whole number of words
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open shader file: {:?}", path))?;
    ash::util::read_spv(&mut file).with_context(|| format!("Invalid SPIR-V in {:?}", path))
}
