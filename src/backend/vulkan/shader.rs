// Shader module loading
//
// Shaders arrive as SPIR-V bytes inside a `ShaderResult`. `read_spv` copies
// them into properly aligned words, so `include_bytes!` output can be passed
// through untouched.

use std::io::Cursor;

use anyhow::{Context, Result};
use ash::vk;

use crate::resource::ShaderStages;

pub fn create_shader_module(device: &ash::Device, code: &[u8]) -> Result<vk::ShaderModule> {
    let words = ash::util::read_spv(&mut Cursor::new(code)).context("Shader bytecode is not valid SPIR-V")?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe { device.create_shader_module(&create_info, None) }.context("Failed to create shader module")
}

pub fn vk_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    vk::ShaderStageFlags::from_raw(stages.bits())
}
