use std::collections::HashSet;
use std::ffi::{CStr, CString, c_char};

use ash::prelude::VkResult;
use ash::vk;
use itertools::Itertools;

use crate::backend::InstanceDesc;
use crate::backend::vulkan::debug_messenger::DebugMsger;

/// 设置所需的 layers 和 extensions，创建 vk instance
pub(super) fn create_instance(
    entry: &ash::Entry,
    desc: &InstanceDesc<'_>,
    window_exts: &[*const c_char],
) -> VkResult<ash::Instance> {
    let app_name = CString::new(desc.app_name).map_err(|_| vk::Result::ERROR_INITIALIZATION_FAILED)?;
    let engine_name = CString::new(desc.engine_name).map_err(|_| vk::Result::ERROR_INITIALIZATION_FAILED)?;
    let app_info = vk::ApplicationInfo::default()
        .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
        .application_name(app_name.as_c_str())
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(engine_name.as_c_str())
        .engine_version(vk::make_api_version(0, 1, 0, 0));

    let supported = supported_extensions(entry)?;
    let is_supported = |ext: &CStr| supported.iter().any(|s| s.as_c_str() == ext);

    let mut enabled_extensions: Vec<*const c_char> = Vec::new();
    for ext in window_exts {
        let name = unsafe { CStr::from_ptr(*ext) };
        if !is_supported(name) {
            log::error!("Required instance extension ({:?}) is missing", name);
            return Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        }
        enabled_extensions.push(*ext);
    }
    if desc.enable_validation {
        enabled_extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    // MoltenVK 等 portability 实现需要显式开启
    let mut flags = vk::InstanceCreateFlags::empty();
    if is_supported(ash::khr::portability_enumeration::NAME) {
        enabled_extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let enabled_extensions = enabled_extensions.into_iter().unique().collect_vec();
    let mut enabled_extensions_str = String::new();
    for ext in &enabled_extensions {
        enabled_extensions_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
    }
    log::info!("instance extensions: {}", enabled_extensions_str);

    let layer_names = desc
        .layers
        .iter()
        .map(|layer| CString::new(layer.as_str()).map_err(|_| vk::Result::ERROR_LAYER_NOT_PRESENT))
        .collect::<VkResult<Vec<_>>>()?;
    let enabled_layers = layer_names.iter().map(|layer| layer.as_ptr()).collect_vec();
    log::info!("instance layers: {:?}", desc.layers);

    let mut instance_ci = vk::InstanceCreateInfo::default()
        .flags(flags)
        .application_info(&app_info)
        .enabled_extension_names(&enabled_extensions)
        .enabled_layer_names(&enabled_layers);

    // 为 instance info 添加 debug messenger
    let mut debug_utils_messenger_ci = DebugMsger::debug_utils_messenger_ci();
    if desc.enable_validation {
        instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);
    }

    unsafe { entry.create_instance(&instance_ci, None) }
}

/// 当前环境下可用的 instance layers
pub(super) fn available_layers(entry: &ash::Entry) -> VkResult<Vec<String>> {
    let all_layer_props = unsafe { entry.enumerate_instance_layer_properties()? };
    Ok(all_layer_props
        .iter()
        .map(|prop| unsafe { CStr::from_ptr(prop.layer_name.as_ptr()) }.to_string_lossy().into_owned())
        .collect())
}

fn supported_extensions(entry: &ash::Entry) -> VkResult<HashSet<CString>> {
    let all_ext_props = unsafe { entry.enumerate_instance_extension_properties(None)? };
    Ok(all_ext_props
        .iter()
        .map(|prop| unsafe { CStr::from_ptr(prop.extension_name.as_ptr()) }.to_owned())
        .collect())
}
