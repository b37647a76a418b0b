use std::ffi::CStr;

use ash::prelude::VkResult;
use ash::vk;

const DEBUG_MSG_SEVERITY: vk::DebugUtilsMessageSeverityFlagsEXT = vk::DebugUtilsMessageSeverityFlagsEXT::from_raw(
    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING.as_raw() | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR.as_raw(),
);

const DEBUG_MSG_TYPE: vk::DebugUtilsMessageTypeFlagsEXT = vk::DebugUtilsMessageTypeFlagsEXT::from_raw(
    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL.as_raw()
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION.as_raw()
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE.as_raw(),
);

/// 将 validation layer 的消息输出到 `log`
pub(super) struct DebugMsger {
    loader: ash::ext::debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMsger {
    pub(super) fn new(entry: &ash::Entry, instance: &ash::Instance) -> VkResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = Self::debug_utils_messenger_ci();
        let handle = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };

        Ok(Self { loader, handle })
    }

    pub(super) fn destroy(self) {
        log::info!("destroying debug messenger");
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.handle, None);
        }
    }

    /// 用于创建 debug messenger 的结构体
    ///
    /// 也会挂在 instance create info 上，用于捕获 instance 创建和销毁过程中的消息
    pub(super) fn debug_utils_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(DEBUG_MSG_SEVERITY)
            .message_type(DEBUG_MSG_TYPE)
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

/// debug messenger 的回调函数
/// # Safety
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let callback_data = unsafe { *p_callback_data };

    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let format_msg = format!("[{:?}]\n{}", message_type, format_validation_message(msg.as_ref()));

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{}", format_msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{}", format_msg),
        _ => log::info!("{}", format_msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

/// 提取 json 里面的 MainMessage 字段，这个字段里面有换行符，需要单独输出
///
/// 不是 json 的消息原样返回
fn format_validation_message(msg: &str) -> String {
    let mut json_value = serde_json::from_str::<serde_json::Value>(msg);
    let Some(obj) = json_value.as_mut().ok().and_then(|v| v.as_object_mut()) else {
        return msg.to_string();
    };

    let main_msg = obj.remove("MainMessage");
    let main_msg_str = main_msg.as_ref().and_then(|value| value.as_str()).unwrap_or_default();
    let total_msg_str = serde_json::to_string_pretty(&obj).unwrap_or_else(|_| msg.to_string());

    format!("{}\n{}\n", total_msg_str, main_msg_str)
}
