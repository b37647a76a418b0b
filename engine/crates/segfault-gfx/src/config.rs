use serde::{Deserialize, Serialize};

/// validation layer 的名称
pub const VALIDATION_LAYER_NAME: &str = "VK_LAYER_KHRONOS_validation";

/// swapchain 扩展的名称，所有的物理设备都必须支持
pub const SWAPCHAIN_EXTENSION_NAME: &str = "VK_KHR_swapchain";

/// RHI 的配置
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhiConfig {
    pub engine_name: String,

    /// 默认由 `validation` feature 决定
    pub enable_validation: bool,

    /// 物理设备必须支持的 device extensions
    pub required_device_extensions: Vec<String>,

    /// acquire next image 的超时时间，单位：纳秒
    pub acquire_timeout_ns: u64,
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self {
            engine_name: "Segfault".to_string(),
            enable_validation: cfg!(feature = "validation"),
            required_device_extensions: vec![SWAPCHAIN_EXTENSION_NAME.to_string()],
            acquire_timeout_ns: u64::MAX,
        }
    }
}

impl RhiConfig {
    /// 需要开启的 instance layers
    pub fn instance_layers(&self) -> Vec<String> {
        if self.enable_validation {
            vec![VALIDATION_LAYER_NAME.to_string()]
        } else {
            Vec::new()
        }
    }
}
