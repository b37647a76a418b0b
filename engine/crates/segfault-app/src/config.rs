use std::path::Path;

use segfault_gfx::RhiConfig;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::platform::surface_provider::WindowDesc;

/// App 的配置，可以从 toml 文件中读取，缺失的字段使用默认值
///
/// ```toml
/// headless = true
/// headless_frames = 120
///
/// [window]
/// width = 800
/// height = 600
///
/// [rhi]
/// enable_validation = true
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowDesc,

    /// 使用 headless backend 与 headless 窗口，不需要 GPU
    pub headless: bool,

    /// 在独立的渲染线程上绘制；否则由 `App::draw_frame` 在主线程上绘制
    pub threaded_rendering: bool,

    /// headless 模式下运行多少帧之后退出，0 表示不会主动退出
    pub headless_frames: u64,

    pub rhi: RhiConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window: WindowDesc::default(),
            headless: false,
            threaded_rendering: true,
            headless_frames: 0,
            rhi: RhiConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> AppResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| AppError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
