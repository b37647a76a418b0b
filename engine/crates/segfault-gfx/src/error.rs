use ash::vk;
use thiserror::Error;

use crate::rhi::RhiState;

pub type GfxResult<T> = Result<T, GfxError>;

/// RHI 的错误类型
///
/// - 环境错误：loader 加载失败、window handle 不可用
/// - 能力错误：缺少 validation layer、没有合适的物理设备
/// - GPU 调用错误：某个 vk 调用返回了非 SUCCESS
/// - 使用错误：在错误的生命周期状态下调用
#[derive(Debug, Error)]
pub enum GfxError {
    #[error("vulkan loader is unavailable: {0}")]
    LoaderUnavailable(String),

    #[error("native surface is unavailable: {0}")]
    SurfaceUnavailable(String),

    #[error("required instance layer is missing: {0}")]
    MissingLayer(String),

    #[error("no suitable physical device found ({candidates} candidates)")]
    NoSuitableDevice { candidates: usize },

    #[error("{call} failed: {result:?}")]
    Vk { call: &'static str, result: vk::Result },

    #[error("`{op}` is not valid in state {state:?}")]
    InvalidState { op: &'static str, state: RhiState },

    #[error("RHI is not initialized")]
    NotInitialized,

    #[error("surface extent is zero, swapchain can not be created")]
    ZeroExtent,
}

impl GfxError {
    /// 用于 `map_err`，将 vk 错误码包装为 [`GfxError::Vk`]
    #[inline]
    pub fn vk(call: &'static str) -> impl FnOnce(vk::Result) -> GfxError {
        move |result| GfxError::Vk { call, result }
    }

    /// 交换链是否已经失效，需要重建
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            GfxError::Vk {
                result: vk::Result::ERROR_OUT_OF_DATE_KHR,
                ..
            }
        )
    }
}
