//! Vulkan RHI (Rendering Hardware Interface) 抽象层
//!
//! [`rhi::Rhi`] 按顺序创建 instance → surface → device → swapchain，并按相反的顺序释放。
//! 所有 GPU 调用都经过 [`backend::GfxBackend`]，因此同一套生命周期逻辑既可以运行在
//! [`backend::vulkan::VulkanBackend`] 上，也可以运行在不依赖 GPU 的
//! [`backend::headless::HeadlessBackend`] 上。

pub mod backend;
pub mod commands;
pub mod config;
pub mod error;
pub mod foundation;
pub mod release;
pub mod rhi;
pub mod swapchain;

pub use commands::draw_command::{DrawCommand, Guid, PipelineHandle, RenderBuffer, RenderPipelineState};
pub use config::RhiConfig;
pub use error::{GfxError, GfxResult};
pub use rhi::{FrameStatus, Rhi, RhiState};
pub use swapchain::surface::{HeadlessSurface, SurfaceSource};
