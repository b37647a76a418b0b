use std::sync::Arc;

use ash::vk;
use segfault_gfx::SurfaceSource;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// 窗口系统产生的、App 关心的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// 用户关闭了窗口
    QuitRequested,
    /// 窗口的像素尺寸发生了变化
    Resized { width: u32, height: u32 },

    Other,
}

/// 窗口的创建参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowDesc {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub fullscreen: bool,
}

impl Default for WindowDesc {
    fn default() -> Self {
        Self {
            x: 50,
            y: 50,
            width: 400,
            height: 300,
            title: "hello, world!".to_string(),
            fullscreen: false,
        }
    }
}

/// 窗口系统的抽象
///
/// 一个 provider 同一时间最多持有一个窗口。
pub trait SurfaceProvider {
    /// 用于日志
    fn name(&self) -> &str;

    fn create_window(&mut self, desc: &WindowDesc) -> AppResult<Arc<dyn SurfaceSource>>;

    /// 取出一个待处理的事件，没有事件时立即返回 `None`
    fn poll_event(&mut self) -> Option<SurfaceEvent>;

    /// 窗口当前的像素尺寸，没有窗口时返回 `None`
    fn current_extent(&self) -> Option<vk::Extent2D>;

    /// provider 不再持有窗口。RHI 可能仍然持有 surface source 的引用，因此需要先于此关闭 RHI
    fn destroy_window(&mut self);
}
