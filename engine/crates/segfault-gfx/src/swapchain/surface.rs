use std::sync::Mutex;

use ash::vk;
use raw_window_handle::{DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle};

/// 可以被绑定为 vk surface 的窗口
///
/// 除了 native handle 之外，还需要提供窗口当前的像素尺寸：
/// 当 surface capabilities 中的 current extent 未定义时，swapchain 的尺寸来自这里。
pub trait SurfaceSource: HasDisplayHandle + HasWindowHandle + Send + Sync {
    fn pixel_extent(&self) -> vk::Extent2D;
}

impl SurfaceSource for winit::window::Window {
    fn pixel_extent(&self) -> vk::Extent2D {
        let size = self.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

/// 没有 native window 的 surface，配合 headless backend 使用
///
/// native handle 始终不可用，因此无法用于 vulkan backend。
pub struct HeadlessSurface {
    extent: Mutex<vk::Extent2D>,
}

impl HeadlessSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: Mutex::new(vk::Extent2D { width, height }),
        }
    }

    /// 模拟窗口尺寸的变化
    pub fn set_extent(&self, width: u32, height: u32) {
        *self.extent.lock().unwrap_or_else(|e| e.into_inner()) = vk::Extent2D { width, height };
    }
}

impl SurfaceSource for HeadlessSurface {
    fn pixel_extent(&self) -> vk::Extent2D {
        *self.extent.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl HasDisplayHandle for HeadlessSurface {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}

impl HasWindowHandle for HeadlessSurface {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}
