use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use segfault_gfx::{HeadlessSurface, SurfaceSource};

use crate::error::{AppError, AppResult};
use crate::platform::surface_provider::{SurfaceEvent, SurfaceProvider, WindowDesc};

/// 可以在 provider 被 App 持有之后继续投递事件
#[derive(Clone, Default)]
pub struct HeadlessEventQueue {
    events: Arc<Mutex<VecDeque<SurfaceEvent>>>,
}

impl HeadlessEventQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<SurfaceEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, event: SurfaceEvent) {
        self.lock().push_back(event);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn pop(&self) -> Option<SurfaceEvent> {
        self.lock().pop_front()
    }
}

/// 没有真实窗口的 provider，事件全部来自脚本
///
/// `Resized` 事件被取出时会先修改 surface 的尺寸，与真实窗口系统的顺序一致。
pub struct HeadlessSurfaceProvider {
    queue: HeadlessEventQueue,
    surface: Option<Arc<HeadlessSurface>>,

    /// 事件被取空这么多次之后，产生一次 `QuitRequested`
    quit_after_drains: Option<u64>,
    drains: u64,
    fail_window_creation: bool,
}

// 创建与销毁
impl HeadlessSurfaceProvider {
    pub fn new() -> Self {
        Self {
            queue: HeadlessEventQueue::default(),
            surface: None,
            quit_after_drains: None,
            drains: 0,
            fail_window_creation: false,
        }
    }

    pub fn with_events(events: impl IntoIterator<Item = SurfaceEvent>) -> Self {
        let provider = Self::new();
        events.into_iter().for_each(|event| provider.queue.push(event));
        provider
    }

    /// 每次 `App::mainloop` 都会把事件取空一次，因此这相当于运行的帧数
    pub fn quit_after(mut self, drains: u64) -> Self {
        self.quit_after_drains = Some(drains);
        self
    }

    pub fn fail_window_creation(mut self) -> Self {
        self.fail_window_creation = true;
        self
    }
}

impl Default for HeadlessSurfaceProvider {
    fn default() -> Self {
        Self::new()
    }
}

// getters
impl HeadlessSurfaceProvider {
    #[inline]
    pub fn event_queue(&self) -> HeadlessEventQueue {
        self.queue.clone()
    }

    #[inline]
    pub fn surface(&self) -> Option<Arc<HeadlessSurface>> {
        self.surface.clone()
    }
}

impl SurfaceProvider for HeadlessSurfaceProvider {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_window(&mut self, desc: &WindowDesc) -> AppResult<Arc<dyn SurfaceSource>> {
        if self.fail_window_creation {
            return Err(AppError::Window("headless window creation disabled".to_string()));
        }
        if self.surface.is_some() {
            return Err(AppError::Window("window already created".to_string()));
        }

        let surface = Arc::new(HeadlessSurface::new(desc.width, desc.height));
        self.surface = Some(surface.clone());
        Ok(surface)
    }

    fn poll_event(&mut self) -> Option<SurfaceEvent> {
        if let Some(event) = self.queue.pop() {
            if let (SurfaceEvent::Resized { width, height }, Some(surface)) = (event, self.surface.as_ref()) {
                surface.set_extent(width, height);
            }
            return Some(event);
        }

        self.drains += 1;
        if self.quit_after_drains == Some(self.drains) {
            self.queue.push(SurfaceEvent::QuitRequested);
        }
        None
    }

    fn current_extent(&self) -> Option<vk::Extent2D> {
        self.surface.as_ref().map(|surface| surface.pixel_extent())
    }

    fn destroy_window(&mut self) {
        self.surface = None;
    }
}
