use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use segfault_gfx::SurfaceSource;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

use crate::error::{AppError, AppResult};
use crate::platform::surface_provider::{SurfaceEvent, SurfaceProvider, WindowDesc};

/// 等待窗口创建时，最多 pump 的次数
const WINDOW_CREATION_PUMPS: usize = 100;
const WINDOW_CREATION_PUMP_TIMEOUT: Duration = Duration::from_millis(10);

/// winit 的事件回调，将 winit 事件转换为 [`SurfaceEvent`]
#[derive(Default)]
struct WinitHandler {
    /// 等待在 event loop 中创建的窗口
    pending_window: Option<WindowAttributes>,
    window: Option<Arc<Window>>,
    creation_error: Option<String>,

    events: VecDeque<SurfaceEvent>,
}

impl WinitHandler {
    fn try_create_window(&mut self, event_loop: &ActiveEventLoop) {
        let Some(attrs) = self.pending_window.take() else {
            return;
        };
        match event_loop.create_window(attrs) {
            Ok(window) => {
                log::info!("window created: {}x{}", window.inner_size().width, window.inner_size().height);
                self.window = Some(Arc::new(window));
            }
            Err(e) => self.creation_error = Some(e.to_string()),
        }
    }
}

// 各种 winit 的事件处理
impl ApplicationHandler for WinitHandler {
    // 建议在这里创建 window
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        log::info!("winit event: resumed");
        self.try_create_window(event_loop);
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let event = match event {
            WindowEvent::CloseRequested => SurfaceEvent::QuitRequested,
            WindowEvent::Resized(new_size) => SurfaceEvent::Resized {
                width: new_size.width,
                height: new_size.height,
            },
            _ => SurfaceEvent::Other,
        };
        self.events.push_back(event);
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        // resumed 可能发生在 create_window 之前
        self.try_create_window(event_loop);
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        log::warn!("winit event: suspended");
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        log::info!("loop exiting");
    }
}

/// 基于 winit 的窗口系统，事件通过 `pump_app_events` 拉取，不会阻塞调用方
///
/// 必须在主线程上创建与使用。
pub struct WinitSurfaceProvider {
    event_loop: EventLoop<()>,
    handler: WinitHandler,

    /// 本轮 poll 是否已经 pump 过一次 event loop
    pumped: bool,
}

// 创建与销毁
impl WinitSurfaceProvider {
    pub fn new() -> AppResult<Self> {
        let event_loop = EventLoop::new().map_err(|e| AppError::Platform(e.to_string()))?;
        Ok(Self {
            event_loop,
            handler: WinitHandler::default(),
            pumped: false,
        })
    }
}

// tools
impl WinitSurfaceProvider {
    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.handler) {
            log::info!("event loop exit with code {}", code);
            self.handler.events.push_back(SurfaceEvent::QuitRequested);
        }
    }

    fn window_attributes(desc: &WindowDesc) -> WindowAttributes {
        let attrs = Window::default_attributes()
            .with_title(desc.title.clone())
            .with_position(winit::dpi::LogicalPosition::new(desc.x as f64, desc.y as f64))
            .with_inner_size(winit::dpi::LogicalSize::new(desc.width as f64, desc.height as f64))
            .with_resizable(true);
        if desc.fullscreen { attrs.with_fullscreen(Some(Fullscreen::Borderless(None))) } else { attrs }
    }
}

impl SurfaceProvider for WinitSurfaceProvider {
    fn name(&self) -> &str {
        "winit"
    }

    fn create_window(&mut self, desc: &WindowDesc) -> AppResult<Arc<dyn SurfaceSource>> {
        if self.handler.window.is_some() {
            return Err(AppError::Window("window already created".to_string()));
        }

        self.handler.pending_window = Some(Self::window_attributes(desc));
        for _ in 0..WINDOW_CREATION_PUMPS {
            self.pump(Some(WINDOW_CREATION_PUMP_TIMEOUT));

            if let Some(e) = self.handler.creation_error.take() {
                return Err(AppError::Window(e));
            }
            if let Some(window) = self.handler.window.clone() {
                return Ok(window);
            }
        }

        self.handler.pending_window = None;
        Err(AppError::Window("event loop never became active".to_string()))
    }

    fn poll_event(&mut self) -> Option<SurfaceEvent> {
        if self.handler.events.is_empty() && !self.pumped {
            self.pumped = true;
            self.pump(Some(Duration::ZERO));
        }

        let event = self.handler.events.pop_front();
        if event.is_none() {
            // 下一轮 poll 重新 pump
            self.pumped = false;
        }
        event
    }

    fn current_extent(&self) -> Option<vk::Extent2D> {
        self.handler.window.as_ref().map(|window| window.pixel_extent())
    }

    fn destroy_window(&mut self) {
        self.handler.window = None;
        self.handler.events.clear();
    }
}
