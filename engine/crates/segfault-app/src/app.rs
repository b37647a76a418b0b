use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use segfault_crate_tools::log_sink::{LogCrateSink, LogSink};
use segfault_gfx::backend::GfxBackend;
use segfault_gfx::backend::headless::HeadlessBackend;
use segfault_gfx::{DrawCommand, GfxError, Rhi, RhiState, SurfaceSource};
use segfault_render_graph::RenderGraph;
use segfault_renderer::{FrameLoop, LoopControl, RenderLoop, RenderThread};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::platform::headless_provider::HeadlessSurfaceProvider;
use crate::platform::surface_provider::{SurfaceEvent, SurfaceProvider, WindowDesc};

/// 多线程渲染时，`App::draw_frame` 等待渲染线程的最长时间
pub const FRAME_WAIT_TIMEOUT: Duration = Duration::from_millis(16);

pub fn panic_handler(info: &std::panic::PanicHookInfo) {
    log::error!("{}", info);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AppState {
    Invalid,
    Init,
    Running,
    Shutdown,
}

/// 组装窗口、RHI 与渲染线程
///
/// 使用方式：`init` → 循环 `mainloop` + `draw_frame` → `shutdown`。
/// shutdown 的顺序与依赖顺序相反：渲染线程 → RHI → 窗口。
pub struct App {
    config: AppConfig,
    log: Arc<dyn LogSink>,
    state: AppState,
    /// 渲染线程退出，或者主线程上的 frame loop 要求退出
    quit_requested: bool,

    // 字段的声明顺序即析构顺序：必须先 join 渲染线程，再释放 RHI
    render_thread: Option<RenderThread>,
    render_loop: Option<Arc<RenderLoop>>,
    surface: Option<Arc<dyn SurfaceSource>>,
    provider: Box<dyn SurfaceProvider>,

    /// init 时交给 RHI
    backend: Option<Box<dyn GfxBackend>>,
}

// 创建与销毁
impl App {
    pub fn new(
        provider: Box<dyn SurfaceProvider>,
        backend: Box<dyn GfxBackend>,
        config: AppConfig,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            config,
            log,
            state: AppState::Invalid,
            quit_requested: false,

            render_thread: None,
            render_loop: None,
            surface: None,
            provider,

            backend: Some(backend),
        }
    }

    /// 根据配置选择 headless 或者 winit + vulkan
    pub fn from_config(config: AppConfig) -> AppResult<Self> {
        let log = LogCrateSink::shared("segfault::app");
        if config.headless {
            let mut provider = HeadlessSurfaceProvider::new();
            if config.headless_frames > 0 {
                provider = provider.quit_after(config.headless_frames);
            }
            return Ok(Self::new(Box::new(provider), Box::new(HeadlessBackend::default()), config, log));
        }

        Self::native(config, log)
    }

    #[cfg(not(any(target_os = "ios", target_arch = "wasm32")))]
    fn native(config: AppConfig, log: Arc<dyn LogSink>) -> AppResult<Self> {
        use crate::platform::winit_provider::WinitSurfaceProvider;
        use segfault_gfx::backend::vulkan::VulkanBackend;

        let provider = WinitSurfaceProvider::new()?;
        let backend = VulkanBackend::load()?;
        Ok(Self::new(Box::new(provider), Box::new(backend), config, log))
    }

    #[cfg(any(target_os = "ios", target_arch = "wasm32"))]
    fn native(_config: AppConfig, _log: Arc<dyn LogSink>) -> AppResult<Self> {
        Err(AppError::Platform("no native window system on this platform".to_string()))
    }

    /// 创建窗口，初始化 RHI，启动渲染线程
    ///
    /// 失败时已经创建的部分都会被释放，之后仍然需要调用 [`Self::shutdown`]
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        app_name: &str,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        title: &str,
        fullscreen: bool,
    ) -> AppResult<()> {
        let desc = WindowDesc {
            x,
            y,
            width,
            height,
            title: title.to_string(),
            fullscreen,
        };
        self.init_with_desc(app_name, &desc)
    }

    pub fn init_with_desc(&mut self, app_name: &str, desc: &WindowDesc) -> AppResult<()> {
        let _span = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!("App::init"), 0));

        if self.state != AppState::Invalid {
            return Err(self.invalid_state("init"));
        }
        let Some(backend) = self.backend.take() else {
            return Err(self.invalid_state("init"));
        };
        self.state = AppState::Init;

        let surface = match self.provider.create_window(desc) {
            Ok(surface) => surface,
            Err(e) => {
                self.log.error(format_args!("Cannot init window: {}", e));
                return Err(e);
            }
        };
        self.log.info(format_args!(
            "{} window created: {}x{} at ({}, {})",
            self.provider.name(),
            desc.width,
            desc.height,
            desc.x,
            desc.y
        ));

        let mut rhi = Rhi::new(backend, self.config.rhi.clone(), self.log.clone());
        if let Err(e) = rhi.init(app_name, surface.clone()) {
            self.log.error(format_args!("Cannot init RHI: {}", e));
            drop(rhi);
            self.provider.destroy_window();
            return Err(e.into());
        }

        let render_loop = Arc::new(RenderLoop::new(rhi, RenderGraph::new(), self.log.clone()));
        if self.config.threaded_rendering {
            let mut render_thread = RenderThread::new(render_loop.clone(), self.log.clone());
            if let Err(e) = render_thread.start() {
                self.log.error(format_args!("Cannot start render thread: {}", e));
                drop(render_thread);
                if let Err(e) = render_loop.lock_rhi().shutdown() {
                    self.log.error(format_args!("RHI shutdown failed: {}", e));
                }
                drop(render_loop);
                self.provider.destroy_window();
                return Err(e.into());
            }
            self.render_thread = Some(render_thread);
        }

        self.render_loop = Some(render_loop);
        self.surface = Some(surface);
        self.state = AppState::Running;
        self.log.info(format_args!("App `{}` initialized", app_name));
        Ok(())
    }

    /// 先停止渲染线程，再关闭 RHI，最后销毁窗口
    ///
    /// 某一步失败时仍然会执行后续步骤，返回第一个错误
    pub fn shutdown(&mut self) -> AppResult<()> {
        if self.state == AppState::Shutdown {
            self.log.warn(format_args!("App already shutdowned"));
            return Ok(());
        }

        let mut first_error: Option<AppError> = None;

        if let Some(mut render_thread) = self.render_thread.take() {
            if let Err(e) = render_thread.stop() {
                self.log.error(format_args!("render thread stop failed: {}", e));
                first_error.get_or_insert(e.into());
            }
        }

        if let Some(render_loop) = self.render_loop.take() {
            if let Err(e) = render_loop.lock_rhi().shutdown() {
                self.log.error(format_args!("RHI shutdown failed: {}", e));
                first_error.get_or_insert(e.into());
            }
        }

        self.surface = None;
        self.provider.destroy_window();
        self.state = AppState::Shutdown;
        self.log.info(format_args!("App shutdown"));

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if self.state != AppState::Shutdown {
            self.log.error(format_args!("App not shutdowned."));
        }
    }
}

// getters
impl App {
    #[inline]
    pub fn state(&self) -> AppState {
        self.state
    }

    #[inline]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[inline]
    pub fn render_loop(&self) -> Option<&Arc<RenderLoop>> {
        self.render_loop.as_ref()
    }

    #[inline]
    pub fn render_thread(&self) -> Option<&RenderThread> {
        self.render_thread.as_ref()
    }

    pub fn rhi_state(&self) -> Option<RhiState> {
        self.render_loop.as_ref().map(|render_loop| render_loop.lock_rhi().state())
    }

    pub fn frames(&self) -> u64 {
        self.render_loop.as_ref().map_or(0, |render_loop| render_loop.frames())
    }
}

// update
impl App {
    /// 将 draw command 加入每一帧都会执行的 render graph
    pub fn add_draw_command(&mut self, command: DrawCommand) -> AppResult<usize> {
        let Some(render_loop) = self.render_loop.as_ref() else {
            return Err(self.invalid_state("add_draw_command"));
        };
        Ok(render_loop.lock_graph().add_command(command))
    }

    /// 处理所有待处理的窗口事件，返回 false 表示应当退出
    pub fn mainloop(&mut self) -> bool {
        if self.state != AppState::Running {
            return false;
        }

        let mut running = !self.quit_requested;
        while let Some(event) = self.provider.poll_event() {
            match event {
                SurfaceEvent::QuitRequested => {
                    self.log.info(format_args!("quit requested"));
                    running = false;
                }
                SurfaceEvent::Resized { width, height } => self.on_window_resized(width, height),
                SurfaceEvent::Other => {}
            }
        }

        if self.render_thread.as_ref().is_some_and(|render_thread| render_thread.has_exited()) {
            self.log.error(format_args!("render thread exited unexpectedly"));
            running = false;
        }
        running
    }

    /// 在当前线程绘制一帧
    ///
    /// 多线程渲染时由渲染线程绘制，这里只是等待渲染线程完成新的一帧，最多等待 [`FRAME_WAIT_TIMEOUT`]
    pub fn draw_frame(&mut self) {
        if self.state != AppState::Running {
            return;
        }
        let Some(render_loop) = self.render_loop.as_ref() else {
            return;
        };

        if self.render_thread.is_some() {
            let frames = render_loop.frames();
            let deadline = Instant::now() + FRAME_WAIT_TIMEOUT;
            while render_loop.frames() == frames && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            return;
        }

        if render_loop.run_frame() == LoopControl::Exit {
            self.quit_requested = true;
        }
    }

    fn on_window_resized(&mut self, width: u32, height: u32) {
        self.log.info(format_args!("window was resized, new size is: {}x{}", width, height));
        let Some(render_loop) = self.render_loop.as_ref() else {
            return;
        };

        if self.render_thread.is_some() {
            render_loop.request_resize();
            return;
        }
        match render_loop.resize_now() {
            Ok(()) => {}
            // 最小化，等待下一次 resize
            Err(GfxError::ZeroExtent) => {}
            Err(e) => self.log.error(format_args!("resize failed: {}", e)),
        }
    }
}

// tools
impl App {
    fn invalid_state(&self, op: &'static str) -> AppError {
        AppError::InvalidState { op, state: self.state }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use segfault_crate_tools::log_sink::{CaptureSink, LogLevel};
    use segfault_gfx::backend::headless::{HeadlessAdapter, HeadlessCall, HeadlessProbe};

    use super::*;
    use crate::platform::headless_provider::HeadlessEventQueue;

    struct Fixture {
        app: App,
        probe: HeadlessProbe,
        events: HeadlessEventQueue,
        log: Arc<CaptureSink>,
    }

    impl Fixture {
        fn new(threaded: bool) -> Self {
            Self::with_backend(HeadlessBackend::default(), HeadlessSurfaceProvider::new(), threaded)
        }

        fn with_backend(backend: HeadlessBackend, provider: HeadlessSurfaceProvider, threaded: bool) -> Self {
            let probe = backend.probe();
            let events = provider.event_queue();
            let log = CaptureSink::new();
            let config = AppConfig {
                headless: true,
                threaded_rendering: threaded,
                ..Default::default()
            };
            let app = App::new(Box::new(provider), Box::new(backend), config, log.clone());
            Self { app, probe, events, log }
        }

        fn init(&mut self) -> AppResult<()> {
            self.app.init("demo", 50, 50, 400, 300, "demo", false)
        }

        fn extent(&self) -> Option<vk::Extent2D> {
            self.app.render_loop().and_then(|render_loop| render_loop.lock_rhi().swapchain_info()).map(|i| i.image_extent)
        }
    }

    fn wait_until(what: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !what() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn init_and_shutdown() {
        let mut fx = Fixture::new(true);
        assert_eq!(fx.app.state(), AppState::Invalid);

        fx.init().unwrap();
        assert_eq!(fx.app.state(), AppState::Running);
        assert_eq!(fx.app.rhi_state(), Some(RhiState::SwapchainReady));
        assert!(fx.app.render_thread().is_some_and(|rt| rt.is_running()));
        assert_eq!(fx.extent(), Some(vk::Extent2D { width: 400, height: 300 }));

        fx.app.shutdown().unwrap();
        assert_eq!(fx.app.state(), AppState::Shutdown);
        assert!(fx.app.render_thread().is_none());
        assert_eq!(fx.probe.live_total(), 0);
        assert_eq!(fx.probe.invalid_uses(), 0);
        assert_eq!(fx.log.count(LogLevel::Error), 0);
    }

    #[test]
    fn init_twice_is_rejected() {
        let mut fx = Fixture::new(false);
        fx.init().unwrap();
        assert!(matches!(
            fx.init(),
            Err(AppError::InvalidState {
                op: "init",
                state: AppState::Running
            })
        ));
        fx.app.shutdown().unwrap();
    }

    #[test]
    fn window_failure_is_logged() {
        let provider = HeadlessSurfaceProvider::new().fail_window_creation();
        let mut fx = Fixture::with_backend(HeadlessBackend::default(), provider, true);

        assert!(matches!(fx.init(), Err(AppError::Window(_))));
        assert_eq!(fx.app.state(), AppState::Init);
        assert!(fx.log.contains(LogLevel::Error, "Cannot init window"));
        assert_eq!(fx.probe.count(HeadlessCall::CreateInstance), 0);
        fx.app.shutdown().unwrap();
    }

    #[test]
    fn rhi_failure_is_rolled_back() {
        let backend = HeadlessBackend::with_adapters(Vec::new());
        let mut fx = Fixture::with_backend(backend, HeadlessSurfaceProvider::new(), true);

        assert!(matches!(fx.init(), Err(AppError::Gfx(GfxError::NoSuitableDevice { .. }))));
        assert!(fx.log.contains(LogLevel::Error, "Cannot init RHI"));
        assert!(fx.app.render_loop().is_none());
        assert_eq!(fx.probe.live_total(), 0);

        fx.app.shutdown().unwrap();
        assert_eq!(fx.app.state(), AppState::Shutdown);
    }

    #[test]
    fn mainloop_runs_until_quit() {
        let provider = HeadlessSurfaceProvider::new().quit_after(3);
        let mut fx = Fixture::with_backend(HeadlessBackend::default(), provider, false);
        fx.init().unwrap();
        fx.app.add_draw_command(DrawCommand::draw(3, 1)).unwrap();

        let mut frames = 0;
        while fx.app.mainloop() {
            fx.app.draw_frame();
            frames += 1;
        }
        assert_eq!(frames, 3);
        assert_eq!(fx.app.frames(), 3);
        assert_eq!(fx.probe.presented(), 3);

        fx.app.shutdown().unwrap();
        assert!(!fx.app.mainloop());
        assert_eq!(fx.probe.live_total(), 0);
    }

    #[test]
    fn resize_event_on_main_thread() {
        let mut fx = Fixture::new(false);
        fx.init().unwrap();

        fx.events.push(SurfaceEvent::Resized { width: 800, height: 600 });
        assert!(fx.app.mainloop());
        assert_eq!(fx.extent(), Some(vk::Extent2D { width: 800, height: 600 }));

        // 最小化不是错误
        fx.events.push(SurfaceEvent::Resized { width: 0, height: 0 });
        assert!(fx.app.mainloop());
        assert_eq!(fx.app.rhi_state(), Some(RhiState::DeviceReady));

        fx.app.add_draw_command(DrawCommand::draw(3, 1)).unwrap();
        fx.events.push(SurfaceEvent::Resized { width: 640, height: 480 });
        assert!(fx.app.mainloop());
        fx.app.draw_frame();
        assert_eq!(fx.extent(), Some(vk::Extent2D { width: 640, height: 480 }));
        assert_eq!(fx.app.frames(), 1);

        fx.app.shutdown().unwrap();
        assert_eq!(fx.probe.invalid_uses(), 0);
    }

    #[test]
    fn resize_event_with_render_thread() {
        let mut fx = Fixture::new(true);
        fx.init().unwrap();
        fx.app.add_draw_command(DrawCommand::draw(3, 1)).unwrap();

        fx.events.push(SurfaceEvent::Resized { width: 1024, height: 768 });
        assert!(fx.app.mainloop());
        wait_until(|| fx.extent() == Some(vk::Extent2D { width: 1024, height: 768 }));
        let frames = fx.app.frames();
        wait_until(|| fx.app.frames() > frames);

        fx.events.push(SurfaceEvent::QuitRequested);
        assert!(!fx.app.mainloop());
        fx.app.shutdown().unwrap();
        assert_eq!(fx.probe.invalid_uses(), 0);
        assert_eq!(fx.probe.live_total(), 0);
    }

    #[test]
    fn render_thread_exit_stops_mainloop() {
        let mut fx = Fixture::new(true);
        fx.init().unwrap();

        // RHI 关闭之后每一帧都会失败，渲染线程最终退出
        fx.app.render_loop().unwrap().lock_rhi().shutdown().unwrap();
        wait_until(|| fx.app.render_thread().is_some_and(|rt| rt.has_exited()));

        assert!(!fx.app.mainloop());
        assert!(fx.log.contains(LogLevel::Error, "render thread exited unexpectedly"));
        fx.app.shutdown().unwrap_err();
        assert_eq!(fx.app.state(), AppState::Shutdown);
        assert_eq!(fx.probe.live_total(), 0);
    }

    #[test]
    fn drop_without_shutdown_logs_error() {
        let log = CaptureSink::new();
        {
            let provider = HeadlessSurfaceProvider::new();
            let config = AppConfig {
                headless: true,
                ..Default::default()
            };
            let mut app = App::new(Box::new(provider), Box::new(HeadlessBackend::default()), config, log.clone());
            app.init("demo", 0, 0, 64, 64, "demo", false).unwrap();
        }
        assert!(log.contains(LogLevel::Error, "App not shutdowned"));
        // RHI 自己会在 drop 时释放资源
        assert!(log.contains(LogLevel::Warn, "RHI dropped without shutdown"));
    }

    #[test]
    fn draw_commands_reach_backend_in_order() {
        let mut fx = Fixture::new(false);
        fx.init().unwrap();
        let commands = [DrawCommand::draw(3, 1), DrawCommand::draw(6, 2), DrawCommand::draw_indexed(36, 1)];
        for (i, command) in commands.iter().enumerate() {
            assert_eq!(fx.app.add_draw_command(*command).unwrap(), i);
        }

        assert!(fx.app.mainloop());
        fx.app.draw_frame();
        assert_eq!(fx.probe.submitted(), commands.to_vec());
        fx.app.shutdown().unwrap();
    }

    #[test]
    fn adapter_name_is_reported() {
        let backend = HeadlessBackend::with_adapters(vec![HeadlessAdapter::named("Mock GPU")]);
        let mut fx = Fixture::with_backend(backend, HeadlessSurfaceProvider::new(), false);
        fx.init().unwrap();
        let name = fx.app.render_loop().and_then(|r| r.lock_rhi().physical_device_name().map(str::to_string));
        assert_eq!(name.as_deref(), Some("Mock GPU"));
        fx.app.shutdown().unwrap();
    }
}
