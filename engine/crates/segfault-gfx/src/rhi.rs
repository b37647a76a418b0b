use std::sync::Arc;

use ash::vk;
use segfault_crate_tools::log_sink::LogSink;

use crate::backend::{GfxBackend, InstanceDesc};
use crate::commands::draw_command::DrawCommand;
use crate::config::RhiConfig;
use crate::error::{GfxError, GfxResult};
use crate::foundation::device::GfxDevice;
use crate::foundation::physical_device::{QueueFamilyIndices, SelectedDevice, select_physical_device};
use crate::release::{Release, ReleaseMark, ReleaseStack};
use crate::swapchain::render_swapchain::{RenderSwapchain, SwapchainImageInfo};
use crate::swapchain::surface::SurfaceSource;

/// RHI 的生命周期
///
/// 前五个状态与对象的创建顺序一致：instance → surface → device → swapchain。
/// surface 需要在选择物理设备之前创建，因为 present 能力是针对 surface 查询的。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RhiState {
    Uninitialized,
    InstanceReady,
    SurfaceBound,
    DeviceReady,
    SwapchainReady,
    ShuttingDown,
    Destroyed,
}

/// 一次 [`Rhi::draw_frame`] 的结果
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FrameStatus {
    /// 没有需要提交的 draw command，什么都没有做
    Idle,
    Presented,
    /// 已经 present，但是 swapchain 与 surface 不再完全匹配，应当择机 resize
    Suboptimal,
    /// swapchain 已经失效，本帧被丢弃，必须 resize
    OutOfDate,
}

struct BoundSurface {
    handle: vk::SurfaceKHR,
    source: Arc<dyn SurfaceSource>,
}

/// Rendering Hardware Interface
///
/// 持有 GPU instance、surface、logical device 以及 swapchain。
/// 所有创建成功的对象都记录在 [`ReleaseStack`] 中，初始化失败、resize、shutdown 都是将其释放到某个位置。
pub struct Rhi {
    backend: Box<dyn GfxBackend>,
    config: RhiConfig,
    log: Arc<dyn LogSink>,

    state: RhiState,
    releases: ReleaseStack,
    /// device 创建之后的位置，resize 时释放到这里
    device_mark: ReleaseMark,

    instance: vk::Instance,
    surface: Option<BoundSurface>,
    device: Option<GfxDevice>,
    swapchain: Option<RenderSwapchain>,

    pending_draws: Vec<DrawCommand>,
    frame_index: u64,
}

// 创建与销毁
impl Rhi {
    pub fn new(backend: Box<dyn GfxBackend>, config: RhiConfig, log: Arc<dyn LogSink>) -> Self {
        Self {
            backend,
            config,
            log,

            state: RhiState::Uninitialized,
            releases: ReleaseStack::new(),
            device_mark: ReleaseMark::BOTTOM,

            instance: vk::Instance::null(),
            surface: None,
            device: None,
            swapchain: None,

            pending_draws: Vec::new(),
            frame_index: 0,
        }
    }

    /// 按顺序创建 instance、surface、device、swapchain
    ///
    /// 任何一步失败，已经创建的对象都会被释放，状态回到 [`RhiState::Uninitialized`]
    pub fn init(&mut self, app_name: &str, surface: Arc<dyn SurfaceSource>) -> GfxResult<()> {
        if self.state != RhiState::Uninitialized {
            return Err(GfxError::InvalidState {
                op: "init",
                state: self.state,
            });
        }

        self.log.info(format_args!("init RHI for `{}` with {} backend", app_name, self.backend.name()));
        match self.init_steps(app_name, surface) {
            Ok(()) => {
                self.log.info(format_args!("RHI init finished"));
                Ok(())
            }
            Err(e) => {
                self.log.error(format_args!("RHI init failed: {}", e));
                self.releases.unwind_all(&mut *self.backend, &*self.log);
                self.reset_handles();
                self.state = RhiState::Uninitialized;
                Err(e)
            }
        }
    }

    /// 按照创建的相反顺序释放所有对象：image views → swapchain → device → surface → instance
    pub fn shutdown(&mut self) -> GfxResult<()> {
        match self.state {
            RhiState::Uninitialized => {
                self.log.error(format_args!("shutdown called on an uninitialized RHI"));
                return Err(GfxError::NotInitialized);
            }
            RhiState::ShuttingDown | RhiState::Destroyed => {
                return Err(GfxError::InvalidState {
                    op: "shutdown",
                    state: self.state,
                });
            }
            _ => {}
        }

        self.log.info(format_args!("shutting down RHI from state {:?}", self.state));
        self.state = RhiState::ShuttingDown;
        self.wait_idle();

        let released = self.releases.unwind_all(&mut *self.backend, &*self.log);
        self.reset_handles();
        self.pending_draws.clear();
        self.state = RhiState::Destroyed;
        self.log.info(format_args!("RHI destroyed, {} object(s) released", released));
        Ok(())
    }
}

// 初始化过程
impl Rhi {
    fn init_steps(&mut self, app_name: &str, surface: Arc<dyn SurfaceSource>) -> GfxResult<()> {
        self.create_instance(app_name, &*surface)?;
        self.bind_surface(surface)?;

        let selected = {
            let Some(surface) = self.surface.as_ref() else {
                return Err(self.invalid_state("select_physical_device"));
            };
            select_physical_device(
                &mut *self.backend,
                self.instance,
                surface.handle,
                &self.config.required_device_extensions,
                &*self.log,
            )?
        };
        self.create_device(&selected)?;
        self.create_swapchain()
    }

    fn create_instance(&mut self, app_name: &str, surface: &dyn SurfaceSource) -> GfxResult<()> {
        let layers = self.config.instance_layers();
        if !layers.is_empty() {
            let available =
                self.backend.instance_layers().map_err(GfxError::vk("vkEnumerateInstanceLayerProperties"))?;
            if let Some(missing) = layers.iter().find(|layer| !available.contains(layer)) {
                return Err(GfxError::MissingLayer(missing.clone()));
            }
        }

        let desc = InstanceDesc {
            app_name,
            engine_name: &self.config.engine_name,
            layers: &layers,
            enable_validation: self.config.enable_validation,
            surface,
        };
        let instance = self.backend.create_instance(&desc).map_err(GfxError::vk("vkCreateInstance"))?;
        self.releases.push(Release::Instance(instance));
        self.instance = instance;
        self.state = RhiState::InstanceReady;
        self.log.info(format_args!("instance created, layers: {:?}", layers));
        Ok(())
    }

    fn bind_surface(&mut self, source: Arc<dyn SurfaceSource>) -> GfxResult<()> {
        let handle = self
            .backend
            .create_surface(self.instance, &*source)
            .map_err(|result| GfxError::SurfaceUnavailable(format!("vkCreateSurfaceKHR failed: {:?}", result)))?;
        self.releases.push(Release::Surface {
            instance: self.instance,
            surface: handle,
        });
        self.surface = Some(BoundSurface { handle, source });
        self.state = RhiState::SurfaceBound;
        self.log.info(format_args!("surface bound"));
        Ok(())
    }

    fn create_device(&mut self, selected: &SelectedDevice) -> GfxResult<()> {
        let device = GfxDevice::create(
            &mut *self.backend,
            selected,
            &self.config.required_device_extensions,
            &mut self.releases,
            &*self.log,
        )?;
        self.device = Some(device);
        self.device_mark = self.releases.mark();
        self.state = RhiState::DeviceReady;
        Ok(())
    }

    /// 每次都重新查询 swapchain support，surface 的尺寸可能已经变化
    fn create_swapchain(&mut self) -> GfxResult<()> {
        let (Some(device), Some(surface)) = (self.device.as_ref(), self.surface.as_ref()) else {
            return Err(self.invalid_state("create_swapchain"));
        };

        let support = self
            .backend
            .swapchain_support(device.physical_device(), surface.handle)
            .map_err(GfxError::vk("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
        let swapchain = RenderSwapchain::create(
            &mut *self.backend,
            device,
            surface.handle,
            &support,
            surface.source.pixel_extent(),
            &mut self.releases,
            &*self.log,
        )?;

        self.swapchain = Some(swapchain);
        self.state = RhiState::SwapchainReady;
        Ok(())
    }
}

// update
impl Rhi {
    /// 销毁 swapchain 并按照 surface 当前的尺寸重新创建
    ///
    /// 失败时状态为 [`RhiState::DeviceReady`]，device 仍然有效，可以再次调用 resize 恢复
    pub fn resize(&mut self) -> GfxResult<()> {
        if !matches!(self.state, RhiState::SwapchainReady | RhiState::DeviceReady) {
            return Err(self.invalid_state("resize"));
        }
        let Some(device) = self.device.as_ref() else {
            return Err(self.invalid_state("resize"));
        };

        self.backend.device_wait_idle(device.handle()).map_err(GfxError::vk("vkDeviceWaitIdle"))?;

        self.swapchain = None;
        self.releases.unwind_to(self.device_mark, &mut *self.backend, &*self.log);
        self.state = RhiState::DeviceReady;

        match self.create_swapchain() {
            Ok(()) => {
                if let Some(info) = self.swapchain_info() {
                    self.log.info(format_args!(
                        "swapchain resized to {}x{}",
                        info.image_extent.width, info.image_extent.height
                    ));
                }
                Ok(())
            }
            Err(e) => {
                self.log.error(format_args!("swapchain recreation failed: {}", e));
                self.releases.unwind_to(self.device_mark, &mut *self.backend, &*self.log);
                self.state = RhiState::DeviceReady;
                Err(e)
            }
        }
    }

    /// 将 draw command 加入当前帧
    pub fn submit_draw(&mut self, command: &DrawCommand) -> GfxResult<()> {
        if self.state != RhiState::SwapchainReady {
            return Err(self.invalid_state("submit_draw"));
        }
        self.pending_draws.push(*command);
        Ok(())
    }

    /// acquire → 按顺序提交当前帧的 draw commands → present
    ///
    /// 当前帧没有 draw command 时不做任何事情。无论成功与否，当前帧的 draw commands 都会被清空
    pub fn draw_frame(&mut self) -> GfxResult<FrameStatus> {
        if self.state != RhiState::SwapchainReady {
            return Err(self.invalid_state("draw_frame"));
        }
        if self.pending_draws.is_empty() {
            return Ok(FrameStatus::Idle);
        }

        let commands = std::mem::take(&mut self.pending_draws);
        let (Some(device), Some(swapchain)) = (self.device.as_ref(), self.swapchain.as_ref()) else {
            return Err(self.invalid_state("draw_frame"));
        };

        let (image_index, acquire_suboptimal) =
            match self.backend.acquire_next_image(device.handle(), swapchain.handle(), self.config.acquire_timeout_ns)
            {
                Ok(acquired) => acquired,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    self.log.warn(format_args!("swapchain is out of date, frame {} dropped", self.frame_index));
                    return Ok(FrameStatus::OutOfDate);
                }
                Err(result) => {
                    return Err(GfxError::Vk {
                        call: "vkAcquireNextImageKHR",
                        result,
                    });
                }
            };

        self.backend
            .submit_draws(device.handle(), device.graphics_queue(), swapchain.handle(), image_index, &commands)
            .map_err(GfxError::vk("vkQueueSubmit"))?;

        let present_suboptimal =
            match self.backend.present(device.handle(), device.present_queue(), swapchain.handle(), image_index) {
                Ok(suboptimal) => suboptimal,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    self.frame_index += 1;
                    self.log.warn(format_args!("swapchain is out of date after present"));
                    return Ok(FrameStatus::OutOfDate);
                }
                Err(result) => {
                    return Err(GfxError::Vk {
                        call: "vkQueuePresentKHR",
                        result,
                    });
                }
            };

        self.frame_index += 1;
        if acquire_suboptimal || present_suboptimal {
            self.log.warn(format_args!("swapchain image index {} is not optimal", image_index));
            Ok(FrameStatus::Suboptimal)
        } else {
            Ok(FrameStatus::Presented)
        }
    }
}

// getters
impl Rhi {
    #[inline]
    pub fn state(&self) -> RhiState {
        self.state
    }

    #[inline]
    pub fn config(&self) -> &RhiConfig {
        &self.config
    }

    #[inline]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn swapchain_info(&self) -> Option<SwapchainImageInfo> {
        self.swapchain.as_ref().map(RenderSwapchain::image_infos)
    }

    #[inline]
    pub fn swapchain(&self) -> Option<&RenderSwapchain> {
        self.swapchain.as_ref()
    }

    pub fn physical_device_name(&self) -> Option<&str> {
        self.device.as_ref().map(GfxDevice::physical_device_name)
    }

    pub fn queue_family_indices(&self) -> Option<QueueFamilyIndices> {
        self.device.as_ref().map(GfxDevice::queue_family_indices)
    }

    /// 已经 present 的帧数
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// 当前帧等待提交的 draw commands
    #[inline]
    pub fn pending_draws(&self) -> &[DrawCommand] {
        &self.pending_draws
    }

    /// 是否仍然持有 GPU 对象
    #[inline]
    pub fn holds_resources(&self) -> bool {
        !self.releases.is_empty()
    }
}

// tools
impl Rhi {
    fn invalid_state(&self, op: &'static str) -> GfxError {
        GfxError::InvalidState { op, state: self.state }
    }

    fn reset_handles(&mut self) {
        self.swapchain = None;
        self.device = None;
        self.surface = None;
        self.instance = vk::Instance::null();
        self.device_mark = ReleaseMark::BOTTOM;
    }

    /// 销毁之前需要等待 GPU 完成所有工作，失败时只记录日志
    fn wait_idle(&mut self) {
        if let Some(device) = self.device.as_ref() {
            if let Err(result) = self.backend.device_wait_idle(device.handle()) {
                self.log.warn(format_args!("vkDeviceWaitIdle failed before teardown: {:?}", result));
            }
        }
    }
}

impl Drop for Rhi {
    fn drop(&mut self) {
        if self.holds_resources() {
            self.log.warn(format_args!("RHI dropped without shutdown, releasing resources"));
            let _ = self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{
        HandleKind, HeadlessAdapter, HeadlessBackend, HeadlessCall, HeadlessConfig, HeadlessProbe,
        HeadlessQueueFamily,
    };
    use crate::backend::ImageViewDesc;
    use crate::commands::draw_command::PipelineHandle;
    use crate::config::VALIDATION_LAYER_NAME;
    use crate::swapchain::surface::HeadlessSurface;
    use segfault_crate_tools::log_sink::{CaptureSink, LogLevel};

    struct Fixture {
        rhi: Rhi,
        probe: HeadlessProbe,
        log: Arc<CaptureSink>,
        surface: Arc<HeadlessSurface>,
    }

    impl Fixture {
        fn new(backend: HeadlessBackend, width: u32, height: u32) -> Self {
            let config = RhiConfig {
                enable_validation: false,
                ..Default::default()
            };
            Self::with_config(backend, config, width, height)
        }

        fn with_config(backend: HeadlessBackend, config: RhiConfig, width: u32, height: u32) -> Self {
            let probe = backend.probe();
            let log = CaptureSink::new();
            let rhi = Rhi::new(Box::new(backend), config, log.clone());
            Self {
                rhi,
                probe,
                log,
                surface: Arc::new(HeadlessSurface::new(width, height)),
            }
        }

        fn init(&mut self) -> GfxResult<()> {
            self.rhi.init("demo", self.surface.clone())
        }

        fn assert_released(&self) {
            assert_eq!(self.probe.live_total(), 0);
            assert_eq!(self.probe.invalid_uses(), 0);
        }
    }

    #[test]
    fn init_and_shutdown_pair_over_many_extents() {
        for (width, height) in [(1, 1), (400, 300), (1280, 720), (1920, 1080), (3840, 2160), (16384, 16384)] {
            let mut fx = Fixture::new(HeadlessBackend::default(), width, height);
            fx.init().unwrap();
            assert_eq!(fx.rhi.state(), RhiState::SwapchainReady);
            assert_eq!(
                fx.rhi.swapchain_info().map(|info| info.image_extent),
                Some(vk::Extent2D { width, height })
            );

            fx.rhi.shutdown().unwrap();
            assert_eq!(fx.rhi.state(), RhiState::Destroyed);
            assert!(!fx.rhi.holds_resources());
            fx.assert_released();
        }
    }

    #[test]
    fn demo_init_builds_swapchain_with_one_view_per_image() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.init().unwrap();

        let info = fx.rhi.swapchain_info().unwrap();
        assert_eq!(info.image_extent, vk::Extent2D { width: 400, height: 300 });
        // min 2 + 1，不超过 max 3
        assert_eq!(info.image_cnt, 3);
        assert_eq!(info.image_format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(info.present_mode, vk::PresentModeKHR::FIFO);

        let swapchain = fx.rhi.swapchain().unwrap();
        assert!(swapchain.views_are_distinct());
        assert_eq!(fx.probe.live_count(HandleKind::ImageView), 3);
        for (desc, image) in fx.probe.view_descs().iter().zip(swapchain.images()) {
            assert_eq!(*desc, ImageViewDesc::color_2d(*image, vk::Format::B8G8R8A8_SRGB));
        }

        assert_eq!(fx.rhi.physical_device_name(), Some("Headless GPU"));
        let indices = fx.rhi.queue_family_indices().unwrap();
        assert!(indices.is_complete());
        assert!(indices.is_aliased());
        assert_eq!(fx.probe.swapchain_descs()[0].sharing_mode(), vk::SharingMode::EXCLUSIVE);

        fx.rhi.shutdown().unwrap();
        fx.assert_released();
    }

    #[test]
    fn current_extent_overrides_window_extent() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.probe.set_current_extent(Some(vk::Extent2D { width: 640, height: 480 }));
        fx.init().unwrap();
        assert_eq!(
            fx.rhi.swapchain_info().map(|info| info.image_extent),
            Some(vk::Extent2D { width: 640, height: 480 })
        );
    }

    #[test]
    fn zero_physical_devices_fails_without_leaks() {
        let mut fx = Fixture::new(HeadlessBackend::with_adapters(vec![]), 400, 300);
        let err = fx.init().unwrap_err();
        assert!(matches!(err, GfxError::NoSuitableDevice { candidates: 0 }));
        assert_eq!(fx.rhi.state(), RhiState::Uninitialized);
        assert!(fx.log.contains(LogLevel::Error, "RHI init failed"));
        fx.assert_released();
    }

    #[test]
    fn device_without_complete_queue_families_is_rejected() {
        let adapter = HeadlessAdapter {
            queue_families: vec![HeadlessQueueFamily::new(vk::QueueFlags::GRAPHICS, false)],
            ..HeadlessAdapter::named("no-present")
        };
        let mut fx = Fixture::new(HeadlessBackend::with_adapters(vec![adapter]), 400, 300);

        let err = fx.init().unwrap_err();
        assert!(matches!(err, GfxError::NoSuitableDevice { candidates: 1 }));
        assert!(fx.log.contains(LogLevel::Warn, "no-present"));
        assert_eq!(fx.rhi.state(), RhiState::Uninitialized);
        fx.assert_released();
    }

    #[test]
    fn first_suitable_device_is_selected() {
        let no_swapchain = HeadlessAdapter {
            extensions: vec![],
            ..HeadlessAdapter::named("no-swapchain")
        };
        let no_formats = HeadlessAdapter {
            formats: vec![],
            ..HeadlessAdapter::named("no-formats")
        };
        let good = HeadlessAdapter::named("good");
        let mut fx = Fixture::new(HeadlessBackend::with_adapters(vec![no_swapchain, no_formats, good]), 400, 300);

        fx.init().unwrap();
        assert_eq!(fx.rhi.physical_device_name(), Some("good"));
        assert!(fx.log.contains(LogLevel::Warn, "missing device extensions"));
        assert!(fx.log.contains(LogLevel::Warn, "insufficient swapchain support"));
    }

    #[test]
    fn separate_present_family_uses_concurrent_sharing() {
        let adapter = HeadlessAdapter {
            queue_families: vec![
                HeadlessQueueFamily::new(vk::QueueFlags::GRAPHICS, false),
                HeadlessQueueFamily::new(vk::QueueFlags::TRANSFER, true),
            ],
            ..HeadlessAdapter::default()
        };
        let mut fx = Fixture::new(HeadlessBackend::with_adapters(vec![adapter]), 400, 300);
        fx.init().unwrap();

        let indices = fx.rhi.queue_family_indices().unwrap();
        assert_eq!((indices.graphics, indices.present), (Some(0), Some(1)));
        assert_eq!(fx.probe.device_descs()[0].queue_families, vec![0, 1]);
        assert_eq!(fx.probe.count(HeadlessCall::DeviceQueue), 2);

        let desc = &fx.probe.swapchain_descs()[0];
        assert_eq!(desc.sharing_mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(desc.queue_family_indices, vec![0, 1]);
    }

    #[test]
    fn validation_requires_khronos_layer() {
        let config = RhiConfig {
            enable_validation: true,
            ..Default::default()
        };
        let backend = HeadlessBackend::new(HeadlessConfig {
            instance_layers: vec![],
            ..Default::default()
        });
        let mut fx = Fixture::with_config(backend, config.clone(), 400, 300);
        let err = fx.init().unwrap_err();
        assert!(matches!(err, GfxError::MissingLayer(ref name) if name == VALIDATION_LAYER_NAME));
        assert_eq!(fx.probe.count(HeadlessCall::CreateInstance), 0);
        fx.assert_released();

        let mut fx = Fixture::with_config(HeadlessBackend::default(), config, 400, 300);
        fx.init().unwrap();
    }

    #[test]
    fn failure_at_every_step_rolls_back_completely() {
        let steps = [
            (HeadlessCall::CreateInstance, 0),
            (HeadlessCall::CreateSurface, 0),
            (HeadlessCall::EnumeratePhysicalDevices, 0),
            (HeadlessCall::PhysicalDeviceInfo, 0),
            (HeadlessCall::SwapchainSupport, 0),
            (HeadlessCall::CreateDevice, 0),
            (HeadlessCall::DeviceQueue, 0),
            // 第一次查询发生在选择物理设备时
            (HeadlessCall::SwapchainSupport, 1),
            (HeadlessCall::CreateSwapchain, 0),
            (HeadlessCall::SwapchainImages, 0),
            (HeadlessCall::CreateImageView, 2),
        ];

        for (call, skip) in steps {
            let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
            fx.probe.fail_after(call, skip, vk::Result::ERROR_OUT_OF_HOST_MEMORY);

            assert!(fx.init().is_err(), "{:?} should fail", call);
            assert_eq!(fx.rhi.state(), RhiState::Uninitialized);
            assert!(fx.rhi.swapchain_info().is_none());
            assert!(!fx.rhi.holds_resources());
            fx.assert_released();

            // 注入的失败只会发生一次
            fx.init().unwrap();
            assert_eq!(fx.rhi.state(), RhiState::SwapchainReady);
            fx.rhi.shutdown().unwrap();
            fx.assert_released();
        }
    }

    #[test]
    fn surface_failure_is_reported_as_unavailable() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.probe.fail_on(HeadlessCall::CreateSurface, vk::Result::ERROR_INITIALIZATION_FAILED);
        assert!(matches!(fx.init(), Err(GfxError::SurfaceUnavailable(_))));
        fx.assert_released();
    }

    #[test]
    fn init_twice_is_invalid() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.init().unwrap();
        assert!(matches!(
            fx.init(),
            Err(GfxError::InvalidState {
                op: "init",
                state: RhiState::SwapchainReady
            })
        ));
        assert_eq!(fx.probe.count(HeadlessCall::CreateInstance), 1);
    }

    #[test]
    fn zero_extent_is_rejected() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 0, 300);
        assert!(matches!(fx.init(), Err(GfxError::ZeroExtent)));
        assert_eq!(fx.rhi.state(), RhiState::Uninitialized);
        fx.assert_released();
    }

    #[test]
    fn resize_is_idempotent() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.init().unwrap();
        let before = fx.rhi.swapchain_info();

        fx.rhi.resize().unwrap();
        fx.rhi.resize().unwrap();

        assert_eq!(fx.rhi.state(), RhiState::SwapchainReady);
        assert_eq!(fx.rhi.swapchain_info(), before);
        assert_eq!(fx.probe.live_count(HandleKind::Swapchain), 1);
        assert_eq!(fx.probe.live_count(HandleKind::ImageView), 3);
        assert_eq!(fx.probe.live_count(HandleKind::Device), 1);
        assert_eq!(fx.probe.count(HeadlessCall::DeviceWaitIdle), 2);
        assert_eq!(fx.probe.count(HeadlessCall::CreateDevice), 1);
        assert_eq!(fx.probe.invalid_uses(), 0);
    }

    #[test]
    fn resize_follows_surface_extent() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.init().unwrap();

        fx.surface.set_extent(800, 600);
        fx.rhi.resize().unwrap();
        assert_eq!(
            fx.rhi.swapchain_info().map(|info| info.image_extent),
            Some(vk::Extent2D { width: 800, height: 600 })
        );
        assert!(fx.rhi.swapchain().unwrap().views_are_distinct());
    }

    #[test]
    fn failed_resize_leaves_device_ready_and_recovers() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.init().unwrap();

        fx.probe.fail_on(HeadlessCall::CreateImageView, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(fx.rhi.resize().is_err());
        assert_eq!(fx.rhi.state(), RhiState::DeviceReady);
        assert!(fx.rhi.swapchain_info().is_none());
        assert_eq!(fx.probe.live_count(HandleKind::Swapchain), 0);
        assert_eq!(fx.probe.live_count(HandleKind::ImageView), 0);
        assert_eq!(fx.probe.live_count(HandleKind::Device), 1);

        assert!(matches!(
            fx.rhi.draw_frame(),
            Err(GfxError::InvalidState {
                op: "draw_frame",
                state: RhiState::DeviceReady
            })
        ));

        fx.rhi.resize().unwrap();
        assert_eq!(fx.rhi.state(), RhiState::SwapchainReady);
        fx.rhi.shutdown().unwrap();
        fx.assert_released();
    }

    #[test]
    fn minimized_surface_fails_resize_until_restored() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.init().unwrap();

        fx.surface.set_extent(0, 0);
        assert!(matches!(fx.rhi.resize(), Err(GfxError::ZeroExtent)));
        assert_eq!(fx.rhi.state(), RhiState::DeviceReady);

        fx.surface.set_extent(320, 240);
        fx.rhi.resize().unwrap();
        assert_eq!(
            fx.rhi.swapchain_info().map(|info| info.image_extent),
            Some(vk::Extent2D { width: 320, height: 240 })
        );
    }

    #[test]
    fn resize_before_init_is_invalid() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        assert!(matches!(
            fx.rhi.resize(),
            Err(GfxError::InvalidState {
                op: "resize",
                state: RhiState::Uninitialized
            })
        ));
    }

    #[test]
    fn shutdown_requires_initialization_and_runs_once() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        assert!(matches!(fx.rhi.shutdown(), Err(GfxError::NotInitialized)));
        assert!(fx.log.contains(LogLevel::Error, "uninitialized"));

        fx.init().unwrap();
        fx.rhi.shutdown().unwrap();
        assert!(matches!(
            fx.rhi.shutdown(),
            Err(GfxError::InvalidState {
                op: "shutdown",
                state: RhiState::Destroyed
            })
        ));
        assert!(matches!(fx.init(), Err(GfxError::InvalidState { op: "init", .. })));
    }

    #[test]
    fn shutdown_releases_in_reverse_acquisition_order() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.init().unwrap();
        fx.probe.clear_calls();

        fx.rhi.shutdown().unwrap();
        assert_eq!(
            fx.probe.calls(),
            vec![
                HeadlessCall::DeviceWaitIdle,
                HeadlessCall::DestroyImageView,
                HeadlessCall::DestroyImageView,
                HeadlessCall::DestroyImageView,
                HeadlessCall::DestroySwapchain,
                HeadlessCall::DestroyDevice,
                HeadlessCall::DestroySurface,
                HeadlessCall::DestroyInstance,
            ]
        );
        fx.assert_released();
    }

    #[test]
    fn draw_frame_without_commands_is_idle() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.init().unwrap();
        assert_eq!(fx.rhi.draw_frame().unwrap(), FrameStatus::Idle);
        assert_eq!(fx.probe.count(HeadlessCall::AcquireNextImage), 0);
        assert_eq!(fx.rhi.frame_index(), 0);
    }

    #[test]
    fn draw_frame_submits_pending_commands_in_order() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.init().unwrap();

        let commands = [
            DrawCommand::draw(3, 1),
            DrawCommand::draw_indexed(36, 2).with_pipeline(PipelineHandle(1)),
            DrawCommand::draw(6, 1).with_offsets(3, 0),
        ];
        for command in &commands {
            fx.rhi.submit_draw(command).unwrap();
        }
        assert_eq!(fx.rhi.pending_draws(), &commands);

        assert_eq!(fx.rhi.draw_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(fx.probe.frames(), vec![commands.to_vec()]);
        assert_eq!(fx.probe.presented(), 1);
        assert_eq!(fx.rhi.frame_index(), 1);
        assert!(fx.rhi.pending_draws().is_empty());
    }

    #[test]
    fn out_of_date_and_suboptimal_frames_are_reported() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.init().unwrap();

        fx.probe.fail_on(HeadlessCall::AcquireNextImage, vk::Result::ERROR_OUT_OF_DATE_KHR);
        fx.rhi.submit_draw(&DrawCommand::draw(3, 1)).unwrap();
        assert_eq!(fx.rhi.draw_frame().unwrap(), FrameStatus::OutOfDate);
        assert!(fx.rhi.pending_draws().is_empty());
        assert_eq!(fx.probe.presented(), 0);

        fx.probe.fail_on(HeadlessCall::Present, vk::Result::ERROR_OUT_OF_DATE_KHR);
        fx.rhi.submit_draw(&DrawCommand::draw(3, 1)).unwrap();
        assert_eq!(fx.rhi.draw_frame().unwrap(), FrameStatus::OutOfDate);

        fx.probe.set_suboptimal_next();
        fx.rhi.submit_draw(&DrawCommand::draw(3, 1)).unwrap();
        assert_eq!(fx.rhi.draw_frame().unwrap(), FrameStatus::Suboptimal);

        fx.probe.fail_on(HeadlessCall::SubmitDraws, vk::Result::ERROR_DEVICE_LOST);
        fx.rhi.submit_draw(&DrawCommand::draw(3, 1)).unwrap();
        let err = fx.rhi.draw_frame().unwrap_err();
        assert!(matches!(
            err,
            GfxError::Vk {
                call: "vkQueueSubmit",
                result: vk::Result::ERROR_DEVICE_LOST
            }
        ));
        assert!(!err.is_out_of_date());
    }

    #[test]
    fn failed_submission_does_not_stall_next_frame() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.init().unwrap();

        fx.probe.fail_on(HeadlessCall::SubmitDraws, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        fx.rhi.submit_draw(&DrawCommand::draw(3, 1)).unwrap();
        assert!(fx.rhi.draw_frame().is_err());
        assert!(fx.rhi.pending_draws().is_empty());
        assert_eq!(fx.rhi.state(), RhiState::SwapchainReady);

        fx.rhi.submit_draw(&DrawCommand::draw(6, 1)).unwrap();
        assert_eq!(fx.rhi.draw_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(fx.probe.frames(), vec![vec![DrawCommand::draw(6, 1)]]);
        assert_eq!(fx.probe.count(HeadlessCall::AcquireNextImage), 2);
        assert_eq!(fx.probe.presented(), 1);
    }

    #[test]
    fn submit_draw_requires_swapchain() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        assert!(matches!(
            fx.rhi.submit_draw(&DrawCommand::draw(3, 1)),
            Err(GfxError::InvalidState { op: "submit_draw", .. })
        ));
    }

    #[test]
    fn drop_without_shutdown_warns_and_releases() {
        let fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        let Fixture {
            mut rhi,
            probe,
            log,
            surface,
        } = fx;
        rhi.init("demo", surface).unwrap();
        drop(rhi);

        assert!(log.contains(LogLevel::Warn, "without shutdown"));
        assert_eq!(probe.live_total(), 0);
        assert_eq!(probe.invalid_uses(), 0);
    }

    #[test]
    fn drop_after_shutdown_is_silent() {
        let mut fx = Fixture::new(HeadlessBackend::default(), 400, 300);
        fx.init().unwrap();
        fx.rhi.shutdown().unwrap();
        let log = fx.log.clone();
        drop(fx);
        assert_eq!(log.count(LogLevel::Warn), 0);
    }
}
