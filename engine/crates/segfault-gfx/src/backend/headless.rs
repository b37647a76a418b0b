//! 不依赖 GPU 的 backend
//!
//! 所有的 handle 都是伪造的，但会在 [`HeadlessProbe`] 中记录：哪些 handle 仍然存活、
//! 每一次调用、提交的 draw commands。测试可以通过 probe 注入一次性的失败。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::backend::{DeviceDesc, GfxBackend, ImageViewDesc, InstanceDesc, SwapchainDesc};
use crate::commands::draw_command::DrawCommand;
use crate::config::{SWAPCHAIN_EXTENSION_NAME, VALIDATION_LAYER_NAME};
use crate::foundation::physical_device::{PhysicalDeviceInfo, QueueFamilyProps};
use crate::swapchain::support::SwapchainSupport;
use crate::swapchain::surface::SurfaceSource;

/// 物理设备 handle 的起始值，不会与其他伪造的 handle 冲突
const PHYSICAL_DEVICE_BASE: u64 = 0x5000_0000;
const QUEUE_BASE: u64 = 0x6000_0000;
const IMAGE_BASE: u64 = 0x7000_0000;

/// backend 的每一个入口
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HeadlessCall {
    InstanceLayers,
    CreateInstance,
    DestroyInstance,
    CreateSurface,
    DestroySurface,
    EnumeratePhysicalDevices,
    PhysicalDeviceInfo,
    SwapchainSupport,
    CreateDevice,
    DeviceQueue,
    DeviceWaitIdle,
    DestroyDevice,
    CreateSwapchain,
    SwapchainImages,
    DestroySwapchain,
    CreateImageView,
    DestroyImageView,
    AcquireNextImage,
    SubmitDraws,
    Present,
}

/// 需要显式销毁的 handle 种类
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Instance,
    Surface,
    Device,
    Swapchain,
    ImageView,
}

#[derive(Clone, Debug)]
pub struct HeadlessQueueFamily {
    pub queue_flags: vk::QueueFlags,
    pub queue_count: u32,
    pub present_supported: bool,
}

impl HeadlessQueueFamily {
    pub fn new(queue_flags: vk::QueueFlags, present_supported: bool) -> Self {
        Self {
            queue_flags,
            queue_count: 1,
            present_supported,
        }
    }
}

/// 一张模拟的物理显卡
#[derive(Clone, Debug)]
pub struct HeadlessAdapter {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<HeadlessQueueFamily>,
    pub extensions: Vec<String>,

    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl Default for HeadlessAdapter {
    fn default() -> Self {
        Self {
            name: "Headless GPU".to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            queue_families: vec![HeadlessQueueFamily::new(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                true,
            )],
            extensions: vec![SWAPCHAIN_EXTENSION_NAME.to_string()],
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D {
                    width: 16384,
                    height: 16384,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }
}

impl HeadlessAdapter {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    /// 环境中可用的 instance layers
    pub instance_layers: Vec<String>,
    /// 按枚举顺序排列
    pub adapters: Vec<HeadlessAdapter>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            instance_layers: vec![VALIDATION_LAYER_NAME.to_string()],
            adapters: vec![HeadlessAdapter::default()],
        }
    }
}

struct Failure {
    call: HeadlessCall,
    /// 在失败之前还需要成功的次数
    skip: usize,
    result: vk::Result,
}

struct SwapchainImages {
    images: Vec<vk::Image>,
    next: u32,
}

#[derive(Default)]
struct ProbeState {
    calls: Vec<HeadlessCall>,
    live: HashMap<u64, HandleKind>,
    /// 使用或销毁了不存在的 handle，或者在子对象存活时销毁了父对象
    invalid_uses: usize,
    failures: Vec<Failure>,

    current_extent: Option<vk::Extent2D>,
    suboptimal_next: bool,

    frames: Vec<Vec<DrawCommand>>,
    presented: usize,

    device_descs: Vec<DeviceDesc>,
    swapchain_descs: Vec<SwapchainDesc>,
    view_descs: Vec<ImageViewDesc>,
}

/// 观察和操控 [`HeadlessBackend`] 的句柄
///
/// backend 被移交给 RHI 之后，测试仍然可以通过 probe 查看 backend 的内部状态
#[derive(Clone, Default)]
pub struct HeadlessProbe {
    state: Arc<Mutex<ProbeState>>,
}

// tools
impl HeadlessProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// 注入
impl HeadlessProbe {
    /// 下一次 `call` 返回 `result`
    pub fn fail_on(&self, call: HeadlessCall, result: vk::Result) {
        self.fail_after(call, 0, result);
    }

    /// `call` 再成功 `skip` 次之后，失败一次
    pub fn fail_after(&self, call: HeadlessCall, skip: usize, result: vk::Result) {
        self.lock().failures.push(Failure { call, skip, result });
    }

    /// 模拟窗口系统决定的 surface 尺寸，`None` 表示由 swapchain 决定
    pub fn set_current_extent(&self, extent: Option<vk::Extent2D>) {
        self.lock().current_extent = extent;
    }

    /// 下一次 acquire 返回 suboptimal
    pub fn set_suboptimal_next(&self) {
        self.lock().suboptimal_next = true;
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

// getters
impl HeadlessProbe {
    pub fn calls(&self) -> Vec<HeadlessCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, call: HeadlessCall) -> usize {
        self.lock().calls.iter().filter(|c| **c == call).count()
    }

    pub fn live_count(&self, kind: HandleKind) -> usize {
        self.lock().live.values().filter(|k| **k == kind).count()
    }

    /// 所有仍然存活的 handle 数量
    pub fn live_total(&self) -> usize {
        self.lock().live.len()
    }

    pub fn invalid_uses(&self) -> usize {
        self.lock().invalid_uses
    }

    /// 每一帧提交的 draw commands
    pub fn frames(&self) -> Vec<Vec<DrawCommand>> {
        self.lock().frames.clone()
    }

    /// 所有提交过的 draw commands，按提交顺序
    pub fn submitted(&self) -> Vec<DrawCommand> {
        self.lock().frames.iter().flatten().copied().collect()
    }

    pub fn presented(&self) -> usize {
        self.lock().presented
    }

    pub fn device_descs(&self) -> Vec<DeviceDesc> {
        self.lock().device_descs.clone()
    }

    pub fn swapchain_descs(&self) -> Vec<SwapchainDesc> {
        self.lock().swapchain_descs.clone()
    }

    pub fn view_descs(&self) -> Vec<ImageViewDesc> {
        self.lock().view_descs.clone()
    }
}

/// 模拟的 GPU
pub struct HeadlessBackend {
    config: HeadlessConfig,
    probe: HeadlessProbe,

    next_handle: u64,
    swapchains: HashMap<u64, SwapchainImages>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

// 创建与销毁
impl HeadlessBackend {
    pub fn new(config: HeadlessConfig) -> Self {
        Self {
            config,
            probe: HeadlessProbe::default(),
            next_handle: 0x1000,
            swapchains: HashMap::new(),
        }
    }

    /// 只包含给定物理设备的环境
    pub fn with_adapters(adapters: Vec<HeadlessAdapter>) -> Self {
        Self::new(HeadlessConfig {
            adapters,
            ..Default::default()
        })
    }

    pub fn probe(&self) -> HeadlessProbe {
        self.probe.clone()
    }
}

// tools
impl HeadlessBackend {
    /// 记录调用，并检查是否需要注入失败
    fn enter(&self, call: HeadlessCall) -> VkResult<()> {
        let mut state = self.probe.lock();
        state.calls.push(call);

        let Some(pos) = state.failures.iter().position(|f| f.call == call) else {
            return Ok(());
        };
        if state.failures[pos].skip > 0 {
            state.failures[pos].skip -= 1;
            Ok(())
        } else {
            Err(state.failures.remove(pos).result)
        }
    }

    /// 销毁类的调用不会失败，只记录
    fn record(&self, call: HeadlessCall) {
        self.probe.lock().calls.push(call);
    }

    fn alloc<H: Handle>(&mut self, kind: HandleKind) -> H {
        self.next_handle += 1;
        self.probe.lock().live.insert(self.next_handle, kind);
        H::from_raw(self.next_handle)
    }

    fn check_live<H: Handle>(&self, handle: H, kind: HandleKind) -> VkResult<()> {
        let mut state = self.probe.lock();
        if state.live.get(&handle.as_raw()) == Some(&kind) {
            Ok(())
        } else {
            state.invalid_uses += 1;
            Err(vk::Result::ERROR_DEVICE_LOST)
        }
    }

    /// `children` 中任何一种仍然存活时，销毁父对象是非法的
    fn free<H: Handle>(&self, handle: H, kind: HandleKind, children: &[HandleKind]) {
        let raw = handle.as_raw();
        if raw == 0 {
            return;
        }
        let mut state = self.probe.lock();
        if state.live.values().any(|k| children.contains(k)) {
            state.invalid_uses += 1;
        }
        if state.live.get(&raw) == Some(&kind) {
            state.live.remove(&raw);
        } else {
            state.invalid_uses += 1;
        }
    }

    fn adapter(&self, physical_device: vk::PhysicalDevice) -> VkResult<&HeadlessAdapter> {
        physical_device
            .as_raw()
            .checked_sub(PHYSICAL_DEVICE_BASE + 1)
            .and_then(|index| self.config.adapters.get(index as usize))
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }
}

impl GfxBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn instance_layers(&mut self) -> VkResult<Vec<String>> {
        self.enter(HeadlessCall::InstanceLayers)?;
        Ok(self.config.instance_layers.clone())
    }

    fn create_instance(&mut self, desc: &InstanceDesc<'_>) -> VkResult<vk::Instance> {
        self.enter(HeadlessCall::CreateInstance)?;
        if desc.layers.iter().any(|layer| !self.config.instance_layers.contains(layer)) {
            return Err(vk::Result::ERROR_LAYER_NOT_PRESENT);
        }
        Ok(self.alloc(HandleKind::Instance))
    }

    fn destroy_instance(&mut self, instance: vk::Instance) {
        self.record(HeadlessCall::DestroyInstance);
        self.free(instance, HandleKind::Instance, &[HandleKind::Surface, HandleKind::Device]);
    }

    fn create_surface(&mut self, instance: vk::Instance, _source: &dyn SurfaceSource) -> VkResult<vk::SurfaceKHR> {
        self.enter(HeadlessCall::CreateSurface)?;
        self.check_live(instance, HandleKind::Instance)?;
        Ok(self.alloc(HandleKind::Surface))
    }

    fn destroy_surface(&mut self, _instance: vk::Instance, surface: vk::SurfaceKHR) {
        self.record(HeadlessCall::DestroySurface);
        self.free(surface, HandleKind::Surface, &[HandleKind::Swapchain]);
    }

    fn enumerate_physical_devices(&mut self, instance: vk::Instance) -> VkResult<Vec<vk::PhysicalDevice>> {
        self.enter(HeadlessCall::EnumeratePhysicalDevices)?;
        self.check_live(instance, HandleKind::Instance)?;
        Ok((0..self.config.adapters.len() as u64)
            .map(|index| vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE + 1 + index))
            .collect())
    }

    fn physical_device_info(
        &mut self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<PhysicalDeviceInfo> {
        self.enter(HeadlessCall::PhysicalDeviceInfo)?;
        self.check_live(surface, HandleKind::Surface)?;
        let adapter = self.adapter(physical_device)?;

        Ok(PhysicalDeviceInfo {
            handle: physical_device,
            name: adapter.name.clone(),
            device_type: adapter.device_type,
            queue_families: adapter
                .queue_families
                .iter()
                .enumerate()
                .map(|(index, family)| QueueFamilyProps {
                    index: index as u32,
                    queue_flags: family.queue_flags,
                    queue_count: family.queue_count,
                    present_supported: family.present_supported,
                })
                .collect(),
            extensions: adapter.extensions.clone(),
        })
    }

    fn swapchain_support(
        &mut self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<SwapchainSupport> {
        self.enter(HeadlessCall::SwapchainSupport)?;
        self.check_live(surface, HandleKind::Surface)?;
        let current_extent = self.probe.lock().current_extent;
        let adapter = self.adapter(physical_device)?;

        let mut capabilities = adapter.capabilities;
        if let Some(extent) = current_extent {
            capabilities.current_extent = extent;
        }
        Ok(SwapchainSupport {
            capabilities,
            formats: adapter.formats.clone(),
            present_modes: adapter.present_modes.clone(),
        })
    }

    fn create_device(&mut self, desc: &DeviceDesc) -> VkResult<vk::Device> {
        self.enter(HeadlessCall::CreateDevice)?;
        let adapter = self.adapter(desc.physical_device)?;
        if desc.extensions.iter().any(|ext| !adapter.extensions.contains(ext)) {
            return Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        }
        if desc.queue_families.iter().any(|family| *family as usize >= adapter.queue_families.len()) {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }

        self.probe.lock().device_descs.push(desc.clone());
        Ok(self.alloc(HandleKind::Device))
    }

    fn device_queue(&mut self, device: vk::Device, queue_family: u32) -> VkResult<vk::Queue> {
        self.enter(HeadlessCall::DeviceQueue)?;
        self.check_live(device, HandleKind::Device)?;
        Ok(vk::Queue::from_raw(QUEUE_BASE + queue_family as u64))
    }

    fn device_wait_idle(&mut self, device: vk::Device) -> VkResult<()> {
        self.enter(HeadlessCall::DeviceWaitIdle)?;
        self.check_live(device, HandleKind::Device)
    }

    fn destroy_device(&mut self, device: vk::Device) {
        self.record(HeadlessCall::DestroyDevice);
        self.free(device, HandleKind::Device, &[HandleKind::Swapchain, HandleKind::ImageView]);
    }

    fn create_swapchain(&mut self, device: vk::Device, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        self.enter(HeadlessCall::CreateSwapchain)?;
        self.check_live(device, HandleKind::Device)?;
        self.check_live(desc.surface, HandleKind::Surface)?;
        if desc.extent.width == 0 || desc.extent.height == 0 || desc.min_image_count == 0 {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }

        self.probe.lock().swapchain_descs.push(desc.clone());
        let swapchain: vk::SwapchainKHR = self.alloc(HandleKind::Swapchain);
        let images = (0..desc.min_image_count as u64)
            .map(|i| vk::Image::from_raw(IMAGE_BASE + (swapchain.as_raw() << 4) + i))
            .collect();
        self.swapchains.insert(swapchain.as_raw(), SwapchainImages { images, next: 0 });
        Ok(swapchain)
    }

    fn swapchain_images(&mut self, device: vk::Device, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.enter(HeadlessCall::SwapchainImages)?;
        self.check_live(device, HandleKind::Device)?;
        self.check_live(swapchain, HandleKind::Swapchain)?;
        Ok(self.swapchains.get(&swapchain.as_raw()).map(|s| s.images.clone()).unwrap_or_default())
    }

    fn destroy_swapchain(&mut self, _device: vk::Device, swapchain: vk::SwapchainKHR) {
        self.record(HeadlessCall::DestroySwapchain);
        self.free(swapchain, HandleKind::Swapchain, &[HandleKind::ImageView]);
        self.swapchains.remove(&swapchain.as_raw());
    }

    fn create_image_view(&mut self, device: vk::Device, desc: &ImageViewDesc) -> VkResult<vk::ImageView> {
        self.enter(HeadlessCall::CreateImageView)?;
        self.check_live(device, HandleKind::Device)?;
        if !self.swapchains.values().any(|s| s.images.contains(&desc.image)) {
            self.probe.lock().invalid_uses += 1;
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }

        self.probe.lock().view_descs.push(*desc);
        Ok(self.alloc(HandleKind::ImageView))
    }

    fn destroy_image_view(&mut self, _device: vk::Device, view: vk::ImageView) {
        self.record(HeadlessCall::DestroyImageView);
        self.free(view, HandleKind::ImageView, &[]);
    }

    fn acquire_next_image(
        &mut self,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
    ) -> VkResult<(u32, bool)> {
        self.enter(HeadlessCall::AcquireNextImage)?;
        self.check_live(device, HandleKind::Device)?;
        self.check_live(swapchain, HandleKind::Swapchain)?;

        let suboptimal = std::mem::take(&mut self.probe.lock().suboptimal_next);
        let images = self.swapchains.get_mut(&swapchain.as_raw()).ok_or(vk::Result::ERROR_DEVICE_LOST)?;
        let index = images.next % images.images.len().max(1) as u32;
        images.next = images.next.wrapping_add(1);
        Ok((index, suboptimal))
    }

    fn submit_draws(
        &mut self,
        device: vk::Device,
        _queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        _image_index: u32,
        commands: &[DrawCommand],
    ) -> VkResult<()> {
        self.enter(HeadlessCall::SubmitDraws)?;
        self.check_live(device, HandleKind::Device)?;
        self.check_live(swapchain, HandleKind::Swapchain)?;
        self.probe.lock().frames.push(commands.to_vec());
        Ok(())
    }

    fn present(
        &mut self,
        device: vk::Device,
        _queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        _image_index: u32,
    ) -> VkResult<bool> {
        self.enter(HeadlessCall::Present)?;
        self.check_live(device, HandleKind::Device)?;
        self.check_live(swapchain, HandleKind::Swapchain)?;
        self.probe.lock().presented += 1;
        Ok(false)
    }
}
