//! GPU API 的访问边界
//!
//! RHI 只通过 [`GfxBackend`] 访问 GPU，每个调用都直接返回 vk 的错误码，
//! 由 RHI 负责将错误码转换为 [`crate::GfxError`]，以及失败后的回滚。

pub mod headless;
pub mod vulkan;

use ash::prelude::VkResult;
use ash::vk;

use crate::commands::draw_command::DrawCommand;
use crate::foundation::physical_device::PhysicalDeviceInfo;
use crate::swapchain::support::SwapchainSupport;
use crate::swapchain::surface::SurfaceSource;

/// 创建 instance 所需的参数
pub struct InstanceDesc<'a> {
    pub app_name: &'a str,
    pub engine_name: &'a str,
    pub layers: &'a [String],
    /// 是否开启 debug messenger
    pub enable_validation: bool,
    /// 用于查询 window system 所需的 instance extensions
    pub surface: &'a dyn SurfaceSource,
}

/// 创建 logical device 所需的参数
#[derive(Clone, Debug)]
pub struct DeviceDesc {
    pub physical_device: vk::PhysicalDevice,
    /// 去重之后的 queue family，每个 family 创建一个 queue
    pub queue_families: Vec<u32>,
    pub graphics_family: u32,
    pub extensions: Vec<String>,
}

/// 创建 swapchain 所需的参数
#[derive(Clone, Debug)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// 为空时使用 EXCLUSIVE，否则使用 CONCURRENT
    pub queue_family_indices: Vec<u32>,
}

impl SwapchainDesc {
    #[inline]
    pub fn sharing_mode(&self) -> vk::SharingMode {
        if self.queue_family_indices.is_empty() {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        }
    }
}

/// 创建 image view 所需的参数
#[derive(Copy, Clone, Debug)]
pub struct ImageViewDesc {
    pub image: vk::Image,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub components: vk::ComponentMapping,
    pub subresource_range: vk::ImageSubresourceRange,
}

// vk::ComponentMapping 与 vk::ImageSubresourceRange 没有实现 PartialEq，逐字段比较
impl PartialEq for ImageViewDesc {
    fn eq(&self, other: &Self) -> bool {
        let (c, oc) = (&self.components, &other.components);
        let (r, or) = (&self.subresource_range, &other.subresource_range);
        self.image == other.image
            && self.view_type == other.view_type
            && self.format == other.format
            && (c.r, c.g, c.b, c.a) == (oc.r, oc.g, oc.b, oc.a)
            && (r.aspect_mask, r.base_mip_level, r.level_count, r.base_array_layer, r.layer_count)
                == (or.aspect_mask, or.base_mip_level, or.level_count, or.base_array_layer, or.layer_count)
    }
}

impl Eq for ImageViewDesc {}

impl ImageViewDesc {
    /// 2D，identity swizzle，COLOR aspect，1 个 mip，1 个 layer
    pub fn color_2d(image: vk::Image, format: vk::Format) -> Self {
        Self {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            components: vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            },
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
        }
    }
}

/// GPU API 的抽象
///
/// 所有创建函数都不负责回滚，调用方需要记录创建成功的 handle，并在失败时按相反的顺序销毁。
/// destroy 系列函数不会失败。
pub trait GfxBackend: Send {
    /// 用于日志
    fn name(&self) -> &str;

    /// 当前环境下可用的 instance layers
    fn instance_layers(&mut self) -> VkResult<Vec<String>>;

    fn create_instance(&mut self, desc: &InstanceDesc<'_>) -> VkResult<vk::Instance>;
    fn destroy_instance(&mut self, instance: vk::Instance);

    fn create_surface(&mut self, instance: vk::Instance, source: &dyn SurfaceSource) -> VkResult<vk::SurfaceKHR>;
    fn destroy_surface(&mut self, instance: vk::Instance, surface: vk::SurfaceKHR);

    fn enumerate_physical_devices(&mut self, instance: vk::Instance) -> VkResult<Vec<vk::PhysicalDevice>>;

    /// 物理设备的属性，queue family 的 present 能力是针对 `surface` 查询的
    fn physical_device_info(
        &mut self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<PhysicalDeviceInfo>;

    /// 每次创建 swapchain 之前都需要重新查询
    fn swapchain_support(
        &mut self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<SwapchainSupport>;

    fn create_device(&mut self, desc: &DeviceDesc) -> VkResult<vk::Device>;
    fn device_queue(&mut self, device: vk::Device, queue_family: u32) -> VkResult<vk::Queue>;
    fn device_wait_idle(&mut self, device: vk::Device) -> VkResult<()>;
    fn destroy_device(&mut self, device: vk::Device);

    fn create_swapchain(&mut self, device: vk::Device, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&mut self, device: vk::Device, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn destroy_swapchain(&mut self, device: vk::Device, swapchain: vk::SwapchainKHR);

    fn create_image_view(&mut self, device: vk::Device, desc: &ImageViewDesc) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&mut self, device: vk::Device, view: vk::ImageView);

    /// 返回 (image index, is suboptimal)
    ///
    /// timeout: nano seconds
    fn acquire_next_image(
        &mut self,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
    ) -> VkResult<(u32, bool)>;

    /// 按顺序提交 draw commands，目标为 swapchain 的第 `image_index` 张 image
    fn submit_draws(
        &mut self,
        device: vk::Device,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        commands: &[DrawCommand],
    ) -> VkResult<()>;

    /// 返回 is suboptimal
    fn present(
        &mut self,
        device: vk::Device,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    ) -> VkResult<bool>;
}
