use ash::vk;
use itertools::Itertools;
use segfault_crate_tools::log_sink::LogSink;

use crate::backend::{GfxBackend, ImageViewDesc, SwapchainDesc};
use crate::error::{GfxError, GfxResult};
use crate::foundation::device::GfxDevice;
use crate::release::{Release, ReleaseStack};
use crate::swapchain::support::SwapchainSupport;

/// swapchain 以及每张 image 对应的 image view
///
/// 所有 handle 的销毁都由 [`ReleaseStack`] 负责
#[derive(Clone, Debug)]
pub struct RenderSwapchain {
    handle: vk::SwapchainKHR,

    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,

    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

/// swapchain 的基本信息
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SwapchainImageInfo {
    pub image_extent: vk::Extent2D,
    pub image_cnt: usize,
    pub image_format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
}

// 创建与销毁
impl RenderSwapchain {
    /// 根据最新查询到的 `support` 创建 swapchain，以及所有 image 的 view
    ///
    /// 每个创建成功的对象都会立即压入 `releases`，失败时由调用方回滚
    pub(crate) fn create(
        backend: &mut dyn GfxBackend,
        device: &GfxDevice,
        surface: vk::SurfaceKHR,
        support: &SwapchainSupport,
        window_extent: vk::Extent2D,
        releases: &mut ReleaseStack,
        log: &dyn LogSink,
    ) -> GfxResult<Self> {
        let config = support.choose_config(window_extent).ok_or(GfxError::Vk {
            call: "vkGetPhysicalDeviceSurfaceFormatsKHR",
            result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        })?;

        // 确定 window 的 extent 尺寸
        // 如果 surface_capabilities.current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
        let caps = &support.capabilities;
        log.info(format_args!(
            "create swapchain:
            surface current extent: {}x{}, min extent: {}x{}, max extent: {}x{}
            window physical extent: {}x{}
            final swapchain extent: {}x{}",
            caps.current_extent.width,
            caps.current_extent.height,
            caps.min_image_extent.width,
            caps.min_image_extent.height,
            caps.max_image_extent.width,
            caps.max_image_extent.height,
            window_extent.width,
            window_extent.height,
            config.extent.width,
            config.extent.height
        ));
        // 窗口最小化时尺寸为 0，clamp 之后也不能用于创建 swapchain
        let is_zero = |extent: vk::Extent2D| extent.width == 0 || extent.height == 0;
        if is_zero(window_extent) || is_zero(config.extent) {
            return Err(GfxError::ZeroExtent);
        }

        let desc = SwapchainDesc {
            surface,
            min_image_count: config.image_count,
            surface_format: config.surface_format,
            extent: config.extent,
            present_mode: config.present_mode,
            pre_transform: caps.current_transform,
            queue_family_indices: device.swapchain_sharing_families(),
        };
        let handle =
            backend.create_swapchain(device.handle(), &desc).map_err(GfxError::vk("vkCreateSwapchainKHR"))?;
        releases.push(Release::Swapchain {
            device: device.handle(),
            swapchain: handle,
        });

        let images =
            backend.swapchain_images(device.handle(), handle).map_err(GfxError::vk("vkGetSwapchainImagesKHR"))?;

        let mut image_views = Vec::with_capacity(images.len());
        for image in &images {
            let view_desc = ImageViewDesc::color_2d(*image, config.surface_format.format);
            let view = backend
                .create_image_view(device.handle(), &view_desc)
                .map_err(GfxError::vk("vkCreateImageView"))?;
            releases.push(Release::ImageView {
                device: device.handle(),
                view,
            });
            image_views.push(view);
        }

        log.info(format_args!(
            "swapchain ready: {} images, format: {:?}, present mode: {:?}, sharing: {:?}",
            images.len(),
            config.surface_format.format,
            config.present_mode,
            desc.sharing_mode()
        ));

        Ok(Self {
            handle,
            images,
            image_views,
            surface_format: config.surface_format,
            extent: config.extent,
            present_mode: config.present_mode,
        })
    }
}

// getters
impl RenderSwapchain {
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn image_infos(&self) -> SwapchainImageInfo {
        SwapchainImageInfo {
            image_extent: self.extent,
            image_cnt: self.images.len(),
            image_format: self.surface_format.format,
            present_mode: self.present_mode,
        }
    }

    /// 每张 image 恰好对应一个 view，且 view 之间没有重复
    pub fn views_are_distinct(&self) -> bool {
        self.image_views.len() == self.images.len() && self.image_views.iter().all_unique()
    }
}
