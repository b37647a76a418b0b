use ash::vk;

/// 物理设备针对某个 surface 的 swapchain 能力
///
/// 这是一个临时的查询结果，每次创建 swapchain 之前都需要重新查询
#[derive(Clone, Debug, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// 从 [`SwapchainSupport`] 中选出的 swapchain 参数
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl SwapchainSupport {
    /// 至少有一个 format 和一个 present mode
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }

    /// 确定 image count
    ///
    /// max_image_count == 0，表示不限制 image 数量
    pub fn choose_image_count(&self) -> u32 {
        let min = self.capabilities.min_image_count;
        let desired = u32::max(min.saturating_add(1), min);
        if self.capabilities.max_image_count == 0 {
            desired
        } else {
            u32::min(desired, self.capabilities.max_image_count)
        }
    }

    /// 优先使用 8bit BGRA + sRGB 非线性色彩空间，否则使用第一个
    pub fn choose_surface_format(&self) -> Option<vk::SurfaceFormatKHR> {
        const PREFERRED: [vk::Format; 2] = [vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_UNORM];

        PREFERRED
            .iter()
            .find_map(|preferred| {
                self.formats
                    .iter()
                    .find(|f| f.format == *preferred && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            })
            .or_else(|| self.formats.first())
            .copied()
    }

    /// 优先使用 MAILBOX（低延迟的三缓冲），否则使用一定被支持的 FIFO
    pub fn choose_present_mode(&self) -> vk::PresentModeKHR {
        if self.present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else {
            vk::PresentModeKHR::FIFO
        }
    }

    /// current extent 的 width 为 u32::MAX 时，表示尺寸由 swapchain 决定，此时使用窗口的像素尺寸
    pub fn choose_extent(&self, window_extent: vk::Extent2D) -> vk::Extent2D {
        let caps = &self.capabilities;
        if caps.current_extent.width != u32::MAX {
            return caps.current_extent;
        }

        vk::Extent2D {
            width: window_extent.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window_extent.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }

    pub fn choose_config(&self, window_extent: vk::Extent2D) -> Option<SwapchainConfig> {
        Some(SwapchainConfig {
            image_count: self.choose_image_count(),
            surface_format: self.choose_surface_format()?,
            present_mode: self.choose_present_mode(),
            extent: self.choose_extent(window_extent),
        })
    }
}
