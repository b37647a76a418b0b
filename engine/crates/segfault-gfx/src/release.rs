//! 按创建顺序记录 GPU 对象，并按相反的顺序释放
//!
//! 初始化失败时的回滚、resize 时重建 swapchain、shutdown 都是"释放到某个标记"：
//! 只需要在创建成功后 push，就不会遗漏，也不会重复释放。

use ash::vk;
use segfault_crate_tools::log_sink::LogSink;

use crate::backend::GfxBackend;

/// 一个需要释放的 GPU 对象，携带销毁时需要的父对象
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Release {
    Instance(vk::Instance),
    Surface {
        instance: vk::Instance,
        surface: vk::SurfaceKHR,
    },
    Device(vk::Device),
    Swapchain {
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
    },
    ImageView {
        device: vk::Device,
        view: vk::ImageView,
    },
}

impl Release {
    fn destroy(self, backend: &mut dyn GfxBackend) {
        match self {
            Release::Instance(instance) => backend.destroy_instance(instance),
            Release::Surface { instance, surface } => backend.destroy_surface(instance, surface),
            Release::Device(device) => backend.destroy_device(device),
            Release::Swapchain { device, swapchain } => backend.destroy_swapchain(device, swapchain),
            Release::ImageView { device, view } => backend.destroy_image_view(device, view),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Release::Instance(_) => "instance",
            Release::Surface { .. } => "surface",
            Release::Device(_) => "device",
            Release::Swapchain { .. } => "swapchain",
            Release::ImageView { .. } => "image view",
        }
    }
}

/// [`ReleaseStack`] 中的位置
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReleaseMark(usize);

impl ReleaseMark {
    /// 栈底，释放到这里表示释放所有对象
    pub const BOTTOM: Self = Self(0);
}

#[derive(Debug, Default)]
pub struct ReleaseStack {
    entries: Vec<Release>,
}

impl ReleaseStack {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, release: Release) {
        self.entries.push(release);
    }

    /// 当前栈顶的位置
    #[inline]
    pub fn mark(&self) -> ReleaseMark {
        ReleaseMark(self.entries.len())
    }

    /// 按相反的顺序释放 `mark` 之后压入的所有对象，返回释放的数量
    pub fn unwind_to(&mut self, mark: ReleaseMark, backend: &mut dyn GfxBackend, log: &dyn LogSink) -> usize {
        let mut released = 0;
        while self.entries.len() > mark.0 {
            let Some(release) = self.entries.pop() else {
                break;
            };
            log.info(format_args!("destroying {}", release.kind()));
            release.destroy(backend);
            released += 1;
        }
        released
    }

    pub fn unwind_all(&mut self, backend: &mut dyn GfxBackend, log: &dyn LogSink) -> usize {
        self.unwind_to(ReleaseMark::BOTTOM, backend, log)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 从栈底到栈顶
    pub fn entries(&self) -> &[Release] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessCall};
    use ash::vk::Handle;
    use segfault_crate_tools::log_sink::CaptureSink;

    fn releases() -> Vec<Release> {
        let instance = vk::Instance::from_raw(1);
        let device = vk::Device::from_raw(3);
        vec![
            Release::Instance(instance),
            Release::Surface {
                instance,
                surface: vk::SurfaceKHR::from_raw(2),
            },
            Release::Device(device),
            Release::Swapchain {
                device,
                swapchain: vk::SwapchainKHR::from_raw(4),
            },
            Release::ImageView {
                device,
                view: vk::ImageView::from_raw(5),
            },
        ]
    }

    #[test]
    fn unwind_all_releases_in_reverse_order() {
        let mut backend = HeadlessBackend::default();
        let probe = backend.probe();
        let log = CaptureSink::new();

        let mut stack = ReleaseStack::new();
        releases().into_iter().for_each(|r| stack.push(r));
        assert_eq!(stack.len(), 5);

        assert_eq!(stack.unwind_all(&mut backend, &*log), 5);
        assert!(stack.is_empty());
        assert_eq!(
            probe.calls(),
            vec![
                HeadlessCall::DestroyImageView,
                HeadlessCall::DestroySwapchain,
                HeadlessCall::DestroyDevice,
                HeadlessCall::DestroySurface,
                HeadlessCall::DestroyInstance,
            ]
        );
    }

    #[test]
    fn unwind_to_mark_keeps_older_entries() {
        let mut backend = HeadlessBackend::default();
        let probe = backend.probe();
        let log = CaptureSink::new();

        let mut stack = ReleaseStack::new();
        let all = releases();
        all[..3].iter().for_each(|r| stack.push(*r));
        let mark = stack.mark();
        all[3..].iter().for_each(|r| stack.push(*r));

        assert_eq!(stack.unwind_to(mark, &mut backend, &*log), 2);
        assert_eq!(stack.entries(), &all[..3]);
        assert_eq!(probe.calls(), vec![HeadlessCall::DestroyImageView, HeadlessCall::DestroySwapchain]);

        // 再次释放到同一个位置不会有任何效果
        assert_eq!(stack.unwind_to(mark, &mut backend, &*log), 0);
        assert_eq!(probe.calls().len(), 2);
    }
}
