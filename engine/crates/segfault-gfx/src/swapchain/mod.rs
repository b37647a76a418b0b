pub mod render_swapchain;
pub mod support;
pub mod surface;
