//! 渲染线程相关
//!
//! - [`render_thread::RenderThread`]：一个独立的 worker 线程，按帧调用 [`render_thread::FrameLoop`]
//! - [`render_loop::RenderLoop`]：持有 RHI 和 render graph 的 frame loop，可以在渲染线程上运行，
//!   也可以由主线程逐帧驱动

pub mod render_loop;
pub mod render_thread;

pub use render_loop::RenderLoop;
pub use render_thread::{FrameLoop, LoopControl, RenderThread, RenderThreadError, ThreadState};
