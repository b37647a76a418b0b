use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use segfault_crate_tools::log_sink::LogSink;
use segfault_gfx::{FrameStatus, GfxError, GfxResult, Rhi, RhiState};
use segfault_render_graph::RenderGraph;

use crate::render_thread::{FrameLoop, LoopControl};

/// 连续失败这么多帧之后，frame loop 退出
pub const MAX_CONSECUTIVE_FAILURES: u32 = 8;

/// 没有需要绘制的内容时，每帧之间的等待时间
const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(2);

/// 持有 RHI 与 render graph 的 frame loop
///
/// 加锁顺序固定为先 RHI 后 graph。渲染线程在整帧期间持有 RHI 的锁，
/// 因此主线程不会在一帧执行过程中修改 swapchain：渲染线程运行时，
/// resize 请求通过 [`Self::request_resize`] 交给渲染线程在下一帧开始时处理。
pub struct RenderLoop {
    rhi: Mutex<Rhi>,
    graph: Mutex<RenderGraph>,
    log: Arc<dyn LogSink>,

    resize_pending: AtomicBool,
    frames: AtomicU64,
    consecutive_failures: AtomicU32,
    idle_backoff: Duration,
}

// 创建与销毁
impl RenderLoop {
    pub fn new(rhi: Rhi, graph: RenderGraph, log: Arc<dyn LogSink>) -> Self {
        Self {
            rhi: Mutex::new(rhi),
            graph: Mutex::new(graph),
            log,

            resize_pending: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            idle_backoff: DEFAULT_IDLE_BACKOFF,
        }
    }

    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }
}

// getters
impl RenderLoop {
    /// 某一帧 panic 之后锁会被污染，RHI 本身的状态仍然是一致的，因此直接忽略污染标记
    pub fn lock_rhi(&self) -> MutexGuard<'_, Rhi> {
        self.rhi.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 需要同时持有时，必须先持有 RHI 的锁
    pub fn lock_graph(&self) -> MutexGuard<'_, RenderGraph> {
        self.graph.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[inline]
    pub fn is_resize_pending(&self) -> bool {
        self.resize_pending.load(Ordering::Acquire)
    }

    /// 成功提交并 present 的帧数
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }
}

// update
impl RenderLoop {
    /// 在下一帧开始时重建 swapchain，可以从任意线程调用
    pub fn request_resize(&self) {
        self.resize_pending.store(true, Ordering::Release);
    }

    /// 立即重建 swapchain，只应在渲染线程没有运行时调用
    pub fn resize_now(&self) -> GfxResult<()> {
        let mut rhi = self.lock_rhi();
        let pending = self.resize_pending.swap(false, Ordering::AcqRel);
        rhi.resize().inspect_err(|_| self.restore_resize_request(pending))
    }

    /// 执行一帧：处理 resize 请求 → 执行 render graph → draw frame
    ///
    /// swapchain 失效时会自动登记 resize 请求
    pub fn frame(&self) -> GfxResult<FrameStatus> {
        let mut rhi = self.lock_rhi();
        let graph = self.lock_graph();

        // DeviceReady 表示上一次 resize 失败（例如窗口最小化），每一帧都重试
        let pending = self.resize_pending.swap(false, Ordering::AcqRel);
        if pending || rhi.state() == RhiState::DeviceReady {
            rhi.resize().inspect_err(|_| self.restore_resize_request(pending))?;
        }

        graph.execute(&mut rhi)?;
        let status = rhi.draw_frame()?;
        match status {
            FrameStatus::OutOfDate | FrameStatus::Suboptimal => {
                self.request_resize();
                self.frames.fetch_add(u64::from(status == FrameStatus::Suboptimal), Ordering::AcqRel);
            }
            FrameStatus::Presented => {
                self.frames.fetch_add(1, Ordering::AcqRel);
            }
            FrameStatus::Idle => {}
        }
        Ok(status)
    }

    /// resize 失败时，已经取出的请求要放回去，留给下一帧
    fn restore_resize_request(&self, pending: bool) {
        if pending {
            self.resize_pending.store(true, Ordering::Release);
        }
    }
}

impl FrameLoop for RenderLoop {
    fn on_start(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.log.info(format_args!("render loop started"));
    }

    fn run_frame(&self) -> LoopControl {
        let _span = tracy_client::Client::running().map(|client| client.span(tracy_client::span_location!("RenderLoop::frame"), 0));

        match self.frame() {
            Ok(status) => {
                self.consecutive_failures.store(0, Ordering::Release);
                if status == FrameStatus::Idle {
                    thread::sleep(self.idle_backoff);
                } else if let Some(client) = tracy_client::Client::running() {
                    client.frame_mark();
                }
                LoopControl::Continue
            }
            Err(GfxError::ZeroExtent) => {
                // 窗口最小化，等待恢复
                thread::sleep(self.idle_backoff);
                LoopControl::Continue
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                self.log.error(format_args!("frame failed ({}/{}): {}", failures, MAX_CONSECUTIVE_FAILURES, e));
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    self.log.error(format_args!("too many consecutive frame failures, render loop exits"));
                    LoopControl::Exit
                } else {
                    LoopControl::Continue
                }
            }
        }
    }

    fn on_exit(&self) {
        self.log.info(format_args!("render loop exited after {} frame(s)", self.frames()));
    }
}
