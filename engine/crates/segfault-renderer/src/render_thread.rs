use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use segfault_crate_tools::log_sink::LogSink;
use thiserror::Error;

/// 默认的线程名称
pub const DEFAULT_THREAD_NAME: &str = "RenderThread";

/// 渲染线程的状态
///
/// Stopped → Starting → Running → Stopping → Stopped
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ThreadState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    /// 已经请求停止，或者 frame loop 已经自行退出，等待 join
    Stopping = 3,
}

impl ThreadState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ThreadState::Starting,
            2 => ThreadState::Running,
            3 => ThreadState::Stopping,
            _ => ThreadState::Stopped,
        }
    }
}

/// 每一帧结束后，frame loop 是否继续
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LoopControl {
    Continue,
    Exit,
}

/// 在渲染线程上逐帧执行的工作
///
/// 停止标志只在两帧之间检查，一帧一旦开始就会完整执行
pub trait FrameLoop: Send + Sync {
    /// 在渲染线程上，第一帧之前调用
    fn on_start(&self) {}

    fn run_frame(&self) -> LoopControl;

    /// 在渲染线程上，最后一帧之后调用
    fn on_exit(&self) {}
}

#[derive(Debug, Error)]
pub enum RenderThreadError {
    #[error("render thread is already running")]
    AlreadyRunning,

    #[error("render thread can not join itself")]
    SelfJoin,

    #[error("render thread panicked")]
    WorkerPanicked,

    #[error("failed to spawn render thread: {0}")]
    Spawn(#[source] io::Error),
}

/// 主线程与某一个 worker 之间的信号
#[derive(Default)]
struct WorkerSignals {
    stop_requested: AtomicBool,
    exited: AtomicBool,
}

struct Worker {
    handle: JoinHandle<()>,
    signals: Arc<WorkerSignals>,
}

/// worker 退出时（包括 panic）更新状态
struct ExitGuard {
    signals: Arc<WorkerSignals>,
    state: Arc<AtomicU8>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.signals.exited.store(true, Ordering::Release);
        let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
            match ThreadState::from_u8(state) {
                ThreadState::Starting | ThreadState::Running => Some(ThreadState::Stopping as u8),
                _ => None,
            }
        });
    }
}

/// 独立的渲染线程
///
/// 同一时间最多关联一个 worker。drop 时会 join 仍然关联的 worker
pub struct RenderThread {
    frame_loop: Arc<dyn FrameLoop>,
    log: Arc<dyn LogSink>,
    name: String,

    /// 当前 worker 的状态，每次 start 与 detach 都会换成新的 cell，
    /// 被 detach 的 worker 退出时只会修改它自己的 cell
    state: Arc<AtomicU8>,
    worker: Option<Worker>,
    detached: bool,
}

// 创建与销毁
impl RenderThread {
    pub fn new(frame_loop: Arc<dyn FrameLoop>, log: Arc<dyn LogSink>) -> Self {
        Self {
            frame_loop,
            log,
            name: DEFAULT_THREAD_NAME.to_string(),

            state: Arc::new(AtomicU8::new(ThreadState::Stopped as u8)),
            worker: None,
            detached: false,
        }
    }

    /// 启动 worker，只能在 [`ThreadState::Stopped`] 状态下调用
    pub fn start(&mut self) -> Result<(), RenderThreadError> {
        if self.worker.is_some() || self.state() != ThreadState::Stopped {
            return Err(RenderThreadError::AlreadyRunning);
        }
        self.state = Arc::new(AtomicU8::new(ThreadState::Starting as u8));

        let signals = Arc::new(WorkerSignals::default());
        let frame_loop = self.frame_loop.clone();
        let guard = ExitGuard {
            signals: signals.clone(),
            state: self.state.clone(),
        };
        let log = self.log.clone();

        let spawn_result = thread::Builder::new().name(self.name.clone()).spawn(move || {
            Self::worker_main(frame_loop, guard, log);
        });
        let handle = match spawn_result {
            Ok(handle) => handle,
            Err(e) => {
                self.state.store(ThreadState::Stopped as u8, Ordering::Release);
                self.log.error(format_args!("failed to spawn render thread `{}`: {}", self.name, e));
                return Err(RenderThreadError::Spawn(e));
            }
        };

        // worker 可能已经退出并将状态改为 Stopping，此时不能覆盖
        let _ = self.state.compare_exchange(
            ThreadState::Starting as u8,
            ThreadState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.worker = Some(Worker { handle, signals });
        self.detached = false;
        self.log.info(format_args!("render thread `{}` started", self.name));
        Ok(())
    }

    /// 请求停止，并等待 worker 退出
    ///
    /// 没有关联的 worker 时什么都不做
    pub fn stop(&mut self) -> Result<(), RenderThreadError> {
        self.join_worker(true)
    }

    /// 同 [`Self::stop`]
    #[inline]
    pub fn join(&mut self) -> Result<(), RenderThreadError> {
        self.stop()
    }

    /// 不请求停止，等待 frame loop 自行返回 [`LoopControl::Exit`]
    pub fn wait_for_completion(&mut self) -> Result<(), RenderThreadError> {
        self.join_worker(false)
    }

    /// 放弃对 worker 的所有权，worker 会继续运行直到 frame loop 自行退出
    pub fn detach(&mut self) {
        if let Some(worker) = self.worker.take() {
            drop(worker.handle);
            self.detached = true;
            self.state = Arc::new(AtomicU8::new(ThreadState::Stopped as u8));
            self.log.info(format_args!("render thread `{}` detached", self.name));
        }
    }

    fn worker_main(frame_loop: Arc<dyn FrameLoop>, guard: ExitGuard, log: Arc<dyn LogSink>) {
        let signals = guard.signals.clone();

        frame_loop.on_start();
        let mut frames: u64 = 0;
        while !signals.stop_requested.load(Ordering::Acquire) {
            frames += 1;
            if frame_loop.run_frame() == LoopControl::Exit {
                break;
            }
        }
        frame_loop.on_exit();

        log.info(format_args!("render thread exits after {} frame(s)", frames));
        drop(guard);
    }

    fn join_worker(&mut self, request_stop: bool) -> Result<(), RenderThreadError> {
        let Some(worker) = self.worker.as_ref() else {
            return Ok(());
        };
        if worker.handle.thread().id() == thread::current().id() {
            self.log.error(format_args!("render thread `{}` tried to join itself", self.name));
            return Err(RenderThreadError::SelfJoin);
        }

        if request_stop {
            worker.signals.stop_requested.store(true, Ordering::Release);
            self.state.store(ThreadState::Stopping as u8, Ordering::Release);
        }

        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let result = worker.handle.join();
        self.state.store(ThreadState::Stopped as u8, Ordering::Release);

        match result {
            Ok(()) => {
                self.log.info(format_args!("render thread `{}` joined", self.name));
                Ok(())
            }
            Err(_) => {
                self.log.error(format_args!("render thread `{}` panicked", self.name));
                Err(RenderThreadError::WorkerPanicked)
            }
        }
    }
}

// getters
impl RenderThread {
    #[inline]
    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// worker 存在，且 frame loop 仍在运行
    #[inline]
    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.state() == ThreadState::Running
    }

    #[inline]
    pub fn is_joinable(&self) -> bool {
        self.worker.is_some()
    }

    #[inline]
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// worker 的 frame loop 是否已经返回（join 之前也可以查询）
    pub fn has_exited(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.signals.exited.load(Ordering::Acquire))
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.worker.as_ref().map(|w| w.handle.thread().id())
    }

    #[inline]
    pub fn thread_name(&self) -> &str {
        &self.name
    }

    /// 在下一次 [`Self::start`] 时生效
    pub fn set_thread_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        if !self.is_joinable() {
            return;
        }
        match self.stop() {
            Ok(()) => {}
            // 在 worker 自身上 drop，只能放弃所有权
            Err(RenderThreadError::SelfJoin) => self.detach(),
            Err(e) => self.log.error(format_args!("render thread `{}` stopped with error: {}", self.name, e)),
        }
    }
}
