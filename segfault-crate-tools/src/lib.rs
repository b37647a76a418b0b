//! Segfault 工具集
//!
//! 提供日志初始化，以及可注入到 RHI / 渲染线程中的日志接口 [`log_sink::LogSink`]。
//!
//! 核心模块不直接依赖全局的 logger，而是持有一个 `Arc<dyn LogSink>`，
//! 运行时使用 [`log_sink::LogCrateSink`] 转发到 `log`，测试时使用 [`log_sink::CaptureSink`] 收集日志。

pub mod init_log;
pub mod log_sink;
