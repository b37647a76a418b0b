use std::fmt;
use std::sync::{Arc, Mutex};

/// 核心模块使用的日志级别
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
}

impl LogLevel {
    /// 控制台输出时使用的标记
    pub fn tag(self) -> &'static str {
        match self {
            LogLevel::Error => "*Err*",
            LogLevel::Warn => "*Warn*",
            LogLevel::Info => "*Info*",
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// 可注入的日志接口
///
/// RHI、渲染线程、App 都通过这个接口输出日志，而不是直接调用全局函数。
/// 实现必须可以跨线程共享：渲染线程和主线程会同时写日志。
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>);

    #[inline]
    fn error(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    #[inline]
    fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    #[inline]
    fn info(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }
}

/// 转发到 `log` facade，运行时的默认实现
#[derive(Clone, Debug)]
pub struct LogCrateSink {
    target: &'static str,
}

impl LogCrateSink {
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }

    pub fn shared(target: &'static str) -> Arc<dyn LogSink> {
        Arc::new(Self::new(target))
    }
}

impl Default for LogCrateSink {
    fn default() -> Self {
        Self::new("segfault")
    }
}

impl LogSink for LogCrateSink {
    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        log::log!(target: self.target, log::Level::from(level), "{}", args);
    }
}

/// 一条被捕获的日志
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
}

/// 将日志收集到内存中，主要用于测试
#[derive(Default)]
pub struct CaptureSink {
    records: Mutex<Vec<LogRecord>>,
}

impl CaptureSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 指定级别的日志条数
    pub fn count(&self, level: LogLevel) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).iter().filter(|r| r.level == level).count()
    }

    /// 是否存在包含 `needle` 的指定级别日志
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|r| r.level == level && r.message.contains(needle))
    }

    pub fn clear(&self) {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl LogSink for CaptureSink {
    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        let record = LogRecord {
            level,
            message: args.to_string(),
        };
        self.records.lock().unwrap_or_else(|e| e.into_inner()).push(record);
    }
}
