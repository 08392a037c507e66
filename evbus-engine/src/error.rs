//! # 调度层统一错误定义
//!
//! 与 `evbus-core` 的 [`ErrorCode`] 协议无缝集成：
//! [`EngineError`] 携带分类、稳定错误码与可选的底层错误，
//! 健康检查失败时外层统一为 `HEALTHCHECK_FAILED`，
//! 具体原因（未运行/停滞/拥塞）作为 source 保留。

use evbus_core::error::{ErrorCode, ErrorKind, EventError, codes};
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// 调度层统一错误类型
///
/// # 示例
///
/// ```rust
/// use evbus_engine::error::EngineError;
/// use evbus_core::error::{ErrorKind, codes};
///
/// let err = EngineError::bus_closed();
/// assert!(err.matches(ErrorKind::Transport, codes::BUS_CLOSED));
///
/// let err = EngineError::healthcheck_failed(EngineError::not_running());
/// assert_eq!(err.code(), codes::HEALTHCHECK_FAILED);
/// assert_eq!(err.cause().map(|c| c.code()), Some(codes::PROCESSOR_NOT_RUNNING));
/// ```
pub struct EngineError {
    kind: ErrorKind,
    code: &'static str,
    message: Box<str>,
    source: Option<Source>,
}

enum Source {
    Core(EventError),
    Engine(Box<EngineError>),
    Other(Box<dyn StdError + Send + Sync>),
}

impl EngineError {
    fn new(kind: ErrorKind, code: &'static str, message: impl Into<Box<str>>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            source: None,
        }
    }

    // ==================== 便捷构造 ====================

    /// 创建「无处理器」错误
    #[must_use]
    pub fn no_handlers() -> Self {
        Self::new(
            ErrorKind::Configuration,
            codes::NO_HANDLERS,
            "no handlers and no fallback are configured",
        )
    }

    /// 创建「指定事件无处理器」错误（严格模式下的分发失败）
    #[must_use]
    pub fn no_handlers_for(event_name: &str) -> Self {
        Self::new(
            ErrorKind::Configuration,
            codes::NO_HANDLERS,
            format!("no handlers registered for event: {event_name}"),
        )
    }

    /// 创建「处理器已启动」错误
    #[must_use]
    pub fn already_started() -> Self {
        Self::new(
            ErrorKind::Lifecycle,
            codes::PROCESSOR_ALREADY_STARTED,
            "processor has already been started",
        )
    }

    /// 创建「处理器未启动」错误
    #[must_use]
    pub fn not_started() -> Self {
        Self::new(
            ErrorKind::Lifecycle,
            codes::PROCESSOR_NOT_STARTED,
            "processor has not been started",
        )
    }

    /// 创建「未配置事件源」错误
    #[must_use]
    pub fn event_source_nil() -> Self {
        Self::new(
            ErrorKind::Configuration,
            codes::EVENT_SOURCE_NIL,
            "no event bus is configured",
        )
    }

    /// 创建「总线已关闭」错误
    #[must_use]
    pub fn bus_closed() -> Self {
        Self::new(ErrorKind::Transport, codes::BUS_CLOSED, "event bus is closed")
    }

    /// 创建「缓冲区已满」错误
    #[must_use]
    pub fn buffer_full() -> Self {
        Self::new(
            ErrorKind::Transport,
            codes::BUFFER_FULL,
            "event buffer is full",
        )
    }

    /// 创建「上下文取消」错误
    #[must_use]
    pub fn canceled() -> Self {
        Self::new(
            ErrorKind::Canceled,
            codes::CONTEXT_CANCELED,
            ErrorKind::Canceled.default_message(),
        )
    }

    /// 创建「停机超时」错误
    #[must_use]
    pub fn shutdown_timeout(deadline: Duration) -> Self {
        Self::new(
            ErrorKind::Lifecycle,
            codes::SHUTDOWN_TIMEOUT,
            format!("shutdown timeout exceeded after {deadline:?}, handlers still active"),
        )
    }

    /// 创建「处理器未运行」健康原因
    #[must_use]
    pub fn not_running() -> Self {
        Self::new(
            ErrorKind::Health,
            codes::PROCESSOR_NOT_RUNNING,
            "processor is not running",
        )
    }

    /// 创建「处理停滞」健康原因
    #[must_use]
    pub fn stale(idle: Duration) -> Self {
        Self::new(
            ErrorKind::Health,
            codes::PROCESSOR_STALE,
            format!("processor has had no activity for {idle:?}"),
        )
    }

    /// 创建「处理拥塞」健康原因
    #[must_use]
    pub fn stuck(active: u64) -> Self {
        Self::new(
            ErrorKind::Health,
            codes::PROCESSOR_STUCK,
            format!("processor has {active} handlers in flight"),
        )
    }

    /// 将具体健康原因包装为统一的健康检查失败错误
    #[must_use]
    pub fn healthcheck_failed(cause: EngineError) -> Self {
        Self {
            kind: ErrorKind::Health,
            code: codes::HEALTHCHECK_FAILED,
            message: format!("healthcheck failed: {cause}").into(),
            source: Some(Source::Engine(Box::new(cause))),
        }
    }

    /// 创建「同步分发失败」错误，聚合各处理器的失败
    #[must_use]
    pub fn handler_failures(failures: Vec<(String, anyhow::Error)>) -> Self {
        let detail = failures
            .iter()
            .map(|(name, err)| format!("{name}: {err:#}"))
            .collect::<Vec<_>>()
            .join("; ");
        Self::new(
            ErrorKind::Handler,
            codes::HANDLER_FAILED,
            format!("{} handler(s) failed: {detail}", failures.len()),
        )
    }

    /// 包装任意错误
    ///
    /// 保留原始错误的类型信息，可通过 [`EngineError::downcast_ref`] 取回。
    #[must_use]
    pub fn wrap<E: StdError + Send + Sync + 'static>(
        kind: ErrorKind,
        code: &'static str,
        error: E,
    ) -> Self {
        Self {
            kind,
            code,
            message: error.to_string().into(),
            source: Some(Source::Other(Box::new(error))),
        }
    }

    // ==================== 查询方法 ====================

    /// 获取错误分类
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取稳定错误码
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取同层原因（健康检查失败时为具体原因）
    #[must_use]
    pub fn cause(&self) -> Option<&EngineError> {
        match &self.source {
            Some(Source::Engine(e)) => Some(e),
            _ => None,
        }
    }

    /// 获取模型层错误引用（如果是从 EventError 转换而来）
    #[must_use]
    pub fn core_error(&self) -> Option<&EventError> {
        match &self.source {
            Some(Source::Core(e)) => Some(e),
            _ => None,
        }
    }

    /// 尝试向下转型为具体错误类型
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match &self.source {
            Some(Source::Core(e)) => e.downcast_ref(),
            Some(Source::Engine(e)) => e.downcast_ref(),
            Some(Source::Other(e)) => e.downcast_ref(),
            None => None,
        }
    }

    /// 检查错误是否匹配指定的分类和错误码
    #[must_use]
    pub fn matches(&self, kind: ErrorKind, code: &str) -> bool {
        self.kind == kind && self.code == code
    }
}

// ==================== Trait 实现 ====================

impl ErrorCode for EngineError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn code(&self) -> &str {
        self.code
    }

    fn is_retryable(&self) -> bool {
        // 缓冲区满是瞬时状态；总线关闭不可恢复
        self.kind.is_retryable() && self.code != codes::BUS_CLOSED
    }
}

impl fmt::Debug for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineError")
            .field("kind", &self.kind)
            .field("code", &self.code)
            .field("message", &self.message)
            .field("source", &self.source.as_ref().map(|_| "..."))
            .finish()
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for EngineError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.source {
            Some(Source::Core(e)) => Some(e),
            Some(Source::Engine(e)) => Some(e.as_ref()),
            Some(Source::Other(e)) => Some(e.as_ref()),
            None => None,
        }
    }
}

impl From<EventError> for EngineError {
    fn from(e: EventError) -> Self {
        // 保留 EventError 的稳定错误码
        let code = e.static_code();
        Self {
            kind: e.kind(),
            code,
            message: e.to_string().into(),
            source: Some(Source::Core(e)),
        }
    }
}

// ==================== Result 类型别名 ====================

/// 调度层统一 Result 类型
pub type EngineResult<T> = Result<T, EngineError>;

// ==================== 测试 ====================
