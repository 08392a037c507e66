//! # 事件系统统一错误定义
//!
//! 提供一套贯穿模型层与调度层的错误处理机制：
//!
//! - **错误分类**：通过 [`ErrorKind`] 枚举对错误进行语义分类；
//! - **统一错误协议**：通过 [`ErrorCode`] trait 定义错误的标准接口；
//! - **模型层错误**：[`EventError`] 作为事件模型层的标准错误类型；
//! - **稳定错误码**：[`codes`] 模块导出全部公共错误码常量，
//!   调用方与测试通过 `matches(kind, code)` 做精确比对，而非字符串匹配消息。
//!
//! ## 快速开始
//!
//! ```rust
//! use evbus_core::error::{EventError, ErrorKind, codes};
//!
//! let err = EventError::canceled();
//! assert!(err.matches(ErrorKind::Canceled, codes::CONTEXT_CANCELED));
//! ```

use std::error::Error as StdError;
use std::fmt;

// ==================== 稳定错误码 ====================

/// 公共错误码常量
///
/// 这些字符串是对外契约的一部分：一经发布不可变更。
pub mod codes {
    /// 事件到达时既无注册处理器也无兜底处理器（严格模式）
    pub const NO_HANDLERS: &str = "NO_HANDLERS";
    /// 同一处理器实例被二次启动
    pub const PROCESSOR_ALREADY_STARTED: &str = "PROCESSOR_ALREADY_STARTED";
    /// 启动前调用了停止等生命周期操作
    pub const PROCESSOR_NOT_STARTED: &str = "PROCESSOR_NOT_STARTED";
    /// 启动时未配置事件总线
    pub const EVENT_SOURCE_NIL: &str = "EVENT_SOURCE_NIL";
    /// 健康检查失败的统一外层错误码
    pub const HEALTHCHECK_FAILED: &str = "HEALTHCHECK_FAILED";
    /// 健康检查失败原因：处理器未运行
    pub const PROCESSOR_NOT_RUNNING: &str = "PROCESSOR_NOT_RUNNING";
    /// 健康检查失败原因：长时间无处理活动
    pub const PROCESSOR_STALE: &str = "PROCESSOR_STALE";
    /// 健康检查失败原因：在途处理数量过多
    pub const PROCESSOR_STUCK: &str = "PROCESSOR_STUCK";
    /// 总线已关闭（关闭后发布，或重复关闭）
    pub const BUS_CLOSED: &str = "BUS_CLOSED";
    /// 非阻塞投递遇到缓冲区已满
    pub const BUFFER_FULL: &str = "BUFFER_FULL";
    /// 阻塞操作因上下文取消而放弃
    pub const CONTEXT_CANCELED: &str = "CONTEXT_CANCELED";
    /// 停机等待超过截止时间仍有在途处理
    pub const SHUTDOWN_TIMEOUT: &str = "SHUTDOWN_TIMEOUT";
    /// 事件信封字节无法解码
    pub const ENVELOPE_DECODE_FAILED: &str = "ENVELOPE_DECODE_FAILED";
    /// 载荷无法反序列化为处理器期望的类型
    pub const PAYLOAD_UNMARSHAL_FAILED: &str = "PAYLOAD_UNMARSHAL_FAILED";
    /// 载荷形态不在可接受范围内
    pub const UNEXPECTED_PAYLOAD_SHAPE: &str = "UNEXPECTED_PAYLOAD_SHAPE";
    /// 事件无法序列化
    pub const SERIALIZATION_FAILED: &str = "SERIALIZATION_FAILED";
    /// 同步分发中一个或多个处理器执行失败
    pub const HANDLER_FAILED: &str = "HANDLER_FAILED";
}

// ==================== 错误分类 ====================

/// 错误分类枚举
///
/// 用于统一处理错误、决定是否重试等。各分类与错误来源的对应关系：
///
/// | ErrorKind      | 典型来源                         |
/// |----------------|----------------------------------|
/// | Configuration  | 缺少总线、无处理器等装配问题     |
/// | Lifecycle      | 重复启动、未启动即停止、停机超时 |
/// | Transport      | 总线关闭、缓冲区满               |
/// | Dispatch       | 信封/载荷解码失败、形态不符      |
/// | Handler        | 用户处理器返回的业务错误         |
/// | Health         | 健康检查失败及其原因             |
/// | Canceled       | 上下文取消                       |
/// | Internal       | 序列化等基础设施错误             |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 装配/配置错误（如：未配置总线、无处理器）
    Configuration,
    /// 生命周期错误（如：重复启动、未启动即停止）
    Lifecycle,
    /// 传输层错误（如：总线关闭、缓冲区满）
    Transport,
    /// 分发错误（如：信封解码失败、载荷形态不符）
    Dispatch,
    /// 用户处理器执行失败
    Handler,
    /// 健康检查失败
    Health,
    /// 上下文取消
    Canceled,
    /// 内部错误（序列化等基础设施错误）
    Internal,
}

impl ErrorKind {
    /// 获取默认错误码
    #[must_use]
    pub const fn default_code(self) -> &'static str {
        match self {
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::Lifecycle => "LIFECYCLE_ERROR",
            Self::Transport => "TRANSPORT_ERROR",
            Self::Dispatch => "DISPATCH_ERROR",
            Self::Handler => "HANDLER_ERROR",
            Self::Health => "HEALTH_ERROR",
            Self::Canceled => "CONTEXT_CANCELED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// 是否可重试
    ///
    /// 目前仅传输层错误视为可重试（缓冲区满属于瞬时状态）。
    /// 注意调度层会对「总线已关闭」单独排除，见 `EngineError`。
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transport)
    }

    /// 获取默认错误消息
    ///
    /// 当 [`EventError`] 没有具体消息时，使用此默认消息。
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::Configuration => "the component is not configured correctly",
            Self::Lifecycle => "the operation is not allowed in the current lifecycle state",
            Self::Transport => "the event transport rejected the operation",
            Self::Dispatch => "the event could not be dispatched",
            Self::Handler => "an event handler failed",
            Self::Health => "the healthcheck did not pass",
            Self::Canceled => "the operation was canceled by its context",
            Self::Internal => "an internal error occurred",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.default_message())
    }
}

// ==================== 错误协议 ====================

/// 错误协议 trait
///
/// 所有错误类型实现此 trait，即可：
/// - 获取错误分类（[`ErrorCode::kind`]）
/// - 获取稳定错误码（[`ErrorCode::code`]）
/// - 判断是否可重试（[`ErrorCode::is_retryable`]）
pub trait ErrorCode: StdError + Send + Sync + 'static {
    /// 返回错误分类
    fn kind(&self) -> ErrorKind;

    /// 返回错误码（默认使用 [`ErrorKind::default_code`]）
    fn code(&self) -> &str {
        self.kind().default_code()
    }

    /// 是否可重试（默认使用 [`ErrorKind::is_retryable`]）
    fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

// ==================== EventError ====================

/// 事件模型层统一错误类型
///
/// 借鉴 [`std::io::Error`] 的设计，提供：
/// - 简单错误（只有分类）
/// - 带消息的错误
/// - 包装底层错误（保留类型信息）
///
/// # 示例
///
/// ```rust
/// use evbus_core::error::{EventError, ErrorKind, codes};
///
/// let err = EventError::unexpected_payload_shape("UserCreated", "alloc::string::String");
/// assert_eq!(err.kind(), ErrorKind::Dispatch);
/// assert_eq!(err.static_code(), codes::UNEXPECTED_PAYLOAD_SHAPE);
/// ```
pub struct EventError {
    kind: ErrorKind,
    code: Option<&'static str>,
    repr: Repr,
}

enum Repr {
    /// 简单错误：只有分类
    Simple,
    /// 带消息的错误
    Message(Box<str>),
    /// 包装底层错误
    Custom(Box<dyn StdError + Send + Sync>),
}

impl EventError {
    // ==================== 基础构造 ====================

    /// 从分类创建简单错误
    #[must_use]
    pub const fn from_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            code: None,
            repr: Repr::Simple,
        }
    }

    /// 创建带消息的错误
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<Box<str>>) -> Self {
        Self {
            kind,
            code: None,
            repr: Repr::Message(message.into()),
        }
    }

    /// 包装底层错误
    ///
    /// 保留原始错误的类型信息，可通过 [`EventError::downcast_ref`] 取回。
    #[must_use]
    pub fn custom<E>(kind: ErrorKind, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            kind,
            code: None,
            repr: Repr::Custom(Box::new(error)),
        }
    }

    /// 设置稳定错误码
    #[must_use]
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    // ==================== 便捷构造 ====================

    /// 创建「序列化失败」错误
    #[must_use]
    pub fn serialization_failed(err: serde_json::Error) -> Self {
        Self::custom(ErrorKind::Internal, err).with_code(codes::SERIALIZATION_FAILED)
    }

    /// 创建「信封解码失败」错误
    #[must_use]
    pub fn envelope_decode_failed(err: serde_json::Error) -> Self {
        Self::custom(ErrorKind::Dispatch, err).with_code(codes::ENVELOPE_DECODE_FAILED)
    }

    /// 创建「载荷反序列化失败」错误
    ///
    /// `expected` 为处理器期望的具体载荷类型名。
    #[must_use]
    pub fn payload_unmarshal_failed(expected: &str, err: serde_json::Error) -> Self {
        Self::new(
            ErrorKind::Dispatch,
            format!("failed to unmarshal payload into {expected}: {err}"),
        )
        .with_code(codes::PAYLOAD_UNMARSHAL_FAILED)
    }

    /// 创建「载荷形态不符」错误
    ///
    /// `found` 为实际收到的运行时形态描述。
    #[must_use]
    pub fn unexpected_payload_shape(expected: &str, found: &str) -> Self {
        Self::new(
            ErrorKind::Dispatch,
            format!("unexpected payload shape: expected={expected}, found={found}"),
        )
        .with_code(codes::UNEXPECTED_PAYLOAD_SHAPE)
    }

    /// 创建「上下文取消」错误
    #[must_use]
    pub fn canceled() -> Self {
        Self::from_kind(ErrorKind::Canceled).with_code(codes::CONTEXT_CANCELED)
    }

    // ==================== 查询方法 ====================

    /// 获取错误分类
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 尝试向下转型为具体错误类型
    ///
    /// 仅当错误是通过 [`EventError::custom`] 创建时有效。
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match &self.repr {
            Repr::Custom(error) => error.downcast_ref(),
            _ => None,
        }
    }

    /// 获取内部错误引用
    #[must_use]
    pub fn get_ref(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match &self.repr {
            Repr::Custom(error) => Some(error.as_ref()),
            _ => None,
        }
    }

    /// 获取静态生命周期的错误码
    #[must_use]
    pub fn static_code(&self) -> &'static str {
        self.code.unwrap_or_else(|| self.kind.default_code())
    }

    /// 检查错误是否匹配指定的分类和错误码
    ///
    /// 用于测试和条件判断。
    ///
    /// # 示例
    ///
    /// ```rust
    /// use evbus_core::error::{EventError, ErrorKind, codes};
    ///
    /// let err = EventError::canceled();
    /// assert!(err.matches(ErrorKind::Canceled, codes::CONTEXT_CANCELED));
    /// assert!(!err.matches(ErrorKind::Internal, codes::CONTEXT_CANCELED));
    /// ```
    #[must_use]
    pub fn matches(&self, kind: ErrorKind, code: &str) -> bool {
        self.kind == kind && self.static_code() == code
    }
}

// ==================== Trait 实现 ====================

impl ErrorCode for EventError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn code(&self) -> &str {
        self.static_code()
    }
}

impl fmt::Debug for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("EventError");
        d.field("kind", &self.kind);
        if let Some(code) = self.code {
            d.field("code", &code);
        }
        match &self.repr {
            Repr::Simple => {
                d.field("message", &self.kind.default_message());
            }
            Repr::Message(msg) => {
                d.field("message", msg);
            }
            Repr::Custom(err) => {
                d.field("source", err);
            }
        }
        d.finish()
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Simple => write!(f, "{}", self.kind.default_message()),
            Repr::Message(msg) => write!(f, "{msg}"),
            Repr::Custom(err) => write!(f, "{err}"),
        }
    }
}

impl StdError for EventError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.repr {
            Repr::Custom(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<ErrorKind> for EventError {
    fn from(kind: ErrorKind) -> Self {
        Self::from_kind(kind)
    }
}

// ==================== 常用类型转换 ====================

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        Self::custom(ErrorKind::Internal, err).with_code(codes::SERIALIZATION_FAILED)
    }
}

impl From<uuid::Error> for EventError {
    fn from(err: uuid::Error) -> Self {
        Self::custom(ErrorKind::Internal, err).with_code("INVALID_UUID")
    }
}

impl From<chrono::ParseError> for EventError {
    fn from(err: chrono::ParseError) -> Self {
        Self::custom(ErrorKind::Internal, err).with_code("PARSE_DATE_ERROR")
    }
}

impl From<anyhow::Error> for EventError {
    fn from(err: anyhow::Error) -> Self {
        // 使用 {:#} 格式保留完整错误链
        Self::new(ErrorKind::Handler, format!("{err:#}"))
    }
}

// ==================== Result 类型别名 ====================

/// 事件模型层统一 Result 类型
pub type EventResult<T> = Result<T, EventError>;

// ==================== 测试 ====================
