//! 事件处理器（EventHandler）与类型擦除包装
//!
//! 处理器对外是运行时多态接口：按名称路由、以无类型载荷调用；
//! 对内通过 [`TypedHandler`] / [`FnHandler`] 还原为强类型调用。
//! 载荷还原规则：
//! 1. 已是目标类型的值：直接透传；
//! 2. 序列化字节：反序列化为目标类型；
//! 3. 无类型 JSON 值（信封首次解码的产物）：重塑为目标类型；
//! 失败时返回带稳定错误码的类型化错误。

use async_trait::async_trait;
use dashmap::DashMap;
use evbus_core::{Context, EventError, EventPayload};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// 无类型载荷：处理器调用侧收到的三种形态
#[derive(Clone)]
pub enum RawPayload {
    /// 进程内直通的强类型值（同步分发路径）
    Typed {
        value: Arc<dyn Any + Send + Sync>,
        type_name: &'static str,
    },
    /// 序列化后的载荷字节
    Bytes(Vec<u8>),
    /// 信封首次解码得到的无类型 JSON 值
    Json(Value),
}

impl RawPayload {
    /// 包装一个进程内直通的强类型值
    pub fn typed<P: Send + Sync + 'static>(value: P) -> Self {
        Self::Typed {
            value: Arc::new(value),
            type_name: std::any::type_name::<P>(),
        }
    }

    /// 描述载荷的运行时形态（用于错误消息）
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Typed { type_name, .. } => type_name,
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

impl fmt::Debug for RawPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Typed { type_name, .. } => f.debug_tuple("Typed").field(type_name).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
        }
    }
}

/// 事件处理器：按名称订阅、消费无类型载荷
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器订阅的事件名称
    fn name(&self) -> &str;

    /// 处理一条事件
    async fn handle(&self, ctx: &Context, payload: &RawPayload) -> anyhow::Result<()>;
}

/// 强类型处理器：消费具体载荷类型的业务逻辑
#[async_trait]
pub trait PayloadHandler<P: EventPayload>: Send + Sync {
    async fn handle(&self, ctx: &Context, payload: P) -> anyhow::Result<()>;
}

/// 将无类型载荷还原为具体类型
fn reconstitute<P: EventPayload>(raw: &RawPayload) -> Result<P, EventError> {
    let expected = std::any::type_name::<P>();

    match raw {
        RawPayload::Typed { value, type_name } => value
            .downcast_ref::<P>()
            .cloned()
            .ok_or_else(|| EventError::unexpected_payload_shape(expected, type_name)),
        RawPayload::Bytes(bytes) => serde_json::from_slice(bytes)
            .map_err(|err| EventError::payload_unmarshal_failed(expected, err)),
        RawPayload::Json(value) => serde_json::from_value(value.clone())
            .map_err(|err| EventError::payload_unmarshal_failed(expected, err)),
    }
}

/// 类型擦除包装：将 [`PayloadHandler<P>`] 适配为 [`EventHandler`]
///
/// 两种构造路径：
/// - [`TypedHandler::new`]：名称从载荷类型推导；
/// - [`TypedHandler::named`]：名称由调用方显式指定。
pub struct TypedHandler<P, H> {
    name: String,
    inner: Arc<H>,
    _payload: PhantomData<fn(P)>,
}

impl<P, H> TypedHandler<P, H>
where
    P: EventPayload,
    H: PayloadHandler<P>,
{
    /// 名称从载荷类型推导
    pub fn new(inner: Arc<H>) -> Self {
        Self::named(P::event_name(), inner)
    }

    /// 名称由调用方显式指定
    pub fn named(name: impl Into<String>, inner: Arc<H>) -> Self {
        Self {
            name: name.into(),
            inner,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<P, H> EventHandler for TypedHandler<P, H>
where
    P: EventPayload,
    H: PayloadHandler<P> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &Context, payload: &RawPayload) -> anyhow::Result<()> {
        let payload = reconstitute::<P>(payload)?;
        self.inner.handle(ctx, payload).await
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type HandlerFn<P> = Arc<dyn Fn(Context, P) -> HandlerFuture + Send + Sync>;

/// 闭包形式的事件处理器
///
/// 由 [`handler_fn`] / [`named_handler_fn`] 构造。
pub struct FnHandler<P> {
    name: String,
    f: HandlerFn<P>,
}

/// 用异步闭包构造处理器，名称从载荷类型推导
///
/// # 示例
///
/// ```rust
/// use evbus_engine::handler::{handler_fn, EventHandler};
/// use evbus_core::event::EventPayload;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct UserCreated {
///     user_id: String,
/// }
///
/// impl EventPayload for UserCreated {}
///
/// let handler = handler_fn(|_ctx, payload: UserCreated| async move {
///     println!("user created: {}", payload.user_id);
///     Ok(())
/// });
/// assert_eq!(handler.name(), "UserCreated");
/// ```
pub fn handler_fn<P, F, Fut>(f: F) -> FnHandler<P>
where
    P: EventPayload,
    F: Fn(Context, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    named_handler_fn(P::event_name(), f)
}

/// 用异步闭包构造处理器，名称由调用方显式指定
pub fn named_handler_fn<P, F, Fut>(name: impl Into<String>, f: F) -> FnHandler<P>
where
    P: EventPayload,
    F: Fn(Context, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler {
        name: name.into(),
        f: Arc::new(move |ctx, payload| Box::pin(f(ctx, payload))),
    }
}

#[async_trait]
impl<P: EventPayload> EventHandler for FnHandler<P> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &Context, payload: &RawPayload) -> anyhow::Result<()> {
        let payload = reconstitute::<P>(payload)?;
        (self.f)(ctx.clone(), payload).await
    }
}

/// 处理器注册表：事件名称 → 按注册顺序排列的处理器列表
///
/// 允许同名重复注册（广播场景）。读取时整体拷出快照，
/// 调用处理器前即释放注册表锁。
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    by_name: DashMap<String, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub(crate) fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        let registry = Self::default();
        for handler in handlers {
            registry.insert(handler);
        }
        registry
    }

    pub(crate) fn insert(&self, handler: Arc<dyn EventHandler>) {
        self.by_name
            .entry(handler.name().to_string())
            .or_default()
            .push(handler);
    }

    pub(crate) fn matching(&self, event_name: &str) -> Vec<Arc<dyn EventHandler>> {
        self.by_name
            .get(event_name)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
