//! 同步分发器（SyncDispatcher）
//!
//! 与总线 + 调度引擎互换的第二种传输形态：没有队列、没有工作
//! 协程，所有匹配的处理器在调用方的任务内按注册顺序依次执行，
//! 失败聚合后一并返回给调用方。载荷以强类型值直通，不经过序列化。

use crate::error::{EngineError, EngineResult};
use crate::handler::{EventHandler, HandlerRegistry, RawPayload};
use crate::recover;
use bon::Builder;
use chrono::Utc;
use evbus_core::{Context, Event, EventPayload};
use std::sync::Arc;
use tracing::warn;

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::sync_dispatcher_builder::{IsUnset, SetRegistry, State as BuilderState};

/// 进程内同步分发器
///
/// # 示例
///
/// ```rust
/// use evbus_engine::handler::handler_fn;
/// use evbus_engine::sync_dispatcher::SyncDispatcher;
/// use evbus_core::{Context, EventPayload};
/// use serde::{Deserialize, Serialize};
/// use std::sync::Arc;
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct UserCreated {
///     user_id: String,
/// }
///
/// impl EventPayload for UserCreated {}
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let dispatcher = SyncDispatcher::builder().build();
/// dispatcher.register(Arc::new(handler_fn(|_ctx, payload: UserCreated| async move {
///     println!("user created: {}", payload.user_id);
///     Ok(())
/// })));
///
/// let payload = UserCreated { user_id: "u-1".into() };
/// dispatcher.dispatch(&Context::new(), &payload).await.unwrap();
/// # }
/// ```
#[derive(Builder)]
pub struct SyncDispatcher {
    fallback: Option<Arc<dyn EventHandler>>,
    #[builder(default, setters(vis = "pub(crate)"))]
    registry: HandlerRegistry,
    #[builder(default)]
    strict_handlers: bool,
}

impl<S: BuilderState> SyncDispatcherBuilder<S> {
    /// 以处理器列表装配注册表
    pub fn handlers(
        self,
        handlers: Vec<Arc<dyn EventHandler>>,
    ) -> SyncDispatcherBuilder<SetRegistry<S>>
    where
        <S as BuilderState>::Registry: IsUnset,
    {
        self.registry(HandlerRegistry::new(handlers))
    }
}

impl SyncDispatcher {
    /// 注册一个处理器（同名可重复注册，按注册顺序调用）
    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        self.registry.insert(handler);
    }

    /// 在调用方任务内分发一个载荷
    ///
    /// 所有匹配的处理器依次执行；单个处理器失败或恐慌不影响
    /// 后续处理器。存在失败时返回聚合错误，消息中逐一列出。
    pub async fn dispatch<P: EventPayload>(&self, ctx: &Context, payload: &P) -> EngineResult<()> {
        let event = Event::new(payload)?;

        let mut handlers = self.registry.matching(event.name());
        if handlers.is_empty() {
            match &self.fallback {
                Some(fallback) => handlers.push(fallback.clone()),
                None if self.strict_handlers => {
                    return Err(EngineError::no_handlers_for(event.name()));
                }
                None => {
                    warn!(event_name = event.name(), "no handlers registered for event, dropping");
                    return Ok(());
                }
            }
        }

        let ctx = ctx
            .clone()
            .with_event(&event)
            .with_processing_started_at(Utc::now());
        let raw = RawPayload::typed(payload.clone());

        let mut failures = Vec::new();
        for handler in handlers {
            if let Err(err) = recover::invoke_safely(handler.handle(&ctx, &raw)).await {
                failures.push((handler.name().to_string(), err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::handler_failures(failures))
        }
    }
}
