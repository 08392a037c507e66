//! 事件发布者（Publisher）
//!
//! 无状态客户端：构造事件信封、序列化、写入总线。
//! 成功记 debug 日志，序列化或总线失败记 error 日志并原样上抛。

use crate::bus::EventSink;
use crate::error::EngineResult;
use evbus_core::{Context, Event, EventPayload};
use std::sync::Arc;
use tracing::{debug, error};

/// 事件发布者
///
/// 可安全地在并发环境中共享与克隆。
#[derive(Clone)]
pub struct Publisher {
    sink: Arc<dyn EventSink>,
}

impl Publisher {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// 发布一个载荷
    ///
    /// 事件名称从载荷类型推导；缓冲区满时跟随总线的阻塞语义，
    /// 由调用方上下文决定放弃时机。
    pub async fn publish<P: EventPayload>(&self, ctx: &Context, payload: &P) -> EngineResult<()> {
        let event = Event::new(payload).map_err(|err| {
            error!(event_name = P::event_name(), error = %err, "failed to build event");
            err
        })?;
        let bytes = event.to_bytes().map_err(|err| {
            error!(event_id = event.id(), error = %err, "failed to serialize event");
            err
        })?;

        match self.sink.publish(ctx, bytes).await {
            Ok(()) => {
                debug!(event_id = event.id(), event_name = event.name(), "event published");
                Ok(())
            }
            Err(err) => {
                error!(
                    event_id = event.id(),
                    event_name = event.name(),
                    error = %err,
                    "failed to publish event"
                );
                Err(err)
            }
        }
    }
}
