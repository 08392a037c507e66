//! 事件总线（EventBus）协议
//!
//! 定义事件发布与订阅的统一抽象。发布侧与消费侧分别面向
//! [`EventSink`] 与 [`EventSource`]，二者的组合即 [`EventBus`]。
//! 任何满足同一契约的传输实现（内存队列、外部消息系统等）
//! 都可以替换接入，处理器无需感知。

use crate::error::EngineResult;
use async_trait::async_trait;
use evbus_core::Context;
use futures_core::stream::BoxStream;

/// 事件写入端：接收序列化后的事件字节
#[async_trait]
pub trait EventSink: Send + Sync {
    /// 发布一条事件字节
    ///
    /// 缓冲区满时阻塞等待，直到入队成功、总线关闭或上下文取消。
    async fn publish(&self, ctx: &Context, bytes: Vec<u8>) -> EngineResult<()>;
}

/// 事件读取端：暴露可观察的事件字节流
#[async_trait]
pub trait EventSource: Send + Sync {
    /// 返回一个 `'static` 生命周期的事件流，便于在 tokio::spawn 中使用
    ///
    /// 同一总线上所有流共享同一个读取位点：每条事件只会被
    /// 其中一个消费者取走；总线关闭且缓冲排空后流结束。
    async fn events(&self) -> BoxStream<'static, Vec<u8>>;
}

/// 完整总线：可写可读
pub trait EventBus: EventSink + EventSource {}

impl<T: EventSink + EventSource> EventBus for T {}
