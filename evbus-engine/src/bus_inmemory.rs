//! 内存版事件总线（InMemoryBus）
//!
//! 基于 `tokio::sync::mpsc` 有界通道实现的阻塞式总线，满足
//! [`EventBus`](crate::bus::EventBus) 协议：
//! - `publish`：缓冲区满时阻塞，直到入队、总线关闭或上下文取消；
//! - `try_publish`：非阻塞投递，缓冲区满立即返回 `BUFFER_FULL`；
//! - `events`：所有流共享同一读取位点，关闭后排空剩余缓冲再结束；
//! - `close`：首次调用成功，之后返回 `BUS_CLOSED`。
//!
//! 发送端句柄由读写锁保护：发布方持读锁并行推进，关闭方持写锁
//! 摘除发送端。

use crate::bus::{EventSink, EventSource};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use evbus_core::Context;
use futures_core::stream::BoxStream;
use futures_util::stream;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock, mpsc};

/// 默认缓冲区容量
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// 有界阻塞式内存总线
///
/// # 示例
///
/// ```rust
/// use evbus_engine::bus::{EventSink, EventSource};
/// use evbus_engine::bus_inmemory::InMemoryBus;
/// use evbus_core::Context;
/// use futures_util::StreamExt;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = InMemoryBus::new(8);
/// let ctx = Context::new();
///
/// bus.publish(&ctx, b"hello".to_vec()).await.unwrap();
///
/// let mut events = bus.events().await;
/// assert_eq!(events.next().await, Some(b"hello".to_vec()));
/// # }
/// ```
pub struct InMemoryBus {
    tx: RwLock<Option<mpsc::Sender<Vec<u8>>>>,
    rx: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    buffer_size: usize,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl InMemoryBus {
    /// 创建一个内存总线，`buffer_size` 为缓冲区容量
    ///
    /// 传入 0 时回退为默认容量。
    pub fn new(buffer_size: usize) -> Self {
        let buffer_size = if buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            buffer_size
        };
        let (tx, rx) = mpsc::channel(buffer_size);

        Self {
            tx: RwLock::new(Some(tx)),
            rx: Arc::new(Mutex::new(rx)),
            buffer_size,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// 非阻塞投递
    ///
    /// 缓冲区满立即返回 `BUFFER_FULL`，总线关闭返回 `BUS_CLOSED`。
    pub async fn try_publish(&self, bytes: Vec<u8>) -> EngineResult<()> {
        let tx = self.tx.read().await.clone();
        let Some(tx) = tx else {
            return Err(EngineError::bus_closed());
        };

        match tx.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EngineError::buffer_full()),
            Err(TrySendError::Closed(_)) => Err(EngineError::bus_closed()),
        }
    }

    /// 关闭总线
    ///
    /// 首次调用摘除发送端并返回成功；之后的调用返回 `BUS_CLOSED`。
    /// 事件流在排空已缓冲的事件后结束。
    pub async fn close(&self) -> EngineResult<()> {
        let mut guard = self.tx.write().await;
        match guard.take() {
            Some(_) => {
                tracing::debug!("event bus closed");
                Ok(())
            }
            None => Err(EngineError::bus_closed()),
        }
    }
}

#[async_trait]
impl EventSink for InMemoryBus {
    async fn publish(&self, ctx: &Context, bytes: Vec<u8>) -> EngineResult<()> {
        if ctx.is_cancelled() {
            return Err(EngineError::canceled());
        }

        // 持读锁仅为克隆发送端，发布方之间互不阻塞
        let tx = self.tx.read().await.clone();
        let Some(tx) = tx else {
            return Err(EngineError::bus_closed());
        };

        tokio::select! {
            res = tx.send(bytes) => res.map_err(|_| EngineError::bus_closed()),
            _ = ctx.cancelled() => Err(EngineError::canceled()),
        }
    }
}

#[async_trait]
impl EventSource for InMemoryBus {
    async fn events(&self) -> BoxStream<'static, Vec<u8>> {
        let rx = Arc::clone(&self.rx);
        Box::pin(stream::unfold(rx, |rx| async move {
            let item = rx.lock().await.recv().await;
            item.map(|bytes| (bytes, rx))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evbus_core::error::{ErrorKind, codes};
    use futures_util::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_then_read_is_fifo() {
        let bus = InMemoryBus::new(8);
        let ctx = Context::new();

        bus.publish(&ctx, b"a".to_vec()).await.unwrap();
        bus.publish(&ctx, b"b".to_vec()).await.unwrap();
        bus.publish(&ctx, b"c".to_vec()).await.unwrap();

        let mut events = bus.events().await;
        assert_eq!(events.next().await, Some(b"a".to_vec()));
        assert_eq!(events.next().await, Some(b"b".to_vec()));
        assert_eq!(events.next().await, Some(b"c".to_vec()));
    }

    #[tokio::test]
    async fn zero_buffer_size_falls_back_to_default() {
        let bus = InMemoryBus::new(0);
        assert_eq!(bus.buffer_size(), DEFAULT_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn publish_blocks_until_slot_frees() {
        let bus = Arc::new(InMemoryBus::new(1));
        let ctx = Context::new();

        bus.publish(&ctx, b"first".to_vec()).await.unwrap();

        // 缓冲区已满，第二次发布应阻塞
        let blocked = {
            let bus = Arc::clone(&bus);
            let ctx = ctx.clone();
            tokio::spawn(async move { bus.publish(&ctx, b"second".to_vec()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        // 消费一条后阻塞的发布完成
        let mut events = bus.events().await;
        assert_eq!(events.next().await, Some(b"first".to_vec()));
        blocked.await.unwrap().unwrap();
        assert_eq!(events.next().await, Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn publish_on_cancelled_context_returns_canceled() {
        let bus = InMemoryBus::new(1);
        let ctx = Context::new();
        bus.publish(&ctx, b"fill".to_vec()).await.unwrap();

        let cancelled = Context::new();
        cancelled.cancel();
        let err = bus.publish(&cancelled, b"late".to_vec()).await.unwrap_err();
        assert!(err.matches(ErrorKind::Canceled, codes::CONTEXT_CANCELED));
    }

    #[tokio::test]
    async fn cancellation_interrupts_blocked_publish() {
        let bus = Arc::new(InMemoryBus::new(1));
        let ctx = Context::new();
        bus.publish(&ctx, b"fill".to_vec()).await.unwrap();

        let waiter = Context::new();
        let blocked = {
            let bus = Arc::clone(&bus);
            let ctx = waiter.clone();
            tokio::spawn(async move { bus.publish(&ctx, b"late".to_vec()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.cancel();

        let err = blocked.await.unwrap().unwrap_err();
        assert!(err.matches(ErrorKind::Canceled, codes::CONTEXT_CANCELED));
    }

    #[tokio::test]
    async fn publish_after_close_fails() {
        let bus = InMemoryBus::new(8);
        bus.close().await.unwrap();

        let err = bus.publish(&Context::new(), b"x".to_vec()).await.unwrap_err();
        assert!(err.matches(ErrorKind::Transport, codes::BUS_CLOSED));
    }

    #[tokio::test]
    async fn close_is_idempotent_but_reports_after_first() {
        let bus = InMemoryBus::new(8);
        assert!(bus.close().await.is_ok());

        let err = bus.close().await.unwrap_err();
        assert!(err.matches(ErrorKind::Transport, codes::BUS_CLOSED));
    }

    #[tokio::test]
    async fn stream_drains_buffer_then_ends_after_close() {
        let bus = InMemoryBus::new(8);
        let ctx = Context::new();

        bus.publish(&ctx, b"a".to_vec()).await.unwrap();
        bus.publish(&ctx, b"b".to_vec()).await.unwrap();
        bus.close().await.unwrap();

        let mut events = bus.events().await;
        assert_eq!(events.next().await, Some(b"a".to_vec()));
        assert_eq!(events.next().await, Some(b"b".to_vec()));
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn streams_share_a_single_position() {
        let bus = InMemoryBus::new(8);
        let ctx = Context::new();

        bus.publish(&ctx, b"a".to_vec()).await.unwrap();
        bus.publish(&ctx, b"b".to_vec()).await.unwrap();

        let mut first = bus.events().await;
        let mut second = bus.events().await;

        // 两个流竞争同一个位点，事件只被取走一次
        let x = first.next().await.unwrap();
        let y = second.next().await.unwrap();
        assert_ne!(x, y);
    }

    #[tokio::test]
    async fn try_publish_reports_full_buffer() {
        let bus = InMemoryBus::new(1);
        bus.try_publish(b"fill".to_vec()).await.unwrap();

        let err = bus.try_publish(b"overflow".to_vec()).await.unwrap_err();
        assert!(err.matches(ErrorKind::Transport, codes::BUFFER_FULL));
    }

    #[tokio::test]
    async fn try_publish_after_close_fails() {
        let bus = InMemoryBus::new(1);
        bus.close().await.unwrap();

        let err = bus.try_publish(b"late".to_vec()).await.unwrap_err();
        assert!(err.matches(ErrorKind::Transport, codes::BUS_CLOSED));
    }

    #[tokio::test]
    async fn concurrent_publishers_are_all_delivered() {
        let bus = Arc::new(InMemoryBus::new(4));
        let mut tasks = Vec::new();

        for i in 0..20u8 {
            let bus = Arc::clone(&bus);
            tasks.push(tokio::spawn(async move {
                bus.publish(&Context::new(), vec![i]).await
            }));
        }

        let mut events = bus.events().await;
        let mut seen = Vec::new();
        for _ in 0..20 {
            seen.push(events.next().await.unwrap()[0]);
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }
}
