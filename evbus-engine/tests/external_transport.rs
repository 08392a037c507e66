//! 以广播通道模拟外部传输：只要满足总线协议，处理器无需感知
//! 具体实现即可工作。

use async_trait::async_trait;
use evbus_core::{Context, EventPayload};
use evbus_engine::bus::{EventSink, EventSource};
use evbus_engine::error::{EngineError, EngineResult};
use evbus_engine::handler::{EventHandler, handler_fn};
use evbus_engine::processor::Processor;
use evbus_engine::publisher::Publisher;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Clone, Serialize, Deserialize)]
struct UserCreated {
    user_id: String,
}

impl EventPayload for UserCreated {}

struct BroadcastBus {
    tx: broadcast::Sender<Vec<u8>>,
}

impl BroadcastBus {
    fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }
}

#[async_trait]
impl EventSink for BroadcastBus {
    async fn publish(&self, _ctx: &Context, bytes: Vec<u8>) -> EngineResult<()> {
        self.tx
            .send(bytes)
            .map(|_| ())
            .map_err(|_| EngineError::bus_closed())
    }
}

#[async_trait]
impl EventSource for BroadcastBus {
    async fn events(&self) -> BoxStream<'static, Vec<u8>> {
        let rx = self.tx.subscribe();
        Box::pin(BroadcastStream::new(rx).filter_map(|item| async move { item.ok() }))
    }
}

async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(deadline, async {
        loop {
            if cond() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test(flavor = "multi_thread")]
async fn processor_runs_on_a_foreign_transport() {
    let bus = Arc::new(BroadcastBus::new(64));
    let hits = Arc::new(AtomicUsize::new(0));
    let handler: Arc<dyn EventHandler> = {
        let hits = hits.clone();
        Arc::new(handler_fn(move |_ctx, _payload: UserCreated| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
    };
    let processor = Arc::new(
        Processor::builder()
            .bus(bus.clone())
            .handlers(vec![handler])
            .build(),
    );

    let run = tokio::spawn(Arc::clone(&processor).start(Context::new()));

    // 广播通道只投递订阅之后的事件，等工作协程完成订阅
    let tx = bus.tx.clone();
    assert!(wait_until(Duration::from_secs(2), || tx.receiver_count() == 1).await);

    let publisher = Publisher::new(bus.clone());
    for i in 0..5 {
        publisher
            .publish(
                &Context::new(),
                &UserCreated {
                    user_id: format!("u-{i}"),
                },
            )
            .await
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || processor.stats().processed == 5).await);
    assert_eq!(hits.load(Ordering::SeqCst), 5);

    processor.stop().await.unwrap();
    run.await.unwrap().unwrap();
}
