/// 进程内事件分发示例
/// 展示 Publisher -> InMemoryBus -> Processor 的闭环：广播、兜底处理与优雅停机
use anyhow::Result as AnyResult;
use evbus_core::{Context, EventPayload};
use evbus_engine::bus_inmemory::InMemoryBus;
use evbus_engine::decorator::{apply, retry, timeout};
use evbus_engine::handler::{EventHandler, handler_fn, named_handler_fn};
use evbus_engine::processor::{Processor, ProcessorConfig};
use evbus_engine::publisher::Publisher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// 示例载荷
// ============================================================================

#[derive(Clone, Serialize, Deserialize, Debug)]
struct UserCreated {
    user_id: String,
    email: String,
}

impl EventPayload for UserCreated {}

#[derive(Clone, Serialize, Deserialize, Debug)]
struct OrderPlaced {
    order_id: String,
    amount: i64,
}

impl EventPayload for OrderPlaced {}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter("evbus_engine=debug")
        .init();

    println!("=== 进程内事件分发示例 ===\n");

    // Bus & Publisher
    let bus = Arc::new(InMemoryBus::new(64));
    let publisher = Publisher::new(bus.clone());

    // Handlers：同一事件广播给两个处理器，其中一个带重试与超时装饰
    let welcome: Arc<dyn EventHandler> = Arc::new(handler_fn(
        |_ctx, payload: UserCreated| async move {
            println!("send welcome mail to {}", payload.email);
            Ok(())
        },
    ));
    let audit: Arc<dyn EventHandler> = apply(
        Arc::new(handler_fn(|ctx: Context, payload: UserCreated| async move {
            println!(
                "audit event_id={:?} user={}",
                ctx.event_id(),
                payload.user_id
            );
            Ok(())
        })),
        &[retry(2), timeout(Duration::from_secs(1))],
    );
    let catch_all: Arc<dyn EventHandler> = Arc::new(named_handler_fn(
        "catch_all",
        |ctx: Context, payload: serde_json::Value| async move {
            println!("unrouted event {:?}: {payload}", ctx.event_name());
            Ok(())
        },
    ));

    // Processor
    let processor = Arc::new(
        Processor::builder()
            .bus(bus.clone())
            .handlers(vec![welcome, audit])
            .fallback(catch_all)
            .config(ProcessorConfig {
                workers: 2,
                max_concurrent_handlers: 8,
                ..Default::default()
            })
            .build(),
    );

    let run = tokio::spawn(Arc::clone(&processor).start(Context::new()));
    println!("✅ 处理器已启动");

    let ctx = Context::new();
    publisher
        .publish(
            &ctx,
            &UserCreated {
                user_id: "u-1".into(),
                email: "a@x".into(),
            },
        )
        .await?;
    // 没有注册处理器的事件，走兜底
    publisher
        .publish(
            &ctx,
            &OrderPlaced {
                order_id: "o-1".into(),
                amount: 42,
            },
        )
        .await?;
    println!("✅ 已发布: UserCreated, OrderPlaced");

    tokio::time::sleep(Duration::from_millis(500)).await;
    let stats = processor.stats();
    println!(
        "stats: processed={} failed={} active={}",
        stats.processed, stats.failed, stats.active
    );

    processor.stop().await?;
    run.await??;
    println!("\n✅ 优雅关闭完成");
    Ok(())
}
