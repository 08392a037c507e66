//! 事件处理器调度引擎（Processor）
//!
//! 统一编排「读取 → 路由 → 并发执行」的长驻任务：
//! - 固定数量的工作协程从总线读取序列化事件；
//! - 每个（事件 × 处理器）组合派生一个独立任务，慢处理器不会
//!   阻塞工作协程的下一次读取；
//! - 计数信号量约束全局处理并发上限；
//! - 处理器恐慌被隔离为普通失败，进程与工作协程继续运行；
//! - 原子计数器支撑无锁的统计快照与健康检查；
//! - 生命周期一次性：Idle → Running → Stopped，不允许重新启动。

use crate::bus::{EventBus, EventSink, EventSource};
use crate::error::{EngineError, EngineResult};
use crate::handler::{EventHandler, HandlerRegistry, RawPayload};
use crate::recover;
use bon::Builder;
use chrono::{DateTime, Utc};
use evbus_core::error::{ErrorKind, codes};
use evbus_core::{Context, Event, EventPayload};
use futures_util::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::processor_builder::{IsUnset, SetRegistry, State as BuilderState};

/// 处理失败时回调的用户钩子
pub type ErrorCallback = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// 调度引擎配置
#[derive(Clone, Copy, Debug)]
pub struct ProcessorConfig {
    /// 工作协程数量（0 视为 1）
    pub workers: usize,
    /// 全局处理并发上限（0 表示不限制）
    pub max_concurrent_handlers: usize,
    /// 停机时等待在途处理的截止时长
    pub shutdown_timeout: Duration,
    /// 健康检查：超过该时长无处理活动视为停滞
    pub stale_threshold: Duration,
    /// 健康检查：在途处理数量达到该值视为拥塞
    pub stuck_threshold: u64,
    /// 严格模式：无处理器的事件计为失败并触发错误回调
    pub strict_handlers: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_concurrent_handlers: 0,
            shutdown_timeout: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(300),
            stuck_threshold: 1000,
            strict_handlers: false,
        }
    }
}

/// 统计快照
///
/// 各字段来自独立的原子读取：单字段不会撕裂，但多字段之间
/// 不构成同一时刻的一致切面。
#[derive(Clone, Copy, Debug)]
pub struct Stats {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub processed: u64,
    pub failed: u64,
    pub active: u64,
}

/// 事件处理器调度引擎
///
/// 通过 builder 装配总线、处理器、兜底处理器与错误回调；
/// `start` 阻塞运行直到上下文取消、总线关闭或 `stop` 被调用。
#[derive(Builder)]
pub struct Processor {
    bus: Option<Arc<dyn EventBus>>,
    fallback: Option<Arc<dyn EventHandler>>,
    error_callback: Option<ErrorCallback>,
    #[builder(default, setters(vis = "pub(crate)"))]
    registry: HandlerRegistry,
    #[builder(default)]
    config: ProcessorConfig,
    #[builder(skip)]
    state: ProcessorState,
}

impl<S: BuilderState> ProcessorBuilder<S> {
    /// 以处理器列表装配注册表
    pub fn handlers(
        self,
        handlers: Vec<Arc<dyn EventHandler>>,
    ) -> ProcessorBuilder<SetRegistry<S>>
    where
        <S as BuilderState>::Registry: IsUnset,
    {
        self.registry(HandlerRegistry::new(handlers))
    }
}

#[derive(Default)]
struct ProcessorState {
    /// 是否曾经启动（一次性，不随停止复位）
    started: AtomicBool,
    running: AtomicBool,
    started_at_ms: AtomicI64,
    last_activity_ms: AtomicI64,
    processed: AtomicU64,
    failed: AtomicU64,
    active: AtomicU64,
    lifecycle: Mutex<Option<Shutdown>>,
}

struct Shutdown {
    token: CancellationToken,
    tracker: TaskTracker,
}

/// 工作协程共享的运行时句柄
#[derive(Clone)]
struct Runtime {
    bus: Arc<dyn EventBus>,
    token: CancellationToken,
    tracker: TaskTracker,
    semaphore: Option<Arc<Semaphore>>,
}

impl Processor {
    /// 注册一个处理器
    ///
    /// 同一名称可注册多个处理器（广播），按注册顺序调用。
    ///
    /// # Panics
    ///
    /// 处理器一旦启动过即不允许再注册，违反时直接 panic——
    /// 这是装配期的编程错误，不作为可恢复错误返回。
    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        if self.state.started.load(Ordering::SeqCst) {
            panic!("cannot register handlers after the processor has started");
        }
        self.registry.insert(handler);
    }

    /// 启动并阻塞运行，直到上下文取消、总线关闭或 `stop` 被调用
    ///
    /// 返回值：
    /// - 上下文取消：`CONTEXT_CANCELED`；
    /// - 总线关闭或外部 `stop`：`Ok(())`；
    /// - 装配错误：`EVENT_SOURCE_NIL` / `NO_HANDLERS`；
    /// - 同一实例二次启动：`PROCESSOR_ALREADY_STARTED`。
    pub async fn start(self: Arc<Self>, ctx: Context) -> EngineResult<()> {
        let Some(bus) = self.bus.clone() else {
            return Err(EngineError::event_source_nil());
        };
        if self.registry.is_empty() && self.fallback.is_none() {
            return Err(EngineError::no_handlers());
        }
        if self.state.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::already_started());
        }

        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        {
            let mut lifecycle = self.state.lifecycle.lock().await;
            *lifecycle = Some(Shutdown {
                token: token.clone(),
                tracker: tracker.clone(),
            });
        }

        let semaphore = match self.config.max_concurrent_handlers {
            0 => None,
            limit => Some(Arc::new(Semaphore::new(limit))),
        };
        let worker_count = self.config.workers.max(1);

        self.state.running.store(true, Ordering::SeqCst);
        self.state
            .started_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        debug!(workers = worker_count, "processor started");

        let workers = TaskTracker::new();
        for worker_id in 0..worker_count {
            let runtime = Runtime {
                bus: bus.clone(),
                token: token.clone(),
                tracker: tracker.clone(),
                semaphore: semaphore.clone(),
            };
            workers.spawn(Arc::clone(&self).worker_loop(worker_id, runtime));
        }
        workers.close();

        tokio::select! {
            _ = ctx.cancelled() => {
                let _ = self.stop().await;
                Err(EngineError::canceled())
            }
            _ = workers.wait() => {
                // 总线关闭，或外部 stop 已取消令牌；
                // 等待在途处理排空，同时保持对调用方取消的响应
                tracker.close();
                tokio::select! {
                    _ = ctx.cancelled() => {
                        let _ = self.stop().await;
                        Err(EngineError::canceled())
                    }
                    _ = tokio::time::timeout(self.config.shutdown_timeout, tracker.wait()) => {
                        let _ = self.stop().await;
                        Ok(())
                    }
                }
            }
        }
    }

    /// 发起停机并等待在途处理排空
    ///
    /// 至多一个调用方观察到成功；并发或重复调用返回
    /// `PROCESSOR_NOT_STARTED`。截止时长内未排空返回
    /// `SHUTDOWN_TIMEOUT`，在途处理器不会被强行终止。
    pub async fn stop(&self) -> EngineResult<()> {
        let shutdown = self.state.lifecycle.lock().await.take();
        let Some(shutdown) = shutdown else {
            return Err(EngineError::not_started());
        };

        debug!("processor stopping");
        shutdown.token.cancel();
        shutdown.tracker.close();

        let drained =
            tokio::time::timeout(self.config.shutdown_timeout, shutdown.tracker.wait()).await;
        self.state.running.store(false, Ordering::SeqCst);

        match drained {
            Ok(()) => {
                debug!("processor stopped");
                Ok(())
            }
            Err(_) => Err(EngineError::shutdown_timeout(self.config.shutdown_timeout)),
        }
    }

    /// 以可派生任务的形式运行
    ///
    /// 与 `start` 等价，但把预期内的上下文取消折叠为 `Ok(())`，
    /// 便于交给 `tokio::spawn` / `JoinSet` 等生命周期编排设施。
    pub async fn run(self: Arc<Self>, ctx: Context) -> EngineResult<()> {
        match self.start(ctx).await {
            Err(err) if err.matches(ErrorKind::Canceled, codes::CONTEXT_CANCELED) => Ok(()),
            other => other,
        }
    }

    /// 发布捷径：经配置的总线发布一个载荷
    pub async fn publish<P: EventPayload>(&self, ctx: &Context, payload: &P) -> EngineResult<()> {
        let Some(bus) = &self.bus else {
            return Err(EngineError::event_source_nil());
        };
        let event = Event::new(payload)?;
        let bytes = event.to_bytes()?;
        bus.publish(ctx, bytes).await
    }

    /// 统计快照（无锁，可在高并发下随时调用）
    pub fn stats(&self) -> Stats {
        Stats {
            running: self.state.running.load(Ordering::SeqCst),
            started_at: millis_to_datetime(self.state.started_at_ms.load(Ordering::SeqCst)),
            last_activity_at: millis_to_datetime(
                self.state.last_activity_ms.load(Ordering::SeqCst),
            ),
            processed: self.state.processed.load(Ordering::Relaxed),
            failed: self.state.failed.load(Ordering::Relaxed),
            active: self.state.active.load(Ordering::SeqCst),
        }
    }

    /// 健康检查
    ///
    /// | 状态 | 结果 |
    /// |---|---|
    /// | 未运行 | `HEALTHCHECK_FAILED` ← `PROCESSOR_NOT_RUNNING` |
    /// | 超过 stale_threshold 无活动 | `HEALTHCHECK_FAILED` ← `PROCESSOR_STALE` |
    /// | 在途数量 ≥ stuck_threshold | `HEALTHCHECK_FAILED` ← `PROCESSOR_STUCK` |
    /// | 其余 | `Ok(())` |
    pub fn healthcheck(&self, _ctx: &Context) -> EngineResult<()> {
        if !self.state.running.load(Ordering::SeqCst) {
            return Err(EngineError::healthcheck_failed(EngineError::not_running()));
        }

        // 尚无处理活动时以启动时间为基准，避免刚启动即报停滞
        let last_ms = match self.state.last_activity_ms.load(Ordering::SeqCst) {
            0 => self.state.started_at_ms.load(Ordering::SeqCst),
            ms => ms,
        };
        if last_ms != 0 {
            let idle_ms = (Utc::now().timestamp_millis() - last_ms).max(0) as u64;
            if Duration::from_millis(idle_ms) > self.config.stale_threshold {
                return Err(EngineError::healthcheck_failed(EngineError::stale(
                    Duration::from_millis(idle_ms),
                )));
            }
        }

        let active = self.state.active.load(Ordering::SeqCst);
        if active >= self.config.stuck_threshold {
            return Err(EngineError::healthcheck_failed(EngineError::stuck(active)));
        }

        Ok(())
    }

    fn touch_activity(&self) {
        self.state
            .last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, runtime: Runtime) {
        let mut events = runtime.bus.events().await;

        loop {
            tokio::select! {
                _ = runtime.token.cancelled() => break,
                maybe = events.next() => {
                    match maybe {
                        Some(bytes) => Arc::clone(&self).dispatch_envelope(bytes, &runtime).await,
                        None => {
                            debug!(worker_id, "event stream closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// 分发一条信封：解码、路由、为每个处理器派生独立任务
    async fn dispatch_envelope(self: Arc<Self>, bytes: Vec<u8>, runtime: &Runtime) {
        let event = match Event::from_bytes(&bytes) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "failed to decode event envelope, dropping");
                return;
            }
        };

        // 拷出处理器快照后立即释放注册表，不跨调用持有
        let mut handlers = self.registry.matching(event.name());
        if handlers.is_empty() {
            match &self.fallback {
                Some(fallback) => handlers.push(fallback.clone()),
                None if self.config.strict_handlers => {
                    self.state.failed.fetch_add(1, Ordering::Relaxed);
                    self.touch_activity();
                    error!(event_name = event.name(), "no handlers registered for event");
                    if let Some(callback) = &self.error_callback {
                        let err = anyhow::Error::new(EngineError::no_handlers_for(event.name()));
                        callback(&err);
                    }
                    return;
                }
                None => {
                    warn!(event_name = event.name(), "no handlers registered for event, dropping");
                    return;
                }
            }
        }

        let base_ctx = Context::new()
            .with_cancellation(runtime.token.child_token())
            .with_event(&event);
        let payload = RawPayload::Json(event.payload().clone());

        for handler in handlers {
            self.state.active.fetch_add(1, Ordering::SeqCst);
            let invocation = Invocation {
                processor: Arc::clone(&self),
                handler,
                ctx: base_ctx.clone(),
                payload: payload.clone(),
                semaphore: runtime.semaphore.clone(),
            };
            runtime.tracker.spawn(invocation.run());
        }
    }
}

/// 一次处理器调用：信号量闸门、标签附加、恐慌隔离与计数维护
struct Invocation {
    processor: Arc<Processor>,
    handler: Arc<dyn EventHandler>,
    ctx: Context,
    payload: RawPayload,
    semaphore: Option<Arc<Semaphore>>,
}

impl Invocation {
    async fn run(self) {
        let state = &self.processor.state;

        let _permit = match &self.semaphore {
            Some(semaphore) => {
                tokio::select! {
                    permit = Arc::clone(semaphore).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            state.active.fetch_sub(1, Ordering::SeqCst);
                            return;
                        }
                    },
                    _ = self.ctx.cancelled() => {
                        // 取消先于闸门放行：不调用处理器，不计成功或失败
                        state.active.fetch_sub(1, Ordering::SeqCst);
                        return;
                    }
                }
            }
            None => None,
        };

        let ctx = self.ctx.clone().with_processing_started_at(Utc::now());
        let result = recover::invoke_safely(self.handler.handle(&ctx, &self.payload)).await;

        match result {
            Ok(()) => {
                state.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                state.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    event_name = ctx.event_name().unwrap_or_default(),
                    handler = self.handler.name(),
                    error = ?err,
                    "event handler failed"
                );
                if let Some(callback) = &self.processor.error_callback {
                    callback(&err);
                }
            }
        }

        self.processor.touch_activity();
        state.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        None
    } else {
        DateTime::from_timestamp_millis(ms)
    }
}
