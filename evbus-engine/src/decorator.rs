//! 处理器装饰器（Decorator）
//!
//! 重试、指数退避、超时三种可组合的包装器。组合方向：
//! [`apply`] 按给定顺序套叠，列表中的第一个装饰器是最外层——
//! `apply(h, [d1, d2, d3])` 的进入顺序为 `d1, d2, d3, h`，
//! 退出顺序为 `h, d3, d2, d1`。

use crate::error::EngineError;
use crate::handler::{EventHandler, RawPayload};
use async_trait::async_trait;
use evbus_core::Context;
use std::sync::Arc;
use std::time::Duration;

/// 装饰器：包装一个处理器并返回新处理器
pub type Decorator = Arc<dyn Fn(Arc<dyn EventHandler>) -> Arc<dyn EventHandler> + Send + Sync>;

/// 按给定顺序套叠装饰器，第一个为最外层
pub fn apply(handler: Arc<dyn EventHandler>, decorators: &[Decorator]) -> Arc<dyn EventHandler> {
    decorators
        .iter()
        .rev()
        .fold(handler, |inner, decorate| decorate(inner))
}

/// 重试装饰器：最多调用内层处理器 `times + 1` 次
///
/// 首次成功即返回；重试耗尽后返回包装错误，消息中含
/// `failed after N retries`；两次尝试之间若上下文已取消，
/// 立即返回取消错误而不再尝试。
pub fn retry(times: usize) -> Decorator {
    Arc::new(move |inner| Arc::new(RetryHandler { inner, times }))
}

struct RetryHandler {
    inner: Arc<dyn EventHandler>,
    times: usize,
}

#[async_trait]
impl EventHandler for RetryHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, ctx: &Context, payload: &RawPayload) -> anyhow::Result<()> {
        let mut last_err = None;

        for attempt in 0..=self.times {
            if attempt > 0 && ctx.is_cancelled() {
                return Err(EngineError::canceled().into());
            }

            match self.inner.handle(ctx, payload).await {
                Ok(()) => return Ok(()),
                Err(err) => last_err = Some(err),
            }
        }

        last_err.map_or(Ok(()), |err| {
            Err(err.context(format!("handler failed after {} retries", self.times)))
        })
    }
}

/// 退避装饰器：重试之间按倍增延迟休眠，封顶 `max`
///
/// 休眠可被上下文取消打断，打断后立即返回取消错误。
pub fn backoff(times: usize, initial: Duration, max: Duration) -> Decorator {
    Arc::new(move |inner| {
        Arc::new(BackoffHandler {
            inner,
            times,
            initial,
            max,
        })
    })
}

struct BackoffHandler {
    inner: Arc<dyn EventHandler>,
    times: usize,
    initial: Duration,
    max: Duration,
}

#[async_trait]
impl EventHandler for BackoffHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, ctx: &Context, payload: &RawPayload) -> anyhow::Result<()> {
        let mut last_err = None;
        let mut delay = self.initial;

        for attempt in 0..=self.times {
            if attempt > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancelled() => return Err(EngineError::canceled().into()),
                }
                delay = (delay * 2).min(self.max);
            }

            match self.inner.handle(ctx, payload).await {
                Ok(()) => return Ok(()),
                Err(err) => last_err = Some(err),
            }
        }

        last_err.map_or(Ok(()), |err| {
            Err(err.context(format!("handler failed after {} retries", self.times)))
        })
    }
}

/// 超时装饰器：内层处理器在自动取消的子上下文中执行
///
/// 超过 `duration` 后返回超时错误并取消子上下文；不强行终止
/// 仍在运行的处理器，期待其自行观察上下文退出。
pub fn timeout(duration: Duration) -> Decorator {
    Arc::new(move |inner| Arc::new(TimeoutHandler { inner, duration }))
}

struct TimeoutHandler {
    inner: Arc<dyn EventHandler>,
    duration: Duration,
}

#[async_trait]
impl EventHandler for TimeoutHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, ctx: &Context, payload: &RawPayload) -> anyhow::Result<()> {
        let child = ctx.child();
        let task = {
            let inner = self.inner.clone();
            let ctx = child.clone();
            let payload = payload.clone();
            tokio::spawn(async move { inner.handle(&ctx, &payload).await })
        };

        match tokio::time::timeout(self.duration, task).await {
            Ok(joined) => joined.map_err(|err| anyhow::anyhow!("handler task failed: {err}"))?,
            Err(elapsed) => {
                child.cancel();
                Err(anyhow::Error::new(elapsed)
                    .context(format!("handler timeout after {:?}", self.duration)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use evbus_core::EventPayload;
    use evbus_core::error::{ErrorKind, codes};
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Serialize, Deserialize)]
    struct Ping;

    impl EventPayload for Ping {}

    fn flaky(fail_first: usize) -> (Arc<dyn EventHandler>, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let handler = {
            let attempts = attempts.clone();
            handler_fn(move |_ctx, _payload: Ping| {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < fail_first {
                        Err(anyhow::anyhow!("attempt {n} failed"))
                    } else {
                        Ok(())
                    }
                }
            })
        };
        (Arc::new(handler), attempts)
    }

    #[tokio::test]
    async fn retry_succeeds_after_failures() {
        let (inner, attempts) = flaky(2);
        let handler = retry(3)(inner);

        handler
            .handle(&Context::new(), &RawPayload::typed(Ping))
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_zero_means_single_attempt() {
        let (inner, attempts) = flaky(usize::MAX);
        let handler = retry(0)(inner);

        let err = handler
            .handle(&Context::new(), &RawPayload::typed(Ping))
            .await
            .unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("failed after 0 retries"));
    }

    #[tokio::test]
    async fn retry_exhaustion_wraps_last_error() {
        let (inner, attempts) = flaky(usize::MAX);
        let handler = retry(2)(inner);

        let err = handler
            .handle(&Context::new(), &RawPayload::typed(Ping))
            .await
            .unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("failed after 2 retries"));
        assert!(format!("{err:#}").contains("attempt 2 failed"));
    }

    #[tokio::test]
    async fn retry_stops_on_cancelled_context() {
        let (inner, attempts) = flaky(usize::MAX);
        let handler = retry(5)(inner);

        let ctx = Context::new();
        ctx.cancel();
        let err = handler
            .handle(&ctx, &RawPayload::typed(Ping))
            .await
            .unwrap_err();

        // 第一次尝试照常执行，取消在重试间隙生效
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        let engine = err.downcast_ref::<EngineError>().unwrap();
        assert!(engine.matches(ErrorKind::Canceled, codes::CONTEXT_CANCELED));
    }

    #[tokio::test]
    async fn backoff_sleeps_between_attempts() {
        let (inner, attempts) = flaky(2);
        let handler = backoff(3, Duration::from_millis(10), Duration::from_millis(40))(inner);

        let started = std::time::Instant::now();
        handler
            .handle(&Context::new(), &RawPayload::typed(Ping))
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 两次休眠：10ms + 20ms
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn backoff_sleep_is_interrupted_by_cancellation() {
        let (inner, attempts) = flaky(usize::MAX);
        let handler = backoff(5, Duration::from_secs(60), Duration::from_secs(60))(inner);

        let ctx = Context::new();
        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move { handler.handle(&ctx, &RawPayload::typed(Ping)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel();

        let err = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        let engine = err.downcast_ref::<EngineError>().unwrap();
        assert!(engine.matches(ErrorKind::Canceled, codes::CONTEXT_CANCELED));
    }

    #[tokio::test]
    async fn timeout_expires_for_slow_handler() {
        let inner: Arc<dyn EventHandler> = Arc::new(handler_fn(|ctx: Context, _payload: Ping| {
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(()),
                    _ = ctx.cancelled() => Err(anyhow::anyhow!("observed cancellation")),
                }
            }
        }));
        let handler = timeout(Duration::from_millis(50))(inner);

        let err = handler
            .handle(&Context::new(), &RawPayload::typed(Ping))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("handler timeout"));
    }

    #[tokio::test]
    async fn timeout_passes_fast_handler_through() {
        let (inner, attempts) = flaky(0);
        let handler = timeout(Duration::from_secs(5))(inner);

        handler
            .handle(&Context::new(), &RawPayload::typed(Ping))
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn apply_puts_first_decorator_outermost() {
        let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        fn tracing_decorator(label: &'static str, trace: Arc<Mutex<Vec<&'static str>>>) -> Decorator {
            Arc::new(move |inner| {
                Arc::new(TraceHandler {
                    label,
                    trace: trace.clone(),
                    inner,
                })
            })
        }

        struct TraceHandler {
            label: &'static str,
            trace: Arc<Mutex<Vec<&'static str>>>,
            inner: Arc<dyn EventHandler>,
        }

        #[async_trait]
        impl EventHandler for TraceHandler {
            fn name(&self) -> &str {
                self.inner.name()
            }

            async fn handle(&self, ctx: &Context, payload: &RawPayload) -> anyhow::Result<()> {
                self.trace.lock().unwrap().push(self.label);
                let result = self.inner.handle(ctx, payload).await;
                self.trace.lock().unwrap().push(self.label);
                result
            }
        }

        let base: Arc<dyn EventHandler> = {
            let trace = trace.clone();
            Arc::new(handler_fn(move |_ctx, _payload: Ping| {
                let trace = trace.clone();
                async move {
                    trace.lock().unwrap().push("h");
                    Ok(())
                }
            }))
        };

        let decorated = apply(
            base,
            &[
                tracing_decorator("d1", trace.clone()),
                tracing_decorator("d2", trace.clone()),
                tracing_decorator("d3", trace.clone()),
            ],
        );

        decorated
            .handle(&Context::new(), &RawPayload::typed(Ping))
            .await
            .unwrap();

        assert_eq!(
            trace.lock().unwrap().as_slice(),
            &["d1", "d2", "d3", "h", "d3", "d2", "d1"]
        );
    }

    #[tokio::test]
    async fn decorators_preserve_handler_name() {
        let inner: Arc<dyn EventHandler> =
            Arc::new(handler_fn(|_ctx, _payload: Ping| async { Ok(()) }));
        let decorated = apply(
            inner,
            &[
                retry(1),
                backoff(1, Duration::from_millis(1), Duration::from_millis(2)),
                timeout(Duration::from_secs(1)),
            ],
        );
        assert_eq!(decorated.name(), "Ping");
    }
}
