//! 调用上下文（Context）
//!
//! 随每次处理器调用传递的值包：携带取消信号与事件元数据标签
//! （事件 ID、事件名称、事件创建时间、处理开始时间）。
//!
//! 标签字段为私有，只能通过类型化的 attach/extract 访问器读写，
//! 因此不存在键冲突或伪造键的问题。attach 后 extract 必得原值。

use crate::event::Event;
use chrono::{DateTime, Utc};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// 调用上下文
///
/// 克隆成本低，适合按值在任务间传递。
///
/// # 示例
///
/// ```rust
/// use evbus_core::context::Context;
///
/// let ctx = Context::new().with_event_id("evt-1");
/// assert_eq!(ctx.event_id(), Some("evt-1"));
/// assert_eq!(ctx.event_name(), None);
/// ```
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancellation: CancellationToken,
    event_id: Option<String>,
    event_name: Option<String>,
    event_created_at: Option<DateTime<Utc>>,
    processing_started_at: Option<DateTime<Utc>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定取消令牌
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// 派生子上下文：子令牌 + 相同标签
    ///
    /// 父上下文取消时子上下文随之取消，反之不影响父。
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            event_id: self.event_id.clone(),
            event_name: self.event_name.clone(),
            event_created_at: self.event_created_at,
            processing_started_at: self.processing_started_at,
        }
    }

    /// 取消该上下文
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// 等待上下文被取消
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancellation.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    // ==================== attach ====================

    #[must_use]
    pub fn with_event_id(mut self, id: impl Into<String>) -> Self {
        self.event_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_event_name(mut self, name: impl Into<String>) -> Self {
        self.event_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_event_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.event_created_at = Some(at);
        self
    }

    #[must_use]
    pub fn with_processing_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.processing_started_at = Some(at);
        self
    }

    /// 一次性附加事件的 ID、名称与创建时间
    #[must_use]
    pub fn with_event(self, event: &Event) -> Self {
        self.with_event_id(event.id())
            .with_event_name(event.name())
            .with_event_created_at(event.created_at())
    }

    // ==================== extract ====================

    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    pub fn event_name(&self) -> Option<&str> {
        self.event_name.as_deref()
    }

    pub fn event_created_at(&self) -> Option<DateTime<Utc>> {
        self.event_created_at
    }

    pub fn processing_started_at(&self) -> Option<DateTime<Utc>> {
        self.processing_started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Serialize, Deserialize)]
    struct UserCreated {
        user_id: String,
    }

    impl EventPayload for UserCreated {}

    #[test]
    fn attach_then_extract_is_identity() {
        let now = Utc::now();
        let ctx = Context::new()
            .with_event_id("evt-1")
            .with_event_name("UserCreated")
            .with_event_created_at(now)
            .with_processing_started_at(now);

        assert_eq!(ctx.event_id(), Some("evt-1"));
        assert_eq!(ctx.event_name(), Some("UserCreated"));
        assert_eq!(ctx.event_created_at(), Some(now));
        assert_eq!(ctx.processing_started_at(), Some(now));
    }

    #[test]
    fn absent_tags_extract_as_none() {
        let ctx = Context::new();
        assert_eq!(ctx.event_id(), None);
        assert_eq!(ctx.event_name(), None);
        assert_eq!(ctx.event_created_at(), None);
        assert_eq!(ctx.processing_started_at(), None);
    }

    #[test]
    fn with_event_applies_three_tags() {
        let event = Event::new(&UserCreated {
            user_id: "u-1".into(),
        })
        .unwrap();
        let ctx = Context::new().with_event(&event);

        assert_eq!(ctx.event_id(), Some(event.id()));
        assert_eq!(ctx.event_name(), Some("UserCreated"));
        assert_eq!(ctx.event_created_at(), Some(event.created_at()));
        assert_eq!(ctx.processing_started_at(), None);
    }

    #[test]
    fn child_inherits_tags_and_cancellation() {
        let parent = Context::new().with_event_id("evt-1");
        let child = parent.child();

        assert_eq!(child.event_id(), Some("evt-1"));
        assert!(!child.is_cancelled());

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancellation_does_not_affect_parent() {
        let parent = Context::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let ctx = Context::new();
        let waiter = ctx.clone();

        let task = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        ctx.cancel();
        task.await.unwrap();
    }
}
