//! 事件记录（Event）
//!
//! 定义事件在发布与分发之间流转的标准信封形态：
//! - `id`：构造时分配的全局唯一标识（UUID v4 文本形式）；
//! - `name`：事件名称，默认从载荷类型推导；
//! - `payload`：序列化后的事件负载；
//! - `created_at`：构造时捕获的 UTC 时间。
//!
//! 四个字段在构造时一次性填充，此后不可变。

use crate::error::{EventError, EventResult};
use crate::event::EventPayload;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

/// 事件信封
///
/// # 示例
///
/// ```rust
/// use evbus_core::event::{Event, EventPayload};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
/// struct UserCreated {
///     user_id: String,
/// }
///
/// impl EventPayload for UserCreated {}
///
/// let payload = UserCreated { user_id: "u-1".into() };
/// let event = Event::new(&payload).unwrap();
///
/// assert_eq!(event.name(), "UserCreated");
/// assert_eq!(event.payload_as::<UserCreated>().unwrap(), payload);
/// ```
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct Event {
    /// 事件唯一标识符
    id: String,
    /// 事件名称，用于处理器路由
    name: String,
    /// 事件负载，存储事件的具体数据
    payload: Value,
    /// 事件创建时间
    created_at: DateTime<Utc>,
}

impl Event {
    /// 构造一个新事件，名称从载荷类型推导
    ///
    /// 仅在载荷序列化失败时报错。
    pub fn new<P: EventPayload>(payload: &P) -> EventResult<Self> {
        Self::named(P::event_name(), payload)
    }

    /// 构造一个新事件，名称由调用方显式指定
    pub fn named<P: Serialize>(name: impl Into<String>, payload: &P) -> EventResult<Self> {
        let payload = serde_json::to_value(payload).map_err(EventError::serialization_failed)?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            payload,
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// 序列化为线缆字节（自描述 JSON）
    pub fn to_bytes(&self) -> EventResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(EventError::serialization_failed)
    }

    /// 从线缆字节还原信封
    pub fn from_bytes(bytes: &[u8]) -> EventResult<Self> {
        serde_json::from_slice(bytes).map_err(EventError::envelope_decode_failed)
    }

    /// 将负载重塑为具体类型
    ///
    /// 负载在信封解码后是无类型的 JSON 值，由消费侧按处理器期望的
    /// 类型重塑。
    pub fn payload_as<T: DeserializeOwned>(&self) -> EventResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(|err| {
            EventError::payload_unmarshal_failed(crate::event::short_type_name::<T>(), err)
        })
    }
}
