//! 事件载荷（EventPayload）
//!
//! 定义事件载荷需要满足的能力边界，以及从类型反射推导事件名称的工具。

use serde::Serialize;
use serde::de::DeserializeOwned;

/// 事件载荷需要满足的通用能力边界
///
/// 载荷的「事件名称」默认从类型名反射推导（见 [`short_type_name`]），
/// 也可以覆写 [`EventPayload::event_name`] 提供稳定的常量名称，
/// 避免重构改名影响路由。
///
/// # 示例
///
/// ```rust
/// use evbus_core::event::EventPayload;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct UserCreated {
///     user_id: String,
/// }
///
/// impl EventPayload for UserCreated {}
///
/// assert_eq!(UserCreated::event_name(), "UserCreated");
/// ```
pub trait EventPayload: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 事件名称（默认取裸类型名，不含模块路径）
    fn event_name() -> &'static str {
        short_type_name::<Self>()
    }
}

/// 无类型 JSON 值也可以作为载荷：常用于兜底处理器按原样接收
/// 任意事件的负载。
impl EventPayload for serde_json::Value {}

/// 从类型反射推导事件名称
///
/// 规则：
/// - 剥离引用间接层（`&T`、`&mut T` 与 `T` 推导出相同名称）；
/// - 去掉模块路径，只保留裸类型名；
/// - 泛型参数被整体丢弃（`Wrapper<Foo>` 推导为 `Wrapper`）。
///
/// 不同模块中同名的两个载荷类型会推导出相同的事件名称，
/// 二者的处理器都会收到彼此的事件；需要区分时请覆写
/// [`EventPayload::event_name`]。
#[must_use]
pub fn short_type_name<T: ?Sized>() -> &'static str {
    short_name_of(std::any::type_name::<T>())
}

fn short_name_of(full: &str) -> &str {
    let mut name = full;
    loop {
        if let Some(rest) = name.strip_prefix("&mut ") {
            name = rest;
        } else if let Some(rest) = name.strip_prefix('&') {
            name = rest;
        } else {
            break;
        }
    }

    let head_end = name.find('<').unwrap_or(name.len());
    let start = name[..head_end].rfind("::").map_or(0, |i| i + 2);
    &name[start..head_end]
}
