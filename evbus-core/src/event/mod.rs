//! 事件模型（event）
//!
//! 定义事件信封（`Event`）、载荷能力边界（`EventPayload`）与
//! 名称推导工具（`short_type_name`）。

mod payload;
mod record;

pub use payload::{EventPayload, short_type_name};
pub use record::Event;
