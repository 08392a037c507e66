//! 事件系统调度层（evbus-engine）
//!
//! 在 `evbus-core` 的模型之上提供进程内事件分发的运行时：
//! - 总线协议与内存实现（`bus` / `bus_inmemory`）：有界阻塞 FIFO，
//!   背压通过发布方的上下文传导；
//! - 发布者（`publisher`）：无状态客户端，构造信封并写入总线;
//! - 处理器模型（`handler`）：类型擦除的运行时接口 + 强类型还原；
//! - 调度引擎（`processor`）：工作协程池、并发闸门、恐慌隔离、
//!   统计与健康检查、优雅停机；
//! - 同步分发器（`sync_dispatcher`）：在调用方任务内直接执行的
//!   互换传输形态；
//! - 装饰器（`decorator`）：重试、退避、超时的可组合包装。
//!
//! 日志经由 `tracing` 输出，由宿主安装订阅器决定去向。

pub mod bus;
pub mod bus_inmemory;
pub mod decorator;
pub mod error;
pub mod handler;
pub mod processor;
pub mod publisher;
pub mod recover;
pub mod sync_dispatcher;

pub use bus::{EventBus, EventSink, EventSource};
pub use bus_inmemory::InMemoryBus;
pub use decorator::{Decorator, apply, backoff, retry, timeout};
pub use error::{EngineError, EngineResult};
pub use handler::{
    EventHandler, FnHandler, PayloadHandler, RawPayload, TypedHandler, handler_fn,
    named_handler_fn,
};
pub use processor::{ErrorCallback, Processor, ProcessorConfig, Stats};
pub use publisher::Publisher;
pub use sync_dispatcher::SyncDispatcher;
