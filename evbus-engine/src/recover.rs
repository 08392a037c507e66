//! 处理器调用的恐慌隔离
//!
//! 在每次处理器调用处安装 catch-unwind 边界：恐慌被捕获并转换为
//! 普通错误，消息中携带恐慌载荷与捕获点的栈快照；工作协程与进程
//! 继续运行。

use futures_util::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// 以恐慌安全的方式执行一次处理器调用
///
/// 返回值：
/// - 处理器正常返回时原样传出；
/// - 处理器恐慌时转换为 `Err`，不向上传播恐慌。
pub async fn invoke_safely<F>(fut: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let backtrace = Backtrace::force_capture();
            Err(anyhow::anyhow!(
                "handler panicked: {}\nstack backtrace:\n{backtrace}",
                panic_message(panic.as_ref())
            ))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
