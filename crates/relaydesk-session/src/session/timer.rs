use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

/// 后台定时任务
///
/// 句柄被丢弃时中止任务，替换或清空槽位即可取消。
#[derive(Debug)]
pub(crate) struct ScheduledTask {
    handle: JoinHandle<()>,
    due_at_ms: i64,
}

impl ScheduledTask {
    /// 在当前 tokio 运行时中启动任务，不在运行时中时返回 None
    pub(crate) fn spawn<F>(name: &'static str, due_at_ms: i64, task: F) -> Option<Self>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match Handle::try_current() {
            Ok(handle) => Some(Self {
                handle: handle.spawn(task),
                due_at_ms,
            }),
            Err(_) => {
                warn!(timer = name, "No tokio runtime available, timer not scheduled");
                None
            }
        }
    }

    pub(crate) fn due_at_ms(&self) -> i64 {
        self.due_at_ms
    }

    pub(crate) fn is_pending(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
