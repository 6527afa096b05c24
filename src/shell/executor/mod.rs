mod builtins;
mod executor;
mod job_manager;
mod spawner;

use std::io;

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

pub use builtins::is_builtin;
pub use executor::Executor;
pub use job_manager::{Job, JobManager, JobStatus};
pub use spawner::{ForkSpawner, ProcessSpawner, SpawnRequest, EXEC_FAILURE_STATUS};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("pipe: {0}")]
    PipeCreationFailed(#[source] Errno),
    #[error("fork: {0}")]
    ForkFailed(#[source] Errno),
    #[error("{program}: {errno}")]
    ExecFailed { program: String, errno: Errno },
    #[error("{path}: {source}")]
    Redirect {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("missing command in pipeline stage")]
    EmptyStage,
    #[error("argument contains a NUL byte: {0:?}")]
    InvalidArgument(String),
}

/// 一条管道执行后的结果
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// 内建命令已在 shell 进程内处理
    Builtin,
    /// 用户请求退出 shell
    Exit,
    /// 前台管道结束，每个阶段一个状态；已被别处回收的阶段为 `None`
    Foreground { statuses: Vec<Option<i32>> },
    /// 后台管道已启动，记录最后一个阶段的 pid
    Background { pid: Pid },
    Failed(ExecutionError),
}

impl ExecutionOutcome {
    pub fn last_status(&self) -> Option<i32> {
        match self {
            ExecutionOutcome::Foreground { statuses } => statuses.last().copied().flatten(),
            ExecutionOutcome::Builtin | ExecutionOutcome::Exit => Some(0),
            ExecutionOutcome::Background { .. } => Some(0),
            ExecutionOutcome::Failed(_) => Some(1),
        }
    }
}
