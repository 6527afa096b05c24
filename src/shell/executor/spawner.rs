use std::ffi::CString;
use std::os::fd::RawFd;

use log::debug;
use nix::errno::Errno;
use nix::unistd::{close, dup2, execv, fork, ForkResult, Pid};

use super::ExecutionError;
use crate::shell::signals;
use crate::utils::path::resolve_program;

/// exec 失败时子进程的退出码
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// 启动一个管道阶段所需的全部信息。
///
/// `stdin`/`stdout`/`stderr` 为 `None` 时继承 shell 自己的标准流。
/// `inherited` 是父进程持有的所有管道描述符，子进程在 exec 之前全部关闭。
#[derive(Debug, Clone, Copy)]
pub struct SpawnRequest<'a> {
    pub argv: &'a [String],
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
    pub stderr: Option<RawFd>,
    pub inherited: &'a [RawFd],
}

/// 创建子进程的能力，执行器只负责接好管道两端
pub trait ProcessSpawner {
    fn spawn(&mut self, request: SpawnRequest<'_>) -> Result<Pid, ExecutionError>;
}

/// fork + dup2 + exec 的真实实现
#[derive(Debug, Default, Clone, Copy)]
pub struct ForkSpawner;

impl ProcessSpawner for ForkSpawner {
    fn spawn(&mut self, request: SpawnRequest<'_>) -> Result<Pid, ExecutionError> {
        let program = request.argv.first().ok_or(ExecutionError::EmptyStage)?;

        // fork 之后不再分配内存，所有字符串提前准备好
        let path = resolve_program(program)
            .map(|path| to_cstring(&path))
            .transpose()?;
        let args = request
            .argv
            .iter()
            .map(|arg| to_cstring(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let failure_prefix = format!("egg: {}: ", program);
        // PATH 中找不到时子进程不 exec，直接以 127 退出
        let not_found = ExecutionError::ExecFailed {
            program: program.clone(),
            errno: Errno::ENOENT,
        };
        let not_found = format!("egg: {}\n", not_found);

        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                debug!("fork 子进程 {} 执行 {:?}", child, request.argv);
                Ok(child)
            }
            Ok(ForkResult::Child) => exec_child(
                &request,
                path.as_ref(),
                &args,
                failure_prefix.as_bytes(),
                not_found.as_bytes(),
            ),
            Err(errno) => Err(ExecutionError::ForkFailed(errno)),
        }
    }
}

fn to_cstring(value: &str) -> Result<CString, ExecutionError> {
    CString::new(value).map_err(|_| ExecutionError::InvalidArgument(value.to_string()))
}

/// 子进程：接好标准流，关闭继承的管道，exec。永远不会返回到 shell 逻辑。
fn exec_child(
    request: &SpawnRequest<'_>,
    path: Option<&CString>,
    args: &[CString],
    prefix: &[u8],
    not_found: &[u8],
) -> ! {
    signals::unblock_child_signal();
    // SIG_IGN 会跨 exec 继承
    let _ = signals::restore_default_broken_pipe();

    let wiring = [
        (request.stdin, libc::STDIN_FILENO),
        (request.stdout, libc::STDOUT_FILENO),
        (request.stderr, libc::STDERR_FILENO),
    ];
    for (source, target) in wiring {
        if let Some(fd) = source {
            if let Err(errno) = dup2(fd, target) {
                child_fail(prefix, errno);
            }
        }
    }

    for &fd in request.inherited {
        let _ = close(fd);
    }

    let Some(path) = path else {
        write_stderr(not_found);
        unsafe { libc::_exit(EXEC_FAILURE_STATUS) }
    };
    let errno = match execv(path, args) {
        Ok(never) => match never {},
        Err(errno) => errno,
    };
    child_fail(prefix, errno)
}

fn child_fail(prefix: &[u8], errno: Errno) -> ! {
    write_stderr(prefix);
    write_stderr(errno.desc().as_bytes());
    write_stderr(b"\n");
    unsafe { libc::_exit(EXEC_FAILURE_STATUS) }
}

fn write_stderr(bytes: &[u8]) {
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            bytes.as_ptr() as *const libc::c_void,
            bytes.len(),
        );
    }
}
