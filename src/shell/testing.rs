//! 测试辅助：在独立的子进程里运行会改动进程全局状态（信号处理、cwd、环境变量）的代码

use std::panic::{self, AssertUnwindSafe};

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};

/// fork 一个子进程执行 `body`，返回它的退出码。`body` panic 时退出码为 101。
#[allow(clippy::unwrap_used)]
pub(crate) fn run_isolated(body: impl FnOnce() -> i32) -> i32 {
    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let code = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or(101);
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => match waitpid(child, None).unwrap() {
            WaitStatus::Exited(_, code) => code,
            other => panic!("isolated child ended with {:?}", other),
        },
    }
}

/// `/proc/<pid>/status` 里 SigIgn 是否包含 SIGPIPE
pub(crate) fn sigpipe_ignored(status: &str) -> Option<bool> {
    let mask = status
        .lines()
        .find_map(|line| line.strip_prefix("SigIgn:"))?
        .trim();
    let mask = u64::from_str_radix(mask, 16).ok()?;
    Some(mask & (1 << (libc::SIGPIPE - 1)) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigpipe_mask() {
        assert_eq!(sigpipe_ignored("Name:\tsh\nSigIgn:\t0000000080001000\n"), Some(true));
        assert_eq!(sigpipe_ignored("SigIgn:\t0000000000000000\n"), Some(false));
        assert_eq!(sigpipe_ignored("Name:\tsh\n"), None);
    }

    #[test]
    fn test_isolated_exit_code() {
        assert_eq!(run_isolated(|| 7), 7);
        assert_eq!(run_isolated(|| panic!("boom")), 101);
    }
}
