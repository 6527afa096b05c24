//! 信号处理：SIGCHLD 异步回收子进程，键盘信号不终止 shell。

use std::sync::atomic::{AtomicI32, Ordering};

use libc::c_int;
use log::debug;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;

const REAP_SLOTS: usize = 64;

// 信号处理函数里只能用无锁结构，0 表示空槽
static REAPED: [AtomicI32; REAP_SLOTS] = [const { AtomicI32::new(0) }; REAP_SLOTS];

extern "C" fn reap_children(_: c_int) {
    let saved = errno::errno();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => match status.pid() {
                Some(pid) => record_reaped(pid.as_raw()),
                None => break,
            },
            Err(_) => break,
        }
    }
    errno::set_errno(saved);
}

fn record_reaped(pid: i32) {
    for slot in REAPED.iter() {
        if slot
            .compare_exchange(0, pid, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
    }
    // 槽满了就只回收不记录
}

extern "C" fn ignore_keyboard(_: c_int) {}

/// 注册 SIGCHLD 回收函数，后台子进程结束后不需要父进程阻塞等待
pub fn install_child_reaper() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(reap_children),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    unsafe { signal::sigaction(Signal::SIGCHLD, &action) }?;
    debug!("SIGCHLD 回收函数已注册");
    Ok(())
}

/// 恢复 SIGCHLD 默认处理，用于需要自己 wait 子进程的进程
pub fn restore_default_child_signal() -> nix::Result<()> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    unsafe { signal::sigaction(Signal::SIGCHLD, &action) }?;
    Ok(())
}

/// Ctrl-C、Ctrl-\、Ctrl-Z 不终止 shell。
///
/// 用空处理函数而不是 SIG_IGN，exec 之后子进程会恢复默认行为。
pub fn ignore_keyboard_signals() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(ignore_keyboard),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTSTP] {
        unsafe { signal::sigaction(sig, &action) }?;
    }
    Ok(())
}

/// 写已关闭的 socket 时不让进程被 SIGPIPE 杀掉
pub fn ignore_broken_pipe() -> nix::Result<()> {
    let action = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    unsafe { signal::sigaction(Signal::SIGPIPE, &action) }?;
    Ok(())
}

/// 恢复 SIGPIPE 默认处理，在 fork 出的子进程 exec 之前调用
pub fn restore_default_broken_pipe() -> nix::Result<()> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    unsafe { signal::sigaction(Signal::SIGPIPE, &action) }?;
    Ok(())
}

/// 取出回收函数记录下来的 pid
pub fn drain_reaped() -> Vec<Pid> {
    REAPED
        .iter()
        .filter_map(|slot| match slot.swap(0, Ordering::AcqRel) {
            0 => None,
            pid => Some(Pid::from_raw(pid)),
        })
        .collect()
}

/// 在作用域内阻塞 SIGCHLD，保证前台子进程只被执行器自己 wait
pub struct ChildSignalGuard {
    blocked: bool,
}

impl ChildSignalGuard {
    pub fn new() -> Self {
        let blocked = signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&child_set()), None)
            .map_err(|err| debug!("阻塞 SIGCHLD 失败: {}", err))
            .is_ok();
        Self { blocked }
    }
}

impl Default for ChildSignalGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChildSignalGuard {
    fn drop(&mut self) {
        if self.blocked {
            let _ = signal::pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&child_set()), None);
        }
    }
}

/// fork 出的子进程在 exec 前调用，去掉继承来的 SIGCHLD 阻塞
pub fn unblock_child_signal() {
    let _ = signal::pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&child_set()), None);
}

fn child_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_drain() {
        record_reaped(4242);
        record_reaped(4243);
        let drained = drain_reaped();
        assert!(drained.contains(&Pid::from_raw(4242)));
        assert!(drained.contains(&Pid::from_raw(4243)));
        assert!(!drain_reaped().contains(&Pid::from_raw(4242)));
    }

    #[test]
    fn test_guard_blocks_and_restores_mask() {
        let is_blocked = || {
            let mut current = SigSet::empty();
            let _ = signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, None, Some(&mut current));
            current.contains(Signal::SIGCHLD)
        };
        assert!(!is_blocked());
        {
            let _guard = ChildSignalGuard::new();
            assert!(is_blocked());
        }
        assert!(!is_blocked());
    }
}
