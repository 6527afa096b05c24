use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{pipe2, Pid};

use super::builtins;
use super::job_manager::JobManager;
use super::spawner::{ForkSpawner, ProcessSpawner, SpawnRequest};
use super::{ExecutionError, ExecutionOutcome};
use crate::shell::context::ShellContext;
use crate::shell::parser::{Command, Pipeline};
use crate::shell::signals::ChildSignalGuard;

/// 一个阶段的重定向文件，在 fork 之前由父进程打开
#[derive(Default)]
struct StageFiles {
    input: Option<File>,
    output: Option<File>,
    error: Option<File>,
}

impl StageFiles {
    fn open(command: &Command) -> Result<Self, ExecutionError> {
        let input = match &command.input_redirect {
            Some(path) => Some(File::open(path).map_err(|source| ExecutionError::Redirect {
                path: path.clone(),
                source,
            })?),
            None => None,
        };
        let output = match &command.output_redirect {
            Some(path) => Some(open_for_writing(path, command.append_output)?),
            None => None,
        };
        let error = match &command.error_redirect {
            Some(path) => Some(open_for_writing(path, false)?),
            None => None,
        };
        Ok(Self {
            input,
            output,
            error,
        })
    }
}

fn open_for_writing(path: &str, append: bool) -> Result<File, ExecutionError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).mode(0o644);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    options.open(path).map_err(|source| ExecutionError::Redirect {
        path: path.to_string(),
        source,
    })
}

pub struct Executor<S = ForkSpawner> {
    spawner: S,
    jobs: JobManager,
}

impl Executor<ForkSpawner> {
    pub fn new() -> Self {
        Self::with_spawner(ForkSpawner)
    }
}

impl Default for Executor<ForkSpawner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ProcessSpawner> Executor<S> {
    pub fn with_spawner(spawner: S) -> Self {
        Self {
            spawner,
            jobs: JobManager::new(),
        }
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// 报告已经结束的后台任务，pid 来自 SIGCHLD 回收函数
    pub fn report_finished_jobs(&mut self, reaped: &[Pid]) {
        for job in self.jobs.mark_reaped(reaped) {
            info!("后台任务结束: {}", job);
            println!("{}", job);
        }
    }

    pub fn execute(&mut self, pipeline: &Pipeline, context: &mut ShellContext) -> ExecutionOutcome {
        // 内建命令只在不带管道时生效
        if pipeline.len() == 1 {
            if let Some(outcome) = pipeline
                .head()
                .and_then(|command| builtins::dispatch(command, context))
            {
                return outcome;
            }
        }

        let outcome = match self.run_pipeline(pipeline) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("执行管道失败 {}: {}", pipeline, err);
                ExecutionOutcome::Failed(err)
            }
        };
        if let Some(status) = outcome.last_status() {
            context.last_status = status;
        }
        outcome
    }

    fn run_pipeline(&mut self, pipeline: &Pipeline) -> Result<ExecutionOutcome, ExecutionError> {
        if pipeline.stages.iter().any(|stage| stage.program().is_none()) {
            return Err(ExecutionError::EmptyStage);
        }

        let files = pipeline
            .stages
            .iter()
            .map(StageFiles::open)
            .collect::<Result<Vec<_>, _>>()?;

        // 所有管道在 fork 之前一次性创建好
        let pipes = (1..pipeline.len())
            .map(|_| pipe2(OFlag::O_CLOEXEC))
            .collect::<Result<Vec<(OwnedFd, OwnedFd)>, Errno>>()
            .map_err(ExecutionError::PipeCreationFailed)?;
        let inherited: Vec<RawFd> = pipes
            .iter()
            .flat_map(|(read, write)| [read.as_raw_fd(), write.as_raw_fd()])
            .collect();

        let _guard = ChildSignalGuard::new();
        let mut pids = Vec::with_capacity(pipeline.len());
        let last = pipeline.len() - 1;

        for (i, (stage, files)) in pipeline.stages.iter().zip(&files).enumerate() {
            // 管道优先于同方向的重定向
            let stdin = match i {
                0 => files.input.as_ref().map(AsRawFd::as_raw_fd),
                _ => Some(pipes[i - 1].0.as_raw_fd()),
            };
            let stdout = if i < last {
                Some(pipes[i].1.as_raw_fd())
            } else {
                files.output.as_ref().map(AsRawFd::as_raw_fd)
            };
            let request = SpawnRequest {
                argv: &stage.arguments,
                stdin,
                stdout,
                stderr: files.error.as_ref().map(AsRawFd::as_raw_fd),
                inherited: &inherited,
            };

            match self.spawner.spawn(request) {
                Ok(pid) => pids.push(pid),
                Err(err) => {
                    drop(pipes);
                    terminate(&pids);
                    return Err(err);
                }
            }
        }

        // 父进程关闭全部管道，读端才能看到 EOF
        drop(pipes);
        drop(files);

        if pipeline.background {
            let pid = *pids.last().ok_or(ExecutionError::EmptyStage)?;
            let index = self.jobs.add_job(pids, pipeline.to_string());
            println!("[{}] Background PID: {}", index, pid);
            return Ok(ExecutionOutcome::Background { pid });
        }

        let statuses = wait_foreground(&pids);
        debug!("前台管道结束: {:?}", statuses);
        Ok(ExecutionOutcome::Foreground { statuses })
    }
}

/// 等待所有前台子进程，不关心结束顺序
fn wait_foreground(pids: &[Pid]) -> Vec<Option<i32>> {
    pids.iter().map(|&pid| wait_child(pid)).collect()
}

fn wait_child(pid: Pid) -> Option<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, status)) => return Some(status),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Some(128 + signal as i32),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                debug!("子进程 {} 已被回收", pid);
                return None;
            }
            Err(err) => {
                warn!("waitpid {} 失败: {}", pid, err);
                return None;
            }
        }
    }
}

/// 后面的阶段 fork 失败时，结束已经启动的阶段
fn terminate(pids: &[Pid]) {
    for &pid in pids {
        if let Err(err) = kill(pid, Signal::SIGKILL) {
            debug!("kill {} 失败: {}", pid, err);
        }
        wait_child(pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::executor::EXEC_FAILURE_STATUS;
    use crate::shell::parser::{parse_pipeline, tokenize};
    use std::fs;

    #[allow(clippy::unwrap_used)]
    fn parse(line: &str) -> Pipeline {
        parse_pipeline(&tokenize(line).unwrap()).unwrap()
    }

    /// 记录每次请求，实际仍交给 ForkSpawner；可以让第 n 次 spawn 失败
    #[derive(Default)]
    struct RecordingSpawner {
        requests: Vec<(Vec<String>, Option<RawFd>, Option<RawFd>)>,
        fail_at: Option<usize>,
        spawned: Vec<Pid>,
    }

    impl ProcessSpawner for RecordingSpawner {
        fn spawn(&mut self, request: SpawnRequest<'_>) -> Result<Pid, ExecutionError> {
            if self.fail_at == Some(self.requests.len()) {
                return Err(ExecutionError::ForkFailed(Errno::EAGAIN));
            }
            self.requests
                .push((request.argv.to_vec(), request.stdin, request.stdout));
            let pid = ForkSpawner.spawn(request)?;
            self.spawned.push(pid);
            Ok(pid)
        }
    }

    #[test]
    fn test_builtin_does_not_fork() {
        let mut executor = Executor::with_spawner(RecordingSpawner::default());
        let mut context = ShellContext::default();
        let outcome = executor.execute(&parse("prompt $$"), &mut context);
        assert!(matches!(outcome, ExecutionOutcome::Builtin));
        assert!(executor.spawner().requests.is_empty());
    }

    #[test]
    fn test_one_child_per_stage() {
        let mut executor = Executor::with_spawner(RecordingSpawner::default());
        let mut context = ShellContext::default();
        let outcome = executor.execute(&parse("echo hi | cat | wc -c"), &mut context);

        let requests = &executor.spawner().requests;
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].0, vec!["echo", "hi"]);
        assert_eq!(requests[0].1, None);
        assert!(requests[0].2.is_some());
        assert!(requests[1].1.is_some() && requests[1].2.is_some());
        assert!(requests[2].1.is_some());
        assert_eq!(requests[2].2, None);

        match outcome {
            ExecutionOutcome::Foreground { statuses } => {
                assert_eq!(statuses, vec![Some(0), Some(0), Some(0)]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(context.last_status, 0);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_pipeline_with_output_redirect() {
        let listed = tempfile::tempdir().unwrap();
        fs::write(listed.path().join("a"), "").unwrap();
        fs::write(listed.path().join("b"), "").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("count.txt");
        fs::write(&out, "previous content that must disappear\n").unwrap();

        let mut executor = Executor::new();
        let mut context = ShellContext::default();
        // total、.、..、a、b
        let line = format!(
            "ls -la {} | wc -l > {}",
            listed.path().display(),
            out.display()
        );
        let outcome = executor.execute(&parse(&line), &mut context);
        assert!(matches!(outcome, ExecutionOutcome::Foreground { .. }));
        assert_eq!(fs::read_to_string(&out).unwrap().trim(), "5");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_append_and_input_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let out = dir.path().join("out.txt");
        fs::write(&input, "from file\n").unwrap();
        fs::write(&out, "first\n").unwrap();

        let mut executor = Executor::new();
        let mut context = ShellContext::default();
        let line = format!("cat < {} >> {}", input.display(), out.display());
        executor.execute(&parse(&line), &mut context);
        assert_eq!(fs::read_to_string(&out).unwrap(), "first\nfrom file\n");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_error_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let err = dir.path().join("err.txt");
        let mut executor = Executor::new();
        let mut context = ShellContext::default();
        let line = format!("ls /definitely/not/here 2> {}", err.display());
        let outcome = executor.execute(&parse(&line), &mut context);
        assert_ne!(outcome.last_status(), Some(0));
        assert!(!fs::read_to_string(&err).unwrap().is_empty());
    }

    #[test]
    fn test_exec_failure_status() {
        let mut executor = Executor::new();
        let mut context = ShellContext::default();
        let outcome = executor.execute(&parse("definitely-not-a-real-program-xyz"), &mut context);
        assert_eq!(outcome.last_status(), Some(EXEC_FAILURE_STATUS));
        assert_eq!(context.last_status, EXEC_FAILURE_STATUS);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_exec_failure_message_follows_stderr_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let err = dir.path().join("err.txt");
        let mut executor = Executor::new();
        let mut context = ShellContext::default();
        let line = format!("definitely-not-a-real-program-xyz 2> {}", err.display());
        let outcome = executor.execute(&parse(&line), &mut context);
        assert_eq!(outcome.last_status(), Some(EXEC_FAILURE_STATUS));
        let message = fs::read_to_string(&err).unwrap();
        assert!(message.starts_with("egg: definitely-not-a-real-program-xyz: "));
        assert!(message.ends_with('\n'));
    }

    #[test]
    fn test_missing_input_file_aborts_before_fork() {
        let mut executor = Executor::with_spawner(RecordingSpawner::default());
        let mut context = ShellContext::default();
        let outcome = executor.execute(&parse("cat < /definitely/not/here.txt"), &mut context);
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed(ExecutionError::Redirect { .. })
        ));
        assert!(executor.spawner().requests.is_empty());
    }

    #[test]
    fn test_headless_stage_is_rejected() {
        let mut executor = Executor::with_spawner(RecordingSpawner::default());
        let mut context = ShellContext::default();
        let mut pipeline = parse("cat | wc -l");
        pipeline.stages[0].arguments.clear();
        pipeline.stages[0].input_redirect = Some("/dev/null".into());
        let outcome = executor.execute(&pipeline, &mut context);
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed(ExecutionError::EmptyStage)
        ));
        assert!(executor.spawner().requests.is_empty());
    }

    #[test]
    fn test_partial_fork_failure_terminates_started_stages() {
        let spawner = RecordingSpawner {
            fail_at: Some(1),
            ..Default::default()
        };
        let mut executor = Executor::with_spawner(spawner);
        let mut context = ShellContext::default();
        let outcome = executor.execute(&parse("sleep 30 | cat"), &mut context);
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed(ExecutionError::ForkFailed(_))
        ));

        let started = &executor.spawner().spawned;
        assert_eq!(started.len(), 1);
        // 已被 kill 并回收
        assert_eq!(kill(started[0], None), Err(Errno::ESRCH));
    }

    #[test]
    fn test_background_returns_without_waiting() {
        let mut executor = Executor::new();
        let mut context = ShellContext::default();
        let mut pipeline = parse("sleep 0.2");
        pipeline.background = true;

        let outcome = executor.execute(&pipeline, &mut context);
        let pid = match outcome {
            ExecutionOutcome::Background { pid } => pid,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(executor.jobs().get_jobs().len(), 1);
        assert_eq!(executor.jobs().get_jobs()[0].pid(), Some(pid));

        // 测试里没有 SIGCHLD 回收函数，手动回收
        assert_eq!(wait_child(pid), Some(0));
        executor.report_finished_jobs(&[pid]);
        assert!(executor.jobs().get_jobs().is_empty());
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_program_in_cwd_is_not_found_without_slash() {
        use crate::shell::testing::run_isolated;
        use std::env;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("cwd_only_prog");
        fs::write(&program, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

        let status = run_isolated(|| {
            env::set_current_dir(dir.path()).unwrap();
            env::set_var("PATH", "/usr/bin:/bin");
            let mut executor = Executor::new();
            let mut context = ShellContext::default();
            let bare = executor.execute(&parse("cwd_only_prog"), &mut context);
            let explicit = executor.execute(&parse("./cwd_only_prog"), &mut context);
            match (bare.last_status(), explicit.last_status()) {
                (Some(EXEC_FAILURE_STATUS), Some(0)) => 0,
                _ => 1,
            }
        });
        assert_eq!(status, 0);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_children_get_default_broken_pipe() {
        use crate::shell::signals;
        use crate::shell::testing::{run_isolated, sigpipe_ignored};

        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("status.txt");
        let line = format!("cat /proc/self/status > {}", report.display());

        let status = run_isolated(|| {
            signals::ignore_broken_pipe().unwrap();
            let mut executor = Executor::new();
            let mut context = ShellContext::default();
            executor.execute(&parse(&line), &mut context).last_status().unwrap_or(1)
        });
        assert_eq!(status, 0);
        let report = fs::read_to_string(&report).unwrap();
        assert_eq!(sigpipe_ignored(&report), Some(false));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_background_job_reaped_by_handler() {
        use crate::shell::signals;
        use crate::shell::testing::run_isolated;
        use std::thread;
        use std::time::{Duration, Instant};

        let status = run_isolated(|| {
            signals::install_child_reaper().unwrap();
            let mut executor = Executor::new();
            let mut context = ShellContext::default();
            let mut pipeline = parse("true");
            pipeline.background = true;
            let pid = match executor.execute(&pipeline, &mut context) {
                ExecutionOutcome::Background { pid } => pid,
                _ => return 1,
            };

            let deadline = Instant::now() + Duration::from_secs(5);
            let mut reaped = Vec::new();
            while !reaped.contains(&pid) {
                if Instant::now() > deadline {
                    return 2;
                }
                thread::sleep(Duration::from_millis(10));
                reaped.extend(signals::drain_reaped());
            }
            // 处理函数已经回收，不会留下僵尸
            if kill(pid, None) != Err(Errno::ESRCH) {
                return 3;
            }
            executor.report_finished_jobs(&reaped);
            if !executor.jobs().get_jobs().is_empty() {
                return 4;
            }
            0
        });
        assert_eq!(status, 0);
    }
}
