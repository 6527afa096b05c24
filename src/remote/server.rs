use std::ffi::CString;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::process;

use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{close, dup2, execve, fork, setsid, ForkResult, Pid};
use thiserror::Error;

use super::auth::{self, AuthError, CredentialStore};
use super::relay::{Relay, RelayEnd, RelayOptions};
use crate::shell::signals;
use crate::utils::config::Config;
use crate::utils::path::basename;

pub const MAX_CLIENTS: usize = 100;
pub const SESSION_ENDED: &str = "Session ended.";

const PTY_COLUMNS: u16 = 80;
const PTY_ROWS: u16 = 24;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("load credentials {path}: {source}")]
    Credentials {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("signal setup: {0}")]
    Signal(#[source] Errno),
    #[error("openpty: {0}")]
    Pty(#[source] Errno),
    #[error("fork: {0}")]
    Fork(#[source] Errno),
    #[error("invalid shell path: {0}")]
    InvalidShell(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Listening,
    Accepted,
    Authenticating,
    Authenticated,
    Relaying,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Listening => "listening",
            SessionState::Accepted => "accepted",
            SessionState::Authenticating => "authenticating",
            SessionState::Authenticated => "authenticated",
            SessionState::Relaying => "relaying",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// 会话结束的方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// 客户端没有通过认证，没有分配终端
    Rejected,
    /// 中继结束后终端和 shell 已经清理
    Ended(RelayEnd),
}

/// 已经接在终端上的 shell 进程
pub struct ShellProcess<T> {
    pub terminal: T,
    pub pid: Pid,
}

/// 为一个已认证的客户端启动 shell
pub trait ShellSpawner {
    type Terminal: Read + Write + AsFd;

    fn spawn_shell(&mut self) -> Result<ShellProcess<Self::Terminal>, ServerError>;
}

/// openpty + fork，shell 把 PTY 从端当作控制终端
#[derive(Debug, Clone)]
pub struct PtyShellSpawner {
    pub shell_path: PathBuf,
    pub term: String,
}

impl PtyShellSpawner {
    pub fn new(config: &Config) -> Self {
        Self {
            shell_path: config.shell_path.clone(),
            term: config.term.clone(),
        }
    }

    /// 继承当前环境，替换 TERM
    fn environment(&self) -> Result<Vec<CString>, ServerError> {
        let mut env: Vec<CString> = std::env::vars_os()
            .filter(|(key, _)| key != "TERM")
            .filter_map(|(key, value)| {
                let mut entry = key.as_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                CString::new(entry).ok()
            })
            .collect();
        let term = CString::new(format!("TERM={}", self.term))
            .map_err(|_| ServerError::InvalidShell(self.term.clone()))?;
        env.push(term);
        Ok(env)
    }
}

impl ShellSpawner for PtyShellSpawner {
    type Terminal = File;

    fn spawn_shell(&mut self) -> Result<ShellProcess<File>, ServerError> {
        let display = self.shell_path.to_string_lossy().into_owned();
        let invalid = || ServerError::InvalidShell(display.clone());
        let path = CString::new(self.shell_path.as_os_str().as_bytes()).map_err(|_| invalid())?;
        let argv0 = CString::new(basename(&display).as_bytes()).map_err(|_| invalid())?;
        let env = self.environment()?;

        let winsize = Winsize {
            ws_row: PTY_ROWS,
            ws_col: PTY_COLUMNS,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let pty = openpty(Some(&winsize), None).map_err(ServerError::Pty)?;

        match unsafe { fork() }.map_err(ServerError::Fork)? {
            ForkResult::Child => {
                let _ = close(pty.master.as_raw_fd());
                if setsid().is_err() {
                    unsafe { libc::_exit(1) };
                }
                let slave = pty.slave.as_raw_fd();
                if unsafe { libc::ioctl(slave, libc::TIOCSCTTY as _, 0) } < 0 {
                    unsafe { libc::_exit(1) };
                }
                for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
                    if dup2(slave, target).is_err() {
                        unsafe { libc::_exit(1) };
                    }
                }
                if slave > libc::STDERR_FILENO {
                    let _ = close(slave);
                }
                // 服务器忽略了 SIGPIPE，不能带进 shell
                let _ = signals::restore_default_broken_pipe();
                let _ = execve(&path, &[argv0], &env);
                unsafe { libc::_exit(127) }
            }
            ForkResult::Parent { child } => {
                info!("shell {} 已启动，pid {}", display, child);
                drop(pty.slave);
                Ok(ShellProcess {
                    terminal: File::from(pty.master),
                    pid: child,
                })
            }
        }
    }
}

/// 一个客户端连接从接受到关闭的全过程
struct Session<'a, C, S> {
    client: C,
    peer: String,
    state: SessionState,
    credentials: &'a CredentialStore,
    spawner: &'a mut S,
    options: &'a RelayOptions,
}

impl<'a, C, S> Session<'a, C, S>
where
    C: Read + Write + AsFd,
    S: ShellSpawner,
{
    fn transition(&mut self, next: SessionState) {
        debug!("会话 {}: {} -> {}", self.peer, self.state, next);
        self.state = next;
    }

    fn run(mut self) -> Result<SessionOutcome, ServerError> {
        self.transition(SessionState::Authenticating);
        match auth::authenticate(&mut self.client, self.credentials) {
            Ok(credentials) => {
                info!("{} 以用户 {} 登录", self.peer, credentials.username);
            }
            Err(AuthError::Io(err)) => {
                self.transition(SessionState::Closed);
                return Err(err.into());
            }
            Err(err) => {
                info!("{} 认证失败: {}", self.peer, err);
                self.transition(SessionState::Closed);
                return Ok(SessionOutcome::Rejected);
            }
        }
        self.transition(SessionState::Authenticated);

        let ShellProcess { mut terminal, pid } = match self.spawner.spawn_shell() {
            Ok(shell) => shell,
            Err(err) => {
                error!("{} 无法启动 shell: {}", self.peer, err);
                self.transition(SessionState::Closed);
                return Err(err);
            }
        };

        self.transition(SessionState::Relaying);
        let end = Relay::new(&mut self.client, &mut terminal, self.options).run();
        drop(terminal);
        terminate_shell(pid);

        match &end {
            Ok(reason) => info!("{} 会话结束: {:?}", self.peer, reason),
            Err(err) => warn!("{} 中继出错: {}", self.peer, err),
        }
        let _ = writeln!(self.client, "{}", SESSION_ENDED);
        self.transition(SessionState::Closed);
        Ok(SessionOutcome::Ended(end?))
    }
}

fn terminate_shell(pid: Pid) {
    if let Err(err) = kill(pid, Signal::SIGKILL) {
        debug!("kill shell {} 失败: {}", pid, err);
    }
    match waitpid(pid, None) {
        Ok(status) => debug!("shell {} 已回收: {:?}", pid, status),
        Err(err) => debug!("waitpid shell {} 失败: {}", pid, err),
    }
}

/// 处理一个已接受的连接：认证一次，成功后启动 shell 并中继到任意一端关闭。
/// 返回时客户端连接已关闭。
pub fn handle_client<C, S>(
    client: C,
    peer: &str,
    credentials: &CredentialStore,
    spawner: &mut S,
    options: &RelayOptions,
) -> Result<SessionOutcome, ServerError>
where
    C: Read + Write + AsFd,
    S: ShellSpawner,
{
    let mut session = Session {
        client,
        peer: peer.to_string(),
        state: SessionState::Listening,
        credentials,
        spawner,
        options,
    };
    session.transition(SessionState::Accepted);
    session.run()
}

#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub pid: Pid,
    pub peer: SocketAddr,
}

/// 处理客户端的子进程表，只由 accept 循环读写
#[derive(Debug, Default)]
pub struct ClientTable {
    clients: Vec<ClientRecord>,
}

impl ClientTable {
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn clients(&self) -> &[ClientRecord] {
        &self.clients
    }

    /// 表满时返回 false，连接照常处理，只是不再记录
    pub fn insert(&mut self, record: ClientRecord) -> bool {
        if self.clients.len() >= MAX_CLIENTS {
            return false;
        }
        self.clients.push(record);
        true
    }

    /// 去掉已回收的进程，再用空信号探测剩下的是否还活着
    pub fn prune(&mut self, reaped: &[Pid]) {
        self.clients.retain(|client| {
            !reaped.contains(&client.pid) && kill(client.pid, None) != Err(Errno::ESRCH)
        });
    }
}

pub struct Server<S = PtyShellSpawner> {
    listener: TcpListener,
    port: u16,
    credentials: CredentialStore,
    spawner: S,
    options: RelayOptions,
    clients: ClientTable,
}

impl Server<PtyShellSpawner> {
    pub fn bind(config: &Config, port: u16) -> Result<Self, ServerError> {
        let credentials =
            CredentialStore::load(&config.users_file).map_err(|source| ServerError::Credentials {
                path: config.users_file.display().to_string(),
                source,
            })?;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|source| ServerError::Bind { port, source })?;
        Ok(Self::with_listener(
            listener,
            credentials,
            PtyShellSpawner::new(config),
            RelayOptions::server(config.strip_carriage_returns),
        )?)
    }
}

impl<S: ShellSpawner> Server<S> {
    pub fn with_listener(
        listener: TcpListener,
        credentials: CredentialStore,
        spawner: S,
        options: RelayOptions,
    ) -> io::Result<Self> {
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            credentials,
            spawner,
            options,
            clients: ClientTable::default(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// accept 循环，每个客户端 fork 一个处理进程
    pub fn serve(&mut self) -> Result<(), ServerError> {
        signals::ignore_broken_pipe().map_err(ServerError::Signal)?;
        signals::install_child_reaper().map_err(ServerError::Signal)?;
        info!("服务器监听端口 {}", self.port);

        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("accept 失败: {}", err);
                    continue;
                }
            };
            info!("收到来自 {} 的连接", peer);
            self.clients.prune(&signals::drain_reaped());

            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    // 处理进程自己等待 shell，不用回收函数
                    if let Err(err) = signals::restore_default_child_signal() {
                        warn!("恢复 SIGCHLD 失败: {}", err);
                    }
                    let status = match handle_client(
                        stream,
                        &peer.to_string(),
                        &self.credentials,
                        &mut self.spawner,
                        &self.options,
                    ) {
                        Ok(_) => 0,
                        Err(err) => {
                            error!("{} 会话失败: {}", peer, err);
                            1
                        }
                    };
                    process::exit(status);
                }
                Ok(ForkResult::Parent { child }) => {
                    debug!("客户端 {} 由进程 {} 处理", peer, child);
                    if !self.clients.insert(ClientRecord { pid: child, peer }) {
                        warn!("客户端表已满，{} 不再记录", peer);
                    }
                }
                Err(errno) => error!("fork 失败: {}", errno),
            }
        }
    }
}
