use std::fs::File;
use std::io::{self, IsTerminal, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsFd, BorrowedFd};

use log::{debug, info, warn};
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};
use thiserror::Error;

use super::auth::{read_line, AuthError, AUTH_SUCCESS, MAX_CREDENTIAL_LINE};
use super::relay::{Relay, RelayOptions};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Rejected(String),
    #[error("terminal: {0}")]
    Terminal(#[from] nix::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 作用域内修改 stdin 的终端属性，离开时恢复
struct TerminalModeGuard {
    original: Termios,
}

impl TerminalModeGuard {
    fn apply(change: impl FnOnce(&mut Termios)) -> Result<Option<Self>, ClientError> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Ok(None);
        }
        let original = termios::tcgetattr(stdin.as_fd())?;
        let mut modified = original.clone();
        change(&mut modified);
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &modified)?;
        Ok(Some(Self { original }))
    }

    fn raw() -> Result<Option<Self>, ClientError> {
        Self::apply(termios::cfmakeraw)
    }

    fn no_echo() -> Result<Option<Self>, ClientError> {
        Self::apply(|t| t.local_flags.remove(LocalFlags::ECHO))
    }
}

impl Drop for TerminalModeGuard {
    fn drop(&mut self) {
        if let Err(err) = termios::tcsetattr(io::stdin().as_fd(), SetArg::TCSANOW, &self.original)
        {
            warn!("恢复终端属性失败: {}", err);
        }
    }
}

/// 本地终端：从 stdin 读，往 stdout 写。
///
/// stdin 用不带缓冲的副本读取，poll 看到的就是实际剩下的数据。
struct LocalTerminal {
    input: File,
    output: io::Stdout,
}

impl LocalTerminal {
    fn new() -> io::Result<Self> {
        let input = File::from(io::stdin().as_fd().try_clone_to_owned()?);
        Ok(Self {
            input,
            output: io::stdout(),
        })
    }
}

impl Read for LocalTerminal {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for LocalTerminal {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.output.write(buf)?;
        self.output.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
}

impl AsFd for LocalTerminal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.input.as_fd()
    }
}

fn prompt(label: &str, hidden: bool) -> Result<String, ClientError> {
    print!("{}", label);
    io::stdout().flush()?;
    let _guard = if hidden {
        TerminalModeGuard::no_echo()?
    } else {
        None
    };
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    if hidden {
        println!();
    }
    Ok(line.trim().to_string())
}

/// 发送凭据并读取一行回复，回复原样返回给调用方显示
pub fn login<S: Read + Write>(
    stream: &mut S,
    username: &str,
    password: &str,
) -> Result<String, ClientError> {
    writeln!(stream, "{} {}", username, password)?;
    stream.flush()?;
    let response = read_line(stream, MAX_CREDENTIAL_LINE)?;
    if response == AUTH_SUCCESS {
        Ok(response)
    } else {
        Err(ClientError::Rejected(response))
    }
}

/// `connect` 内建命令：登录远程 shell，之后本地终端进入原始模式直接中继
pub fn connect(host: &str, port: u16) -> Result<(), ClientError> {
    let addr = format!("{}:{}", host, port);
    let mut stream = TcpStream::connect((host, port)).map_err(|source| ClientError::Connect {
        addr: addr.clone(),
        source,
    })?;
    info!("已连接到 {}", addr);

    let username = prompt("Username: ", false)?;
    let password = prompt("Password: ", true)?;
    let response = login(&mut stream, &username, &password)?;
    println!("{}", response);

    let mut terminal = LocalTerminal::new()?;
    let end = {
        let _raw = TerminalModeGuard::raw()?;
        Relay::new(&mut stream, &mut terminal, &RelayOptions::default()).run()?
    };
    debug!("远程会话结束: {:?}", end);
    println!("\nConnection to {} closed.", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_login_sends_one_line() {
        let (mut client, mut server) = UnixStream::pair().unwrap();
        server.write_all(b"Authentication successful\n").unwrap();
        assert_eq!(
            login(&mut client, "alice", "wonderland").unwrap(),
            "Authentication successful"
        );
        assert_eq!(
            read_line(&mut server, MAX_CREDENTIAL_LINE).unwrap(),
            "alice wonderland"
        );
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_login_rejected() {
        let (mut client, mut server) = UnixStream::pair().unwrap();
        server.write_all(b"Authentication failed\n").unwrap();
        match login(&mut client, "alice", "nope") {
            Err(ClientError::Rejected(message)) => assert_eq!(message, "Authentication failed"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_connect_refused() {
        // 端口 1 上通常没有服务
        assert!(matches!(
            connect("127.0.0.1", 1),
            Err(ClientError::Connect { .. })
        ));
    }
}
