use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::AsFd;

use log::{debug, trace, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

pub const BUFFER_SIZE: usize = 4096;
pub const EXIT_KEYWORDS: &[&str] = &["exit", "quit", "logout"];

/// 行缓冲上限，超过后丢弃当前行，只影响关键字识别
const MAX_TRACKED_LINE: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct RelayOptions {
    /// 客户端输入整行等于其中之一时结束会话
    pub exit_keywords: Vec<String>,
    /// 转发给终端前去掉 `\r`，兼容 telnet 一类客户端
    pub strip_carriage_returns: bool,
}

impl RelayOptions {
    pub fn server(strip_carriage_returns: bool) -> Self {
        Self {
            exit_keywords: EXIT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            strip_carriage_returns,
        }
    }
}

/// 一次等待返回的可读事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEvent {
    ClientReadable,
    TerminalReadable,
}

/// 中继结束的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnd {
    ClientClosed,
    TerminalClosed,
    ExitRequested(String),
}

/// 在客户端连接和终端之间双向转发字节，直到任意一端关闭
pub struct Relay<'a, C, T> {
    client: &'a mut C,
    terminal: &'a mut T,
    options: &'a RelayOptions,
    line: Vec<u8>,
    // 当前行超长，丢弃到下一个换行为止
    overflowed: bool,
    buffer: [u8; BUFFER_SIZE],
}

impl<'a, C, T> Relay<'a, C, T>
where
    C: Read + Write + AsFd,
    T: Read + Write + AsFd,
{
    pub fn new(client: &'a mut C, terminal: &'a mut T, options: &'a RelayOptions) -> Self {
        Self {
            client,
            terminal,
            options,
            line: Vec::new(),
            overflowed: false,
            buffer: [0; BUFFER_SIZE],
        }
    }

    pub fn run(&mut self) -> io::Result<RelayEnd> {
        loop {
            for event in self.wait()? {
                if let Some(end) = self.dispatch(event)? {
                    debug!("中继结束: {:?}", end);
                    return Ok(end);
                }
            }
        }
    }

    /// 阻塞直到至少一端可读。挂断和错误也算可读，由随后的 read 报告。
    fn wait(&self) -> io::Result<Vec<RelayEvent>> {
        let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
        let mut fds = [
            PollFd::new(self.client.as_fd(), PollFlags::POLLIN),
            PollFd::new(self.terminal.as_fd(), PollFlags::POLLIN),
        ];
        loop {
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
        }

        let mut events = Vec::with_capacity(2);
        if fds[1].revents().is_some_and(|r| r.intersects(ready)) {
            events.push(RelayEvent::TerminalReadable);
        }
        if fds[0].revents().is_some_and(|r| r.intersects(ready)) {
            events.push(RelayEvent::ClientReadable);
        }
        Ok(events)
    }

    fn dispatch(&mut self, event: RelayEvent) -> io::Result<Option<RelayEnd>> {
        match event {
            RelayEvent::TerminalReadable => Ok(self.forward_terminal_output()),
            RelayEvent::ClientReadable => Ok(self.forward_client_input()),
        }
    }

    fn forward_terminal_output(&mut self) -> Option<RelayEnd> {
        let n = match read_some(&mut *self.terminal, &mut self.buffer) {
            Some(n) => n,
            None => return Some(RelayEnd::TerminalClosed),
        };
        trace!("终端 -> 客户端 {} 字节", n);
        if let Err(err) = self.client.write_all(&self.buffer[..n]) {
            warn!("写入客户端失败: {}", err);
            return Some(RelayEnd::ClientClosed);
        }
        None
    }

    fn forward_client_input(&mut self) -> Option<RelayEnd> {
        let n = match read_some(&mut *self.client, &mut self.buffer) {
            Some(n) => n,
            None => return Some(RelayEnd::ClientClosed),
        };
        trace!("客户端 -> 终端 {} 字节", n);

        let input: Vec<u8> = if self.options.strip_carriage_returns {
            self.buffer[..n].iter().copied().filter(|&b| b != b'\r').collect()
        } else {
            self.buffer[..n].to_vec()
        };

        if let Err(err) = self.terminal.write_all(&input) {
            warn!("写入终端失败: {}", err);
            return Some(RelayEnd::TerminalClosed);
        }

        self.track_line(&input).map(RelayEnd::ExitRequested)
    }

    /// 跟踪客户端正在输入的行，遇到换行时检查退出关键字
    fn track_line(&mut self, input: &[u8]) -> Option<String> {
        if self.options.exit_keywords.is_empty() {
            return None;
        }
        for &byte in input {
            match byte {
                b'\r' | b'\n' if self.overflowed => {
                    self.overflowed = false;
                    self.line.clear();
                }
                b'\r' | b'\n' => {
                    let line = String::from_utf8_lossy(&self.line).trim().to_string();
                    self.line.clear();
                    if self.options.exit_keywords.iter().any(|k| *k == line) {
                        return Some(line);
                    }
                }
                _ if self.overflowed => {}
                // 退格
                0x08 | 0x7f => {
                    self.line.pop();
                }
                _ if self.line.len() < MAX_TRACKED_LINE => self.line.push(byte),
                _ => {
                    self.line.clear();
                    self.overflowed = true;
                }
            }
        }
        None
    }
}

/// 读取一次；0 字节或出错（包括 PTY 另一端关闭时的 EIO）都视为关闭
fn read_some<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Option<usize> {
    loop {
        match reader.read(buffer) {
            Ok(0) => return None,
            Ok(n) => return Some(n),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!("读取失败: {}", err);
                return None;
            }
        }
    }
}
