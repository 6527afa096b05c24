use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::path::Path;

use log::{debug, info, warn};
use thiserror::Error;

pub const MAX_USERS: usize = 100;
pub const MAX_CREDENTIAL_LINE: usize = 256;

pub const AUTH_SUCCESS: &str = "Authentication successful";
pub const AUTH_FAILED: &str = "Authentication failed";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("peer disconnected before sending credentials")]
    Disconnected,
    #[error("expected `<username> <password>`")]
    Malformed,
    #[error("invalid username or password for {0}")]
    Rejected(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// 取前两个空白分隔的字段，多余字段忽略
    pub fn parse(line: &str) -> Result<Self, AuthError> {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(username), Some(password)) => Ok(Self {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => Err(AuthError::Malformed),
        }
    }
}

/// 用户名到密码的表，启动时从 `username:password` 文件加载一次
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, String>,
}

impl CredentialStore {
    pub fn load(path: &Path) -> io::Result<Self> {
        let store = Self::from_reader(BufReader::new(File::open(path)?))?;
        info!("从 {} 加载了 {} 个用户", path.display(), store.len());
        Ok(store)
    }

    pub fn from_reader<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut users = HashMap::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((username, password)) = line.split_once(':') else {
                warn!("用户文件第 {} 行格式错误，已忽略", number + 1);
                continue;
            };
            if users.len() == MAX_USERS {
                warn!("用户数超过 {}，忽略第 {} 行之后的内容", MAX_USERS, number + 1);
                break;
            }
            users.insert(username.trim().to_string(), password.trim().to_string());
        }
        Ok(Self { users })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn verify(&self, credentials: &Credentials) -> bool {
        self.users
            .get(&credentials.username)
            .is_some_and(|password| *password == credentials.password)
    }
}

/// 逐字节读到 `\n` 为止，不会多读走后续的中继数据。去掉结尾的 `\r`。
pub fn read_line<R: Read>(reader: &mut R, limit: usize) -> Result<String, AuthError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) if line.is_empty() => return Err(AuthError::Disconnected),
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => {
                if line.len() == limit {
                    return Err(AuthError::LineTooLong(limit));
                }
                line.push(byte[0]);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// 一次认证：读一行凭据，回复成功或失败。失败时不重试。
pub fn authenticate<S: Read + Write>(
    stream: &mut S,
    store: &CredentialStore,
) -> Result<Credentials, AuthError> {
    let result = read_line(stream, MAX_CREDENTIAL_LINE)
        .and_then(|line| Credentials::parse(&line))
        .and_then(|credentials| {
            if store.verify(&credentials) {
                Ok(credentials)
            } else {
                Err(AuthError::Rejected(credentials.username))
            }
        });

    match &result {
        Ok(credentials) => {
            info!("用户 {} 认证成功", credentials.username);
            writeln!(stream, "{}", AUTH_SUCCESS)?;
        }
        Err(AuthError::Disconnected) => debug!("认证前连接已关闭"),
        Err(err) => {
            warn!("认证失败: {}", err);
            // 对端可能已经断开，回复失败与否都结束会话
            let _ = writeln!(stream, "{}", AUTH_FAILED);
        }
    }
    result
}
