use crate::shell::history::History;
use crate::utils::config::{Config, DEFAULT_PORT, DEFAULT_PROMPT};

/// shell 进程内的可变状态，显式传给执行器和内建命令
#[derive(Debug, Clone)]
pub struct ShellContext {
    pub prompt: String,
    pub history: History,
    /// `connect` 不带端口时使用
    pub default_port: u16,
    pub last_status: i32,
}

impl ShellContext {
    pub fn new(config: &Config) -> Self {
        Self {
            prompt: config.prompt.clone(),
            default_port: config.port,
            ..Self::default()
        }
    }

    pub fn set_hostname(&mut self, hostname: &str) {
        self.prompt = format!("[{}] $ ", hostname);
    }
}

impl Default for ShellContext {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            history: History::new(),
            default_port: DEFAULT_PORT,
            last_status: 0,
        }
    }
}
