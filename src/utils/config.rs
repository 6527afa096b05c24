use dotenv::dotenv;
use log::warn;
use rustyline::EditMode;
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::utils::path::{basename, find_file_in_path};

pub const DEFAULT_PORT: u16 = 40210;
pub const DEFAULT_PROMPT: &str = "% ";

pub struct Config {
    pub name: String,
    pub prompt: String,
    pub history_file: PathBuf,
    pub editor_mode: String,
    pub logger_level: String,
    pub logger_dir: PathBuf,
    pub port: u16,
    pub users_file: PathBuf,
    pub shell_path: PathBuf,
    pub term: String,
    pub strip_carriage_returns: bool,
}

impl Config {
    fn get_config_dir() -> PathBuf {
        if let Ok(home) = env::var("HOME") {
            PathBuf::from(home).join(".config/egg")
        } else {
            PathBuf::from("tmp")
        }
    }

    /// 默认 shell：与当前可执行文件同目录的 `egg`，其次是 PATH 里的 `egg`
    fn default_shell_path() -> PathBuf {
        if let Ok(exe) = env::current_exe() {
            let sibling = exe.with_file_name("egg");
            if sibling.is_file() && basename(&exe.to_string_lossy()) != "egg" {
                return sibling;
            }
        }
        let found = find_file_in_path("egg", true);
        if found.is_empty() {
            PathBuf::from("/bin/sh")
        } else {
            PathBuf::from(found)
        }
    }

    pub(crate) fn default() -> Self {
        let config_dir = Self::get_config_dir();
        Config {
            name: String::from("egg"),
            prompt: String::from(DEFAULT_PROMPT),
            history_file: config_dir.join(".egg_history"),
            editor_mode: String::from("emacs"),
            logger_level: String::from("info"),
            logger_dir: config_dir.join("logs"),
            port: DEFAULT_PORT,
            users_file: PathBuf::from("users.txt"),
            shell_path: Self::default_shell_path(),
            term: String::from("xterm-256color"),
            strip_carriage_returns: false,
        }
    }

    pub fn new() -> Self {
        // 优先加载环境变量
        if cfg!(debug_assertions) {
            dotenv::from_filename(".env.development").ok();
        } else {
            dotenv().ok();
        }

        let mut config = Config::default();

        if let Ok(prompt) = env::var("EGG_PROMPT") {
            config.prompt = prompt;
        }

        if let Ok(editor) = env::var("EGG_EDITOR") {
            config.editor_mode = editor;
        }

        if let Ok(history) = env::var("EGG_HISTORY") {
            config.history_file = PathBuf::from(history);
        }

        if let Ok(level) = env::var("EGG_LOG_LEVEL") {
            config.logger_level = level;
        }

        if let Ok(dir) = env::var("EGG_LOG_DIR") {
            config.logger_dir = PathBuf::from(dir);
        }

        if let Ok(port) = env::var("EGG_PORT") {
            match port.parse::<u16>() {
                Ok(port) if port > 0 => config.port = port,
                _ => warn!("EGG_PORT 无效，使用默认端口 {}: {}", DEFAULT_PORT, port),
            }
        }

        if let Ok(users) = env::var("EGG_USERS") {
            config.users_file = PathBuf::from(users);
        }

        if let Ok(shell) = env::var("EGG_SHELL") {
            config.shell_path = PathBuf::from(shell);
        }

        if let Ok(term) = env::var("EGG_TERM") {
            config.term = term;
        }

        if let Ok(strip) = env::var("EGG_STRIP_CR") {
            config.strip_carriage_returns = matches!(
                strip.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        // 确保历史文件目录存在
        if let Some(parent) = config.history_file.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!("无法创建历史记录目录 {}: {}", parent.display(), err);
            }
        }

        config
    }

    pub fn get_edit_mode(&self) -> EditMode {
        match self.editor_mode.to_lowercase().as_str() {
            "vi" => EditMode::Vi,
            _ => EditMode::Emacs,
        }
    }
}
