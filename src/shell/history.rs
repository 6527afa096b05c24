use std::collections::VecDeque;

pub const HISTORY_SIZE: usize = 100;

/// `!` 开头输入的展开结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replay {
    /// 不是历史回放
    NotReplay,
    /// 找到了要重新执行的命令
    Command(String),
    /// 找不到对应的历史记录，附带要显示的提示
    Missing(&'static str),
}

/// 带编号的命令历史。编号从 1 开始，超出容量后继续递增。
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: VecDeque<String>,
    total: usize,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 记录一条命令；空命令和以 `!` 开头的命令不记录
    pub fn record(&mut self, command: &str) {
        let command = command.trim();
        if command.is_empty() || command.starts_with('!') {
            return;
        }
        if self.entries.len() == HISTORY_SIZE {
            self.entries.pop_front();
        }
        self.entries.push_back(command.to_string());
        self.total += 1;
    }

    /// 最早一条仍保留的记录的编号
    fn first_number(&self) -> usize {
        self.total - self.entries.len() + 1
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, &str)> {
        let first = self.first_number();
        self.entries
            .iter()
            .enumerate()
            .map(move |(i, command)| (first + i, command.as_str()))
    }

    pub fn get(&self, number: usize) -> Option<&str> {
        let first = self.first_number();
        if number < first {
            return None;
        }
        self.entries.get(number - first).map(String::as_str)
    }

    /// 展开 `!`、`!n` 和 `!prefix`
    pub fn replay(&self, line: &str) -> Replay {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('!') else {
            return Replay::NotReplay;
        };

        if rest.is_empty() {
            return match self.entries.back() {
                Some(command) => Replay::Command(command.clone()),
                None => Replay::Missing("No commands in history."),
            };
        }

        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            return match digits.parse::<usize>().ok().and_then(|n| self.get(n)) {
                Some(command) => Replay::Command(command.to_string()),
                None => Replay::Missing("No such command in history."),
            };
        }

        match self.entries.iter().rev().find(|command| command.starts_with(rest)) {
            Some(command) => Replay::Command(command.clone()),
            None => Replay::Missing("No matching command found in history."),
        }
    }
}
