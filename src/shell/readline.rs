use std::path::PathBuf;

use log::{debug, warn};
pub use rustyline::error::ReadlineError;
use rustyline::history::FileHistory;
use rustyline::{CompletionType, Config as EditorConfig, Editor};

use crate::utils::config::Config;

/// 交互输入：行编辑、方向键历史，历史持久化到 `history_file`
pub struct LineEditor {
    editor: Editor<(), FileHistory>,
    history_file: PathBuf,
}

impl LineEditor {
    /// 创建编辑器并载入已有历史；历史文件不存在不算错误
    pub fn new(config: &Config) -> Result<Self, ReadlineError> {
        let editor_config = EditorConfig::builder()
            .history_ignore_space(true)
            .completion_type(CompletionType::List)
            .edit_mode(config.get_edit_mode())
            .build();
        let mut editor = Editor::with_config(editor_config)?;

        let history_file = config.history_file.clone();
        match editor.load_history(&history_file) {
            Ok(()) => debug!("载入历史 {}", history_file.display()),
            Err(err) => debug!("没有可载入的历史 {}: {}", history_file.display(), err),
        }
        Ok(Self {
            editor,
            history_file,
        })
    }

    pub fn read(&mut self, prompt: &str) -> Result<String, ReadlineError> {
        self.editor.readline(prompt)
    }

    /// 加入方向键历史；以空格开头的行不记录
    pub fn remember(&mut self, line: &str) {
        if let Err(err) = self.editor.add_history_entry(line) {
            warn!("无法加入行编辑历史: {}", err);
        }
    }

    pub fn save(&mut self) {
        if let Err(err) = self.editor.save_history(&self.history_file) {
            warn!("保存历史失败 {}: {}", self.history_file.display(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustyline::history::History;
    use std::fs;

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_history_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.history_file = dir.path().join("history");

        let mut editor = LineEditor::new(&config).unwrap();
        assert_eq!(editor.editor.history().len(), 0);
        editor.remember("echo kept");
        editor.remember(" echo hidden");
        editor.save();

        let saved = fs::read_to_string(&config.history_file).unwrap();
        assert!(saved.contains("echo kept"));
        assert!(!saved.contains("hidden"));

        let reopened = LineEditor::new(&config).unwrap();
        assert_eq!(reopened.editor.history().len(), 1);
    }
}
