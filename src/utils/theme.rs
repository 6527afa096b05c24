use colored::Colorize;

type Style = Box<dyn Fn(&str) -> String>;

pub struct Theme {
    pub error_style: Style,
    pub warning_style: Style,
    pub success_style: Style,
    pub prompt_style: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Theme {
            error_style: Box::new(|s| s.bright_red().to_string()),
            warning_style: Box::new(|s| s.yellow().to_string()),
            success_style: Box::new(|s| s.bright_magenta().to_string()),
            prompt_style: Box::new(|s| s.bright_blue().to_string()),
        }
    }
}

impl Theme {
    pub fn new() -> Self {
        Self::default()
    }

    /// 不带颜色的主题，输出不是终端时使用
    pub fn plain() -> Self {
        Theme {
            error_style: Box::new(|s| s.to_string()),
            warning_style: Box::new(|s| s.to_string()),
            success_style: Box::new(|s| s.to_string()),
            prompt_style: Box::new(|s| s.to_string()),
        }
    }

    pub fn get_message(&self, key: &str) -> &'static str {
        match key {
            "welcome" => "Welcome to egg shell. Type `help` for the builtin commands.",
            "exit" => "Exiting shell...",
            "eof_signal" => "EOF received, leaving egg shell.",
            "interrupt_signal" => "Use `exit` to leave the shell.",
            "error" => "error",
            _ => "",
        }
    }

    pub fn error(&self, message: &str) -> String {
        (self.error_style)(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_theme_leaves_text_untouched() {
        let theme = Theme::plain();
        assert_eq!(theme.error("egg: oops"), "egg: oops");
        assert_eq!((theme.prompt_style)("% "), "% ");
    }

    #[test]
    fn test_unknown_message_is_empty() {
        assert_eq!(Theme::new().get_message("missing"), "");
        assert!(!Theme::new().get_message("welcome").is_empty());
    }
}
