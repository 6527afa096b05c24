use std::fmt;

/// 管道中的一个阶段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    /// argv，第 0 个就是程序名
    pub arguments: Vec<String>,
    pub input_redirect: Option<String>,
    pub output_redirect: Option<String>,
    pub error_redirect: Option<String>,
    /// 只有 `>>` 时为真
    pub append_output: bool,
}

impl Command {
    pub fn program(&self) -> Option<&str> {
        self.arguments.first().map(String::as_str)
    }

    pub fn has_redirections(&self) -> bool {
        self.input_redirect.is_some()
            || self.output_redirect.is_some()
            || self.error_redirect.is_some()
    }
}

/// 一条管道：一个或多个用 `|` 连接的阶段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Command>,
    pub background: bool,
}

impl Pipeline {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn head(&self) -> Option<&Command> {
        self.stages.first()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut words: Vec<String> = self
            .arguments
            .iter()
            .map(|arg| shell_words::quote(arg).into_owned())
            .collect();
        if let Some(path) = &self.input_redirect {
            words.push(format!("< {}", shell_words::quote(path)));
        }
        if let Some(path) = &self.output_redirect {
            let op = if self.append_output { ">>" } else { ">" };
            words.push(format!("{} {}", op, shell_words::quote(path)));
        }
        if let Some(path) = &self.error_redirect {
            words.push(format!("2> {}", shell_words::quote(path)));
        }
        f.write_str(&words.join(" "))
    }
}

/// 规范形式，可以再次被解析成相同的结构（不含后台标记）
impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_is_first_argument() {
        let command = Command {
            arguments: vec!["grep".into(), "x".into()],
            ..Default::default()
        };
        assert_eq!(command.program(), Some("grep"));
        assert_eq!(Command::default().program(), None);
    }

    #[test]
    fn test_display_quotes_and_redirections() {
        let pipeline = Pipeline {
            stages: vec![
                Command {
                    arguments: vec!["echo".into(), "a b".into()],
                    error_redirect: Some("err.log".into()),
                    ..Default::default()
                },
                Command {
                    arguments: vec!["tee".into()],
                    output_redirect: Some("out file".into()),
                    append_output: true,
                    ..Default::default()
                },
            ],
            background: true,
        };
        assert_eq!(
            pipeline.to_string(),
            "echo 'a b' 2> err.log | tee >> 'out file'"
        );
    }
}
