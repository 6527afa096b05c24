use log::{debug, error, info, warn};
use std::error::Error;
use std::io::{self, IsTerminal, Write};

use crate::shell::context::ShellContext;
use crate::shell::executor::{ExecutionOutcome, Executor, ProcessSpawner};
use crate::shell::history::Replay;
use crate::shell::parser::{parse_segment, split_top_level};
use crate::shell::readline::{LineEditor, ReadlineError};
use crate::shell::signals;
use crate::utils::config::Config;
use crate::utils::theme::Theme;

/// 每行输入执行完之后 read-eval 循环是否继续
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Exit,
}

/// 解析并执行一整行输入：按 `;`/`&` 拆分后逐段执行。
///
/// 某一段解析失败时丢弃该行剩余部分；`exit` 会让后面的段不再执行。
pub fn parse_and_execute<S: ProcessSpawner>(
    line: &str,
    context: &mut ShellContext,
    executor: &mut Executor<S>,
) -> LoopControl {
    for segment in split_top_level(line) {
        let pipeline = match parse_segment(&segment) {
            Ok(Some(pipeline)) => pipeline,
            Ok(None) => continue,
            Err(err) => {
                debug!("解析失败 {:?}: {}", segment.text, err);
                eprintln!("egg: {}", err);
                context.last_status = 2;
                return LoopControl::Continue;
            }
        };

        debug!("执行: {}", pipeline);
        match executor.execute(&pipeline, context) {
            ExecutionOutcome::Exit => return LoopControl::Exit,
            ExecutionOutcome::Failed(err) => eprintln!("egg: {}", err),
            _ => {}
        }
    }
    LoopControl::Continue
}

pub struct Shell {
    theme: Theme,
    editor: LineEditor,
    context: ShellContext,
    executor: Executor,
}

impl Shell {
    pub fn new(config: &Config) -> Result<Self, ReadlineError> {
        let theme = if io::stdout().is_terminal() {
            Theme::new()
        } else {
            Theme::plain()
        };
        Ok(Self {
            theme,
            editor: LineEditor::new(config)?,
            context: ShellContext::new(config),
            executor: Executor::new(),
        })
    }

    pub fn run(&mut self) -> Result<(), Box<dyn Error>> {
        debug!("初始化 egg shell...");

        // Ctrl-C、Ctrl-\、Ctrl-Z 不会结束 shell
        signals::ignore_keyboard_signals()?;
        // 后台子进程由 SIGCHLD 回收
        signals::install_child_reaper()?;

        println!(
            "{}",
            (self.theme.success_style)(self.theme.get_message("welcome"))
        );
        debug!("egg shell 准备就绪...");

        self.run_loop()?;
        self.editor.save();

        println!(
            "{}",
            (self.theme.success_style)(self.theme.get_message("exit"))
        );
        debug!("退出 egg shell...");
        Ok(())
    }

    fn run_loop(&mut self) -> Result<(), Box<dyn Error>> {
        loop {
            self.executor
                .report_finished_jobs(&signals::drain_reaped());
            io::stdout().flush()?;
            let prompt = (self.theme.prompt_style)(&self.context.prompt);

            match self.editor.read(&prompt) {
                Ok(line) => {
                    if self.handle_input(&line) == LoopControl::Exit {
                        info!("用户请求退出");
                        break;
                    }
                }
                Err(ReadlineError::Eof) => {
                    warn!("接收到 EOF 信号，退出 egg shell...");
                    println!(
                        "\n{}",
                        (self.theme.warning_style)(self.theme.get_message("eof_signal"))
                    );
                    break;
                }
                Err(ReadlineError::Interrupted) => {
                    debug!("接收到中断信号...");
                    println!(
                        "\n{}",
                        (self.theme.warning_style)(self.theme.get_message("interrupt_signal"))
                    );
                }
                Err(err) => {
                    error!("读取输入失败: {}", err);
                    eprintln!("{}: {}", self.theme.error(self.theme.get_message("error")), err);
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    fn handle_input(&mut self, line: &str) -> LoopControl {
        let line = line.trim();
        if line.is_empty() {
            return LoopControl::Continue;
        }

        let command = match self.context.history.replay(line) {
            Replay::NotReplay => line.to_string(),
            Replay::Command(command) => {
                println!("{}", command);
                command
            }
            Replay::Missing(message) => {
                println!("{}", message);
                return LoopControl::Continue;
            }
        };

        self.editor.remember(&command);
        self.context.history.record(&command);

        parse_and_execute(&command, &mut self.context, &mut self.executor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_blank_lines_do_nothing() {
        let mut context = ShellContext::default();
        let mut executor = Executor::new();
        assert_eq!(
            parse_and_execute("", &mut context, &mut executor),
            LoopControl::Continue
        );
        assert_eq!(
            parse_and_execute("   \t ", &mut context, &mut executor),
            LoopControl::Continue
        );
        assert_eq!(context.last_status, 0);
    }

    #[test]
    fn test_exit_stops_remaining_segments() {
        let mut context = ShellContext::default();
        let mut executor = Executor::new();
        let control = parse_and_execute("prompt a; exit; prompt b", &mut context, &mut executor);
        assert_eq!(control, LoopControl::Exit);
        assert_eq!(context.prompt, "a ");
    }

    #[test]
    fn test_parse_error_is_recoverable() {
        let mut context = ShellContext::default();
        let mut executor = Executor::new();
        let control = parse_and_execute("ls | ; prompt never", &mut context, &mut executor);
        assert_eq!(control, LoopControl::Continue);
        assert_eq!(context.last_status, 2);
        assert_eq!(context.prompt, "% ");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_sequential_segments_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("seq.txt");
        let line = format!(
            "echo one > {0}; echo two >> {0}; cat {0} | wc -l >> {0}",
            out.display()
        );
        let mut context = ShellContext::default();
        let mut executor = Executor::new();
        parse_and_execute(&line, &mut context, &mut executor);
        assert_eq!(fs::read_to_string(&out).unwrap(), "one\ntwo\n2\n");
    }
}
