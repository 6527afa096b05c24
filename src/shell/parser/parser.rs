use log::debug;

use super::ast::{Command, Pipeline};
use super::lexer::{tokenize, Operator, RedirectOp, Token};
use super::ParseError;

/// 顶层分隔符：`;` 顺序执行，`&` 后台执行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Sequential,
    Background,
}

/// 顶层切分出的一段命令文本，以及紧跟其后的分隔符
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    pub text: &'a str,
    pub separator: Option<Separator>,
}

impl Segment<'_> {
    pub fn is_background(&self) -> bool {
        self.separator == Some(Separator::Background)
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Parser {
            tokens,
            position: 0,
        }
    }

    fn current_token(&self) -> Option<&'a Token> {
        self.tokens.get(self.position)
    }

    fn next_token(&mut self) {
        self.position += 1;
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline, ParseError> {
        let mut stages = Vec::new();

        loop {
            let stage = self.parse_simple_command()?;
            match self.current_token().and_then(Token::operator) {
                Some(Operator::Pipe) => {
                    self.next_token();
                    if self.current_token().is_none() {
                        return Err(ParseError::ExpectedCommandAfterPipe);
                    }
                    stages.push(stage);
                }
                _ => {
                    // 最后一个阶段必须有参数
                    if stage.arguments.is_empty() {
                        return Err(ParseError::EmptyCommand);
                    }
                    stages.push(stage);
                    break;
                }
            }
        }

        Ok(Pipeline {
            stages,
            background: false,
        })
    }

    fn parse_simple_command(&mut self) -> Result<Command, ParseError> {
        let mut command = Command::default();
        let mut pending: Option<RedirectOp> = None;

        while let Some(token) = self.current_token() {
            match token.operator() {
                Some(Operator::Pipe) => break,
                Some(Operator::Redirect(op)) => {
                    if let Some(waiting) = pending {
                        return Err(ParseError::MissingRedirectTarget(waiting));
                    }
                    pending = Some(op);
                }
                None => match pending.take() {
                    Some(op) => Self::apply_redirection(&mut command, op, token.as_str()),
                    None => command.arguments.push(token.as_str().to_string()),
                },
            }
            self.next_token();
        }

        match pending {
            Some(op) => Err(ParseError::MissingRedirectTarget(op)),
            None => Ok(command),
        }
    }

    fn apply_redirection(command: &mut Command, op: RedirectOp, target: &str) {
        let target = Some(target.to_string());
        match op {
            RedirectOp::Input => command.input_redirect = target,
            RedirectOp::Output => {
                command.output_redirect = target;
                command.append_output = false;
            }
            RedirectOp::Append => {
                command.output_redirect = target;
                command.append_output = true;
            }
            RedirectOp::Error => command.error_redirect = target,
        }
    }
}

/// 把 token 序列解析成一条管道
pub fn parse_pipeline(tokens: &[Token]) -> Result<Pipeline, ParseError> {
    Parser::new(tokens).parse_pipeline()
}

/// 在原始输入上按未转义、未加引号的 `;` / `&` 切分，丢弃空白段
pub fn split_top_level(line: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = line.char_indices();

    while let Some((index, c)) = chars.next() {
        let separator = match c {
            '\\' => {
                chars.next();
                continue;
            }
            '\'' if !in_double => {
                in_single = !in_single;
                continue;
            }
            '"' if !in_single => {
                in_double = !in_double;
                continue;
            }
            ';' if !in_single && !in_double => Separator::Sequential,
            '&' if !in_single && !in_double => Separator::Background,
            _ => continue,
        };
        push_segment(&mut segments, &line[start..index], Some(separator));
        start = index + c.len_utf8();
    }
    push_segment(&mut segments, &line[start..], None);

    segments
}

fn push_segment<'a>(segments: &mut Vec<Segment<'a>>, text: &'a str, separator: Option<Separator>) {
    let text = text.trim();
    if !text.is_empty() {
        segments.push(Segment { text, separator });
    }
}

/// 解析一段顶层命令；没有任何 token 时返回 `None`（不算错误）
pub fn parse_segment(segment: &Segment<'_>) -> Result<Option<Pipeline>, ParseError> {
    let tokens = tokenize(segment.text)?;
    if tokens.is_empty() && segment.text.trim().is_empty() {
        return Ok(None);
    }
    let mut pipeline = parse_pipeline(&tokens)?;
    pipeline.background = segment.is_background();
    debug!("解析结果: {:?}", pipeline);
    Ok(Some(pipeline))
}
