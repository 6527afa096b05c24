use std::env;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use glob::glob;
use log::{debug, warn};

use super::{ParseError, MAX_TOKENS, MAX_TOKEN_LENGTH};

/// 一个 shell token。
///
/// `literal` 为真表示 token 经过引号、转义、变量替换或通配符展开，
/// 这样的 token 永远不会被当作 `|`、`>` 等操作符。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    text: String,
    literal: bool,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RedirectOp {
    Input,  // <
    Output, // >
    Append, // >>
    Error,  // 2>
}

impl fmt::Display for RedirectOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            RedirectOp::Input => "<",
            RedirectOp::Output => ">",
            RedirectOp::Append => ">>",
            RedirectOp::Error => "2>",
        };
        f.write_str(op)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Operator {
    Pipe,
    Redirect(RedirectOp),
}

impl Token {
    pub fn word(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            literal: false,
        }
    }

    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            literal: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    pub fn is_literal(&self) -> bool {
        self.literal
    }

    pub fn operator(&self) -> Option<Operator> {
        if self.literal {
            return None;
        }
        match self.text.as_str() {
            "|" => Some(Operator::Pipe),
            "<" => Some(Operator::Redirect(RedirectOp::Input)),
            ">" => Some(Operator::Redirect(RedirectOp::Output)),
            ">>" => Some(Operator::Redirect(RedirectOp::Append)),
            "2>" => Some(Operator::Redirect(RedirectOp::Error)),
            _ => None,
        }
    }
}

impl PartialEq<&str> for Token {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

/// 把一行输入切分成 token：处理引号、反斜杠转义、`$VAR` 替换和通配符展开。
pub fn tokenize(line: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(line);
    let mut tokens = Vec::new();

    while let Some(raw) = lexer.next_token()? {
        for token in expand(raw) {
            if tokens.len() >= MAX_TOKENS {
                return Err(ParseError::TooManyTokens { limit: MAX_TOKENS });
            }
            tokens.push(token);
        }
    }

    debug!("tokenize {:?} -> {} tokens", line, tokens.len());
    Ok(tokens)
}

struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
        }
    }

    fn read_char(&mut self) -> Option<char> {
        self.input.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.read_char();
        }
    }

    /// 读出下一个原始 token。空 token（例如 `''`）被丢弃。
    fn next_token(&mut self) -> Result<Option<Token>, ParseError> {
        loop {
            self.skip_whitespace();
            if self.peek_char().is_none() {
                return Ok(None);
            }
            let token = self.read_word()?;
            if !token.text.is_empty() {
                return Ok(Some(token));
            }
        }
    }

    fn read_word(&mut self) -> Result<Token, ParseError> {
        let mut word = String::new();
        let mut literal = false;
        let mut in_single = false;
        let mut in_double = false;

        while let Some(c) = self.peek_char() {
            if c.is_whitespace() && !in_single && !in_double {
                break;
            }
            self.read_char();
            match c {
                '\\' => {
                    literal = true;
                    if let Some(escaped) = self.read_char() {
                        word.push(escaped);
                    }
                }
                '\'' if !in_double => {
                    literal = true;
                    in_single = !in_single;
                }
                '"' if !in_single => {
                    literal = true;
                    in_double = !in_double;
                }
                c => word.push(c),
            }

            if word.len() >= MAX_TOKEN_LENGTH {
                return Err(ParseError::TokenTooLong {
                    limit: MAX_TOKEN_LENGTH,
                });
            }
        }

        if in_single || in_double {
            warn!("未闭合的引号，读取到行尾: {}", word);
        }

        Ok(Token {
            text: word,
            literal,
        })
    }
}

/// `$NAME` 整体替换为环境变量的值，含 `*`/`?` 的 token 做文件名展开。
fn expand(token: Token) -> Vec<Token> {
    let token = if token.text.len() > 1 && token.text.starts_with('$') {
        let value = env::var(&token.text[1..]).unwrap_or_default();
        Token::literal(value)
    } else {
        token
    };

    if !token.text.contains(['*', '?']) {
        return vec![token];
    }

    let pattern = shellexpand::tilde(&token.text).into_owned();
    let matches: Vec<Token> = match glob(&pattern) {
        Ok(paths) => paths
            .flatten()
            .map(|path| Token::literal(path.to_string_lossy().into_owned()))
            .collect(),
        Err(err) => {
            debug!("通配符模式无效 {}: {}", pattern, err);
            Vec::new()
        }
    };

    if matches.is_empty() {
        vec![token]
    } else {
        matches
    }
}
