pub mod ast;
pub mod lexer;
pub mod parser;

use thiserror::Error;

pub use ast::{Command, Pipeline};
pub use lexer::{tokenize, RedirectOp, Token};
pub use parser::{parse_pipeline, parse_segment, split_top_level, Segment, Separator};

/// 单个 token 的最大字节数
pub const MAX_TOKEN_LENGTH: usize = 1024;
/// 一行输入（通配符展开后）最多的 token 数
pub const MAX_TOKENS: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("token too long (limit {limit} bytes)")]
    TokenTooLong { limit: usize },
    #[error("too many tokens (limit {limit})")]
    TooManyTokens { limit: usize },
    #[error("no command to execute")]
    EmptyCommand,
    #[error("expected command after '|'")]
    ExpectedCommandAfterPipe,
    #[error("expected file name after '{0}'")]
    MissingRedirectTarget(RedirectOp),
}
