pub mod context;
pub mod executor;
pub mod history;
pub mod parser;
pub mod readline;
pub mod shell;
pub mod signals;
#[cfg(test)]
pub(crate) mod testing;

pub use context::ShellContext;
pub use shell::{parse_and_execute, LoopControl, Shell};
