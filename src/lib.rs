pub mod remote;
pub mod shell;
pub mod utils;
