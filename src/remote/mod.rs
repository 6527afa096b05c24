pub mod auth;
pub mod client;
pub mod protocol;
pub mod relay;
pub mod server;

pub use server::{handle_client, Server, ServerError, SessionOutcome, SessionState};
