#![forbid(unsafe_code)]

mod connection;
pub mod handler;

pub use connection::{SessionConfig, run_connection};
pub use handler::{AppState, router, serve};
