pub mod categories;
pub mod cmd;
pub mod config;
pub mod engine;
mod error;
pub mod format;
pub mod links;
pub mod progress;
pub mod runner;
pub mod session;

pub use error::{AppError, FailureKind, Result};
