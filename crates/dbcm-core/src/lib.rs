pub mod config;
pub mod error;
pub mod hook;
pub mod io;
pub mod order;
pub mod permission;
pub mod query;
pub mod reply;
pub mod store;
pub mod types;
pub mod workflow;

pub use error::{DbcmError, Result};
