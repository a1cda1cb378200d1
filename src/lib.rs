//! mailsift: rule-based IMAP mail filtering.

pub mod config;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod session;
pub mod store;

pub use error::{Error, Result};
