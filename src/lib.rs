//! Mail relay — forwards received messages to configured destinations.

pub mod config;
pub mod error;
pub mod event;
pub mod mailer;
pub mod pipeline;
pub mod resolve;
pub mod rewrite;
pub mod server;
pub mod storage;
