//! Filesystem abstraction daemon.
//!
//! Indexes one or more base directories into a relational mirror, emits
//! an ordered at-least-once change-event queue, and serves queries and
//! mutations to clients over a NUL-framed XML Unix domain socket
//! protocol. A background listener ingests completion notifications from
//! an external download/transfer source and triggers targeted rescans.

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod notifications;
pub mod operations;
pub mod path_utils;
pub mod server;
pub mod wire;

pub use config::Config;
pub use error::{FsalError, FsalResult};
pub use operations::Indexer;
