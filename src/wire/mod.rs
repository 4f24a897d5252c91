//! Request/response wire protocol: NUL-framed XML documents over a Unix
//! domain stream socket.

pub mod codec;
pub mod commands;

pub use commands::Command;
