//! Wire command types and their parameters.
//!
//! Parameter field names below (`path`, `whole_words`, `excludes`, ...)
//! and the XML field names in [`crate::wire::codec`] match the wire
//! protocol exactly, since clients speaking this protocol are external
//! to this crate.

use crate::error::{FsalError, FsalResult};
use crate::wire::codec::ParamValue;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ListDir { path: String },
    Exists { path: String, unindexed: bool },
    IsDir { path: String },
    IsFile { path: String },
    Remove { path: String },
    Search { query: String, whole_words: bool, excludes: Vec<String> },
    GetFso { path: String },
    Transfer { src: String, dest: String },
    GetChanges { limit: i64 },
    ConfirmChanges { limit: i64 },
    Refresh,
    RefreshPath { path: String },
    ListBasePaths,
    /// Asynchronous: the source never writes a response for this command
    /// (`CopyCommandHandler.is_synchronous = False`).
    Copy { source: String, dest: String },
}

impl Command {
    pub fn is_synchronous(&self) -> bool {
        !matches!(self, Command::Copy { .. })
    }

    pub fn from_wire(command_type: &str, params: &HashMap<String, ParamValue>) -> FsalResult<Self> {
        let text = |key: &str| -> FsalResult<String> {
            params
                .get(key)
                .and_then(ParamValue::as_text)
                .map(|s| s.to_string())
                .ok_or_else(|| FsalError::Protocol(format!("missing parameter {key:?}")))
        };
        let bool_opt = |key: &str| -> bool {
            params.get(key).and_then(ParamValue::as_text).map(|s| s.eq_ignore_ascii_case("true")).unwrap_or(false)
        };
        let int_opt = |key: &str, default: i64| -> FsalResult<i64> {
            match params.get(key).and_then(ParamValue::as_text) {
                Some(s) => s.parse().map_err(|_| FsalError::Protocol(format!("invalid integer for {key:?}"))),
                None => Ok(default),
            }
        };
        let list_opt = |key: &str| -> Vec<String> {
            params.get(key).and_then(ParamValue::as_list).cloned().unwrap_or_default()
        };

        Ok(match command_type {
            "list_dir" => Command::ListDir { path: text("path")? },
            "exists" => Command::Exists { path: text("path")?, unindexed: bool_opt("unindexed") },
            "isdir" => Command::IsDir { path: text("path")? },
            "isfile" => Command::IsFile { path: text("path")? },
            "remove" => Command::Remove { path: text("path")? },
            "search" => Command::Search {
                query: text("query")?,
                whole_words: bool_opt("whole_words"),
                excludes: list_opt("excludes"),
            },
            "get_fso" => Command::GetFso { path: text("path")? },
            "transfer" => Command::Transfer { src: text("src")?, dest: text("dest")? },
            "get_changes" => Command::GetChanges { limit: int_opt("limit", 100)? },
            "confirm_changes" => Command::ConfirmChanges { limit: int_opt("limit", 100)? },
            "refresh" => Command::Refresh,
            "refresh_path" => Command::RefreshPath { path: text("path")? },
            "list_base_paths" => Command::ListBasePaths,
            "copy" => Command::Copy { source: text("source")?, dest: text("dest")? },
            other => return Err(FsalError::Protocol(format!("unknown command type {other:?}"))),
        })
    }
}
