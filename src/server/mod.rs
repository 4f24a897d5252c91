//! Unix domain socket server: accepts connections, reads one NUL-framed
//! request, dispatches to a handler, writes the framed response.
//!
//! Bind, clear a stale socket file, `tokio::select!` between `accept()`
//! and a shutdown signal, handle each client without spawning a
//! detached task per connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use xmltree::Element;

use crate::error::FsalError;
use crate::operations::Indexer;
use crate::wire::codec::{self, bool_field, fso_field, list_field, success_response, text_field};
use crate::wire::Command;

const READ_CHUNK: usize = 2048;

pub struct Server {
    socket_path: PathBuf,
    indexer: Arc<Indexer>,
}

impl Server {
    pub fn new(socket_path: PathBuf, indexer: Indexer) -> Self {
        Server { socket_path, indexer: Arc::new(indexer) }
    }

    pub async fn run(&self, cancel: CancellationToken) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        info!(socket = %self.socket_path.display(), "fsal server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let indexer = self.indexer.clone();
                    if let Err(e) = handle_connection(stream, indexer).await {
                        warn!(error = %e, "error handling client connection");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("fsal server shutting down");
                    break;
                }
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

async fn handle_connection(mut stream: UnixStream, indexer: Arc<Indexer>) -> std::io::Result<()> {
    let request_bytes = match read_framed(&mut stream).await? {
        Some(bytes) => bytes,
        None => return Ok(()),
    };

    let (command_type, params) = match codec::parse_request(&request_bytes) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "malformed request, closing connection without a response");
            return Ok(());
        }
    };

    let command = match Command::from_wire(&command_type, &params) {
        Ok(command) => command,
        Err(e) => {
            warn!(command_type, error = %e, "rejecting request");
            return Ok(());
        }
    };

    if !command.is_synchronous() {
        tokio::spawn(async move { run_async_command(command).await });
        return Ok(());
    }

    let response = dispatch(command, &indexer).await;
    let bytes = match codec::encode(&response) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to encode response");
            return Ok(());
        }
    };
    stream.write_all(&bytes).await?;
    Ok(())
}

async fn read_framed(stream: &mut UnixStream) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == 0) {
            buf.truncate(pos);
            return Ok(Some(buf));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(if buf.is_empty() { None } else { Some(buf) });
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// `copy`: best-effort, fire-and-forget filesystem copy. No response is
/// ever written, matching `CopyCommandHandler.is_synchronous = False`.
async fn run_async_command(command: Command) {
    let Command::Copy { source, dest } = command else { return };
    let result = tokio::task::spawn_blocking(move || copy_path(Path::new(&source), Path::new(&dest))).await;
    if let Ok(Err(e)) = result {
        warn!(error = %e, "copy command failed");
    }
}

fn copy_path(source: &Path, dest: &Path) -> std::io::Result<()> {
    if source.is_dir() {
        copy_dir_recursive(source, dest)
    } else {
        std::fs::copy(source, dest).map(|_| ())
    }
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

async fn dispatch(command: Command, indexer: &Indexer) -> Element {
    match command {
        Command::ListDir { path } => match indexer.list_dir(&path).await {
            Ok(Some(listing)) => {
                let (dirs, files): (Vec<_>, Vec<_>) = listing.entries.iter().partition(|e| e.is_dir());
                success_response(vec![
                    text_field("base-path", &listing.base_path.to_string_lossy()),
                    list_field("dirs", dirs.into_iter().map(fso_field)),
                    list_field("files", files.into_iter().map(fso_field)),
                ])
            }
            Ok(None) => success_response(vec![
                text_field("base-path", ""),
                list_field("dirs", std::iter::empty()),
                list_field("files", std::iter::empty()),
            ]),
            Err(e) => codec::failure_response(&e.to_wire_message()),
        },
        Command::Exists { path, unindexed } => match indexer.exists(&path, unindexed).await {
            Ok(exists) => success_response(vec![bool_field("exists", exists)]),
            Err(e) => codec::failure_response(&e.to_wire_message()),
        },
        Command::IsDir { path } => match indexer.is_dir(&path).await {
            Ok(isdir) => success_response(vec![bool_field("isdir", isdir)]),
            Err(e) => codec::failure_response(&e.to_wire_message()),
        },
        Command::IsFile { path } => match indexer.is_file(&path).await {
            Ok(isfile) => success_response(vec![bool_field("isfile", isfile)]),
            Err(e) => codec::failure_response(&e.to_wire_message()),
        },
        Command::Remove { path } => match indexer.remove(&path).await {
            Ok(()) => success_response(vec![]),
            Err(e) => codec::failure_response(&e.to_wire_message()),
        },
        Command::Search { query, whole_words, excludes } => {
            match indexer.search(&query, whole_words, &excludes).await {
                Ok(result) => {
                    let (dirs, files): (Vec<_>, Vec<_>) = result.entries.iter().partition(|e| e.is_dir());
                    success_response(vec![
                        text_field("base-path", &result.base_path.to_string_lossy()),
                        list_field("dirs", dirs.into_iter().map(fso_field)),
                        list_field("files", files.into_iter().map(fso_field)),
                        bool_field("is-match", result.is_match),
                    ])
                }
                Err(e) => codec::failure_response(&e.to_wire_message()),
            }
        }
        Command::GetFso { path } => match indexer.get_fso(&path).await {
            Ok(Some(fso)) => {
                success_response(vec![text_field("base-path", &fso.base_path.to_string_lossy()), fso_field(&fso)])
            }
            Ok(None) => codec::failure_response(&FsalError::NotFound(path).to_wire_message()),
            Err(e) => codec::failure_response(&e.to_wire_message()),
        },
        Command::Transfer { src, dest } => match indexer.transfer(&src, &dest).await {
            Ok(()) => success_response(vec![]),
            Err(e) => codec::failure_response(&e.to_wire_message()),
        },
        Command::GetChanges { limit } => match indexer.get_changes(limit).await {
            Ok(events) => success_response(vec![list_field("events", events.iter().map(event_field))]),
            Err(e) => codec::failure_response(&e.to_wire_message()),
        },
        Command::ConfirmChanges { limit } => match indexer.confirm_changes(limit).await {
            Ok(_) => success_response(vec![]),
            Err(e) => codec::failure_response(&e.to_wire_message()),
        },
        Command::Refresh => match indexer.refresh().await {
            Ok(()) => success_response(vec![]),
            Err(e) => codec::failure_response(&e.to_wire_message()),
        },
        Command::RefreshPath { path } => match indexer.refresh_path(&path).await {
            Ok(()) => success_response(vec![]),
            Err(e) => codec::failure_response(&e.to_wire_message()),
        },
        Command::ListBasePaths => {
            success_response(vec![list_field(
                "paths",
                indexer.base_paths_display().map(|p| text_field("path", &p)),
            )])
        }
        Command::Copy { .. } => unreachable!("copy is asynchronous and never reaches dispatch"),
    }
}

fn event_field(queued: &crate::domain::QueuedEvent) -> Element {
    let mut el = Element::new("event");
    el.children.push(xmltree::XMLNode::Element(text_field("type", queued.event.kind.as_str())));
    el.children.push(xmltree::XMLNode::Element(text_field("src", &queued.event.src)));
    el.children.push(xmltree::XMLNode::Element(bool_field("is_dir", queued.event.is_dir)));
    el
}
