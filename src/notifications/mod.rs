//! External notification listener: connects to the ONDD-style delivery
//! subsystem over its own Unix domain socket, reads a stream of
//! NUL-framed `<notification event="...">` documents, and dispatches
//! `file_complete` notifications to the indexer.
//!
//! The connection is a persistent stream, not a request/response round
//! trip: each notification is a small XML document terminated by a
//! single NUL byte, carrying an `event` attribute and a `<path>` child.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use xmltree::Element;

use crate::operations::Indexer;

const RETRY_INTERVAL: Duration = Duration::from_secs(10);
const READ_CHUNK: usize = 2048;

pub struct NotificationListener {
    socket_path: std::path::PathBuf,
    indexer: Indexer,
}

impl NotificationListener {
    pub fn new(socket_path: std::path::PathBuf, indexer: Indexer) -> Self {
        NotificationListener { socket_path, indexer }
    }

    /// Run until `cancel` fires. Reconnects on any disconnect or connect
    /// failure, waiting `RETRY_INTERVAL` between attempts; never returns
    /// an error: unreachability is logged and retried forever.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match UnixStream::connect(&self.socket_path).await {
                Ok(stream) => {
                    debug!(socket = %self.socket_path.display(), "connected to notification source");
                    if let Err(e) = self.read_stream(stream, &cancel).await {
                        warn!(error = %e, "notification stream ended");
                    }
                }
                Err(e) => {
                    error!(
                        socket = %self.socket_path.display(),
                        error = %e,
                        "unable to connect to notification source"
                    );
                }
            }
            if cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(RETRY_INTERVAL) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    async fn read_stream(&self, mut stream: UnixStream, cancel: &CancellationToken) -> std::io::Result<()> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = tokio::select! {
                result = stream.read(&mut chunk) => result?,
                _ = cancel.cancelled() => return Ok(()),
            };
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);

            while let Some(pos) = buf.iter().position(|&b| b == 0) {
                let message = buf[..pos].to_vec();
                buf.drain(..=pos);
                self.handle_message(&message).await;
            }
        }
    }

    async fn handle_message(&self, message: &[u8]) {
        let text = match std::str::from_utf8(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "notification was not valid utf-8");
                return;
            }
        };
        let element = match Element::parse(text.as_bytes()) {
            Ok(element) => element,
            Err(e) => {
                warn!(error = %e, text, "failed to parse notification xml");
                return;
            }
        };
        if element.name != "notification" {
            warn!(tag = %element.name, "unknown notification message format");
            return;
        }
        let Some(event) = element.attributes.get("event") else {
            return;
        };
        if event != "file_complete" {
            return;
        }
        let Some(path) = element.get_child("path").and_then(|p| p.get_text()) else {
            warn!("file_complete notification missing path");
            return;
        };
        self.indexer.handle_notification(path.as_ref()).await;
    }
}
