//! Focused integration test for the Unix socket server: bind, accept one
//! connection, read a NUL-framed request, write a NUL-framed response.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream as StdUnixStream;

use fsal::infrastructure::{Database, EventQueue, Scheduler};
use fsal::server::Server;
use fsal::{Config, Indexer};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

async fn spawn_server(base: &std::path::Path, socket_path: &std::path::Path) -> (tempfile::TempDir, CancellationToken) {
    let db_dir = tempdir().unwrap();
    let db = Database::connect(&db_dir.path().join("fsal.sqlite")).await.unwrap();
    let events = EventQueue::new(db.clone());
    let scheduler = Scheduler::start();
    let config_toml = format!(
        "[fsal]\nsocket = \"{}\"\nbasepaths = [\"{}\"]\n\n[ondd]\nsocket = \"/tmp/ondd-socket-test.socket\"\n\n[database]\npath = \"{}\"\n",
        socket_path.display(),
        base.display(),
        db_dir.path().join("fsal.sqlite").display(),
    );
    let config: Config = toml::from_str(&config_toml).unwrap();
    let indexer = Indexer::new(&config, db, events, scheduler).unwrap();

    let cancel = CancellationToken::new();
    let server = Server::new(socket_path.to_path_buf(), indexer);
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = server.run(run_cancel).await;
    });
    // let the listener bind before a client connects
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    (db_dir, cancel)
}

#[tokio::test]
async fn list_base_paths_round_trips_over_the_socket() {
    let base = tempdir().unwrap();
    let socket_dir = tempdir().unwrap();
    let socket_path = socket_dir.path().join("fsal.socket");

    let (_db_dir, cancel) = spawn_server(base.path(), &socket_path).await;

    let socket_path_clone = socket_path.clone();
    let response = tokio::task::spawn_blocking(move || {
        let mut stream = StdUnixStream::connect(&socket_path_clone).unwrap();
        let request = b"<request><command><type>list_base_paths</type><params></params></command></request>\0";
        stream.write_all(request).unwrap();

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.contains(&0) {
                break;
            }
        }
        buf
    })
    .await
    .unwrap();

    cancel.cancel();

    assert_eq!(*response.last().unwrap(), 0);
    let text = String::from_utf8(response[..response.len() - 1].to_vec()).unwrap();
    assert!(text.contains("<response>"));
    assert!(text.contains("<success>true</success>"));
    assert!(text.contains(&base.path().display().to_string()));
}

#[tokio::test]
async fn malformed_request_closes_connection_without_a_response() {
    let base = tempdir().unwrap();
    let socket_dir = tempdir().unwrap();
    let socket_path = socket_dir.path().join("fsal.socket");

    let (_db_dir, cancel) = spawn_server(base.path(), &socket_path).await;

    let socket_path_clone = socket_path.clone();
    let response = tokio::task::spawn_blocking(move || {
        let mut stream = StdUnixStream::connect(&socket_path_clone).unwrap();
        stream.write_all(b"not xml at all\0").unwrap();
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        buf
    })
    .await
    .unwrap();

    cancel.cancel();
    assert!(response.is_empty());
}
