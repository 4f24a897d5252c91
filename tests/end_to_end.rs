//! End-to-end scenarios against a real temp-directory base path, driven
//! through the public `Indexer` API (spec scenarios: create/list/modify/
//! delete, bundle drop, search, transfer collision, ack drain,
//! blacklist).

use std::io::Write;

use fsal::domain::EventKind;
use fsal::infrastructure::{Database, EventQueue, Scheduler};
use fsal::{Config, Indexer};
use tempfile::tempdir;

/// Builds an `Indexer` over `base`. The returned `TempDir` holds the
/// sqlite file and must be kept alive for as long as the indexer is used.
async fn build_indexer(base: &std::path::Path, blacklist: &[&str]) -> (Indexer, tempfile::TempDir) {
    let db_dir = tempdir().unwrap();
    let db_path = db_dir.path().join("fsal.sqlite");
    let db = Database::connect(&db_path).await.unwrap();
    let events = EventQueue::new(db.clone());
    let scheduler = Scheduler::start();

    let blacklist_toml = if blacklist.is_empty() {
        String::new()
    } else {
        format!(
            "blacklist = [{}]\n",
            blacklist.iter().map(|p| format!("\"{p}\"")).collect::<Vec<_>>().join(", ")
        )
    };
    let config_toml = format!(
        "[fsal]\nsocket = \"/tmp/fsal-test.socket\"\nbasepaths = [\"{}\"]\n{}\n[bundles]\nbundles_dir = \"bundles\"\nbundles_exts = [\"zip\"]\n\n[ondd]\nsocket = \"/tmp/ondd-test.socket\"\n\n[database]\npath = \"{}\"\n",
        base.display(),
        blacklist_toml,
        db_path.display(),
    );
    let config: Config = toml::from_str(&config_toml).unwrap();
    (Indexer::new(&config, db, events, scheduler).unwrap(), db_dir)
}

#[tokio::test]
async fn create_list_modify_delete() {
    let dir = tempdir().unwrap();
    let (indexer, _db_dir) = build_indexer(dir.path(), &[]).await;

    std::fs::write(dir.path().join("a.txt"), vec![0u8; 10]).unwrap();
    indexer.refresh().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let changes = indexer.get_changes(10).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].event.kind, EventKind::Created);
    assert_eq!(changes[0].event.src, "a.txt");
    indexer.confirm_changes(10).await.unwrap();

    let listing = indexer.list_dir(".").await.unwrap().unwrap();
    assert_eq!(listing.entries.len(), 1);
    assert_eq!(listing.entries[0].name, "a.txt");
    assert_eq!(listing.entries[0].size, 10);

    std::fs::write(dir.path().join("a.txt"), vec![0u8; 20]).unwrap();
    indexer.refresh().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let changes = indexer.get_changes(10).await.unwrap();
    assert!(changes.iter().any(|e| e.event.kind == EventKind::Modified && e.event.src == "a.txt"));
    indexer.confirm_changes(10).await.unwrap();

    indexer.remove("a.txt").await.unwrap();
    let changes = indexer.get_changes(10).await.unwrap();
    assert!(changes.iter().any(|e| e.event.kind == EventKind::Deleted && e.event.src == "a.txt"));
    assert!(!dir.path().join("a.txt").exists());
}

#[tokio::test]
async fn bundle_drop_extracts_and_rescans() {
    let dir = tempdir().unwrap();
    std::fs::create_dir(dir.path().join("bundles")).unwrap();
    let zip_path = dir.path().join("bundles/pkg.zip");
    {
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer.start_file("pkg/x.txt", zip::write::FileOptions::default()).unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap();
    }

    let (indexer, _db_dir) = build_indexer(dir.path(), &[]).await;
    indexer.handle_notification("bundles/pkg.zip").await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    assert!(!zip_path.exists());
    assert!(dir.path().join("pkg/x.txt").exists());
    assert!(indexer.exists("pkg/x.txt", true).await.unwrap());
    assert!(!indexer.exists("bundles/pkg.zip", true).await.unwrap());
}

#[tokio::test]
async fn search_respects_whole_words_and_excludes() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("Report_2024.pdf"), b"x").unwrap();
    std::fs::write(dir.path().join("report-draft.txt"), b"x").unwrap();
    std::fs::write(dir.path().join("notes.md"), b"x").unwrap();

    let (indexer, _db_dir) = build_indexer(dir.path(), &[]).await;
    indexer.refresh().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let result = indexer.search("report", false, &[]).await.unwrap();
    let names: Vec<&str> = result.entries.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"Report_2024.pdf"));
    assert!(names.contains(&"report-draft.txt"));
    assert!(!names.contains(&"notes.md"));

    let whole_word_result = indexer.search("report", true, &[]).await.unwrap();
    let whole_word_names: Vec<&str> = whole_word_result.entries.iter().map(|e| e.name.as_str()).collect();
    assert!(!whole_word_names.contains(&"Report_2024.pdf"));
}

#[tokio::test]
async fn transfer_collision_reports_failure_and_changes_nothing() {
    let dir = tempdir().unwrap();
    std::fs::create_dir(dir.path().join("dest")).unwrap();
    std::fs::write(dir.path().join("dest/x.txt"), b"existing").unwrap();
    let (indexer, _db_dir) = build_indexer(dir.path(), &[]).await;
    indexer.refresh().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let src_dir = tempdir().unwrap();
    let src = src_dir.path().join("x.txt");
    std::fs::write(&src, b"incoming").unwrap();

    let result = indexer.transfer(src.to_str().unwrap(), "dest").await;
    assert!(result.is_err());
    assert!(src.exists());
    assert_eq!(std::fs::read(dir.path().join("dest/x.txt")).unwrap(), b"existing");
}

#[tokio::test]
async fn ack_drain_returns_correct_pages() {
    let dir = tempdir().unwrap();
    let (indexer, _db_dir) = build_indexer(dir.path(), &[]).await;
    for i in 0..5 {
        std::fs::write(dir.path().join(format!("f{i}.txt")), b"x").unwrap();
    }
    indexer.refresh().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let first_page = indexer.get_changes(3).await.unwrap();
    assert_eq!(first_page.len(), 3);
    indexer.confirm_changes(3).await.unwrap();

    let second_page = indexer.get_changes(10).await.unwrap();
    assert_eq!(second_page.len(), 2);
}

#[tokio::test]
async fn blacklist_excludes_matching_paths_from_index_and_events() {
    let dir = tempdir().unwrap();
    std::fs::create_dir(dir.path().join("tmp")).unwrap();
    std::fs::write(dir.path().join("tmp/x"), b"x").unwrap();
    std::fs::create_dir(dir.path().join("keep")).unwrap();
    std::fs::write(dir.path().join("keep/y"), b"y").unwrap();

    let (indexer, _db_dir) = build_indexer(dir.path(), &["^tmp/"]).await;
    indexer.refresh().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    assert!(!indexer.exists("tmp/x", false).await.unwrap());
    assert!(indexer.exists("keep/y", false).await.unwrap());
    let changes = indexer.get_changes(100).await.unwrap();
    assert!(!changes.iter().any(|e| e.event.src == "tmp/x"));
}
