//! Bundle extraction: recognise archive files dropped into a configured
//! sub-directory and unpack them into their base.
//!
//! Identification is by directory prefix and extension only, never magic
//! bytes. The indexer depends on the `BundleExtractor` trait rather than
//! this concrete implementation so tests can substitute a fake.

use std::fs::File;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::FsalResult;

/// Given a candidate rel_path, decide whether it names a bundle; if so,
/// extract it and return the rel_paths of everything it produced.
#[async_trait]
pub trait BundleExtractor: Send + Sync {
    fn is_bundle(&self, rel_path: &str) -> bool;

    /// Extract `rel_path` (a file under `base`) into `base`. Returns the
    /// list of extracted rel_paths on success. Never returns `Err` for a
    /// corrupt archive: that is reported as `Ok(vec![])` plus a logged
    /// warning. `Err` is reserved for I/O failures unrelated to archive
    /// validity (e.g. failing to delete the source afterwards).
    async fn extract(&self, base: &Path, rel_path: &str) -> FsalResult<Vec<String>>;
}

/// Zip-backed bundle extractor. Bundles live under `bundles_dir` (relative
/// to a base) and must carry one of `bundles_exts`.
pub struct ZipBundleExtractor {
    bundles_dir: String,
    bundles_exts: Vec<String>,
}

impl ZipBundleExtractor {
    pub fn new(bundles_dir: String, bundles_exts: Vec<String>) -> Self {
        let bundles_exts = bundles_exts
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        ZipBundleExtractor {
            bundles_dir,
            bundles_exts,
        }
    }
}

#[async_trait]
impl BundleExtractor for ZipBundleExtractor {
    fn is_bundle(&self, rel_path: &str) -> bool {
        let prefix = format!("{}/", self.bundles_dir);
        if !rel_path.starts_with(&prefix) {
            return false;
        }
        let ext = Path::new(rel_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext {
            Some(ext) => self.bundles_exts.iter().any(|allowed| *allowed == ext),
            None => false,
        }
    }

    async fn extract(&self, base: &Path, rel_path: &str) -> FsalResult<Vec<String>> {
        let archive_path = base.join(rel_path);
        let base = base.to_path_buf();
        let rel_path = rel_path.to_string();

        let result = tokio::task::spawn_blocking(move || extract_blocking(&base, &archive_path))
            .await
            .map_err(|e| crate::error::FsalError::Protocol(format!("extractor task panicked: {e}")))?;

        match result {
            Ok(extracted) => Ok(extracted),
            Err(err) => {
                warn!(bundle = %rel_path, error = %err, "bundle extraction failed");
                Ok(Vec::new())
            }
        }
    }
}

fn extract_blocking(base: &Path, archive_path: &Path) -> FsalResult<Vec<String>> {
    let file = File::open(archive_path)
        .map_err(|e| crate::error::FsalError::filesystem(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| crate::error::FsalError::Protocol(format!("not a valid zip archive: {e}")))?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| crate::error::FsalError::Protocol(format!("bad zip entry: {e}")))?;
        let Some(enclosed) = entry.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };
        let dest = base.join(&enclosed);
        if entry.is_dir() {
            std::fs::create_dir_all(&dest).map_err(|e| crate::error::FsalError::filesystem(&dest, e))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| crate::error::FsalError::filesystem(parent, e))?;
        }
        let mut out =
            File::create(&dest).map_err(|e| crate::error::FsalError::filesystem(&dest, e))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| crate::error::FsalError::filesystem(&dest, e))?;
        extracted.push(enclosed.to_string_lossy().replace('\\', "/"));
    }

    std::fs::remove_file(archive_path)
        .map_err(|e| crate::error::FsalError::filesystem(archive_path, e))?;
    debug!(count = extracted.len(), "bundle extracted");
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_zip(path: &Path) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        writer.start_file("pkg/x.txt", options).unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn is_bundle_checks_prefix_and_extension() {
        let extractor = ZipBundleExtractor::new("bundles".to_string(), vec!["zip".to_string()]);
        assert!(extractor.is_bundle("bundles/pkg.zip"));
        assert!(extractor.is_bundle("bundles/PKG.ZIP"));
        assert!(!extractor.is_bundle("bundles/pkg.tar"));
        assert!(!extractor.is_bundle("other/pkg.zip"));
    }

    #[tokio::test]
    async fn extract_unpacks_and_deletes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let bundles_dir = dir.path().join("bundles");
        std::fs::create_dir_all(&bundles_dir).unwrap();
        let zip_path = bundles_dir.join("pkg.zip");
        write_test_zip(&zip_path);

        let extractor = ZipBundleExtractor::new("bundles".to_string(), vec!["zip".to_string()]);
        let extracted = extractor
            .extract(dir.path(), "bundles/pkg.zip")
            .await
            .unwrap();

        assert_eq!(extracted, vec!["pkg/x.txt".to_string()]);
        assert!(dir.path().join("pkg/x.txt").exists());
        assert!(!zip_path.exists());
    }
}
