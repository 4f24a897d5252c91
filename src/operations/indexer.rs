//! The indexer: scan, prune, upsert, emit events, serve queries,
//! remove/transfer. Owns the base paths, the blacklist, the database, the
//! event queue, the bundle extractor, and the scheduler that serialises
//! every mutation onto a single worker.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::domain::{ChangeEvent, FsKind, FsObject, QueuedEvent};
use crate::error::{FsalError, FsalResult};
use crate::infrastructure::{Database, EventQueue, Scheduler};
use crate::operations::bundles::{BundleExtractor, ZipBundleExtractor};
use crate::path_utils::{self, Blacklist};

/// Transfer destinations may not exceed this many bytes (matches the
/// historical PATH_MAX-ish limit the source system enforced).
const MAX_TRANSFER_PATH_BYTES: usize = 32767;

/// How many `rel_path -> id` entries the scan keeps cached for directory
/// parent resolution before evicting the oldest.
const PARENT_CACHE_CAPACITY: usize = 1024;

#[derive(sqlx::FromRow, Clone, Debug)]
struct EntryRow {
    id: i64,
    #[allow(dead_code)]
    parent_id: i64,
    #[sqlx(rename = "type")]
    kind: i64,
    #[sqlx(rename = "path")]
    rel_path: String,
    size: i64,
    create_time: f64,
    modify_time: f64,
    base_path: String,
}

impl EntryRow {
    fn is_dir(&self) -> bool {
        self.kind == 1
    }

    fn to_fs_object(&self) -> FsObject {
        FsObject::from_row(
            &self.base_path,
            &self.rel_path,
            self.size,
            self.create_time,
            self.modify_time,
            self.is_dir(),
        )
    }
}

pub struct DirListing {
    pub base_path: PathBuf,
    pub entries: Vec<FsObject>,
}

pub struct SearchResult {
    pub is_match: bool,
    pub base_path: PathBuf,
    pub entries: Vec<FsObject>,
}

/// Bounded FIFO map used to resolve a just-inserted directory's id
/// without a DB round trip while scanning its children.
struct ParentCache {
    ids: HashMap<String, i64>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ParentCache {
    fn new(capacity: usize) -> Self {
        ParentCache { ids: HashMap::new(), order: VecDeque::new(), capacity }
    }

    fn insert(&mut self, rel_path: String, id: i64) {
        if !self.ids.contains_key(&rel_path) {
            if self.order.len() >= self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.ids.remove(&evicted);
                }
            }
            self.order.push_back(rel_path.clone());
        }
        self.ids.insert(rel_path, id);
    }

    fn get(&self, rel_path: &str) -> Option<i64> {
        self.ids.get(rel_path).copied()
    }
}

#[derive(Clone)]
pub struct Indexer {
    base_paths: Vec<PathBuf>,
    blacklist: Blacklist,
    db: Database,
    events: EventQueue,
    bundles: Arc<dyn BundleExtractor>,
    bundles_dir: String,
    scheduler: Scheduler,
}

impl Indexer {
    pub fn new(config: &Config, db: Database, events: EventQueue, scheduler: Scheduler) -> FsalResult<Self> {
        let blacklist = Blacklist::compile(&config.fsal.blacklist)?;
        let bundles: Arc<dyn BundleExtractor> = Arc::new(ZipBundleExtractor::new(
            config.bundles.bundles_dir.clone(),
            config.bundles.bundles_exts.clone(),
        ));
        Ok(Indexer {
            base_paths: config.fsal.basepaths.clone(),
            blacklist,
            db,
            events,
            bundles,
            bundles_dir: config.bundles.bundles_dir.clone(),
            scheduler,
        })
    }

    fn default_base(&self) -> FsalResult<&Path> {
        self.base_paths
            .last()
            .map(PathBuf::as_path)
            .ok_or_else(|| FsalError::Protocol("no base paths configured".to_string()))
    }

    /// Validate a wire-supplied relative path against the configured
    /// bases. The virtual root (`""` or `.`) is always valid and maps to
    /// `""`. Otherwise `path` must canonicalise, against at least one
    /// base, to a location inside it; the canonical `rel_path` is
    /// returned. Rejects `..`-escaping input.
    fn validate_wire_path(&self, rel_path: &str) -> FsalResult<String> {
        if is_virtual_root(rel_path) {
            return Ok(String::new());
        }
        self.base_paths
            .iter()
            .find_map(|base| path_utils::validate_internal_path(base, rel_path).ok())
            .ok_or_else(|| FsalError::InvalidPath(rel_path.to_string()))
    }

    // ---- queries -------------------------------------------------------

    pub async fn list_dir(&self, rel_path: &str) -> FsalResult<Option<DirListing>> {
        let rel_path = self.validate_wire_path(rel_path)?;
        if is_virtual_root(&rel_path) {
            let base_path = self.default_base()?.to_path_buf();
            let rows = self.children_of(0).await?;
            return Ok(Some(DirListing { base_path, entries: rows.iter().map(EntryRow::to_fs_object).collect() }));
        }
        let Some(entry) = self.find_entry_by_path(&rel_path).await? else {
            return Ok(None);
        };
        if !entry.is_dir() {
            return Ok(None);
        }
        let rows = self.children_of(entry.id).await?;
        Ok(Some(DirListing {
            base_path: PathBuf::from(&entry.base_path),
            entries: rows.iter().map(EntryRow::to_fs_object).collect(),
        }))
    }

    pub async fn get_fso(&self, rel_path: &str) -> FsalResult<Option<FsObject>> {
        let rel_path = self.validate_wire_path(rel_path)?;
        if is_virtual_root(&rel_path) {
            return Ok(None);
        }
        Ok(self.find_entry_by_path(&rel_path).await?.map(|row| row.to_fs_object()))
    }

    pub async fn exists(&self, rel_path: &str, unindexed: bool) -> FsalResult<bool> {
        let rel_path = self.validate_wire_path(rel_path)?;
        if is_virtual_root(&rel_path) {
            return Ok(true);
        }
        if unindexed {
            return Ok(self.base_paths.iter().any(|base| base.join(&rel_path).exists()));
        }
        Ok(self.find_entry_by_path(&rel_path).await?.is_some())
    }

    pub async fn is_dir(&self, rel_path: &str) -> FsalResult<bool> {
        let rel_path = self.validate_wire_path(rel_path)?;
        if is_virtual_root(&rel_path) {
            return Ok(true);
        }
        Ok(self.find_entry_by_path(&rel_path).await?.is_some_and(|e| e.is_dir()))
    }

    pub async fn is_file(&self, rel_path: &str) -> FsalResult<bool> {
        let rel_path = self.validate_wire_path(rel_path)?;
        Ok(self.find_entry_by_path(&rel_path).await?.is_some_and(|e| !e.is_dir()))
    }

    pub async fn search(&self, query: &str, whole_words: bool, exclude: &[String]) -> FsalResult<SearchResult> {
        let trimmed = query.trim();
        if let Some(listing) = self.list_dir(trimmed).await? {
            return Ok(SearchResult { is_match: true, base_path: listing.base_path, entries: listing.entries });
        }

        let keywords: Vec<&str> = trimmed.split_whitespace().collect();
        if keywords.is_empty() {
            return Ok(SearchResult { is_match: false, base_path: self.default_base()?.to_path_buf(), entries: Vec::new() });
        }

        let mut builder = sqlx::QueryBuilder::new(
            "SELECT id, parent_id, type, path, size, create_time, modify_time, base_path FROM fsentries WHERE (",
        );
        for (i, kw) in keywords.iter().enumerate() {
            if i > 0 {
                builder.push(" OR ");
            }
            let pattern = format!("%{}%", escape_like(kw));
            if whole_words {
                builder.push("name LIKE ").push_bind(pattern).push(" ESCAPE '\\'");
            } else {
                builder.push("LOWER(name) LIKE LOWER(").push_bind(pattern).push(") ESCAPE '\\'");
            }
        }
        builder.push(")");

        let rows: Vec<EntryRow> = builder.build_query_as().fetch_all(self.db.pool()).await?;
        let mut entries: Vec<FsObject> = rows
            .iter()
            .filter(|row| !whole_words || keywords.iter().any(|kw| has_whole_word(&row_name(row), kw)))
            .map(EntryRow::to_fs_object)
            .collect();

        if !exclude.is_empty() {
            let pattern = format!("^({})$", exclude.iter().map(|p| p.replace('.', "\\.")).collect::<Vec<_>>().join("|"));
            if let Ok(re) = Regex::new(&pattern) {
                entries.retain(|e| !re.is_match(&e.name));
            }
        }

        Ok(SearchResult { is_match: false, base_path: self.default_base()?.to_path_buf(), entries })
    }

    pub async fn get_changes(&self, limit: i64) -> FsalResult<Vec<QueuedEvent>> {
        self.events.peek(limit).await
    }

    pub async fn confirm_changes(&self, limit: i64) -> FsalResult<Vec<QueuedEvent>> {
        self.events.drain(limit).await
    }

    // ---- mutations (run on the scheduler worker) ------------------------

    pub async fn remove(&self, rel_path: &str) -> FsalResult<()> {
        let rel_path = self.validate_wire_path(rel_path)?;
        self.run_on_scheduler({
            let indexer = self.clone();
            move || indexer.remove_fso(rel_path)
        })
        .await
    }

    pub async fn transfer(&self, src: &str, dest: &str) -> FsalResult<()> {
        self.run_on_scheduler({
            let indexer = self.clone();
            let src = src.to_string();
            let dest = dest.to_string();
            move || indexer.do_transfer(src, dest)
        })
        .await
    }

    pub async fn refresh_path(&self, rel_path: &str) -> FsalResult<()> {
        let rel_path = self.validate_wire_path(rel_path)?;
        let indexer = self.clone();
        self.scheduler
            .schedule(async move {
                if let Err(e) = indexer.update_db(Some(&rel_path)).await {
                    error!(path = %rel_path, error = %e, "scheduled rescan failed");
                }
            })
            .await;
        Ok(())
    }

    pub async fn refresh(&self) -> FsalResult<()> {
        let indexer = self.clone();
        self.scheduler
            .schedule(async move {
                if let Err(e) = indexer.refresh_db().await {
                    error!(error = %e, "full refresh failed");
                }
            })
            .await;
        Ok(())
    }

    /// Run a fallible job on the scheduler worker and wait for its result.
    /// Used by operations (`remove`, `transfer`) whose wire contract
    /// reports success/failure back to the caller.
    async fn run_on_scheduler<F, Fut>(&self, job: F) -> FsalResult<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = FsalResult<()>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.scheduler
            .schedule(async move {
                let result = job().await;
                let _ = tx.send(result);
            })
            .await;
        rx.await.map_err(|_| FsalError::Protocol("scheduler job was dropped".to_string()))?
    }

    // ---- notification listener callback ---------------------------------

    /// Called by the notification listener for each `file_complete`
    /// notification. Never propagates an error: a single bad
    /// notification must not interrupt the rest of the batch.
    pub async fn handle_notification(&self, raw_path: &str) {
        if let Err(e) = self.process_notification(raw_path).await {
            warn!(path = %raw_path, error = %e, "notification handling failed");
        }
    }

    async fn process_notification(&self, raw_path: &str) -> FsalResult<()> {
        let resolved = self.resolve_incoming_path(raw_path).await?;
        let parent = self.deepest_indexed_parent(&resolved).await?;
        let indexer = self.clone();
        self.scheduler
            .schedule(async move {
                if let Err(e) = indexer.update_db(Some(&parent)).await {
                    error!(path = %parent, error = %e, "notification-triggered rescan failed");
                }
            })
            .await;
        Ok(())
    }

    /// If `rel_path` names a bundle, extract it and return the common
    /// ancestor of what it produced; otherwise return `rel_path` itself.
    async fn resolve_incoming_path(&self, rel_path: &str) -> FsalResult<String> {
        if self.bundles.is_bundle(rel_path) {
            if let Some(base) = self.find_owning_base(rel_path) {
                let extracted = self.bundles.extract(base, rel_path).await?;
                if !extracted.is_empty() {
                    return Ok(path_utils::common_ancestor(&extracted));
                }
            }
        }
        Ok(rel_path.to_string())
    }

    fn find_owning_base(&self, rel_path: &str) -> Option<PathBuf> {
        self.base_paths.iter().find(|base| base.join(rel_path).is_file()).cloned()
    }

    /// Ascend `rel_path`'s ancestors until one is indexed (or the virtual
    /// root, which is always considered indexed).
    async fn deepest_indexed_parent(&self, rel_path: &str) -> FsalResult<String> {
        for ancestor in path_utils::ancestors(rel_path).skip(1) {
            if self.exists(&ancestor, false).await? {
                return Ok(ancestor);
            }
        }
        Ok(String::new())
    }

    // ---- scan / prune / bundle extraction --------------------------------

    async fn refresh_db(&self) -> FsalResult<()> {
        self.prune_db().await?;
        self.extract_bundles().await?;
        self.update_db(None).await?;
        self.record_op_time().await?;
        Ok(())
    }

    /// Walk `bundles_dir` under every base, extracting every recognised
    /// bundle. Each base's extraction errors are independent.
    async fn extract_bundles(&self) -> FsalResult<()> {
        for base in self.base_paths.clone() {
            let bundles_root = base.join(&self.bundles_dir);
            if !bundles_root.is_dir() {
                continue;
            }
            let mut entries = match tokio::fs::read_dir(&bundles_root).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %bundles_root.display(), error = %e, "cannot read bundles dir");
                    continue;
                }
            };
            while let Some(entry) = entries.next_entry().await.ok().flatten() {
                let Ok(metadata) = entry.metadata().await else { continue };
                if !metadata.is_file() {
                    continue;
                }
                let rel_path = format!("{}/{}", self.bundles_dir, entry.file_name().to_string_lossy());
                if !self.bundles.is_bundle(&rel_path) {
                    continue;
                }
                match self.bundles.extract(&base, &rel_path).await {
                    Ok(extracted) if !extracted.is_empty() => {
                        debug!(bundle = %rel_path, count = extracted.len(), "bundle extracted during refresh");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(bundle = %rel_path, error = %e, "bundle extraction error"),
                }
            }
        }
        Ok(())
    }

    /// For each base, walk the tree rooted at `root` (default: the base
    /// itself) and reconcile it against the index. `root` is validated
    /// against each base in turn; a base for which `root` does not
    /// canonicalise to a location inside it is skipped rather than
    /// scanned from an escaped root.
    async fn update_db(&self, root: Option<&str>) -> FsalResult<()> {
        for base in self.base_paths.clone() {
            let start = match root {
                Some(r) if !r.is_empty() => match path_utils::validate_internal_path(&base, r) {
                    Ok(rel) => base.join(rel),
                    Err(_) => continue,
                },
                _ => base.clone(),
            };
            if !start.exists() {
                continue;
            }
            self.scan_tree(&base, &start).await?;
        }
        Ok(())
    }

    async fn scan_tree(&self, base: &Path, start: &Path) -> FsalResult<()> {
        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        queue.push_back(start.to_path_buf());
        let mut parent_cache = ParentCache::new(PARENT_CACHE_CAPACITY);

        while let Some(dir) = queue.pop_front() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "failed to read directory during scan");
                    continue;
                }
            };

            loop {
                let next = read_dir.next_entry().await;
                let entry = match next {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(path = %dir.display(), error = %e, "directory read error");
                        break;
                    }
                };

                let path = entry.path();
                if path == *base {
                    continue;
                }
                let Ok(metadata) = tokio::fs::symlink_metadata(&path).await else { continue };
                if metadata.is_symlink() {
                    continue;
                }

                let rel_path = match path.strip_prefix(base) {
                    Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                    Err(_) => continue,
                };
                if self.blacklist.is_blacklisted(&rel_path) {
                    continue;
                }

                if let Err(e) = self.visit_entry(base, &rel_path, &metadata, &mut parent_cache).await {
                    warn!(path = %rel_path, error = %e, "failed to index entry");
                    continue;
                }
                if metadata.is_dir() {
                    queue.push_back(path);
                }
            }
            // suspension point: yield between directories
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn visit_entry(
        &self,
        base: &Path,
        rel_path: &str,
        metadata: &std::fs::Metadata,
        parent_cache: &mut ParentCache,
    ) -> FsalResult<()> {
        let fso = FsObject::from_metadata(base, rel_path, metadata)?;
        let parent_rel = rsplit_parent(rel_path);
        let parent_id = match &parent_rel {
            Some(p) => match parent_cache.get(p) {
                Some(id) => id,
                None => self.find_entry_by_path(p).await?.map(|row| row.id).unwrap_or(0),
            },
            None => 0,
        };

        match self.find_entry_by_path(rel_path).await? {
            None => {
                let kind = if fso.is_dir() { 1 } else { 0 };
                let id: i64 = sqlx::query(
                    "INSERT INTO fsentries (parent_id, type, name, size, create_time, modify_time, path, base_path)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(parent_id)
                .bind(kind)
                .bind(&fso.name)
                .bind(fso.size as i64)
                .bind(crate::domain::fs_object::datetime_to_seconds(fso.create_date))
                .bind(crate::domain::fs_object::datetime_to_seconds(fso.modify_date))
                .bind(rel_path)
                .bind(base.to_string_lossy().into_owned())
                .execute(self.db.pool())
                .await?
                .last_insert_rowid();

                self.events.add(&ChangeEvent::created(rel_path.to_string(), fso.is_dir())).await?;
                if fso.is_dir() {
                    parent_cache.insert(rel_path.to_string(), id);
                }
            }
            Some(row) => {
                let old = row.to_fs_object();
                if fso.changed(&old) {
                    sqlx::query(
                        "UPDATE fsentries SET size = ?, create_time = ?, modify_time = ? WHERE id = ?",
                    )
                    .bind(fso.size as i64)
                    .bind(crate::domain::fs_object::datetime_to_seconds(fso.create_date))
                    .bind(crate::domain::fs_object::datetime_to_seconds(fso.modify_date))
                    .bind(row.id)
                    .execute(self.db.pool())
                    .await?;
                    self.events.add(&ChangeEvent::modified(rel_path.to_string(), fso.is_dir())).await?;
                }
                if fso.is_dir() {
                    parent_cache.insert(rel_path.to_string(), row.id);
                }
            }
        }
        Ok(())
    }

    async fn prune_db(&self) -> FsalResult<()> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT id, parent_id, type, path, size, create_time, modify_time, base_path FROM fsentries",
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut stale = Vec::new();
        for row in rows {
            let base_ok = self.base_paths.iter().any(|b| b.to_string_lossy() == row.base_path);
            let abs = PathBuf::from(&row.base_path).join(&row.rel_path);
            let blacklisted = self.blacklist.is_blacklisted(&row.rel_path);
            if !base_ok || !abs.exists() || blacklisted {
                stale.push(row);
            }
        }

        for chunk in stale.chunks(1000) {
            let mut tx = self.db.pool().begin().await?;
            for row in chunk {
                sqlx::query("DELETE FROM fsentries WHERE path = ?")
                    .bind(&row.rel_path)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            let events: Vec<ChangeEvent> =
                chunk.iter().map(|row| ChangeEvent::deleted(row.rel_path.clone(), row.is_dir())).collect();
            self.events.add_many(&events).await?;
        }
        Ok(())
    }

    async fn remove_fso(&self, rel_path: String) -> FsalResult<()> {
        let entry = self
            .find_entry_by_path(&rel_path)
            .await?
            .ok_or_else(|| FsalError::NotFound(rel_path.clone()))?;
        let abs = PathBuf::from(&entry.base_path).join(&rel_path);

        let mut events = Vec::new();
        if entry.is_dir() {
            let like_pattern = format!("{}/%", escape_like(&rel_path));
            let mut descendants: Vec<EntryRow> = sqlx::query_as(
                "SELECT id, parent_id, type, path, size, create_time, modify_time, base_path
                 FROM fsentries WHERE path LIKE ? ESCAPE '\\'",
            )
            .bind(&like_pattern)
            .fetch_all(self.db.pool())
            .await?;
            descendants.sort_by_key(|r| std::cmp::Reverse(r.rel_path.matches('/').count()));
            for row in &descendants {
                events.push(ChangeEvent::deleted(row.rel_path.clone(), row.is_dir()));
            }
        }
        events.push(ChangeEvent::deleted(rel_path.clone(), entry.is_dir()));

        let remove_result =
            if entry.is_dir() { std::fs::remove_dir_all(&abs) } else { std::fs::remove_file(&abs) };
        if let Err(e) = remove_result {
            error!(path = %rel_path, error = %e, "remove failed on disk, scheduling reconcile");
            self.schedule_reconcile().await;
            return Err(FsalError::filesystem(abs, e));
        }

        if let Err(e) = self.remove_from_db(&rel_path, entry.is_dir(), &events).await {
            error!(path = %rel_path, error = %e, "remove failed after disk removal, scheduling reconcile");
            self.schedule_reconcile().await;
            return Err(e);
        }
        Ok(())
    }

    async fn remove_from_db(&self, rel_path: &str, is_dir: bool, events: &[ChangeEvent]) -> FsalResult<()> {
        if is_dir {
            let like_pattern = format!("{}/%", escape_like(rel_path));
            sqlx::query("DELETE FROM fsentries WHERE path = ? OR path LIKE ? ESCAPE '\\'")
                .bind(rel_path)
                .bind(like_pattern)
                .execute(self.db.pool())
                .await?;
        } else {
            sqlx::query("DELETE FROM fsentries WHERE path = ?")
                .bind(rel_path)
                .execute(self.db.pool())
                .await?;
        }
        self.events.add_many(events).await?;
        Ok(())
    }

    async fn schedule_reconcile(&self) {
        let indexer = self.clone();
        self.scheduler.schedule(async move { let _ = indexer.refresh_db().await; }).await;
    }

    async fn do_transfer(&self, src: String, dest: String) -> FsalResult<()> {
        let src_path = path_utils::validate_external_path(&src)?;
        if !src_path.exists() {
            return Err(FsalError::NotFound(src_path.display().to_string()));
        }
        if self.base_paths.iter().any(|b| src_path.starts_with(b)) {
            return Err(FsalError::InvalidPath(format!("{} is already inside the index", src_path.display())));
        }

        let default_base = self.default_base()?.to_path_buf();
        let dest_rel = path_utils::validate_internal_path(&default_base, &dest)?;
        let mut real_dest = default_base.join(&dest_rel);
        if real_dest.is_dir() {
            let basename = src_path
                .file_name()
                .ok_or_else(|| FsalError::InvalidPath(src.clone()))?;
            real_dest = real_dest.join(basename);
        }
        if real_dest.exists() {
            return Err(FsalError::AlreadyExists(real_dest.display().to_string()));
        }

        check_transfer_path_lengths(&src_path, &real_dest)?;

        if let Some(parent) = real_dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FsalError::filesystem(parent, e))?;
        }
        std::fs::rename(&src_path, &real_dest).map_err(|e| FsalError::filesystem(&real_dest, e))?;

        let dest_rel_final = real_dest
            .strip_prefix(&default_base)
            .unwrap_or(&real_dest)
            .to_string_lossy()
            .replace('\\', "/");
        let parent_rel = self.deepest_indexed_parent(&dest_rel_final).await?;
        let indexer = self.clone();
        self.scheduler
            .schedule(async move {
                if let Err(e) = indexer.update_db(Some(&parent_rel)).await {
                    error!(path = %parent_rel, error = %e, "post-transfer rescan failed");
                }
            })
            .await;
        Ok(())
    }

    async fn record_op_time(&self) -> FsalResult<()> {
        let now = now_seconds();
        sqlx::query("UPDATE dbmgr_stats SET op_time = ?").bind(now).execute(self.db.pool()).await?;
        Ok(())
    }

    /// Read `op_time`, clamped to 0 if the system clock has rewound since
    /// it was recorded (invariant: a future-dated `op_time` is never
    /// trusted).
    #[allow(dead_code)]
    async fn read_op_time(&self) -> FsalResult<f64> {
        let row: (f64,) = sqlx::query_as("SELECT op_time FROM dbmgr_stats LIMIT 1")
            .fetch_one(self.db.pool())
            .await?;
        Ok(if row.0 > now_seconds() { 0.0 } else { row.0 })
    }

    async fn find_entry_by_path(&self, rel_path: &str) -> FsalResult<Option<EntryRow>> {
        let row: Option<EntryRow> = sqlx::query_as(
            "SELECT id, parent_id, type, path, size, create_time, modify_time, base_path
             FROM fsentries WHERE path = ?",
        )
        .bind(rel_path)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// Configured base paths, rendered for the `list_base_paths` command.
    pub fn base_paths_display(&self) -> impl Iterator<Item = String> + '_ {
        self.base_paths.iter().map(|p| p.to_string_lossy().into_owned())
    }

    async fn children_of(&self, parent_id: i64) -> FsalResult<Vec<EntryRow>> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT id, parent_id, type, path, size, create_time, modify_time, base_path
             FROM fsentries WHERE parent_id = ?",
        )
        .bind(parent_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }
}

fn is_virtual_root(rel_path: &str) -> bool {
    rel_path.is_empty() || rel_path == "."
}

fn rsplit_parent(rel_path: &str) -> Option<String> {
    rel_path.rsplit_once('/').map(|(parent, _)| parent.to_string())
}

fn row_name(row: &EntryRow) -> String {
    Path::new(&row.rel_path)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn has_whole_word(name: &str, keyword: &str) -> bool {
    name.split(|c: char| !c.is_alphanumeric()).any(|token| token == keyword)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn now_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

fn check_transfer_path_lengths(src: &Path, dest: &Path) -> FsalResult<()> {
    if dest.as_os_str().len() > MAX_TRANSFER_PATH_BYTES {
        return Err(FsalError::LimitExceeded(dest.display().to_string()));
    }
    if src.is_dir() {
        let entries = std::fs::read_dir(src).map_err(|e| FsalError::filesystem(src, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| FsalError::filesystem(src, e))?;
            let child_dest = dest.join(entry.file_name());
            check_transfer_path_lengths(&entry.path(), &child_dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_indexer(base: &Path) -> Indexer {
        let db = Database::connect_memory().await.unwrap();
        let events = EventQueue::new(db.clone());
        let scheduler = Scheduler::start();
        let config_toml = format!(
            "[fsal]\nsocket = \"/tmp/fsal.socket\"\nbasepaths = [\"{}\"]\n\n[ondd]\nsocket = \"/tmp/ondd.socket\"\n\n[database]\npath = \"/tmp/fsal.sqlite\"\n",
            base.display()
        );
        let config: Config = toml::from_str(&config_toml).unwrap();
        Indexer::new(&config, db, events, scheduler).unwrap()
    }

    #[tokio::test]
    async fn refresh_indexes_new_file_and_emits_created() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
        let indexer = test_indexer(dir.path()).await;

        indexer.update_db(None).await.unwrap();
        let listing = indexer.list_dir(".").await.unwrap().unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.entries[0].name, "a.txt");
        assert_eq!(listing.entries[0].size, 10);

        let changes = indexer.get_changes(10).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].event.src, "a.txt");
    }

    #[tokio::test]
    async fn second_refresh_on_steady_tree_produces_no_new_events() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let indexer = test_indexer(dir.path()).await;
        indexer.update_db(None).await.unwrap();
        indexer.confirm_changes(10).await.unwrap();

        indexer.update_db(None).await.unwrap();
        let changes = indexer.get_changes(10).await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn blacklisted_paths_never_appear() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("tmp")).unwrap();
        std::fs::write(dir.path().join("tmp/x"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("keep")).unwrap();
        std::fs::write(dir.path().join("keep/y"), b"y").unwrap();

        let db = Database::connect_memory().await.unwrap();
        let events = EventQueue::new(db.clone());
        let scheduler = Scheduler::start();
        let config_toml = format!(
            "[fsal]\nsocket = \"/tmp/fsal.socket\"\nbasepaths = [\"{}\"]\nblacklist = [\"^tmp/\"]\n\n[ondd]\nsocket = \"/tmp/ondd.socket\"\n\n[database]\npath = \"/tmp/fsal.sqlite\"\n",
            dir.path().display()
        );
        let config: Config = toml::from_str(&config_toml).unwrap();
        let indexer = Indexer::new(&config, db, events, scheduler).unwrap();

        indexer.update_db(None).await.unwrap();
        assert!(!indexer.exists("tmp/x", false).await.unwrap());
        assert!(indexer.exists("keep/y", false).await.unwrap());
    }

    #[tokio::test]
    async fn dotdot_escaping_paths_are_rejected_by_every_query_and_mutation() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let indexer = test_indexer(dir.path()).await;
        indexer.update_db(None).await.unwrap();

        assert!(indexer.list_dir("../escape").await.is_err());
        assert!(indexer.get_fso("../escape").await.is_err());
        assert!(indexer.exists("../../etc/passwd", false).await.is_err());
        assert!(indexer.exists("../../etc/passwd", true).await.is_err());
        assert!(indexer.is_dir("../escape").await.is_err());
        assert!(indexer.is_file("../escape").await.is_err());
        assert!(indexer.remove("../escape").await.is_err());
        assert!(indexer.refresh_path("../../etc").await.is_err());
    }

    #[tokio::test]
    async fn refresh_path_escaping_every_base_scans_nothing() {
        let base_a = tempdir().unwrap();
        let base_b = tempdir().unwrap();
        std::fs::write(base_a.path().join("a.txt"), b"x").unwrap();

        let db = Database::connect_memory().await.unwrap();
        let events = EventQueue::new(db.clone());
        let scheduler = Scheduler::start();
        let config_toml = format!(
            "[fsal]\nsocket = \"/tmp/fsal.socket\"\nbasepaths = [\"{}\", \"{}\"]\n\n[ondd]\nsocket = \"/tmp/ondd.socket\"\n\n[database]\npath = \"/tmp/fsal.sqlite\"\n",
            base_a.path().display(),
            base_b.path().display()
        );
        let config: Config = toml::from_str(&config_toml).unwrap();
        let indexer = Indexer::new(&config, db, events, scheduler).unwrap();
        indexer.update_db(None).await.unwrap();

        assert!(indexer.refresh_path("../../etc").await.is_err());
        assert!(indexer.exists("../../etc/passwd", true).await.is_err());
        assert!(indexer.exists("a.txt", false).await.unwrap());
    }

    #[tokio::test]
    async fn remove_directory_emits_deleted_events_and_clears_index() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        std::fs::write(dir.path().join("d/x.txt"), b"x").unwrap();
        let indexer = test_indexer(dir.path()).await;
        indexer.update_db(None).await.unwrap();
        indexer.confirm_changes(10).await.unwrap();

        indexer.remove("d").await.unwrap();
        assert!(!indexer.exists("d", false).await.unwrap());
        assert!(!dir.path().join("d").exists());
        let changes = indexer.get_changes(10).await.unwrap();
        assert!(changes.iter().any(|e| e.event.src == "d" && e.event.kind == crate::domain::EventKind::Deleted));
    }

    #[tokio::test]
    async fn transfer_collision_leaves_source_and_index_unchanged() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("dest")).unwrap();
        std::fs::write(dir.path().join("dest/x.txt"), b"existing").unwrap();
        let src_dir = tempdir().unwrap();
        std::fs::write(src_dir.path().join("x.txt"), b"incoming").unwrap();
        let indexer = test_indexer(dir.path()).await;
        indexer.update_db(None).await.unwrap();

        let src = src_dir.path().join("x.txt");
        let result = indexer.transfer(src.to_str().unwrap(), "dest").await;
        assert!(result.is_err());
        assert!(src.exists());
        assert!(dir.path().join("dest/x.txt").exists());
        let content = std::fs::read(dir.path().join("dest/x.txt")).unwrap();
        assert_eq!(content, b"existing");
    }

    #[test]
    fn has_whole_word_matches_exact_tokens_only() {
        assert!(has_whole_word("report-draft.txt", "report"));
        assert!(!has_whole_word("reporting.txt", "report"));
    }
}
