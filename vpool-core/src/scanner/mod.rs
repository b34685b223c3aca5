//! Deep scan of a directory tree for installable media.
//!
//! A scan populates a staging directory with links to every ISO image found
//! below a root path. The staging directory backs a transient pool that is
//! created before the walk starts, so the pool is visible right away.
//!
//! Lifecycle of a scan:
//! 1. [`Scanner::scan_dir_prepare`] creates `<staging_root>/vpool-scan-<pool>-<nonce>`
//! 2. the caller starts a transient pool on it
//! 3. [`Scanner::start_scan`] walks the tree on a blocking thread
//! 4. `scan_ttl` after the task ends, the pool is destroyed, the staging
//!    directory removed and the `scanning` association deleted
//!
//! Staging directories left behind by a previous process are torn down when
//! the scanner is built.

pub mod probe;

use crate::config::Config;
use crate::connection::StorageConnection;
use crate::error::{Result, VpoolError};
use crate::paths::SCAN_DIR_PREFIX;
use crate::store::{ObjectStore, SCANNING};
use crate::tasks::{ProgressReporter, TaskRegistry};
use anyhow::anyhow;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Files visited between two progress reports.
const PROGRESS_EVERY: u64 = 200;

static NONCE: AtomicU64 = AtomicU64::new(0);

/// Which `scanning` association a teardown may delete.
#[derive(Debug, Clone, Copy)]
enum Association<'a> {
    /// Recorded by this scan; deleted only while it still names this task
    Task(&'a str),
    /// Never recorded; left untouched
    NotRecorded,
    /// Unknown owner (stale sweep); deleted only when no other scan holds the name
    Unknown,
}

/// Parameters of one deep scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    /// Transient pool backed by the staging directory
    pub pool_name: String,
    /// Root of the walk
    pub scan_path: PathBuf,
    /// Directories never descended into (paths of active pools)
    pub ignore_list: Vec<PathBuf>,
    /// Staging directory returned by [`Scanner::scan_dir_prepare`]
    pub pool_path: PathBuf,
}

/// Counters of a finished walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files: u64,
    pub images: u64,
}

/// Scanner settings.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub staging_root: PathBuf,
    /// Retention of a finished scan pool, and age of a stale staging dir
    pub ttl: Duration,
    pub timeout: Duration,
}

impl ScanSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            staging_root: PathBuf::from(&config.staging_dir),
            ttl: config.scan_ttl(),
            timeout: config.scan_timeout(),
        }
    }
}

/// Deep scan worker.
#[derive(Clone)]
pub struct Scanner {
    inner: Arc<ScannerInner>,
}

struct ScannerInner {
    settings: ScanSettings,
    tasks: TaskRegistry,
    store: ObjectStore,
    conn: Arc<dyn StorageConnection>,
    /// Staging dirs owned by scans of this process that are not torn down yet
    live: Mutex<HashSet<PathBuf>>,
}

impl Scanner {
    /// Build the scanner and tear down every staging directory left behind.
    #[instrument(skip_all)]
    pub async fn new(
        settings: ScanSettings,
        tasks: TaskRegistry,
        store: ObjectStore,
        conn: Arc<dyn StorageConnection>,
    ) -> Self {
        let scanner = Self {
            inner: Arc::new(ScannerInner {
                settings,
                tasks,
                store,
                conn,
                live: Mutex::new(HashSet::new()),
            }),
        };
        let removed = scanner.clean_stale(Duration::ZERO).await;
        if removed > 0 {
            info!(removed, "Removed staging directories of a previous run");
        }
        scanner
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.inner.settings
    }

    /// Create a fresh staging directory for `pool_name`.
    ///
    /// Staging directories older than the retention window that belong to
    /// no running scan are torn down first.
    #[instrument(skip(self))]
    pub async fn scan_dir_prepare(&self, pool_name: &str) -> Result<PathBuf> {
        self.clean_stale(self.inner.settings.ttl).await;

        let root = &self.inner.settings.staging_root;
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| VpoolError::IoError { path: root.clone(), source: e })?;

        let nonce = format!(
            "{:x}{:x}",
            SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros()).unwrap_or(0),
            NONCE.fetch_add(1, Ordering::Relaxed)
        );
        let path = root.join(format!("{}{}-{}", SCAN_DIR_PREFIX, pool_name, nonce));
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| VpoolError::IoError { path: path.clone(), source: e })?;

        self.track(&path, true);
        debug!(path = %path.display(), "Staging directory created");
        Ok(path)
    }

    /// Remove a staging directory whose scan never started.
    pub async fn discard(&self, pool_path: &Path) {
        remove_staging(pool_path).await;
        self.track(pool_path, false);
    }

    /// Submit the walk for `job`, record the pool → task association and
    /// return the task id.
    ///
    /// Teardown is scheduled for `ttl` after the task ends, whatever its
    /// outcome. It is scheduled even when recording the association fails,
    /// and runs right away when the task cannot be submitted.
    #[instrument(skip(self, job), fields(pool = %job.pool_name))]
    pub async fn start_scan(&self, job: ScanJob) -> Result<String> {
        let target = Some(format!("/storagepools/{}", job.pool_name));
        let timeout = self.inner.settings.timeout;
        let walk_job = job.clone();

        let submitted = self
            .inner
            .tasks
            .submit(target, move |reporter| run_scan(walk_job, reporter, timeout))
            .await;
        let task_id = match submitted {
            Ok(task_id) => task_id,
            Err(e) => {
                // Nothing will ever clean up after this scan
                self.teardown(&job.pool_name, &job.pool_path, Association::NotRecorded).await;
                return Err(e);
            }
        };

        metrics::counter!("vpool_scans_started_total").increment(1);
        info!(
            task_id = %task_id,
            scan_path = %job.scan_path.display(),
            ignored = job.ignore_list.len(),
            "Deep scan started"
        );

        // Recorded before teardown is scheduled so teardown always sees it
        let recorded = self.record_association(&job.pool_name, &task_id).await;

        let scanner = self.clone();
        let cleanup_task = task_id.clone();
        tokio::spawn(async move {
            if let Err(e) = scanner.inner.tasks.wait(&cleanup_task).await {
                warn!(task_id = %cleanup_task, error = %e, "Lost track of scan task");
            }
            tokio::time::sleep(scanner.inner.settings.ttl).await;
            scanner
                .teardown(&job.pool_name, &job.pool_path, Association::Task(&cleanup_task))
                .await;
        });

        recorded.map(|()| task_id)
    }

    async fn record_association(&self, pool_name: &str, task_id: &str) -> Result<()> {
        let mut session = self.inner.store.session().await?;
        session.store(SCANNING, pool_name, task_id).await?;
        session.commit().await
    }

    /// Tear down staging directories older than `window` that no running
    /// scan owns. Returns how many were removed.
    pub async fn clean_stale(&self, window: Duration) -> usize {
        let root = self.inner.settings.staging_root.clone();
        let mut entries = match tokio::fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %root.display(), error = %e, "Cannot list staging root");
                }
                return 0;
            }
        };

        let mut stale = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Error reading staging root");
                    break;
                }
            };
            let path = entry.path();
            let Some(pool_name) = staging_pool_name(&path) else {
                continue;
            };
            if self.is_live(&path) {
                continue;
            }
            let age = entry
                .metadata()
                .await
                .and_then(|m| m.created().or_else(|_| m.modified()))
                .ok()
                .and_then(|t| t.elapsed().ok())
                .unwrap_or(Duration::MAX);
            if age >= window {
                stale.push((pool_name, path));
            }
        }

        for (pool_name, path) in &stale {
            self.teardown(pool_name, path, Association::Unknown).await;
        }
        stale.len()
    }

    /// Destroy the scan pool, remove its staging directory and forget the
    /// association. Failures are logged and never propagated.
    ///
    /// An association of unknown owner survives while another staging
    /// directory of this process or a pool on another directory holds the name.
    async fn teardown(&self, pool_name: &str, pool_path: &Path, association: Association<'_>) {
        debug!(pool = %pool_name, path = %pool_path.display(), "Tearing down scan pool");
        metrics::counter!("vpool_scan_cleanups_total").increment(1);

        let name_released = match self.destroy_transient(pool_name, pool_path).await {
            Ok(released) => released,
            Err(e) => {
                cleanup_failed(pool_name, "destroy pool", &e);
                false
            }
        };

        remove_staging(pool_path).await;
        self.track(pool_path, false);

        let (forget, task_id) = match association {
            Association::Task(task_id) => (true, Some(task_id)),
            Association::NotRecorded => (false, None),
            Association::Unknown => (name_released && !self.has_live_scan(pool_name), None),
        };
        if !forget {
            debug!(pool = %pool_name, "Keeping scanning association");
            return;
        }
        if let Err(e) = self.forget_association(pool_name, task_id).await {
            cleanup_failed(pool_name, "delete association", &e);
        }
    }

    /// Destroy the transient pool backed by `pool_path`. Returns false when
    /// `pool_name` is held by a pool this scan does not own.
    async fn destroy_transient(&self, pool_name: &str, pool_path: &Path) -> Result<bool> {
        let manager = self.inner.conn.get().await?;
        let pool = match manager.lookup(pool_name).await {
            Ok(pool) => pool,
            Err(e) if e.is_no_pool() => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        // A persistent pool or one on another directory is not ours
        if pool.is_persistent().await? || pool.definition().await?.target_path != pool_path {
            debug!(pool = %pool_name, "Pool no longer backed by this scan, leaving it");
            return Ok(false);
        }
        pool.destroy().await?;
        Ok(true)
    }

    /// Delete the association of `pool_name`; with `task_id` set it must
    /// match the stored one.
    async fn forget_association(&self, pool_name: &str, task_id: Option<&str>) -> Result<()> {
        let mut session = self.inner.store.session().await?;
        if let Some(task_id) = task_id {
            match session.get::<String>(SCANNING, pool_name).await {
                Ok(stored) if stored != task_id => return Ok(()),
                Ok(_) => {}
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        match session.delete(SCANNING, pool_name).await {
            Ok(()) => session.commit().await,
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn track(&self, path: &Path, live: bool) {
        let mut set = self.inner.live.lock().unwrap_or_else(|e| e.into_inner());
        if live {
            set.insert(path.to_path_buf());
        } else {
            set.remove(path);
        }
    }

    fn is_live(&self, path: &Path) -> bool {
        self.inner.live.lock().unwrap_or_else(|e| e.into_inner()).contains(path)
    }

    fn has_live_scan(&self, pool_name: &str) -> bool {
        let live = self.inner.live.lock().unwrap_or_else(|e| e.into_inner());
        live.iter().any(|path| staging_pool_name(path).as_deref() == Some(pool_name))
    }
}

/// Work item of a scan task.
async fn run_scan(
    job: ScanJob,
    reporter: ProgressReporter,
    timeout: Duration,
) -> anyhow::Result<()> {
    reporter.progress(format!("scanning {}", job.scan_path.display()));

    let cancel = Arc::new(AtomicBool::new(false));
    let walk_cancel = cancel.clone();
    let walk_reporter = reporter.clone();
    let walk = tokio::task::spawn_blocking(move || walk_tree(&job, &walk_reporter, &walk_cancel));

    let summary = match tokio::time::timeout(timeout, walk).await {
        Ok(joined) => joined.map_err(|e| anyhow!("scan worker stopped: {}", e))??,
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            return Err(anyhow!("scan timed out after {} seconds", timeout.as_secs()));
        }
    };

    metrics::counter!("vpool_scan_images_found_total").increment(summary.images);
    reporter.finish(format!(
        "scan finished: {} images found in {} files",
        summary.images, summary.files
    ));
    Ok(())
}

/// Walk `job.scan_path` and link every image into the staging directory.
fn walk_tree(
    job: &ScanJob,
    reporter: &ProgressReporter,
    cancel: &AtomicBool,
) -> anyhow::Result<ScanSummary> {
    if !job.scan_path.is_dir() {
        return Err(anyhow!("{} is not a directory", job.scan_path.display()));
    }

    let mut summary = ScanSummary::default();
    let walker = WalkDir::new(&job.scan_path)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_ignored(entry.path(), job));

    for entry in walker {
        if cancel.load(Ordering::Relaxed) {
            return Err(anyhow!("scan cancelled"));
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        summary.files += 1;
        if summary.files % PROGRESS_EVERY == 0 {
            reporter.progress(format!(
                "{} files scanned, {} images found",
                summary.files, summary.images
            ));
        }

        let path = entry.path();
        if !probe::has_iso_extension(path) {
            continue;
        }
        match probe::probe_iso(path) {
            Ok(Some(image)) => {
                let link = link_image(&job.pool_path, path)?;
                summary.images += 1;
                debug!(
                    image = %path.display(),
                    link = %link.display(),
                    volume_id = %image.volume_id,
                    "Found image"
                );
            }
            Ok(None) => debug!(path = %path.display(), "Not an ISO-9660 image"),
            Err(e) => debug!(path = %path.display(), error = %e, "Cannot probe file"),
        }
    }

    Ok(summary)
}

fn is_ignored(path: &Path, job: &ScanJob) -> bool {
    path.starts_with(&job.pool_path) || job.ignore_list.iter().any(|dir| path.starts_with(dir))
}

/// Link `image` into `staging` under its file name, suffixing `-N` on clashes.
fn link_image(staging: &Path, image: &Path) -> anyhow::Result<PathBuf> {
    let file_name = image
        .file_name()
        .ok_or_else(|| anyhow!("{} has no file name", image.display()))?;
    let stem = image.file_stem().unwrap_or(file_name).to_string_lossy().to_string();
    let ext = image.extension().map(|e| e.to_string_lossy().to_string());

    let mut candidate = staging.join(file_name);
    let mut n = 1;
    while candidate.symlink_metadata().is_ok() {
        let name = match &ext {
            Some(ext) => format!("{}-{}.{}", stem, n, ext),
            None => format!("{}-{}", stem, n),
        };
        candidate = staging.join(name);
        n += 1;
    }

    make_link(image, &candidate)
        .map_err(|e| anyhow!("cannot link {} into {}: {}", image.display(), staging.display(), e))?;
    Ok(candidate)
}

#[cfg(unix)]
fn make_link(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn make_link(original: &Path, link: &Path) -> std::io::Result<()> {
    std::fs::hard_link(original, link)
}

/// Pool name encoded in a staging directory name.
fn staging_pool_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_prefix(SCAN_DIR_PREFIX)?;
    let (pool, _nonce) = rest.rsplit_once('-')?;
    (!pool.is_empty()).then(|| pool.to_string())
}

async fn remove_staging(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => cleanup_failed(&path.display().to_string(), "remove staging dir", &e),
    }
}

fn cleanup_failed(subject: &str, step: &str, error: &dyn std::fmt::Display) {
    metrics::counter!("vpool_scan_cleanup_errors_total").increment(1);
    warn!(subject, step, error = %error, "Scan cleanup step failed");
}
