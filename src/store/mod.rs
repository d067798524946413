// src/store/mod.rs

//! Durable per-step status records.
//!
//! Layout on disk:
//!
//! `<state_dir>/status/<StepId>.json`
//!
//! Each file holds the latest [`StepRun`] of that step. Writes go to a
//! sibling `.tmp` file which is then renamed over the record, so a reader
//! only ever sees a complete document. Writes to the same step are
//! serialised by a per-step lock; different steps never contend.
//!
//! A store opened by the hub that owns the state dir (see [`lock`]) keeps
//! the latest record of every step in memory. That copy is authoritative:
//! a write that fails leaves the step pending until a later
//! [`StatusStore::flush_pending`] gets it to disk, and a write that is
//! older than the record already held is dropped. A store opened while
//! another hub owns the state dir is read-only and always reads the disk.

pub mod lock;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};

use crate::errors::{HubError, Result};
use crate::types::{StepRun, StepStatus, UpgradeStep};

pub use lock::{LOCK_FILE, StateDirLock};

/// Directory (relative to the state dir) holding the status records.
pub const STATUS_DIR: &str = "status";

/// Output line appended to a record that was `Running` when the hub stopped.
pub const INTERRUPTED_NOTE: &str = "hub restarted while this step was running";

/// Extension an unreadable record is renamed to on open.
pub const CORRUPT_EXTENSION: &str = "json.corrupt";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
struct Cache {
    records: HashMap<UpgradeStep, StepRun>,
    pending: BTreeSet<UpgradeStep>,
}

#[derive(Debug)]
enum Access {
    Owner(StateDirLock),
    ReadOnly,
}

#[derive(Debug)]
pub struct StatusStore {
    state_dir: PathBuf,
    dir: PathBuf,
    access: Access,
    cache: Mutex<Cache>,
    write_locks: Mutex<HashMap<UpgradeStep, Arc<AsyncMutex<()>>>>,
}

impl StatusStore {
    /// Open the store under `state_dir`.
    ///
    /// If the state dir lock is free it is taken for the lifetime of the
    /// store and every record is loaded. Records left `Running` by a
    /// previous hub are closed as `Failed`, since nothing monitors their
    /// process any more; unreadable records are moved aside. Otherwise the
    /// store is read-only and nothing on disk is touched.
    ///
    /// Disk problems are logged, never returned: a hub with a broken state
    /// dir still starts and keeps its records in memory.
    pub async fn open(state_dir: impl AsRef<Path>) -> Result<Self> {
        let state_dir = state_dir.as_ref().to_path_buf();
        let dir = state_dir.join(STATUS_DIR);
        if let Err(err) = fs::create_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %err, "cannot create status directory");
        }

        let access = match StateDirLock::try_acquire(&state_dir) {
            Ok(Some(lock)) => {
                debug!(lock = %lock.path().display(), "state dir lock taken");
                Access::Owner(lock)
            }
            Ok(None) => {
                info!(
                    state_dir = %state_dir.display(),
                    "state dir is owned by another hub; opening status read-only"
                );
                Access::ReadOnly
            }
            Err(err) => {
                warn!(
                    state_dir = %state_dir.display(),
                    error = %err,
                    "cannot lock state dir; opening status read-only"
                );
                Access::ReadOnly
            }
        };

        let store = Self {
            state_dir,
            dir,
            access,
            cache: Mutex::new(Cache::default()),
            write_locks: Mutex::new(HashMap::new()),
        };

        if store.is_owner() {
            store.recover().await;
        }

        info!(
            dir = %store.dir.display(),
            owner = store.is_owner(),
            "status store opened"
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether this store holds the state dir lock and may write.
    pub fn is_owner(&self) -> bool {
        matches!(self.access, Access::Owner(_))
    }

    /// `StateDirBusy` unless this store may write.
    pub fn ensure_owner(&self) -> Result<()> {
        if self.is_owner() {
            Ok(())
        } else {
            Err(HubError::StateDirBusy(self.state_dir.clone()))
        }
    }

    pub fn record_path(&self, step: UpgradeStep) -> PathBuf {
        self.dir.join(format!("{}.json", step.id()))
    }

    /// Make `run` the record of `run.step`.
    ///
    /// A write older than the record already held (an earlier attempt, or
    /// the same attempt in an earlier status) is dropped. If the disk write
    /// fails the step is marked pending and `Persistence` is returned; the
    /// in-memory record is updated either way.
    pub async fn save(&self, run: &StepRun) -> Result<()> {
        let step = run.step;
        self.ensure_owner()?;

        let lock = self.write_lock_for(step);
        let _guard = lock.lock().await;

        if !self.replace_cached(run) {
            debug!(
                step = %step,
                run_id = %run.run_id,
                status = %run.status,
                "dropping outdated status write"
            );
            return Ok(());
        }
        self.write_record(run).await
    }

    /// Latest record of `step`, or `None` if the step never ran.
    pub async fn load(&self, step: UpgradeStep) -> Result<Option<StepRun>> {
        if self.is_owner() {
            return Ok(self.cached(step));
        }
        self.read_record(step).await
    }

    /// In-memory record of `step`. Always `None` on a read-only store.
    pub fn cached(&self, step: UpgradeStep) -> Option<StepRun> {
        self.lock_cache().records.get(&step).cloned()
    }

    /// Latest record of every known step, in step order.
    pub async fn all(&self) -> Result<Vec<(UpgradeStep, Option<StepRun>)>> {
        let mut out = Vec::with_capacity(UpgradeStep::ALL.len());
        for step in UpgradeStep::ALL {
            out.push((step, self.load(step).await?));
        }
        Ok(out)
    }

    /// Steps whose latest record only exists in memory.
    pub fn pending(&self) -> Vec<UpgradeStep> {
        self.lock_cache().pending.iter().copied().collect()
    }

    /// Retry every pending write. Returns how many records were written.
    ///
    /// Each step writes whatever record is current once its write lock is
    /// held, so a retry never puts an older record back on disk.
    pub async fn flush_pending(&self) -> Result<usize> {
        let mut written = 0;
        let mut first_err = None;

        for step in self.pending() {
            let lock = self.write_lock_for(step);
            let _guard = lock.lock().await;

            let Some(run) = self.pending_record(step) else {
                continue;
            };
            match self.write_record(&run).await {
                Ok(()) => written += 1,
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }

    /// Retry pending writes every `every` for as long as the store lives.
    ///
    /// Returns `None` on a read-only store. The task only holds a weak
    /// reference, so it never keeps the store (and its lock) alive.
    pub fn spawn_pending_flusher(self: &Arc<Self>, every: Duration) -> Option<JoinHandle<()>> {
        if !self.is_owner() {
            return None;
        }

        let weak = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                if store.pending().is_empty() {
                    continue;
                }
                match store.flush_pending().await {
                    Ok(written) => info!(written, "pending status records written"),
                    Err(err) => debug!(error = %err, "status records still pending"),
                }
            }
        }))
    }

    /// Poll until `step` has a terminal record.
    ///
    /// With `timeout = None` this waits indefinitely.
    pub async fn wait_for_terminal(
        &self,
        step: UpgradeStep,
        timeout: Option<Duration>,
    ) -> Option<StepRun> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Ok(Some(run)) = self.load(step).await {
                if run.status.is_terminal() {
                    return Some(run);
                }
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn recover(&self) {
        for step in UpgradeStep::ALL {
            let mut run = match self.read_record(step).await {
                Ok(Some(run)) => run,
                Ok(None) => continue,
                Err(HubError::Persistence { message, .. }) => {
                    self.move_aside(step, &message).await;
                    continue;
                }
                Err(err) => {
                    warn!(step = %step, error = %err, "cannot read step status; ignoring it");
                    continue;
                }
            };

            if run.status != StepStatus::Running {
                debug!(step = %step, status = %run.status, "loaded step status");
                self.lock_cache().records.insert(step, run);
                continue;
            }

            warn!(
                step = %step,
                run_id = %run.run_id,
                "found step left running by a previous hub; marking it failed"
            );
            if let Err(err) = run.mark_failed(INTERRUPTED_NOTE) {
                warn!(step = %step, error = %err, "cannot close interrupted step");
                self.lock_cache().records.insert(step, run);
                continue;
            }
            if let Err(err) = self.save(&run).await {
                warn!(step = %step, error = %err, "recovered status kept in memory until it can be written");
            }
        }
    }

    async fn move_aside(&self, step: UpgradeStep, reason: &str) {
        let path = self.record_path(step);
        let aside = path.with_extension(CORRUPT_EXTENSION);
        match fs::rename(&path, &aside).await {
            Ok(()) => warn!(
                step = %step,
                moved_to = %aside.display(),
                reason,
                "moved unreadable step status aside"
            ),
            Err(err) => warn!(
                step = %step,
                reason,
                error = %err,
                "unreadable step status could not be moved aside"
            ),
        }
    }

    /// Put `run` in the cache unless the cached record is newer.
    fn replace_cached(&self, run: &StepRun) -> bool {
        let mut cache = self.lock_cache();
        if let Some(current) = cache.records.get(&run.step) {
            if !supersedes(run, current) {
                return false;
            }
        }
        cache.records.insert(run.step, run.clone());
        true
    }

    fn pending_record(&self, step: UpgradeStep) -> Option<StepRun> {
        let cache = self.lock_cache();
        if !cache.pending.contains(&step) {
            return None;
        }
        cache.records.get(&step).cloned()
    }

    /// Write `run` to disk and update the pending set. Caller holds the
    /// step's write lock.
    async fn write_record(&self, run: &StepRun) -> Result<()> {
        let step = run.step;
        match self.write_file(run).await {
            Ok(()) => {
                self.lock_cache().pending.remove(&step);
                debug!(step = %step, status = %run.status, "persisted step status");
                Ok(())
            }
            Err(err) => {
                self.lock_cache().pending.insert(step);
                warn!(step = %step, error = %err, "failed to persist step status");
                Err(HubError::Persistence {
                    step,
                    message: err.to_string(),
                })
            }
        }
    }

    async fn write_file(&self, run: &StepRun) -> std::io::Result<()> {
        let path = self.record_path(run.step);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(run)?;

        fs::create_dir_all(&self.dir).await?;
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &path).await
    }

    async fn read_record(&self, step: UpgradeStep) -> Result<Option<StepRun>> {
        let path = self.record_path(step);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| HubError::Persistence {
                step,
                message: format!("corrupt record {}: {err}", path.display()),
            })
    }

    fn write_lock_for(&self, step: UpgradeStep) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(step).or_default())
    }

    fn lock_cache(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Whether `new` may replace `current` as the record of the same step.
fn supersedes(new: &StepRun, current: &StepRun) -> bool {
    if new.attempt != current.attempt {
        return new.attempt > current.attempt;
    }
    if new.run_id != current.run_id {
        return true;
    }
    progress(new.status) >= progress(current.status)
}

fn progress(status: StepStatus) -> u8 {
    match status {
        StepStatus::NotStarted => 0,
        StepStatus::Running => 1,
        StepStatus::Succeeded | StepStatus::Failed => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutputStream;

    fn running_run(step: UpgradeStep) -> StepRun {
        let mut run = StepRun::new(step, 1);
        run.mark_running().unwrap();
        run
    }

    fn finished_run(step: UpgradeStep, code: i32) -> StepRun {
        let mut run = running_run(step);
        run.push_output(OutputStream::Stdout, "Some conversion output");
        run.mark_exited(code).unwrap();
        run
    }

    fn read_disk(store: &StatusStore, step: UpgradeStep) -> StepRun {
        let bytes = std::fs::read(store.record_path(step)).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn save_then_load_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::open(dir.path()).await.unwrap();
        assert!(store.is_owner());
        let run = finished_run(UpgradeStep::ConvertMaster, 0);

        store.save(&run).await.unwrap();
        assert!(store.record_path(UpgradeStep::ConvertMaster).is_file());
        assert!(!store.record_path(UpgradeStep::ConvertMaster).with_extension("json.tmp").exists());

        drop(store);
        let reopened = StatusStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.load(UpgradeStep::ConvertMaster).await.unwrap(), Some(run));
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::open(dir.path()).await.unwrap();
        assert_eq!(store.load(UpgradeStep::ShutdownClusters).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_record_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let status = dir.path().join(STATUS_DIR);
        std::fs::create_dir_all(&status).unwrap();
        std::fs::write(status.join("ConvertMaster.json"), b"{ not json").unwrap();

        let store = StatusStore::open(dir.path()).await.unwrap();

        assert_eq!(store.load(UpgradeStep::ConvertMaster).await.unwrap(), None);
        assert!(!status.join("ConvertMaster.json").exists());
        assert_eq!(
            std::fs::read(status.join("ConvertMaster.json.corrupt")).unwrap(),
            b"{ not json"
        );
    }

    #[tokio::test]
    async fn recovery_survives_a_disk_that_rejects_the_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let stale = running_run(UpgradeStep::ConvertMaster);
        {
            let store = StatusStore::open(dir.path()).await.unwrap();
            store.save(&stale).await.unwrap();
        }

        // A directory where the temp file goes makes the rewrite fail.
        let tmp = dir.path().join(STATUS_DIR).join("ConvertMaster.json.tmp");
        std::fs::create_dir(&tmp).unwrap();

        let store = StatusStore::open(dir.path()).await.unwrap();
        let recovered = store.cached(UpgradeStep::ConvertMaster).unwrap();
        assert_eq!(recovered.run_id, stale.run_id);
        assert_eq!(recovered.status, StepStatus::Failed);
        assert_eq!(store.pending(), vec![UpgradeStep::ConvertMaster]);
        assert_eq!(read_disk(&store, UpgradeStep::ConvertMaster).status, StepStatus::Running);

        std::fs::remove_dir(&tmp).unwrap();
        assert_eq!(store.flush_pending().await.unwrap(), 1);
        assert_eq!(read_disk(&store, UpgradeStep::ConvertMaster).status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn outdated_write_does_not_replace_a_terminal_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::open(dir.path()).await.unwrap();

        let running = running_run(UpgradeStep::ConvertMaster);
        let mut finished = running.clone();
        finished.mark_exited(0).unwrap();

        store.save(&finished).await.unwrap();
        store.save(&running).await.unwrap();

        assert_eq!(store.cached(UpgradeStep::ConvertMaster), Some(finished.clone()));
        assert_eq!(read_disk(&store, UpgradeStep::ConvertMaster), finished);

        // An earlier attempt never replaces a later one either.
        let mut next = StepRun::next_attempt(UpgradeStep::ConvertMaster, Some(&finished));
        next.mark_running().unwrap();
        store.save(&next).await.unwrap();
        store.save(&finished).await.unwrap();
        assert_eq!(store.cached(UpgradeStep::ConvertMaster), Some(next));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn retry_racing_the_final_save_never_goes_back_to_running() {
        for _ in 0..50 {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(StatusStore::open(dir.path()).await.unwrap());

            // Leave a Running record pending behind a temp-file blocker.
            let tmp = dir.path().join(STATUS_DIR).join("ConvertMaster.json.tmp");
            std::fs::create_dir(&tmp).unwrap();
            let running = running_run(UpgradeStep::ConvertMaster);
            assert!(store.save(&running).await.is_err());
            std::fs::remove_dir(&tmp).unwrap();

            let mut finished = running.clone();
            finished.mark_exited(0).unwrap();

            let flusher = {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.flush_pending().await })
            };
            let saver = {
                let store = Arc::clone(&store);
                let finished = finished.clone();
                tokio::spawn(async move { store.save(&finished).await })
            };
            flusher.await.unwrap().unwrap();
            saver.await.unwrap().unwrap();

            assert_eq!(store.cached(UpgradeStep::ConvertMaster), Some(finished.clone()));
            assert_eq!(read_disk(&store, UpgradeStep::ConvertMaster), finished);
            assert!(store.pending().is_empty());
        }
    }

    #[tokio::test]
    async fn second_store_on_a_locked_state_dir_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let owner = StatusStore::open(dir.path()).await.unwrap();
        let running = running_run(UpgradeStep::ShutdownClusters);
        owner.save(&running).await.unwrap();

        let reader = StatusStore::open(dir.path()).await.unwrap();
        assert!(!reader.is_owner());

        // No recovery: the live record is reported as it is.
        let seen = reader.load(UpgradeStep::ShutdownClusters).await.unwrap().unwrap();
        assert_eq!(seen.status, StepStatus::Running);
        assert!(matches!(
            reader.save(&running).await,
            Err(HubError::StateDirBusy(_))
        ));

        // Later writes by the owner are visible to the reader.
        let mut finished = running.clone();
        finished.mark_exited(2).unwrap();
        owner.save(&finished).await.unwrap();
        let seen = reader
            .wait_for_terminal(UpgradeStep::ShutdownClusters, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(seen, finished);
    }

    #[tokio::test]
    async fn wait_for_terminal_times_out_on_running_step() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::open(dir.path()).await.unwrap();
        store.save(&running_run(UpgradeStep::ConvertMaster)).await.unwrap();

        let waited = store
            .wait_for_terminal(UpgradeStep::ConvertMaster, Some(Duration::from_millis(60)))
            .await;
        assert!(waited.is_none());
    }
}
