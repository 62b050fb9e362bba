//! Tile seeding and cleanup
//!
//! The seeder enumerates `(bbox, zooms)` into tile ranges, decides per tile
//! whether a download is needed, and drives the fetch-and-store work
//! through a bounded pool: a counting semaphore caps in-flight tasks and
//! the run returns only after every spawned task has finished. Metadata is
//! merged before the first tile is fetched. One failing tile never aborts
//! a run.

pub mod descriptor;

pub use descriptor::{
    CleanupBefore, CleanupFile, CleanupTask, RefreshBefore, RefreshMode, SeedFile, SeedTask,
};

use crate::cache::UpstreamSource;
use crate::error::{Error, Result};
use crate::storage::{StoreKind, TileStore, WriteOptions};
use crate::tile::bounds::{tile_ranges, total_tiles, LonLatBounds, TileRange};
use crate::tile::coordinate::{Scheme, TileCoordinate};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Shared progress counters, readable while a run is in flight
#[derive(Debug, Default)]
pub struct Progress {
    pub total: AtomicU64,
    pub completed: AtomicU64,
    pub done: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
}

impl Progress {
    pub fn snapshot(&self) -> RunStats {
        RunStats {
            total: self.total.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn finish(&self, outcome: &Result<()>) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(()) => {}
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Summary of a seed or cleanup run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Tiles enumerated
    pub total: u64,
    /// Tiles downloaded (seed) or deleted (cleanup)
    pub done: u64,
    /// Tiles already fresh (seed) or too young / undatable (cleanup)
    pub skipped: u64,
    /// Tiles whose action failed after retries
    pub failed: u64,
}

/// Invoke `action`, retrying retryable failures up to `max_try` attempts
/// with `delay` between them. The final error is propagated.
pub async fn retry<T, F, Fut>(max_try: u32, delay: Duration, mut action: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_try = max_try.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match action().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_try && e.is_retryable() => {
                warn!("attempt {attempt}/{max_try} failed: {e}");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn ranges_for(bboxs: &[[f64; 4]], zooms: &[u8]) -> Result<Vec<TileRange>> {
    let mut ranges = Vec::new();
    for bbox in bboxs {
        ranges.extend(tile_ranges(
            &LonLatBounds::from_array(*bbox),
            zooms,
            Scheme::Xyz,
        )?);
    }
    Ok(ranges)
}

/// Pre-fetches tiles from an upstream URL into a writable store
pub struct Seeder {
    store: Arc<dyn TileStore>,
    source: Arc<UpstreamSource>,
    task: SeedTask,
    progress: Arc<Progress>,
    cancel: Arc<AtomicBool>,
}

impl Seeder {
    pub fn new(store: Arc<dyn TileStore>, task: SeedTask) -> Result<Self> {
        // Retrying is the scheduler's job; the HTTP client gets one shot
        // per attempt.
        let source = UpstreamSource::new(&task.url, task.timeout(), 1)?;
        Ok(Self {
            store,
            source: Arc::new(source),
            task,
            progress: Arc::new(Progress::default()),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Counters for progress reporting
    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    /// Setting the flag stops new tasks from being admitted; in-flight
    /// tasks run to completion.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Share a caller-owned cancellation flag
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Run the seed task to completion
    pub async fn run(&self) -> Result<RunStats> {
        let mode = self.task.refresh_mode()?;
        let ranges = ranges_for(&self.task.bboxs, &self.task.zooms)?;
        let total = total_tiles(&ranges);
        self.progress.total.store(total, Ordering::Relaxed);

        info!(
            id = %self.task.id,
            total,
            concurrency = self.task.concurrency,
            "starting seed"
        );

        // Metadata is merged before any tile is fetched
        let mut metadata = self.task.metadata.clone();
        if metadata.name.is_none() {
            metadata.name = Some(self.task.id.clone());
        }
        self.store.put_metadata(&metadata).await?;

        let semaphore = Arc::new(Semaphore::new(self.task.concurrency.max(1)));
        let write = self.task.write_options();
        let mut tasks: JoinSet<()> = JoinSet::new();

        'enumeration: for range in &ranges {
            for coord in range.iter() {
                if self.cancel.load(Ordering::Relaxed) {
                    info!(id = %self.task.id, "seed cancelled; draining in-flight tasks");
                    break 'enumeration;
                }

                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let store = Arc::clone(&self.store);
                let source = Arc::clone(&self.source);
                let progress = Arc::clone(&self.progress);
                let max_try = self.task.max_try;

                tasks.spawn(async move {
                    let outcome = seed_tile(&*store, &source, &write, mode, max_try, coord).await;
                    match &outcome {
                        Ok(true) => {
                            progress.done.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(false) => {
                            progress.skipped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => warn!("seeding {coord} failed: {e}"),
                    }
                    progress.finish(&outcome.map(|_| ()));
                    drop(permit);
                });
            }
        }

        while tasks.join_next().await.is_some() {}

        let stats = self.progress.snapshot();
        info!(id = %self.task.id, ?stats, "seed finished");
        Ok(stats)
    }
}

/// Seed a single tile. Returns whether a download happened.
async fn seed_tile(
    store: &dyn TileStore,
    source: &UpstreamSource,
    write: &WriteOptions,
    mode: RefreshMode,
    max_try: u32,
    coord: TileCoordinate,
) -> Result<bool> {
    let needed = match mode {
        RefreshMode::Always => true,
        RefreshMode::Cutoff(cutoff) => match store.tile_created(coord).await {
            Ok(created) => created < cutoff,
            Err(Error::CreatedNotFound) | Err(Error::TileNotFound) => true,
            Err(e) => return Err(e),
        },
        RefreshMode::Md5 => {
            let upstream = source.fetch_md5(coord).await;
            let local = store.tile_md5(coord).await;
            match (upstream, local) {
                (Ok(theirs), Ok(ours)) => theirs != ours,
                // No comparable pair of hashes: re-download
                _ => true,
            }
        }
    };
    if !needed {
        return Ok(false);
    }

    let result = retry(max_try, Duration::ZERO, || async move {
        let bytes = source.fetch_tile(coord).await?;
        store.put_tile(coord, bytes, write).await
    })
    .await;

    match result {
        Ok(()) => Ok(true),
        // The tile does not exist upstream; leave it absent
        Err(Error::UpstreamEmpty) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Deletes stale tiles over a bbox x zoom set, then prunes empty
/// directories on directory-backed stores
pub struct Cleaner {
    store: Arc<dyn TileStore>,
    task: CleanupTask,
    progress: Arc<Progress>,
    cancel: Arc<AtomicBool>,
}

impl Cleaner {
    pub fn new(store: Arc<dyn TileStore>, task: CleanupTask) -> Self {
        Self {
            store,
            task,
            progress: Arc::new(Progress::default()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Share a caller-owned cancellation flag
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Run the cleanup task to completion
    pub async fn run(&self) -> Result<RunStats> {
        let cutoff = self.task.cutoff_ms()?;
        let ranges = ranges_for(&self.task.bboxs, &self.task.zooms)?;
        let total = total_tiles(&ranges);
        self.progress.total.store(total, Ordering::Relaxed);

        info!(id = %self.task.id, total, ?cutoff, "starting cleanup");

        let semaphore = Arc::new(Semaphore::new(self.task.concurrency.max(1)));
        let mut tasks: JoinSet<()> = JoinSet::new();

        'enumeration: for range in &ranges {
            for coord in range.iter() {
                if self.cancel.load(Ordering::Relaxed) {
                    info!(id = %self.task.id, "cleanup cancelled; draining in-flight tasks");
                    break 'enumeration;
                }

                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let store = Arc::clone(&self.store);
                let progress = Arc::clone(&self.progress);

                tasks.spawn(async move {
                    let outcome = cleanup_tile(&*store, cutoff, coord).await;
                    match &outcome {
                        Ok(true) => {
                            progress.done.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(false) => {
                            progress.skipped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => warn!("cleanup of {coord} failed: {e}"),
                    }
                    progress.finish(&outcome.map(|_| ()));
                    drop(permit);
                });
            }
        }

        while tasks.join_next().await.is_some() {}

        // Empty-directory pruning runs only after all deletes finished
        if self.store.kind() == StoreKind::Xyz {
            self.store.vacuum().await?;
        }

        let stats = self.progress.snapshot();
        info!(id = %self.task.id, ?stats, "cleanup finished");
        Ok(stats)
    }
}

/// Delete a single tile when it is older than the cutoff. Returns whether
/// a delete happened. Tiles whose age cannot be established are left in
/// place.
async fn cleanup_tile(
    store: &dyn TileStore,
    cutoff: Option<i64>,
    coord: TileCoordinate,
) -> Result<bool> {
    if let Some(cutoff) = cutoff {
        match store.tile_created(coord).await {
            Ok(created) if created < cutoff => {}
            Ok(_) => return Ok(false),
            Err(Error::CreatedNotFound) => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    store.delete_tile(coord).await?;
    Ok(true)
}
