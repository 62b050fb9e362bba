//! `tiledepot seed` — run the seed and cleanup tasks

use anyhow::Context;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiledepot::repository::open_cache_store;
use tiledepot::seeding::{Cleaner, CleanupFile, Progress, SeedFile, Seeder};

#[derive(Args)]
pub struct SeedArgs {
    /// Data directory holding seed.json and cleanup.json
    #[arg(long = "data_dir", env = "DATA_DIR")]
    pub data_dir: PathBuf,

    /// Concurrency override for every task
    #[arg(long = "num_processes")]
    pub num_processes: Option<usize>,

    /// Run the seed tasks
    #[arg(long)]
    pub seed: bool,

    /// Run the cleanup tasks
    #[arg(long)]
    pub cleanup: bool,
}

pub async fn execute(args: SeedArgs) -> anyhow::Result<()> {
    // With neither flag, run both phases
    let run_all = !args.seed && !args.cleanup;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt received; draining in-flight tiles");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    if args.cleanup || run_all {
        run_cleanups(&args, &cancel).await?;
    }
    if args.seed || run_all {
        run_seeds(&args, &cancel).await?;
    }
    Ok(())
}

async fn run_cleanups(args: &SeedArgs, cancel: &Arc<AtomicBool>) -> anyhow::Result<()> {
    let file = CleanupFile::load(&args.data_dir)
        .await
        .context("loading cleanup.json")?;

    for mut task in file.tasks {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        if let Some(concurrency) = args.num_processes {
            task.concurrency = concurrency;
        }

        let id = task.id.clone();
        let store = open_cache_store(&args.data_dir, &task.id, task.store, task.timeout())
            .await
            .with_context(|| format!("opening store {id}"))?;

        let cleaner = Cleaner::new(store, task).with_cancel(Arc::clone(cancel));
        let stats = drive(format!("cleanup {id}"), cleaner.progress(), cleaner.run()).await?;
        println!(
            "cleanup {id}: {} deleted, {} kept, {} failed",
            stats.done, stats.skipped, stats.failed
        );
    }
    Ok(())
}

async fn run_seeds(args: &SeedArgs, cancel: &Arc<AtomicBool>) -> anyhow::Result<()> {
    let file = SeedFile::load(&args.data_dir)
        .await
        .context("loading seed.json")?;

    for mut task in file.tasks {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        if let Some(concurrency) = args.num_processes {
            task.concurrency = concurrency;
        }

        let id = task.id.clone();
        let store = open_cache_store(&args.data_dir, &task.id, task.store, task.timeout())
            .await
            .with_context(|| format!("opening store {id}"))?;

        let seeder =
            Seeder::new(store, task).context("building seeder")?.with_cancel(Arc::clone(cancel));
        let stats = drive(format!("seed {id}"), seeder.progress(), seeder.run()).await?;
        println!(
            "seed {id}: {} downloaded, {} skipped, {} failed",
            stats.done, stats.skipped, stats.failed
        );
    }
    Ok(())
}

/// Run a seed or cleanup future while mirroring its counters into a
/// progress bar
async fn drive<F>(
    prefix: String,
    progress: Arc<Progress>,
    run: F,
) -> anyhow::Result<tiledepot::seeding::RunStats>
where
    F: std::future::Future<Output = tiledepot::Result<tiledepot::seeding::RunStats>>,
{
    let bar = ProgressBar::new(0);
    bar.set_prefix(prefix);
    bar.set_style(
        ProgressStyle::with_template(
            "{prefix} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) ETA {eta}",
        )?
        .progress_chars("##-"),
    );

    let ticker = {
        let bar = bar.clone();
        tokio::spawn(async move {
            loop {
                let stats = progress.snapshot();
                bar.set_length(stats.total);
                bar.set_position(stats.done + stats.skipped + stats.failed);
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        })
    };

    let result = run.await;
    ticker.abort();
    bar.finish_and_clear();
    Ok(result?)
}
