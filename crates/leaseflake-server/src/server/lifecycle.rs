//! Startup and shutdown of the worker lease that backs the generator.
//!
//! Startup order matters: the pool is seeded and swept for abandoned leases
//! before this process claims one, so a fleet that restarts after a crash
//! gets its old worker IDs back instead of exhausting the pool.
//!
//! A pinned `--worker-id` goes through the pool too. Its row is claimed and
//! heartbeated like any other lease, so a leasing peer can never be handed
//! the same ID.

use crate::server::config::ServerConfig;
use anyhow::Context;
use core::time::Duration;
use leaseflake::{
    Heartbeat, LeasedGenerator, SequenceGenerator, SledLeaseStore, StaleLeaseReclaimer,
    SystemClock, ThreadRandom, WorkerLeaseManager,
};
use std::sync::Arc;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

/// Everything that has to be torn down in order when the server stops.
pub struct Lifecycle {
    worker_id: u64,
    generator: LeasedGenerator,
    heartbeat: Heartbeat<SledLeaseStore>,
    stop_sweeps: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
}

impl Lifecycle {
    /// Opens the lease store, obtains a worker ID and starts the background
    /// tasks.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be opened or seeded, or if no worker ID can
    /// be leased, including a pinned one held by someone else. The server
    /// must not start in either case.
    pub async fn start(config: &ServerConfig) -> anyhow::Result<Self> {
        let store = Arc::new(
            SledLeaseStore::open(&config.store_path).with_context(|| {
                format!("opening lease store at {}", config.store_path.display())
            })?,
        );
        let manager = Arc::new(WorkerLeaseManager::new(
            Arc::clone(&store),
            SystemClock,
            config.lease.clone(),
        ));
        let created = manager
            .seed_pool()
            .await
            .context("seeding the worker lease pool")?;
        tracing::info!(created, pool_size = config.lease.pool_size(), "lease pool ready");

        let reclaimer = StaleLeaseReclaimer::new(Arc::clone(&store), SystemClock)
            .with_timeout(config.lease.store_timeout);
        sweep(&reclaimer, config.reclaim_threshold).await;

        let lease = match config.worker_id {
            Some(worker_id) => manager
                .claim(worker_id, &config.identity)
                .await
                .with_context(|| format!("claiming pinned worker id {worker_id}"))?,
            None => manager
                .acquire_lease(&config.identity)
                .await
                .context("leasing a worker id")?,
        };
        let worker_id = lease.worker_id;
        let heartbeat = Heartbeat::spawn(Arc::clone(&manager), &lease)?;

        let generator = SequenceGenerator::new(
            config.layout,
            worker_id,
            config.sequence_start,
            SystemClock,
            ThreadRandom,
        )?;

        let stop_sweeps = CancellationToken::new();
        let sweeper = config.reclaim_interval.map(|every| {
            tokio::spawn(sweep_loop(
                reclaimer,
                every,
                config.reclaim_threshold,
                stop_sweeps.clone(),
            ))
        });

        tracing::info!(worker_id, identity = %config.identity, "worker id ready");
        Ok(Self {
            worker_id,
            generator: LeasedGenerator::new(generator, heartbeat.guard()),
            heartbeat,
            stop_sweeps,
            sweeper,
        })
    }

    pub const fn worker_id(&self) -> u64 {
        self.worker_id
    }

    /// A handle onto the generator; every clone shares one sequence.
    pub fn generator(&self) -> LeasedGenerator {
        self.generator.clone()
    }

    /// Cancelled once the worker lease is lost.
    pub fn lease_lost_token(&self) -> CancellationToken {
        self.heartbeat.lease_lost_token()
    }

    /// Stops the sweeps and the heartbeat, then releases the lease if it is
    /// still held.
    pub async fn shutdown(mut self) {
        self.stop_sweeps.cancel();
        if let Some(sweeper) = self.sweeper.take() {
            if let Err(e) = sweeper.await {
                tracing::warn!(error = %e, "reclaim task failed");
            }
        }

        let released = self.heartbeat.shutdown().await;
        tracing::info!(worker_id = self.worker_id, released, "worker lease shut down");
    }
}

async fn sweep<T>(reclaimer: &StaleLeaseReclaimer<SledLeaseStore, T>, threshold: Duration)
where
    T: leaseflake::TimeSource,
{
    match reclaimer.reclaim_stale(threshold).await {
        Ok(report) if !report.reclaimed.is_empty() => {
            tracing::info!(
                reclaimed = ?report.reclaimed,
                skipped = report.skipped,
                "freed abandoned worker leases"
            );
        }
        Ok(_) => {}
        // The next sweep retries.
        Err(e) => tracing::warn!(error = %e, "stale lease sweep failed"),
    }
}

async fn sweep_loop(
    reclaimer: StaleLeaseReclaimer<SledLeaseStore>,
    every: Duration,
    threshold: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => sweep(&reclaimer, threshold).await,
        }
    }
}
