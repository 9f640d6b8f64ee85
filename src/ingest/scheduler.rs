// src/ingest/scheduler.rs
use std::future::Future;
use std::time::Duration;

use crate::notify::Dispatcher;
use crate::scan::Scanner;

#[derive(Clone, Copy, Debug)]
pub struct WatchCfg {
    pub interval: Duration,
    /// Backfill with a catch-up pass before the first interval tick.
    pub catch_up_on_start: bool,
}

/// Totals for a finished watch loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchSummary {
    pub cycles: u64,
    pub discovered: u64,
    pub posted: u64,
}

/// Steady-state loop: one incremental pass per tick, each batch handed to the
/// dispatcher. Returns when `shutdown` resolves; a cycle in flight is finished
/// first (its licences are already granted).
pub async fn run_watch<S>(
    scanner: &Scanner,
    dispatcher: &mut Dispatcher,
    cfg: WatchCfg,
    shutdown: S,
) -> WatchSummary
where
    S: Future<Output = ()>,
{
    let mut summary = WatchSummary::default();
    tokio::pin!(shutdown);

    if cfg.catch_up_on_start {
        let report = scanner.catch_up().await;
        summary.cycles += 1;
        summary.discovered += report.batch.len() as u64;
        let sent = dispatcher.dispatch(report.batch).await;
        summary.posted += sent.posted.len() as u64;
    }

    let mut ticker = tokio::time::interval(cfg.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    if cfg.catch_up_on_start {
        // The catch-up pass stands in for the first tick.
        ticker.tick().await;
    }

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => break,
        }

        let report = scanner.incremental().await;
        summary.cycles += 1;
        summary.discovered += report.batch.len() as u64;
        if let Some(e) = &report.interrupted {
            tracing::warn!(stage = "watch", error = %e, "cycle interrupted; continuing on next tick");
        }

        // Empty batches still go through: the cooldown may be holding bills.
        let sent = dispatcher.dispatch(report.batch).await;
        summary.posted += sent.posted.len() as u64;
        if let Some(e) = &sent.error {
            tracing::warn!(stage = "watch", error = %e, unposted = sent.unposted.len(), "thread incomplete");
        }
    }

    tracing::info!(
        stage = "watch",
        cycles = summary.cycles,
        discovered = summary.discovered,
        posted = summary.posted,
        "watch loop stopped"
    );
    summary
}
