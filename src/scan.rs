// src/scan.rs
//! Discovery scan: candidates -> detail -> classify -> guard -> ordered batch.
//!
//! The durable guard is the only dedup state. A bill is only marked seen once it
//! has been classified as introduction-stage, so a bill first spotted after it
//! progressed is never licensed, and a bill licensed while introduced is never
//! emitted again however far it moves.

use futures::{stream, StreamExt};
use metrics::{counter, gauge, histogram};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bill::{BillKey, BillRecord, ChamberType};
use crate::classify::is_introduced;
use crate::config::{AppConfig, ScanConfig, ScanStrategy};
use crate::error::{FetchError, ScanError, StoreError};
use crate::ingest::range::RangeSpec;
use crate::ingest::types::{BillSource, CandidateWindow};
use crate::ingest::{collect_range, fetch_candidates};
use crate::store::SeenStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanPhase {
    Idle = 0,
    Fetching = 1,
    Classifying = 2,
    Guarding = 3,
    Handoff = 4,
}

impl ScanPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Fetching,
            2 => Self::Classifying,
            3 => Self::Guarding,
            4 => Self::Handoff,
            _ => Self::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Classifying => "classifying",
            Self::Guarding => "guarding",
            Self::Handoff => "handoff",
        }
    }
}

/// Outcome of one or more discovery cycles.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Licensed bills, in hand-off order.
    pub batch: Vec<BillRecord>,
    pub candidates: usize,
    pub already_seen: usize,
    pub not_introduced: usize,
    pub not_found: usize,
    pub failed: usize,
    /// Why the cycle stopped early, if it did.
    pub interrupted: Option<ScanError>,
}

impl CycleReport {
    /// Merges a later cycle into this one; the first interruption is kept.
    pub fn absorb(&mut self, other: CycleReport) {
        self.batch.extend(other.batch);
        self.candidates += other.candidates;
        self.already_seen += other.already_seen;
        self.not_introduced += other.not_introduced;
        self.not_found += other.not_found;
        self.failed += other.failed;
        if self.interrupted.is_none() {
            self.interrupted = other.interrupted;
        }
        sort_batch(&mut self.batch);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.is_some()
    }
}

/// Guard order: lowest number first, so an interrupted guard pass leaves a
/// contiguous run of settled numbers behind it.
fn sort_for_guard(batch: &mut [BillRecord]) {
    batch.sort_by(|a, b| {
        a.key
            .chamber_type()
            .sort_rank()
            .cmp(&b.key.chamber_type().sort_rank())
            .then_with(|| a.key.chamber_type().code().cmp(b.key.chamber_type().code()))
            .then_with(|| a.key.congress().cmp(&b.key.congress()))
            .then_with(|| a.key.number().cmp(&b.key.number()))
    });
}

/// House types before senate types, then non-standard codes; newest number
/// first within a type; newest congress first.
pub fn sort_batch(batch: &mut [BillRecord]) {
    batch.sort_by(|a, b| {
        a.key
            .chamber_type()
            .sort_rank()
            .cmp(&b.key.chamber_type().sort_rank())
            .then_with(|| a.key.chamber_type().code().cmp(b.key.chamber_type().code()))
            .then_with(|| b.key.number().cmp(&a.key.number()))
            .then_with(|| b.key.congress().cmp(&a.key.congress()))
    });
}

pub struct Scanner {
    source: Arc<dyn BillSource>,
    store: SeenStore,
    cfg: ScanConfig,
    congress: u32,
    page_size: u32,
    phase: AtomicU8,
}

impl Scanner {
    pub fn new(source: Arc<dyn BillSource>, store: SeenStore, cfg: ScanConfig, congress: u32) -> Self {
        Self {
            source,
            store,
            cfg,
            congress,
            page_size: 250,
            phase: AtomicU8::new(ScanPhase::Idle as u8),
        }
    }

    pub fn from_config(source: Arc<dyn BillSource>, store: SeenStore, cfg: &AppConfig) -> Self {
        Self::new(source, store, cfg.scan.clone(), cfg.current_congress())
            .with_page_size(cfg.congress.page_size)
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 250);
        self
    }

    pub fn phase(&self) -> ScanPhase {
        ScanPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn store(&self) -> &SeenStore {
        &self.store
    }

    pub fn congress(&self) -> u32 {
        self.congress
    }

    fn enter(&self, phase: ScanPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
        gauge!("scan_phase").set(phase as u8 as f64);
        tracing::debug!(stage = phase.as_str(), "scan phase");
    }

    /// One cycle over a candidate window.
    pub async fn run_cycle(&self, window: &CandidateWindow) -> CycleReport {
        self.cycle(window).await.0
    }

    /// Cycle plus whether the window was the upstream's last page.
    async fn cycle(&self, window: &CandidateWindow) -> (CycleReport, bool) {
        let t0 = Instant::now();
        self.enter(ScanPhase::Fetching);
        let detailed = matches!(window, CandidateWindow::NumberRange { .. });
        let limit = match window {
            CandidateWindow::Listing { limit, .. } => *limit,
            CandidateWindow::NumberRange { .. } => u32::MAX,
        };
        let (report, last) = match fetch_candidates(self.source.as_ref(), window).await {
            Ok(page) => {
                let last = page.is_last(limit);
                let failed = page.failed;
                let (mut report, _) = self.process(page.records, detailed).await;
                report.failed += failed;
                (report, last)
            }
            Err(e) => (self.unreachable(e), true),
        };
        self.finish(t0, &report);
        (report, last)
    }

    /// One cycle over a number range, stopping after the configured run of misses.
    /// The chamber's range cursor then moves over every number settled in order;
    /// it stops at the first probe that failed or was never guarded.
    pub async fn run_range(&self, spec: RangeSpec) -> CycleReport {
        let t0 = Instant::now();
        self.enter(ScanPhase::Fetching);
        let (congress, chamber) = (spec.congress, spec.chamber.clone());
        let report = match collect_range(self.source.as_ref(), spec).await {
            Ok(mut scan) => {
                let found = std::mem::take(&mut scan.found);
                let (mut report, settled) = self.process(found, true).await;
                report.failed += scan.failed();
                let through = scan.resolved_through(|n| {
                    BillKey::new(congress, chamber.clone(), n).is_ok_and(|k| settled.contains(&k))
                });
                if let Some(through) = through {
                    if let Err(e) = self.store.advance_range_cursor(congress, &chamber, through).await {
                        tracing::error!(stage = "guard", chamber = %chamber, error = %e, "range cursor write failed");
                        counter!("store_errors_total").increment(1);
                        report.interrupted.get_or_insert(ScanError::Store {
                            bill: format!("{chamber}/{congress}"),
                            source: e,
                        });
                    }
                }
                report
            }
            Err(e) => self.unreachable(e),
        };
        self.finish(t0, &report);
        report
    }

    fn unreachable(&self, e: FetchError) -> CycleReport {
        tracing::warn!(stage = "fetch", source = self.source.name(), error = %e, "candidate fetch failed; ending cycle");
        counter!("fetch_errors_total").increment(1);
        CycleReport {
            interrupted: Some(ScanError::Unreachable(e)),
            ..Default::default()
        }
    }

    fn finish(&self, t0: Instant, report: &CycleReport) {
        self.enter(ScanPhase::Idle);
        counter!("scan_cycles_total").increment(1);
        histogram!("scan_cycle_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        gauge!("scan_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        tracing::info!(
            stage = "scan",
            candidates = report.candidates,
            new = report.batch.len(),
            already_seen = report.already_seen,
            not_introduced = report.not_introduced,
            not_found = report.not_found,
            failed = report.failed,
            interrupted = report.is_interrupted(),
            "scan cycle finished"
        );
    }

    /// Classifies and guards `records`. The second value holds every key this
    /// pass settled for good: already seen, past introduction, or guarded.
    async fn process(&self, records: Vec<BillRecord>, detailed: bool) -> (CycleReport, HashSet<BillKey>) {
        let mut report = CycleReport {
            candidates: records.len(),
            ..Default::default()
        };
        let mut settled = HashSet::new();
        counter!("bills_candidates_total").increment(records.len() as u64);

        // Unseen keys, first occurrence wins.
        let mut keys = HashSet::new();
        let mut unseen = Vec::new();
        for rec in records {
            if !keys.insert(rec.key.clone()) {
                continue;
            }
            match self.store.exists(&rec.key).await {
                Ok(true) => {
                    report.already_seen += 1;
                    settled.insert(rec.key);
                }
                Ok(false) => unseen.push(rec),
                Err(e) => {
                    tracing::error!(bill = %rec.key, stage = "guard", error = %e, "seen lookup failed");
                    counter!("store_errors_total").increment(1);
                    report.interrupted = Some(ScanError::store(&rec.key, e));
                    return (self.hand_off(report), settled);
                }
            }
        }
        counter!("bills_already_seen_total").increment(report.already_seen as u64);

        let full = if detailed {
            unseen
        } else {
            match self.fetch_details(unseen, &mut report).await {
                Some(full) => full,
                None => return (self.hand_off(report), settled),
            }
        };

        self.enter(ScanPhase::Classifying);
        let mut survivors = Vec::with_capacity(full.len());
        for rec in full {
            if is_introduced(rec.latest_action.as_ref()) {
                survivors.push(rec);
            } else {
                tracing::debug!(bill = %rec.key, stage = "classify", "past introduction stage");
                report.not_introduced += 1;
                settled.insert(rec.key);
            }
        }
        counter!("bills_not_introduced_total").increment(report.not_introduced as u64);

        self.enter(ScanPhase::Guarding);
        sort_for_guard(&mut survivors);
        for rec in survivors {
            match self.store.check_and_mark_seen(&rec.key).await {
                Ok(true) => {
                    counter!("bills_new_total").increment(1);
                    tracing::info!(bill = %rec.key, stage = "guard", title = %rec.title, "new bill");
                    let key = rec.key.clone();
                    settled.insert(key.clone());
                    let logged = self.store.log_bill(&rec).await;
                    report.batch.push(rec);
                    if let Err(e) = logged {
                        // Licence granted; this bill still goes out, the rest wait.
                        tracing::error!(bill = %key, stage = "guard", error = %e, "bill log write failed");
                        counter!("store_errors_total").increment(1);
                        report.interrupted = Some(ScanError::store(&key, e));
                        break;
                    }
                }
                Ok(false) => {
                    tracing::debug!(bill = %rec.key, stage = "guard", "licensed elsewhere");
                    report.already_seen += 1;
                    settled.insert(rec.key);
                }
                Err(e) => {
                    tracing::error!(bill = %rec.key, stage = "guard", error = %e, "check-and-mark failed");
                    counter!("store_errors_total").increment(1);
                    report.interrupted = Some(ScanError::store(&rec.key, e));
                    break;
                }
            }
        }
        (self.hand_off(report), settled)
    }

    fn hand_off(&self, mut report: CycleReport) -> CycleReport {
        self.enter(ScanPhase::Handoff);
        sort_batch(&mut report.batch);
        report
    }

    /// Detail for each listing record, `fetch_concurrency` at a time. `None` when
    /// the source turned out to be unreachable (report updated).
    async fn fetch_details(
        &self,
        listing: Vec<BillRecord>,
        report: &mut CycleReport,
    ) -> Option<Vec<BillRecord>> {
        let source = self.source.as_ref();
        let results: Vec<(BillRecord, Result<Option<BillRecord>, FetchError>)> =
            stream::iter(listing)
                .map(|rec| async move {
                    let detail = source.fetch_detail(&rec.key).await;
                    (rec, detail)
                })
                .buffer_unordered(self.cfg.fetch_concurrency.max(1))
                .collect()
                .await;

        let mut out = Vec::with_capacity(results.len());
        let mut unreachable = None;
        for (listed, detail) in results {
            match detail {
                Ok(Some(mut full)) => {
                    if full.latest_action.is_none() {
                        full.latest_action = listed.latest_action;
                    }
                    out.push(full);
                }
                Ok(None) => {
                    tracing::debug!(bill = %listed.key, stage = "fetch", "listed bill has no detail yet");
                    report.not_found += 1;
                }
                Err(FetchError::Unreachable(msg)) => {
                    unreachable.get_or_insert(FetchError::Unreachable(msg));
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::warn!(bill = %listed.key, stage = "fetch", error = %e, "detail fetch failed; retrying next cycle");
                    counter!("fetch_errors_total").increment(1);
                    report.failed += 1;
                }
            }
        }
        if let Some(e) = unreachable {
            tracing::warn!(stage = "fetch", error = %e, "upstream unreachable during detail fetch");
            counter!("fetch_errors_total").increment(1);
            report.interrupted = Some(ScanError::Unreachable(e));
            return None;
        }
        Some(out)
    }

    fn listing(&self, since: Option<chrono::DateTime<chrono::Utc>>, page: u32) -> CandidateWindow {
        CandidateWindow::Listing {
            congress: Some(self.congress),
            since,
            offset: page.saturating_mul(self.page_size),
            limit: self.page_size,
        }
    }

    /// Next probe window for a chamber. The first range pass seeds the cursor from
    /// the high-water mark (bills recorded by listing scans) or `range_start`.
    async fn next_range(&self, chamber: &ChamberType) -> Result<RangeSpec, ScanError> {
        let store_err = |e: StoreError| ScanError::Store {
            bill: format!("{chamber}/{}", self.congress),
            source: e,
        };
        let hw = self
            .store
            .high_water_mark(self.congress, chamber)
            .await
            .map_err(store_err)?;
        let resolved = match self
            .store
            .range_cursor(self.congress, chamber)
            .await
            .map_err(store_err)?
        {
            Some(through) => through,
            None => {
                let seed = hw.unwrap_or(self.cfg.range_start.saturating_sub(1));
                self.store
                    .advance_range_cursor(self.congress, chamber, seed)
                    .await
                    .map_err(store_err)?;
                seed
            }
        };
        Ok(RangeSpec::above(
            self.congress,
            chamber.clone(),
            Some(resolved),
            hw,
            self.cfg.range_start,
            self.cfg.range_span.saturating_mul(self.cfg.range_step.max(1)),
        )
        .with_step(self.cfg.range_step)
        .with_misses(self.cfg.max_consecutive_misses))
    }

    /// Bulk backfill. Listing: newest pages first until a page yields no net-new
    /// bill. Range: windows past each chamber's range cursor until a window
    /// yields nothing. Both stop at `max_pages` windows or `max_catch_up_secs`.
    pub async fn catch_up(&self) -> CycleReport {
        let started = Instant::now();
        let budget = self.cfg.max_catch_up();
        let mut total = CycleReport::default();

        match self.cfg.strategy {
            ScanStrategy::Listing => {
                for page in 0..self.cfg.max_pages {
                    let (report, exhausted) = self.cycle(&self.listing(None, page)).await;
                    let net_new = report.batch.len();
                    total.absorb(report);
                    if total.is_interrupted() || net_new == 0 || exhausted {
                        break;
                    }
                    if over_budget(started, budget) {
                        tracing::info!(stage = "catch_up", pages = page + 1, "catch-up time budget spent");
                        break;
                    }
                }
            }
            ScanStrategy::Range => {
                'chambers: for chamber in self.cfg.chamber_types() {
                    for _ in 0..self.cfg.max_pages {
                        let spec = match self.next_range(&chamber).await {
                            Ok(spec) => spec,
                            Err(e) => {
                                total.interrupted.get_or_insert(e);
                                break 'chambers;
                            }
                        };
                        let report = self.run_range(spec).await;
                        let net_new = report.batch.len();
                        total.absorb(report);
                        if total.is_interrupted() {
                            break 'chambers;
                        }
                        if over_budget(started, budget) {
                            tracing::info!(stage = "catch_up", "catch-up time budget spent");
                            break 'chambers;
                        }
                        if net_new == 0 {
                            break;
                        }
                    }
                }
            }
        }
        tracing::info!(
            stage = "catch_up",
            new = total.batch.len(),
            candidates = total.candidates,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "catch-up finished"
        );
        total
    }

    /// One bounded steady-state pass.
    pub async fn incremental(&self) -> CycleReport {
        let mut total = CycleReport::default();
        match self.cfg.strategy {
            ScanStrategy::Listing => {
                let since = chrono::Utc::now() - chrono::Duration::days(i64::from(self.cfg.lookback_days));
                for page in 0..self.cfg.max_pages {
                    let (report, exhausted) = self.cycle(&self.listing(Some(since), page)).await;
                    total.absorb(report);
                    if total.is_interrupted() || exhausted {
                        break;
                    }
                }
            }
            ScanStrategy::Range => {
                for chamber in self.cfg.chamber_types() {
                    let spec = match self.next_range(&chamber).await {
                        Ok(spec) => spec,
                        Err(e) => {
                            total.interrupted.get_or_insert(e);
                            break;
                        }
                    };
                    total.absorb(self.run_range(spec).await);
                    if total.is_interrupted() {
                        break;
                    }
                }
            }
        }
        total
    }

    /// Fetch and classify without touching the guard.
    pub async fn preview(&self, window: &CandidateWindow) -> Result<Vec<BillRecord>, FetchError> {
        self.enter(ScanPhase::Fetching);
        let listed = match fetch_candidates(self.source.as_ref(), window).await {
            Ok(page) => page.records,
            Err(e) => {
                self.enter(ScanPhase::Idle);
                return Err(e);
            }
        };
        let detailed = matches!(window, CandidateWindow::NumberRange { .. });
        let mut scratch = CycleReport::default();
        let full = if detailed {
            Some(listed)
        } else {
            self.fetch_details(listed, &mut scratch).await
        };
        self.enter(ScanPhase::Classifying);
        let mut out: Vec<BillRecord> = full
            .unwrap_or_default()
            .into_iter()
            .filter(|r| is_introduced(r.latest_action.as_ref()))
            .collect();
        sort_batch(&mut out);
        out.dedup_by(|a, b| a.key == b.key);
        self.enter(ScanPhase::Idle);
        match scratch.interrupted {
            Some(ScanError::Unreachable(e)) => Err(e),
            _ => Ok(out),
        }
    }

    /// Default window for `preview`: the first listing page of the lookback window.
    pub fn recent_window(&self) -> CandidateWindow {
        let since = chrono::Utc::now() - chrono::Duration::days(i64::from(self.cfg.lookback_days));
        self.listing(Some(since), 0)
    }
}

fn over_budget(started: Instant, budget: Duration) -> bool {
    !budget.is_zero() && started.elapsed() >= budget
}
