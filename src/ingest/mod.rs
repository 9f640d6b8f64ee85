// src/ingest/mod.rs
pub mod providers;
pub mod range;
pub mod scheduler;
pub mod types;

use crate::error::FetchError;
use crate::ingest::range::{find_new_in_range, Probe, ProbeOutcome, RangeScan, RangeSpec};
use crate::ingest::types::{BillSource, CandidateWindow, ListingPage};
use futures::StreamExt;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "bills_candidates_total",
            "Candidate bills returned by the upstream source."
        );
        describe_counter!(
            "bills_new_total",
            "Bills licensed by the duplicate guard (net-new)."
        );
        describe_counter!(
            "bills_already_seen_total",
            "Candidates skipped because the guard already holds them."
        );
        describe_counter!(
            "bills_not_introduced_total",
            "Candidates rejected by the introduction classifier."
        );
        describe_counter!(
            "fetch_errors_total",
            "Upstream fetch failures (transient, malformed, unreachable)."
        );
        describe_counter!("fetch_skipped_records_total", "Malformed upstream records skipped.");
        describe_counter!("store_errors_total", "Duplicate guard storage failures.");
        describe_counter!("scan_cycles_total", "Discovery cycles run.");
        describe_counter!("posts_published_total", "Posts accepted by the publisher.");
        describe_counter!("posts_failed_total", "Posts the publisher rejected or failed.");
        describe_histogram!("scan_cycle_ms", "Discovery cycle duration in milliseconds.");
        describe_histogram!("fetch_request_ms", "Successful upstream request latency in milliseconds.");
        describe_gauge!("scan_phase", "Current scan phase (0 idle .. 4 handoff).");
        describe_gauge!("scan_last_run_ts", "Unix ts when the last cycle finished.");
        describe_gauge!("watched_congress", "Congress number being watched.");
    });
}

/// Normalize upstream text: decode entities, strip tags, ASCII quotes, collapse whitespace.
/// congress.gov summaries arrive as HTML fragments (`<p><strong>...`).
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags (block tags become spaces so words don't fuse)
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap: 2000 chars
    if out.chars().count() > 2000 {
        out = out.chars().take(2000).collect();
    }

    out
}

/// Candidates for one window. Listing windows go to the source's listing call;
/// number ranges are probed bill by bill through [`find_new_in_range`], keeping
/// only the bills that exist.
pub async fn fetch_candidates(
    source: &dyn BillSource,
    window: &CandidateWindow,
) -> Result<ListingPage, FetchError> {
    match window {
        CandidateWindow::Listing { .. } => source.fetch_listing(window).await,
        CandidateWindow::NumberRange {
            congress,
            chamber,
            start,
            stop,
            step,
        } => {
            let spec = RangeSpec {
                congress: *congress,
                chamber: chamber.clone(),
                start: *start,
                stop: *stop,
                step: *step,
                max_consecutive_misses: 0,
            };
            let scan = collect_range(source, spec).await?;
            Ok(ListingPage {
                raw_len: scan.outcomes.len(),
                has_next: Some(false),
                failed: scan.failed(),
                records: scan.found,
                skipped: 0,
            })
        }
    }
}

/// Drains a range probe. A range where every probe failed (and none answered
/// found / not-found) is reported as `Unreachable`.
pub(crate) async fn collect_range(
    source: &dyn BillSource,
    spec: RangeSpec,
) -> Result<RangeScan, FetchError> {
    let mut scan = RangeScan::default();
    let mut answered = 0usize;
    let mut last_err = None;

    let probes = find_new_in_range(source, spec);
    futures::pin_mut!(probes);
    while let Some(probe) = probes.next().await {
        match probe {
            Probe::Found(rec) => {
                answered += 1;
                scan.outcomes.push((rec.key.number(), ProbeOutcome::Found));
                scan.found.push(rec);
            }
            Probe::NotFound(key) => {
                answered += 1;
                scan.outcomes.push((key.number(), ProbeOutcome::NotFound));
            }
            Probe::Failed(key, err) => {
                tracing::warn!(bill = %key, stage = "fetch", error = %err, "range probe failed");
                counter!("fetch_errors_total").increment(1);
                let outcome = match err {
                    FetchError::Malformed { .. } => ProbeOutcome::Malformed,
                    _ => ProbeOutcome::Failed,
                };
                scan.outcomes.push((key.number(), outcome));
                last_err = Some(err);
            }
        }
    }

    match last_err {
        Some(err) if answered == 0 => Err(FetchError::Unreachable(err.to_string())),
        _ => Ok(scan),
    }
}
