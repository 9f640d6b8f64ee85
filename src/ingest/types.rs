// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::bill::{Action, BillKey, BillRecord, ChamberType};
use crate::error::FetchError;

/// Which slice of the upstream source a cycle looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateWindow {
    /// Sorted listing, most recently updated first.
    Listing {
        congress: Option<u32>,
        since: Option<DateTime<Utc>>,
        offset: u32,
        limit: u32,
    },
    /// Bill numbers `start..stop` (exclusive) in steps of `step`.
    NumberRange {
        congress: u32,
        chamber: ChamberType,
        start: u32,
        stop: u32,
        step: u32,
    },
}

/// One window's worth of candidates.
///
/// `raw_len` counts every entry the upstream returned, including ones dropped as
/// malformed or out of scope, so a page thinned by bad records is not mistaken
/// for the last one.
#[derive(Debug, Default)]
pub struct ListingPage {
    pub records: Vec<BillRecord>,
    pub raw_len: usize,
    /// Upstream pagination hint (`pagination.next`), when it sent one.
    pub has_next: Option<bool>,
    /// Entries dropped as malformed or out of scope.
    pub skipped: usize,
    /// Range probes that failed and are retried next cycle.
    pub failed: usize,
}

impl ListingPage {
    pub fn from_records(records: Vec<BillRecord>) -> Self {
        Self {
            raw_len: records.len(),
            records,
            ..Default::default()
        }
    }

    /// No further page worth requesting after this one.
    pub fn is_last(&self, limit: u32) -> bool {
        match self.has_next {
            Some(next) => !next,
            None => self.raw_len < limit as usize,
        }
    }
}

/// Upstream bill data. Implementations skip (and log) individual malformed
/// records instead of failing a whole listing.
#[async_trait]
pub trait BillSource: Send + Sync {
    /// One listing page. Records carry identity, title and latest action but
    /// usually no sponsor or summary. `Unreachable` when the listing itself fails.
    async fn fetch_listing(&self, window: &CandidateWindow) -> Result<ListingPage, FetchError>;

    /// Full record for one bill; `Ok(None)` when the bill does not exist (yet).
    async fn fetch_detail(&self, key: &BillKey) -> Result<Option<BillRecord>, FetchError>;

    /// Action history, newest first as the upstream returns it.
    async fn fetch_actions(&self, key: &BillKey) -> Result<Vec<Action>, FetchError>;

    fn name(&self) -> &'static str;
}
