// src/ingest/providers/fixture.rs
//! In-memory [`BillSource`] for tests and offline runs.
//!
//! The listing is served newest first in pages; details and action histories are
//! keyed by [`BillKey`]. Individual keys can be made to fail transiently and the
//! whole source can be switched to unreachable.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::bill::{Action, BillKey, BillRecord};
use crate::error::FetchError;
use crate::ingest::providers::congress_gov::{parse_actions, parse_detail, parse_listing};
use crate::ingest::types::{BillSource, CandidateWindow, ListingPage};

#[derive(Default)]
struct State {
    listing: Vec<BillRecord>,
    details: HashMap<BillKey, BillRecord>,
    actions: HashMap<BillKey, Vec<Action>>,
    failing: HashSet<BillKey>,
    unreachable: bool,
}

#[derive(Default)]
pub struct FixtureSource {
    state: Mutex<State>,
    detail_calls: AtomicUsize,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing entry plus a detail record for the same bill.
    pub fn with_bill(self, record: BillRecord) -> Self {
        self.upsert(record);
        self
    }

    /// Detail only: reachable by number probing but absent from the listing.
    pub fn with_detail(self, record: BillRecord) -> Self {
        self.lock().details.insert(record.key.clone(), record);
        self
    }

    pub fn with_actions(self, key: BillKey, actions: Vec<Action>) -> Self {
        self.lock().actions.insert(key, actions);
        self
    }

    pub fn failing(self, key: BillKey) -> Self {
        self.lock().failing.insert(key);
        self
    }

    /// Loads a congress.gov listing JSON file; each entry doubles as its own detail.
    pub fn from_listing_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let body = std::fs::read_to_string(path.as_ref())?;
        let page = parse_listing(&body)?;
        let source = Self::new();
        for rec in page.records {
            source.upsert(rec);
        }
        Ok(source)
    }

    /// Replaces the detail for a bill with a congress.gov detail JSON body.
    pub fn load_detail_json(&self, body: &str) -> Result<BillKey, FetchError> {
        let rec = parse_detail(body)?;
        let key = rec.key.clone();
        self.lock().details.insert(key.clone(), rec);
        Ok(key)
    }

    pub fn load_actions_json(&self, key: &BillKey, body: &str) -> Result<(), FetchError> {
        let actions = parse_actions(body)?;
        self.lock().actions.insert(key.clone(), actions);
        Ok(())
    }

    /// Inserts or replaces a bill and moves it to the top of the listing
    /// (as an upstream update would).
    pub fn upsert(&self, record: BillRecord) {
        let mut st = self.lock();
        st.listing.retain(|r| r.key != record.key);
        st.details.insert(record.key.clone(), record.clone());
        st.listing.insert(0, record);
    }

    pub fn set_unreachable(&self, on: bool) {
        self.lock().unreachable = on;
    }

    pub fn set_failing(&self, key: &BillKey, on: bool) {
        let mut st = self.lock();
        if on {
            st.failing.insert(key.clone());
        } else {
            st.failing.remove(key);
        }
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data; keep serving it.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl BillSource for FixtureSource {
    async fn fetch_listing(&self, window: &CandidateWindow) -> Result<ListingPage, FetchError> {
        let CandidateWindow::Listing {
            congress,
            offset,
            limit,
            ..
        } = window
        else {
            return Err(FetchError::malformed(
                "fixture listing",
                "number ranges are probed through fetch_detail",
            ));
        };
        let st = self.lock();
        if st.unreachable {
            return Err(FetchError::Unreachable("fixture marked unreachable".into()));
        }
        let page = st
            .listing
            .iter()
            .filter(|r| congress.is_none_or(|c| r.key.congress() == c))
            .skip(*offset as usize)
            .take((*limit).max(1) as usize)
            .cloned()
            .collect();
        Ok(ListingPage::from_records(page))
    }

    async fn fetch_detail(&self, key: &BillKey) -> Result<Option<BillRecord>, FetchError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let st = self.lock();
        if st.unreachable {
            return Err(FetchError::transient(
                format!("detail {key}"),
                "connection refused",
            ));
        }
        if st.failing.contains(key) {
            return Err(FetchError::transient(format!("detail {key}"), "status 503"));
        }
        Ok(st.details.get(key).cloned())
    }

    async fn fetch_actions(&self, key: &BillKey) -> Result<Vec<Action>, FetchError> {
        let st = self.lock();
        if st.unreachable || st.failing.contains(key) {
            return Err(FetchError::transient(format!("actions {key}"), "status 503"));
        }
        Ok(st.actions.get(key).cloned().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
