// src/ingest/providers/congress_gov.rs
//! congress.gov v3 API adapter.
//!
//! Endpoints used:
//! - `GET /bill[/{congress}]?sort=updateDate+desc&offset&limit[&fromDateTime]`
//! - `GET /bill/{congress}/{type}/{number}`
//! - `GET /bill/{congress}/{type}/{number}/actions`
//! - `GET /bill/{congress}/{type}/{number}/summaries`
//!
//! 404 is a normal answer ("no such bill yet"). 429, 5xx, timeouts and connect
//! errors are retried with exponential backoff; other 4xx are malformed requests.

use async_trait::async_trait;
use chrono::{NaiveDate, SecondsFormat};
use metrics::{counter, histogram};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

use crate::bill::{Action, BillKey, BillRecord, ChamberType, Party, SponsorInfo};
use crate::classify::find_introduction_action;
use crate::config::CongressConfig;
use crate::error::FetchError;
use crate::ingest::normalize_text;
use crate::ingest::types::{BillSource, CandidateWindow, ListingPage};

// ---- wire format ----

fn string_or_number<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match v {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    #[serde(default)]
    bills: Vec<serde_json::Value>,
    #[serde(default)]
    pagination: Option<WirePagination>,
}

#[derive(Debug, Deserialize)]
struct WirePagination {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailEnvelope {
    bill: WireBill,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBill {
    #[serde(default, deserialize_with = "string_or_number")]
    congress: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    number: Option<String>,
    #[serde(rename = "type")]
    bill_type: Option<String>,
    title: Option<String>,
    introduced_date: Option<String>,
    latest_action: Option<WireAction>,
    #[serde(default)]
    sponsors: Vec<WireSponsor>,
    summary: Option<WireSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAction {
    action_date: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "type")]
    action_type: Option<String>,
    action_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSponsor {
    first_name: Option<String>,
    last_name: Option<String>,
    full_name: Option<String>,
    title: Option<String>,
    state: Option<String>,
    party: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSummary {
    text: Option<String>,
    action_date: Option<String>,
    update_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionsEnvelope {
    #[serde(default)]
    actions: Vec<WireAction>,
}

#[derive(Debug, Deserialize)]
struct SummariesEnvelope {
    #[serde(default)]
    summaries: Vec<WireSummary>,
}

/// `2025-01-05` or `2025-01-05T14:03:11Z` -> date.
fn parse_date(s: &str) -> Option<NaiveDate> {
    let head = s.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn action_from_wire(w: WireAction) -> Option<Action> {
    let date = w.action_date.as_deref().and_then(parse_date)?;
    Some(Action {
        action_type: w.action_type.unwrap_or_default().trim().to_string(),
        code: non_empty(w.action_code),
        text: normalize_text(w.text.as_deref().unwrap_or_default()),
        date,
    })
}

fn sponsor_from_wire(w: WireSponsor, chamber: &ChamberType) -> Option<SponsorInfo> {
    let first_name = non_empty(w.first_name)?;
    let last_name = non_empty(w.last_name)?;
    // "Rep. Doe, Jane [D-CA-12]" carries the prefix when `title` is absent.
    let title_prefix = non_empty(w.title)
        .or_else(|| {
            w.full_name.as_deref().and_then(|f| {
                let head = f.split_whitespace().next()?;
                head.ends_with('.').then(|| head.to_string())
            })
        })
        .unwrap_or_else(|| {
            if chamber.is_house() {
                "Rep.".to_string()
            } else if chamber.is_senate() {
                "Sen.".to_string()
            } else {
                String::new()
            }
        });
    Some(SponsorInfo {
        first_name,
        last_name,
        title_prefix,
        state: non_empty(w.state),
        party: non_empty(w.party).map(|p| Party::parse(&p)),
    })
}

fn record_from_wire(w: WireBill) -> Result<BillRecord, FetchError> {
    let congress = w
        .congress
        .as_deref()
        .and_then(|c| c.trim().parse::<u32>().ok())
        .ok_or_else(|| FetchError::malformed("bill", "missing or bad congress"))?;
    let bill_type = w.bill_type.as_deref().unwrap_or_default();
    let number = w.number.as_deref().unwrap_or_default();
    let key = BillKey::parse(congress, bill_type, number)
        .map_err(|e| FetchError::malformed(format!("{bill_type}.{number}/{congress}"), e))?;

    let sponsor = w
        .sponsors
        .into_iter()
        .next()
        .and_then(|s| sponsor_from_wire(s, key.chamber_type()));
    let summary = w
        .summary
        .and_then(|s| s.text)
        .map(|t| normalize_text(&t))
        .filter(|t| !t.is_empty());

    Ok(BillRecord {
        title: normalize_text(w.title.as_deref().unwrap_or("Unknown")),
        sponsor,
        summary,
        introduced_date: w.introduced_date.as_deref().and_then(parse_date),
        latest_action: w.latest_action.and_then(action_from_wire),
        key,
    })
}

fn decode<T: DeserializeOwned>(body: &str, context: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::malformed(context, e))
}

/// Parses a listing page. Unusable entries are skipped and counted in `skipped`;
/// `raw_len` still counts them.
pub fn parse_listing(body: &str) -> Result<ListingPage, FetchError> {
    let env: ListEnvelope = decode(body, "bill listing")?;
    let raw_len = env.bills.len();
    let has_next = env.pagination.map(|p| p.next.is_some_and(|n| !n.is_empty()));
    let mut out = Vec::with_capacity(raw_len);
    let mut skipped = 0usize;
    for raw in env.bills {
        let parsed = serde_json::from_value::<WireBill>(raw)
            .map_err(|e| FetchError::malformed("bill listing entry", e))
            .and_then(record_from_wire);
        match parsed {
            Ok(rec) => out.push(rec),
            Err(e) => {
                skipped += 1;
                tracing::warn!(stage = "fetch", error = %e, "skipping malformed listing entry");
            }
        }
    }
    Ok(ListingPage {
        records: out,
        raw_len,
        has_next,
        skipped,
        failed: 0,
    })
}

pub fn parse_detail(body: &str) -> Result<BillRecord, FetchError> {
    let env: DetailEnvelope = decode(body, "bill detail")?;
    record_from_wire(env.bill)
}

/// Action history; entries without a usable date are dropped.
pub fn parse_actions(body: &str) -> Result<Vec<Action>, FetchError> {
    let env: ActionsEnvelope = decode(body, "bill actions")?;
    Ok(env.actions.into_iter().filter_map(action_from_wire).collect())
}

/// Text of the most recent summary version, if any.
pub fn parse_latest_summary(body: &str) -> Result<Option<String>, FetchError> {
    let env: SummariesEnvelope = decode(body, "bill summaries")?;
    Ok(env
        .summaries
        .into_iter()
        .filter(|s| s.text.as_deref().is_some_and(|t| !t.trim().is_empty()))
        .max_by(|a, b| {
            let ka = a.update_date.as_deref().or(a.action_date.as_deref());
            let kb = b.update_date.as_deref().or(b.action_date.as_deref());
            ka.cmp(&kb)
        })
        .and_then(|s| s.text)
        .map(|t| normalize_text(&t)))
}

/// Fills gaps in a detail record from the action history: the introduction date
/// when missing, and a typed latest action (detail payloads only carry text).
pub fn enrich_with_actions(record: &mut BillRecord, actions: &[Action]) {
    if record.introduced_date.is_none() {
        record.introduced_date = find_introduction_action(actions).map(|a| a.date);
    }
    // Newest date wins; on ties the first listed (upstream lists newest first).
    if let Some(latest) = actions.iter().rev().max_by_key(|a| a.date) {
        let replace = match &record.latest_action {
            None => true,
            Some(cur) => cur.action_type.is_empty() && latest.date >= cur.date,
        };
        if replace {
            record.latest_action = Some(latest.clone());
        }
    }
}

// ---- client ----

#[derive(Clone)]
pub struct CongressGovSource {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    max_attempts: u8,
    backoff_base: Duration,
    enrich_actions: bool,
}

impl CongressGovSource {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(20),
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            enrich_actions: true,
        }
    }

    pub fn from_config(cfg: &CongressConfig, api_key: impl Into<String>) -> Self {
        Self::new(cfg.base_url.clone(), api_key)
            .with_timeout(Duration::from_secs(cfg.timeout_secs))
            .with_retries(cfg.max_attempts)
            .with_backoff(Duration::from_millis(cfg.backoff_base_ms))
            .with_action_enrichment(cfg.enrich_actions)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total attempts per request, at least one.
    pub fn with_retries(mut self, attempts: u8) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_action_enrichment(mut self, on: bool) -> Self {
        self.enrich_actions = on;
        self
    }

    fn bill_path(key: &BillKey) -> String {
        format!(
            "/bill/{}/{}/{}",
            key.congress(),
            key.chamber_type().api_segment(),
            key.number()
        )
    }

    /// GET with retries. `Ok(None)` on 404.
    async fn get_body(
        &self,
        path: &str,
        query: &[(&str, String)],
        context: &str,
    ) -> Result<Option<String>, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let t0 = std::time::Instant::now();
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .get(&url)
                .timeout(self.timeout)
                .header("X-Api-Key", &self.api_key)
                .query(&[("format", "json")])
                .query(query)
                .send()
                .await;

            let retry_reason = match res {
                Ok(rsp) => {
                    let status = rsp.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status.is_success() {
                        let body = rsp
                            .text()
                            .await
                            .map_err(|e| FetchError::transient(context, e))?;
                        histogram!("fetch_request_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
                        return Ok(Some(body));
                    }
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(FetchError::Unreachable(format!(
                            "{context}: api key rejected ({status})"
                        )));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        format!("status {status}")
                    } else {
                        return Err(FetchError::malformed(context, format!("status {status}")));
                    }
                }
                Err(e) => e.to_string(),
            };

            if attempt >= self.max_attempts {
                return Err(FetchError::transient(context, retry_reason));
            }
            let delay = self.backoff_base * (1u32 << (attempt - 1).min(16));
            tracing::debug!(context, attempt, ?delay, reason = %retry_reason, "retrying upstream request");
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl BillSource for CongressGovSource {
    async fn fetch_listing(&self, window: &CandidateWindow) -> Result<ListingPage, FetchError> {
        let CandidateWindow::Listing {
            congress,
            since,
            offset,
            limit,
        } = window
        else {
            return Err(FetchError::malformed(
                "bill listing",
                "number ranges are probed through fetch_detail",
            ));
        };

        let path = match congress {
            Some(c) => format!("/bill/{c}"),
            None => "/bill".to_string(),
        };
        let mut query = vec![
            ("sort", "updateDate desc".to_string()),
            ("offset", offset.to_string()),
            ("limit", (*limit).clamp(1, 250).to_string()),
        ];
        if let Some(since) = since {
            query.push((
                "fromDateTime",
                since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }

        let body = match self.get_body(&path, &query, "bill listing").await {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(ListingPage::default()),
            Err(e @ FetchError::Malformed { .. }) => return Err(e),
            Err(e) => {
                counter!("fetch_errors_total").increment(1);
                return Err(FetchError::Unreachable(e.to_string()));
            }
        };
        let mut page = parse_listing(&body)?;
        // The congress filter is also applied locally; some mirrors ignore it.
        let before = page.records.len();
        page.records
            .retain(|r| congress.is_none_or(|c| r.key.congress() == c));
        page.skipped += before - page.records.len();
        counter!("fetch_skipped_records_total").increment(page.skipped as u64);
        Ok(page)
    }

    async fn fetch_detail(&self, key: &BillKey) -> Result<Option<BillRecord>, FetchError> {
        let context = format!("detail {key}");
        let Some(body) = self.get_body(&Self::bill_path(key), &[], &context).await? else {
            return Ok(None);
        };
        let mut record = parse_detail(&body)?;

        if record.summary.is_none() {
            let path = format!("{}/summaries", Self::bill_path(key));
            match self.get_body(&path, &[], &format!("summaries {key}")).await {
                Ok(Some(body)) => record.summary = parse_latest_summary(&body).unwrap_or(None),
                Ok(None) => {}
                Err(e) => tracing::debug!(bill = %key, error = %e, "summary lookup failed"),
            }
        }

        let needs_actions = record.introduced_date.is_none()
            || record
                .latest_action
                .as_ref()
                .is_none_or(|a| a.action_type.is_empty());
        if self.enrich_actions && needs_actions {
            match self.fetch_actions(key).await {
                Ok(actions) => enrich_with_actions(&mut record, &actions),
                Err(e) => tracing::debug!(bill = %key, error = %e, "action history lookup failed"),
            }
        }
        Ok(Some(record))
    }

    async fn fetch_actions(&self, key: &BillKey) -> Result<Vec<Action>, FetchError> {
        let path = format!("{}/actions", Self::bill_path(key));
        let query = [("limit", "250".to_string())];
        match self.get_body(&path, &query, &format!("actions {key}")).await? {
            Some(body) => parse_actions(&body),
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &'static str {
        "congress.gov"
    }
}
