// tests/congress_http.rs
//
// congress.gov adapter against an in-process axum stand-in:
// - listing parse + malformed entry skipped
// - detail enrichment from /summaries and /actions
// - 404 as a value, 503 retried, 401/403 as unreachable
// - a full discovery cycle over HTTP
// - paging past a page thinned by a malformed entry

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use billwatch::bill::{BillKey, ChamberType, Party};
use billwatch::config::ScanConfig;
use billwatch::error::FetchError;
use billwatch::ingest::providers::congress_gov::CongressGovSource;
use billwatch::ingest::types::{BillSource, CandidateWindow};
use billwatch::scan::Scanner;
use billwatch::store::SeenStore;

const API_KEY: &str = "test-key";

#[derive(Clone, Default)]
struct Stand {
    s7_hits: Arc<AtomicUsize>,
    hr99_hits: Arc<AtomicUsize>,
}

fn fixture(name: &str) -> Value {
    let body = match name {
        "listing" => include_str!("fixtures/congress_listing.json"),
        "hr42" => include_str!("fixtures/bill_hr42_detail.json"),
        "hr42_actions" => include_str!("fixtures/bill_hr42_actions.json"),
        "hr42_summaries" => include_str!("fixtures/bill_hr42_summaries.json"),
        _ => "{}",
    };
    serde_json::from_str(body).unwrap()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("x-api-key").and_then(|v| v.to_str().ok()) == Some(API_KEY)
}

async fn listing(headers: HeaderMap, Path(_congress): Path<u32>) -> Response {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    Json(fixture("listing")).into_response()
}

async fn detail(
    State(st): State<Stand>,
    headers: HeaderMap,
    Path((congress, bill_type, number)): Path<(u32, String, u32)>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match (congress, bill_type.as_str(), number) {
        (119, "hr", 42) => Json(fixture("hr42")).into_response(),
        (119, "hr", 10) => Json(json!({"bill": {
            "congress": 119, "type": "HR", "number": "10", "title": "Veterans Housing Act",
            "introducedDate": "2025-01-02",
            "latestAction": {"actionDate": "2025-01-09", "text": "Passed House without objection."}
        }}))
        .into_response(),
        (119, "s", 7) => {
            if st.s7_hits.fetch_add(1, Ordering::SeqCst) == 0 {
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
            Json(json!({"bill": {
                "congress": 119, "type": "S", "number": "7", "title": "Rural Broadband &amp; Access Act",
                "introducedDate": "2025-01-08",
                "latestAction": {"actionDate": "2025-01-08", "text": "Read twice and referred to the Committee on Finance."},
                "sponsors": [{"firstName": "Ann", "lastName": "Lee", "fullName": "Sen. Lee, Ann [I-VT]", "party": "I", "state": "VT"}],
                "summary": {"text": "Expands rural broadband grants."}
            }}))
            .into_response()
        }
        (119, "hr", 99) => {
            st.hr99_hits.fetch_add(1, Ordering::SeqCst);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn actions(Path((congress, bill_type, number)): Path<(u32, String, u32)>) -> Response {
    match (congress, bill_type.as_str(), number) {
        (119, "hr", 42) => Json(fixture("hr42_actions")).into_response(),
        _ => Json(json!({"actions": []})).into_response(),
    }
}

async fn summaries(Path((congress, bill_type, number)): Path<(u32, String, u32)>) -> Response {
    match (congress, bill_type.as_str(), number) {
        (119, "hr", 42) => Json(fixture("hr42_summaries")).into_response(),
        _ => Json(json!({"summaries": []})).into_response(),
    }
}

async fn spawn_stand() -> (String, Stand) {
    let stand = Stand::default();
    let app = Router::new()
        .route("/v3/bill/{congress}", get(listing))
        .route("/v3/bill/{congress}/{bill_type}/{number}", get(detail))
        .route("/v3/bill/{congress}/{bill_type}/{number}/actions", get(actions))
        .route("/v3/bill/{congress}/{bill_type}/{number}/summaries", get(summaries))
        .with_state(stand.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v3"), stand)
}

fn source(base: &str, key: &str) -> CongressGovSource {
    CongressGovSource::new(base, key)
        .with_timeout(Duration::from_secs(5))
        .with_retries(3)
        .with_backoff(Duration::from_millis(10))
}

fn window() -> CandidateWindow {
    CandidateWindow::Listing {
        congress: Some(119),
        since: None,
        offset: 0,
        limit: 250,
    }
}

#[tokio::test]
async fn listing_parses_and_skips_malformed_entries() {
    let (base, _) = spawn_stand().await;
    let page = source(&base, API_KEY).fetch_listing(&window()).await.unwrap();
    assert_eq!(page.raw_len, 4);
    assert_eq!(page.skipped, 1);
    let recs = page.records;
    let keys: Vec<String> = recs.iter().map(|r| r.key.to_string()).collect();
    assert_eq!(keys, vec!["HR.42/119", "HR.10/119", "S.7/119"]);
    assert_eq!(recs[2].title, "Rural Broadband & Access Act");
}

#[tokio::test]
async fn detail_is_enriched_from_summaries_and_actions() {
    let (base, _) = spawn_stand().await;
    let k = BillKey::new(119, ChamberType::HR, 42).unwrap();
    let rec = source(&base, API_KEY).fetch_detail(&k).await.unwrap().unwrap();

    assert_eq!(rec.sponsor_display(), "Rep. Jane Doe (D-CA)");
    assert_eq!(rec.sponsor_party(), Party::D);
    assert_eq!(
        rec.summary.as_deref(),
        Some("Clean Water Access Act This bill requires the EPA to fund rural water systems.")
    );
    let latest = rec.latest_action.unwrap();
    assert_eq!(latest.action_type, "IntroReferral");
    assert_eq!(latest.code.as_deref(), Some("H11100"));
}

#[tokio::test]
async fn missing_bill_is_none_not_error() {
    let (base, _) = spawn_stand().await;
    let k = BillKey::new(119, ChamberType::HR, 5000).unwrap();
    assert!(source(&base, API_KEY).fetch_detail(&k).await.unwrap().is_none());
}

#[tokio::test]
async fn server_errors_are_retried_then_transient() {
    let (base, stand) = spawn_stand().await;
    let k = BillKey::new(119, ChamberType::HR, 99).unwrap();
    let err = source(&base, API_KEY)
        .with_retries(2)
        .fetch_detail(&k)
        .await
        .unwrap_err();
    assert!(err.is_transient(), "got {err}");
    assert_eq!(stand.hr99_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rejected_key_is_unreachable() {
    let (base, _) = spawn_stand().await;
    let src = source(&base, "wrong");
    assert!(matches!(
        src.fetch_listing(&window()).await,
        Err(FetchError::Unreachable(_))
    ));
    let k = BillKey::new(119, ChamberType::HR, 42).unwrap();
    assert!(matches!(src.fetch_detail(&k).await, Err(FetchError::Unreachable(_))));
}

#[tokio::test]
async fn full_cycle_over_http() {
    let (base, stand) = spawn_stand().await;
    let store = SeenStore::in_memory().await.unwrap();
    let scanner = Scanner::new(
        Arc::new(source(&base, API_KEY)),
        store.clone(),
        ScanConfig::default(),
        119,
    );

    let report = scanner.run_cycle(&window()).await;
    assert!(report.interrupted.is_none());
    assert_eq!(report.candidates, 3);
    assert_eq!(report.not_introduced, 1);
    let keys: Vec<String> = report.batch.iter().map(|r| r.key.to_string()).collect();
    assert_eq!(keys, vec!["HR.42/119", "S.7/119"]);
    // S.7 answered 503 once and succeeded on retry.
    assert_eq!(stand.s7_hits.load(Ordering::SeqCst), 2);

    let hr42 = BillKey::new(119, ChamberType::HR, 42).unwrap();
    assert!(store.seen_record(&hr42).await.unwrap().is_some());
    let logged = store.unposted(10).await.unwrap();
    assert_eq!(logged.len(), 2);

    let again = scanner.run_cycle(&window()).await;
    assert!(again.batch.is_empty());
    assert_eq!(again.already_seen, 2);
}

// Newest first: HR.4, a broken entry, HR.2, HR.1. Pages honour offset/limit.
async fn paged_listing(Query(q): Query<HashMap<String, String>>) -> Response {
    let all = [
        json!({"congress": 119, "type": "HR", "number": "4", "title": "Four",
               "latestAction": {"actionDate": "2025-03-04", "text": "Referred to the Committee on Rules."}}),
        json!({"congress": 119, "type": "HR", "title": "no number"}),
        json!({"congress": 119, "type": "HR", "number": "2", "title": "Two",
               "latestAction": {"actionDate": "2025-03-02", "text": "Referred to the Committee on Rules."}}),
        json!({"congress": 119, "type": "HR", "number": "1", "title": "One",
               "latestAction": {"actionDate": "2025-03-01", "text": "Referred to the Committee on Rules."}}),
    ];
    let offset: usize = q.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit: usize = q.get("limit").and_then(|v| v.parse().ok()).unwrap_or(250);
    let bills: Vec<Value> = all.iter().skip(offset).take(limit).cloned().collect();
    Json(json!({ "bills": bills })).into_response()
}

async fn paged_detail(Path((congress, bill_type, number)): Path<(u32, String, u32)>) -> Response {
    if congress != 119 || bill_type != "hr" || ![1, 2, 4].contains(&number) {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({"bill": {
        "congress": 119, "type": "HR", "number": number.to_string(), "title": format!("Bill {number}"),
        "introducedDate": "2025-03-01",
        "latestAction": {"actionDate": "2025-03-01", "text": "Referred to the Committee on Rules."}
    }}))
    .into_response()
}

#[tokio::test]
async fn malformed_entry_does_not_end_paging() {
    let app = Router::new()
        .route("/v3/bill/{congress}", get(paged_listing))
        .route("/v3/bill/{congress}/{bill_type}/{number}", get(paged_detail))
        .route("/v3/bill/{congress}/{bill_type}/{number}/actions", get(actions))
        .route("/v3/bill/{congress}/{bill_type}/{number}/summaries", get(summaries));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let store = SeenStore::in_memory().await.unwrap();
    let scanner = Scanner::new(
        Arc::new(source(&format!("http://{addr}/v3"), API_KEY)),
        store,
        ScanConfig::default(),
        119,
    )
    .with_page_size(2);

    let report = scanner.incremental().await;
    assert!(report.interrupted.is_none());
    let keys: Vec<String> = report.batch.iter().map(|r| r.key.to_string()).collect();
    assert_eq!(keys, vec!["HR.4/119", "HR.2/119", "HR.1/119"]);

    let backfill = Scanner::new(
        Arc::new(source(&format!("http://{addr}/v3"), API_KEY)),
        SeenStore::in_memory().await.unwrap(),
        ScanConfig::default(),
        119,
    )
    .with_page_size(2)
    .catch_up()
    .await;
    assert_eq!(backfill.batch.len(), 3);
}
