// tests/dispatch.rs
//
// Dispatcher: render -> compose -> publish thread -> record post ids -> archive cards.

use std::sync::Arc;

use billwatch::bill::{Action, BillKey, BillRecord, ChamberType, Party, SponsorInfo};
use billwatch::notify::antiflutter::PostCooldown;
use billwatch::notify::dry_run::DryRunPublisher;
use billwatch::notify::Dispatcher;
use billwatch::render::CardRenderer;
use billwatch::store::SeenStore;
use chrono::{NaiveDate, TimeZone, Utc};

fn bill(n: u32) -> BillRecord {
    BillRecord {
        key: BillKey::new(119, ChamberType::HR, n).unwrap(),
        title: format!("Dispatch test bill {n}"),
        sponsor: Some(SponsorInfo {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            title_prefix: "Rep.".into(),
            state: Some("CA".into()),
            party: Some(Party::D),
        }),
        summary: None,
        introduced_date: NaiveDate::from_ymd_opt(2025, 1, 5),
        latest_action: Some(Action {
            action_type: "IntroReferral".into(),
            code: None,
            text: "Referred to Committee".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
        }),
    }
}

/// Licensed + logged, the way a scan cycle leaves them.
async fn licensed(store: &SeenStore, bills: &[BillRecord]) {
    for b in bills {
        assert!(store.check_and_mark_seen(&b.key).await.unwrap());
        assert!(store.log_bill(b).await.unwrap());
    }
}

#[tokio::test]
async fn thread_replies_chain_and_post_ids_are_recorded() {
    let store = SeenStore::in_memory().await.unwrap();
    let batch = vec![bill(2), bill(1)];
    licensed(&store, &batch).await;

    let publisher = Arc::new(DryRunPublisher::new());
    let mut d = Dispatcher::new(publisher.clone(), store.clone(), PostCooldown::new(0));
    let report = d.dispatch(batch).await;

    assert!(report.error.is_none());
    assert_eq!(report.headers, 1);
    assert_eq!(report.posted.len(), 2);

    let sent = publisher.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent[0].0.text.starts_with("New federal bills introduced: 2 bills"));
    assert_eq!(sent[0].1, None);
    assert_eq!(sent[1].1.as_deref(), Some("dry-run-1"));
    assert_eq!(sent[2].1.as_deref(), Some("dry-run-2"));
    assert!(store.unposted(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn failure_stops_thread_and_leaves_rest_unposted() {
    let store = SeenStore::in_memory().await.unwrap();
    let batch = vec![bill(3), bill(2), bill(1)];
    licensed(&store, &batch).await;

    // header + first bill go out, the second bill post fails.
    let publisher = Arc::new(DryRunPublisher::new().failing_from(2));
    let mut d = Dispatcher::new(publisher, store.clone(), PostCooldown::new(0));
    let report = d.dispatch(batch).await;

    assert!(report.error.is_some());
    assert_eq!(report.posted.len(), 1);
    assert_eq!(report.unposted.len(), 2);
    let left: Vec<u32> = store
        .unposted(10)
        .await
        .unwrap()
        .iter()
        .map(|e| e.key.number())
        .collect();
    assert_eq!(left.len(), 2);
    assert!(!left.contains(&3));
}

#[tokio::test]
async fn nothing_posted_keeps_batch_for_next_window() {
    let store = SeenStore::in_memory().await.unwrap();
    let publisher = Arc::new(DryRunPublisher::new().failing_from(0));
    let mut d = Dispatcher::new(publisher, store, PostCooldown::new(10_800));
    let t0 = Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();

    let report = d.dispatch_at(vec![bill(1)], t0).await;
    assert!(report.error.is_some());
    assert_eq!(d.pending(), 1);
}

#[tokio::test]
async fn cooldown_holds_then_merges_batches() {
    let store = SeenStore::in_memory().await.unwrap();
    let publisher = Arc::new(DryRunPublisher::new());
    let mut d = Dispatcher::new(publisher.clone(), store, PostCooldown::new(10_800));

    let t0 = Utc.with_ymd_and_hms(2025, 9, 6, 9, 5, 0).unwrap();
    assert_eq!(d.dispatch_at(vec![bill(1)], t0).await.posted.len(), 1);

    let t1 = Utc.with_ymd_and_hms(2025, 9, 6, 10, 0, 0).unwrap();
    let held = d.dispatch_at(vec![bill(2)], t1).await;
    assert_eq!(held.deferred, 1);
    assert!(held.posted.is_empty());

    let t2 = Utc.with_ymd_and_hms(2025, 9, 6, 12, 1, 0).unwrap();
    let merged = d.dispatch_at(vec![bill(3)], t2).await;
    let numbers: Vec<u32> = merged.posted.iter().map(|(k, _)| k.number()).collect();
    assert_eq!(numbers, vec![3, 2]);
}

#[tokio::test]
async fn rendered_cards_ride_on_headers() {
    let dir = tempfile::tempdir().unwrap();
    let store = SeenStore::in_memory().await.unwrap();
    let publisher = Arc::new(DryRunPublisher::new());
    let archive = dir.path().join("archive");
    let mut d = Dispatcher::new(publisher.clone(), store, PostCooldown::new(0))
        .with_renderer(Arc::new(CardRenderer::new(dir.path().join("cards"))))
        .with_archive(&archive);

    // 40 bills -> 5 cards -> two header posts (4 + 1 media).
    let batch: Vec<BillRecord> = (1..=40).map(bill).collect();
    let now = Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap();
    let report = d.dispatch_at(batch, now).await;
    assert_eq!(report.media, 5);
    assert_eq!(report.headers, 2);
    assert_eq!(report.posted.len(), 40);
    assert_eq!(report.archived, 5);

    let sent = publisher.sent();
    assert_eq!(sent[0].0.media.len(), 4);
    assert_eq!(sent[1].0.media.len(), 1);
    assert_eq!(sent[0].0.media[0].mime, "image/png");
    assert!(sent.iter().all(|(p, _)| p.text.chars().count() <= 280));

    let archived: Vec<_> = std::fs::read_dir(archive.join("2025-09-06"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(archived.len(), 5);
    assert!(archived.iter().all(|p| p.extension().is_some_and(|e| e == "png")));
}

#[tokio::test]
async fn cards_stay_put_when_header_fails() {
    let dir = tempfile::tempdir().unwrap();
    let cards = dir.path().join("cards");
    let store = SeenStore::in_memory().await.unwrap();
    let publisher = Arc::new(DryRunPublisher::new().failing_from(0));
    let mut d = Dispatcher::new(publisher, store, PostCooldown::new(0))
        .with_renderer(Arc::new(CardRenderer::new(&cards)))
        .with_archive(dir.path().join("archive"));

    let report = d.dispatch(vec![bill(1), bill(2)]).await;
    assert_eq!(report.archived, 0);
    assert_eq!(report.unposted.len(), 2);
    assert_eq!(std::fs::read_dir(&cards).unwrap().count(), 1);
    assert!(!dir.path().join("archive").exists());
}
