// src/format.rs
//! Batch -> thread of posts.
//!
//! X counts characters, not bytes; all limits here are in `char`s.

use chrono::NaiveDate;

use crate::bill::{BillKey, BillRecord};
use crate::notify::{MediaHandle, PostPayload};

pub const MAX_POST_CHARS: usize = 280;
pub const MAX_MEDIA_PER_POST: usize = 4;

const ELLIPSIS: &str = "...";

/// One post of a thread; `bill` is set for per-bill posts.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadPost {
    pub payload: PostPayload,
    pub bill: Option<BillKey>,
}

fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn layout(number: &str, date: &str, sponsor: &str, summary: &str, link: &str) -> String {
    format!(
        "Bill Number: {number}\nDate Introduced: {date}\nSponsor: {sponsor}\nSummary: {summary}\nLink: {link}"
    )
}

/// Per-bill post. The summary (or the title when there is none) is shortened
/// first; if the fixed lines alone overflow, the whole text is cut.
pub fn bill_post_text(rec: &BillRecord) -> String {
    let number = rec.key.display_number();
    let date = rec
        .introduced_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let sponsor = rec.sponsor_display();
    let summary = rec.summary.as_deref().unwrap_or(rec.title.as_str());
    let link = rec.key.url();

    let full = layout(&number, &date, &sponsor, summary, &link);
    if full.chars().count() <= MAX_POST_CHARS {
        return full;
    }

    let fixed = layout(&number, &date, &sponsor, "", &link).chars().count();
    let room = MAX_POST_CHARS.saturating_sub(fixed);
    if room > ELLIPSIS.len() {
        let cut = format!("{}{ELLIPSIS}", take_chars(summary, room - ELLIPSIS.len()).trim_end());
        return layout(&number, &date, &sponsor, &cut, &link);
    }

    format!("{}{ELLIPSIS}", take_chars(&full, MAX_POST_CHARS - ELLIPSIS.len()))
}

/// Header of a thread. `part` is 1-based; parts only show when there is more than one.
pub fn header_text(count: usize, date: NaiveDate, part: usize, parts: usize) -> String {
    let noun = if count == 1 { "bill" } else { "bills" };
    let mut text = format!(
        "New federal bills introduced: {count} {noun} ({})",
        date.format("%Y-%m-%d")
    );
    if parts > 1 {
        text.push_str(&format!(" [{part}/{parts}]"));
    }
    text
}

/// Header posts first (media attached at most four per post), then one post per bill.
pub fn compose_thread(batch: &[BillRecord], media: &[MediaHandle], date: NaiveDate) -> Vec<ThreadPost> {
    if batch.is_empty() {
        return Vec::new();
    }
    let chunks: Vec<&[MediaHandle]> = if media.is_empty() {
        vec![media]
    } else {
        media.chunks(MAX_MEDIA_PER_POST).collect()
    };
    let parts = chunks.len();

    let mut thread: Vec<ThreadPost> = chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| ThreadPost {
            payload: PostPayload {
                text: header_text(batch.len(), date, i + 1, parts),
                media: chunk.to_vec(),
            },
            bill: None,
        })
        .collect();

    thread.extend(batch.iter().map(|rec| ThreadPost {
        payload: PostPayload::text(bill_post_text(rec)),
        bill: Some(rec.key.clone()),
    }));
    thread
}
