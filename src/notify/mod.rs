// src/notify/mod.rs
//! Publishing: thread composition is in `format`, transport is a [`Publisher`].
//!
//! The [`Dispatcher`] is the only writer of post ids into the bill log. A failed
//! post stops the thread; bills without a post id stay listed by
//! `SeenStore::unposted`.

pub mod antiflutter;
pub mod dry_run;
pub mod x;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bill::{BillKey, BillRecord};
use crate::error::PublishError;
use crate::format::compose_thread;
use crate::render::{archive_media, ImageRenderer};
use crate::store::SeenStore;
use antiflutter::PostCooldown;

pub type PostId = String;

/// A file to attach to a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle {
    pub path: PathBuf,
    pub mime: String,
}

impl MediaHandle {
    pub fn new(path: impl Into<PathBuf>, mime: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mime: mime.into(),
        }
    }

    /// Mime type guessed from the file extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mime = mime_for(&path);
        Self::new(path, mime)
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PostPayload {
    pub text: String,
    pub media: Vec<MediaHandle>,
}

impl PostPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes one post, optionally as a reply, and returns its id.
    async fn publish(&self, payload: &PostPayload, reply_to: Option<&str>) -> Result<PostId, PublishError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Bill posts that went out, in thread order.
    pub posted: Vec<(BillKey, PostId)>,
    pub headers: usize,
    pub media: usize,
    /// Bills held back by the cooldown.
    pub deferred: usize,
    /// Bills left without a post after a failure.
    pub unposted: Vec<BillKey>,
    /// Cards moved to the archive after going out.
    pub archived: usize,
    pub error: Option<PublishError>,
}

pub struct Dispatcher {
    publisher: Arc<dyn Publisher>,
    renderer: Option<Arc<dyn ImageRenderer>>,
    archive_root: Option<PathBuf>,
    store: SeenStore,
    cooldown: PostCooldown,
}

impl Dispatcher {
    pub fn new(publisher: Arc<dyn Publisher>, store: SeenStore, cooldown: PostCooldown) -> Self {
        Self {
            publisher,
            renderer: None,
            archive_root: None,
            store,
            cooldown,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ImageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Cards attached to a posted header are moved under `root` by date.
    pub fn with_archive(mut self, root: impl Into<PathBuf>) -> Self {
        self.archive_root = Some(root.into());
        self
    }

    pub fn pending(&self) -> usize {
        self.cooldown.pending_len()
    }

    pub async fn dispatch(&mut self, batch: Vec<BillRecord>) -> DispatchReport {
        self.dispatch_at(batch, Utc::now()).await
    }

    /// Renders, composes and publishes `batch` (plus anything held back by the
    /// cooldown) as one thread.
    pub async fn dispatch_at(&mut self, batch: Vec<BillRecord>, now: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Some(bills) = self.cooldown.admit(batch, now) else {
            report.deferred = self.cooldown.pending_len();
            tracing::info!(stage = "publish", deferred = report.deferred, "inside posting cooldown; batch held");
            return report;
        };
        if bills.is_empty() {
            return report;
        }

        let media = match &self.renderer {
            Some(r) => r.render(&bills).unwrap_or_else(|e| {
                tracing::warn!(stage = "render", error = %e, "summary render failed; posting text only");
                Vec::new()
            }),
            None => Vec::new(),
        };
        report.media = media.len();

        let thread = compose_thread(&bills, &media, now.date_naive());
        let mut reply_to: Option<PostId> = None;
        let mut remaining = thread.into_iter();
        while let Some(post) = remaining.next() {
            match self.publisher.publish(&post.payload, reply_to.as_deref()).await {
                Ok(id) => {
                    counter!("posts_published_total").increment(1);
                    match &post.bill {
                        Some(key) => {
                            if let Err(e) = self.store.mark_posted(key, &id).await {
                                counter!("store_errors_total").increment(1);
                                tracing::error!(bill = %key, stage = "publish", error = %e, "recording post id failed");
                            }
                            tracing::info!(bill = %key, stage = "publish", post_id = %id, "bill posted");
                            report.posted.push((key.clone(), id.clone()));
                        }
                        None => report.headers += 1,
                    }
                    reply_to = Some(id);
                }
                Err(e) => {
                    counter!("posts_failed_total").increment(1);
                    tracing::warn!(
                        bill = %post.bill.as_ref().map(|k| k.to_string()).unwrap_or_default(),
                        stage = "publish",
                        publisher = self.publisher.name(),
                        error = %e,
                        "post failed; stopping thread"
                    );
                    report.unposted = post
                        .bill
                        .into_iter()
                        .chain(remaining.by_ref().filter_map(|p| p.bill))
                        .collect();
                    report.error = Some(e);
                    break;
                }
            }
        }

        if report.headers > 0 {
            if let Some(root) = &self.archive_root {
                match archive_media(&media, root, now.date_naive()) {
                    Ok(moved) => report.archived = moved.len(),
                    Err(e) => tracing::warn!(stage = "archive", error = %e, "archiving cards failed"),
                }
            }
        }

        if reply_to.is_some() {
            self.cooldown.record_post(now);
        } else {
            // Nothing went out: keep the whole batch for the next window.
            self.cooldown.restore(bills);
        }
        report
    }
}
