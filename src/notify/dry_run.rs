// src/notify/dry_run.rs
use async_trait::async_trait;
use std::sync::Mutex;

use super::{PostId, PostPayload, Publisher};
use crate::error::PublishError;

/// Logs posts instead of sending them; ids are `dry-run-1`, `dry-run-2`, ...
#[derive(Default)]
pub struct DryRunPublisher {
    sent: Mutex<Vec<(PostPayload, Option<String>)>>,
    fail_from: Option<usize>,
}

impl DryRunPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the `n`-th post (0-based) and every one after it.
    pub fn failing_from(mut self, n: usize) -> Self {
        self.fail_from = Some(n);
        self
    }

    /// Accepted posts with the id each replied to.
    pub fn sent(&self) -> Vec<(PostPayload, Option<String>)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, payload: &PostPayload, reply_to: Option<&str>) -> Result<PostId, PublishError> {
        let mut sent = self.sent.lock().unwrap_or_else(|p| p.into_inner());
        if self.fail_from.is_some_and(|n| sent.len() >= n) {
            return Err(PublishError::Rejected {
                status: 503,
                body: "dry-run failure".into(),
            });
        }
        sent.push((payload.clone(), reply_to.map(str::to_string)));
        let id = format!("dry-run-{}", sent.len());
        tracing::info!(
            stage = "publish",
            post_id = %id,
            reply_to = reply_to.unwrap_or("-"),
            media = payload.media.len(),
            "[dry-run] {}",
            payload.text.replace('\n', " | ")
        );
        Ok(id)
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}
