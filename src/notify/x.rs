// src/notify/x.rs
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{MediaHandle, PostId, PostPayload, Publisher};
use crate::config::PublishConfig;
use crate::error::PublishError;

/// Image types X accepts for `tweet_image`; anything else is not uploaded.
const UPLOADABLE: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// X API v2 publisher (`POST /2/tweets`, `POST /2/media/upload`) with a user
/// access token.
#[derive(Clone)]
pub struct XPublisher {
    base_url: String,
    token: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl XPublisher {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client: Client::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }

    pub fn from_config(cfg: &PublishConfig, token: impl Into<String>) -> Self {
        Self::new(cfg.x_base_url.clone(), token)
            .with_timeout(cfg.timeout_secs)
            .with_retries(cfg.max_retries)
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    /// Sends the request built by `make`, retrying 429/5xx/network errors with
    /// exponential backoff. Other 4xx are returned as `Rejected` at once.
    async fn send_with_retry<F>(&self, make: F) -> Result<Response, PublishError>
    where
        F: Fn() -> Result<RequestBuilder, PublishError>,
    {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = make()?
                .timeout(self.timeout)
                .bearer_auth(&self.token)
                .send()
                .await;

            match res {
                Ok(rsp) if rsp.status().is_success() => return Ok(rsp),
                Ok(rsp) => {
                    let status = rsp.status();
                    let retryable =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    if retryable && attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    let body = rsp.text().await.unwrap_or_default();
                    return Err(PublishError::Rejected {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(PublishError::Http(e));
                }
            }
        }
    }

    async fn upload(&self, media: &MediaHandle) -> Result<String, PublishError> {
        let path = media.path.display().to_string();
        let bytes = tokio::fs::read(&media.path)
            .await
            .map_err(|e| PublishError::Media {
                path: path.clone(),
                message: e.to_string(),
            })?;
        let file_name = media
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("summary")
            .to_string();
        let url = format!("{}/2/media/upload", self.base_url);

        let rsp = self
            .send_with_retry(|| {
                let part = Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str(&media.mime)?;
                let form = Form::new()
                    .text("media_category", "tweet_image")
                    .part("media", part);
                Ok(self.client.post(&url).multipart(form))
            })
            .await?;

        let parsed: MediaUploadResponse = rsp.json().await?;
        parsed.id().ok_or_else(|| PublishError::Media {
            path,
            message: "upload response carried no media id".into(),
        })
    }
}

#[async_trait]
impl Publisher for XPublisher {
    async fn publish(&self, payload: &PostPayload, reply_to: Option<&str>) -> Result<PostId, PublishError> {
        let mut media_ids = Vec::new();
        for m in &payload.media {
            if !UPLOADABLE.contains(&m.mime.as_str()) {
                tracing::debug!(path = %m.path.display(), mime = %m.mime, "media type not accepted by X; skipped");
                continue;
            }
            media_ids.push(self.upload(m).await?);
        }

        let body = TweetRequest {
            text: &payload.text,
            media: (!media_ids.is_empty()).then_some(TweetMedia { media_ids }),
            reply: reply_to.map(|id| TweetReply {
                in_reply_to_tweet_id: id,
            }),
        };
        let url = format!("{}/2/tweets", self.base_url);
        let rsp = self
            .send_with_retry(|| Ok(self.client.post(&url).json(&body)))
            .await?;
        let created: TweetResponse = rsp.json().await?;
        Ok(created.data.id)
    }

    fn name(&self) -> &'static str {
        "x"
    }
}

#[derive(Serialize)]
struct TweetRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<TweetMedia>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<TweetReply<'a>>,
}

#[derive(Serialize)]
struct TweetMedia {
    media_ids: Vec<String>,
}

#[derive(Serialize)]
struct TweetReply<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
}

/// v2 answers `{"data":{"id":..}}`; the v1.1 shape uses `media_id_string`.
#[derive(Deserialize)]
struct MediaUploadResponse {
    data: Option<TweetData>,
    media_id_string: Option<String>,
}

impl MediaUploadResponse {
    fn id(self) -> Option<String> {
        self.data.map(|d| d.id).or(self.media_id_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_and_media_are_omitted_when_absent() {
        let body = TweetRequest {
            text: "hello",
            media: None,
            reply: None,
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"text":"hello"}"#);

        let body = TweetRequest {
            text: "t",
            media: Some(TweetMedia {
                media_ids: vec!["9".into()],
            }),
            reply: Some(TweetReply {
                in_reply_to_tweet_id: "1",
            }),
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"text":"t","media":{"media_ids":["9"]},"reply":{"in_reply_to_tweet_id":"1"}}"#
        );
    }

    #[test]
    fn media_id_from_either_shape() {
        let v2: MediaUploadResponse = serde_json::from_str(r#"{"data":{"id":"77"}}"#).unwrap();
        assert_eq!(v2.id().as_deref(), Some("77"));
        let v1: MediaUploadResponse = serde_json::from_str(r#"{"media_id_string":"78"}"#).unwrap();
        assert_eq!(v1.id().as_deref(), Some("78"));
    }
}
