use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{short, ResolveError, Resolver};
use crate::config::Settings;
use crate::media::{duration_string, Candidate, ResolvedMedia, Source};
use crate::platform::Platform;

const NAME: &str = "tikwm";

/// TikTok's anti-scraping defeats the extractor often enough that TikWM is
/// asked first for TikTok links.
pub struct TikWmResolver {
    endpoint: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl TikWmResolver {
    pub fn new(settings: &Settings, http_client: reqwest::Client) -> Self {
        Self {
            endpoint: settings.tikwm_endpoint.clone(),
            timeout: Duration::from_secs(settings.resolver_timeout.min(15)),
            http_client,
        }
    }
}

#[async_trait]
impl Resolver for TikWmResolver {
    fn name(&self) -> &'static str {
        NAME
    }

    fn applies(&self, url: &str) -> bool {
        url.to_lowercase().contains("tiktok.com")
    }

    async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ResolveError> {
        debug!("Querying TikWM for {}", short(url));
        let response = self
            .http_client
            .post(&self.endpoint)
            .form(&[("url", url)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| ResolveError::Http {
                resolver: NAME,
                error,
            })?;

        if !response.status().is_success() {
            return Err(ResolveError::Status {
                resolver: NAME,
                status: response.status().as_u16(),
            });
        }

        let payload: Value = response.json().await.map_err(|e| ResolveError::Malformed {
            resolver: NAME,
            detail: e.to_string(),
        })?;

        parse_payload(url, &payload)
    }
}

/// Map `{data: {title, cover, play, music, duration}}`.
fn parse_payload(url: &str, payload: &Value) -> Result<ResolvedMedia, ResolveError> {
    let data = match payload.get("data") {
        Some(Value::Object(map)) if !map.is_empty() => &payload["data"],
        _ => return Err(ResolveError::Empty { resolver: NAME }),
    };

    // `play` is the watermark-free file; `wmplay` and `hdplay` are not offered.
    let mut candidates = Vec::new();
    if let Some(link) = non_empty(data, "play") {
        candidates.push(Candidate {
            format_id: "play".into(),
            url: link,
            ext: Some("mp4".into()),
            has_video: true,
            has_audio: true,
            quality: Some("no_watermark".into()),
            filesize: data["size"].as_u64().filter(|s| *s > 0),
            ..Default::default()
        });
    }
    if let Some(link) = non_empty(data, "music") {
        candidates.push(Candidate {
            format_id: "music".into(),
            url: link,
            ext: Some("mp3".into()),
            has_audio: true,
            quality: Some("audio".into()),
            ..Default::default()
        });
    }

    if candidates.is_empty() {
        return Err(ResolveError::Empty { resolver: NAME });
    }

    Ok(ResolvedMedia {
        title: non_empty(data, "title").unwrap_or_else(|| "TikTok".into()),
        thumbnail: non_empty(data, "cover")
            .or_else(|| non_empty(data, "origin_cover"))
            .unwrap_or_default(),
        duration: duration_string(data["duration"].as_f64()),
        platform: Platform::TikTok,
        source: Source::TikWm,
        webpage_url: url.to_string(),
        candidates,
    })
}

fn non_empty(v: &Value, key: &str) -> Option<String> {
    v[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
