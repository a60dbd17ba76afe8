use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use regex_lite::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use super::{short, ResolveError, Resolver};
use crate::config::Settings;
use crate::media::{duration_string, Candidate, ResolvedMedia, Source};
use crate::platform::Platform;

const NAME: &str = "rapidapi";

/// RapidAPI "social download all in one" aggregator. Without a key it never
/// applies, so the chain moves straight on to yt-dlp.
pub struct AggregatorResolver {
    key: Option<String>,
    host: String,
    endpoint: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

#[derive(Deserialize)]
struct AggregatorPayload {
    #[serde(default)]
    error: Value,
    title: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    duration: Value,
    #[serde(default)]
    medias: Vec<AggregatorMedia>,
}

#[derive(Deserialize)]
struct AggregatorMedia {
    url: Option<String>,
    #[serde(rename = "type")]
    media_type: Option<String>,
    extension: Option<String>,
    quality: Option<String>,
}

impl AggregatorResolver {
    pub fn new(settings: &Settings, http_client: reqwest::Client) -> Self {
        Self {
            key: settings.rapidapi_key.clone(),
            host: settings.rapidapi_host.clone(),
            endpoint: settings.rapidapi_endpoint.clone(),
            timeout: Duration::from_secs(settings.resolver_timeout),
            http_client,
        }
    }
}

#[async_trait]
impl Resolver for AggregatorResolver {
    fn name(&self) -> &'static str {
        NAME
    }

    fn applies(&self, _url: &str) -> bool {
        self.key.is_some()
    }

    async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ResolveError> {
        let Some(key) = self.key.as_deref() else {
            return Err(ResolveError::NoSources);
        };
        debug!("Querying aggregator for {}", short(url));

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("x-rapidapi-key", key)
            .header("x-rapidapi-host", &self.host)
            .json(&serde_json::json!({ "url": url }))
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

        parse_payload(url, payload)
    }
}

fn parse_payload(url: &str, payload: Value) -> Result<ResolvedMedia, ResolveError> {
    let payload: AggregatorPayload =
        serde_json::from_value(payload).map_err(|e| ResolveError::Malformed {
            resolver: NAME,
            detail: e.to_string(),
        })?;

    if payload.error.as_bool() == Some(true) {
        return Err(ResolveError::Rejected { resolver: NAME });
    }

    let candidates: Vec<Candidate> = payload
        .medias
        .into_iter()
        .enumerate()
        .filter_map(|(i, m)| media_to_candidate(i, m))
        .collect();

    if candidates.is_empty() {
        return Err(ResolveError::Empty { resolver: NAME });
    }

    let duration = match &payload.duration {
        Value::Number(n) => duration_string(n.as_f64()),
        Value::String(s) => s.trim().to_string(),
        _ => String::new(),
    };

    Ok(ResolvedMedia {
        title: payload
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Video".into()),
        thumbnail: payload.thumbnail.unwrap_or_default(),
        duration,
        platform: Platform::detect(url),
        source: Source::RapidApi,
        webpage_url: url.to_string(),
        candidates,
    })
}

fn media_to_candidate(index: usize, media: AggregatorMedia) -> Option<Candidate> {
    let url = media.url.filter(|u| !u.trim().is_empty())?;
    let is_video = match media.media_type.as_deref() {
        Some("video") => true,
        Some("audio") => false,
        _ => return None,
    };
    let ext = media
        .extension
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| if is_video { "mp4" } else { "mp3" }.to_string());
    let height = media.quality.as_deref().and_then(height_from_label);

    Some(Candidate {
        format_id: format!("{}-{index}", if is_video { "video" } else { "audio" }),
        url,
        ext: Some(ext),
        // the aggregator only reports muxed files for "video"
        has_video: is_video,
        has_audio: true,
        height,
        quality: media.quality,
        ..Default::default()
    })
}

static QUALITY_HEIGHT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d{3,4})p").ok());

/// "720p", "hd_1080p" → 720, 1080.
fn height_from_label(label: &str) -> Option<u32> {
    QUALITY_HEIGHT
        .as_ref()?
        .captures(&label.to_lowercase())
        .and_then(|caps| caps[1].parse().ok())
}
