mod aggregator;
mod tikwm;
mod ytdlp;

pub use aggregator::AggregatorResolver;
pub use tikwm::TikWmResolver;
pub use ytdlp::YtDlpResolver;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::media::ResolvedMedia;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{resolver} returned no media")]
    Empty { resolver: &'static str },
    #[error("{resolver} request failed: {error}")]
    Http {
        resolver: &'static str,
        #[source]
        error: reqwest::Error,
    },
    #[error("{resolver} returned HTTP {status}")]
    Status { resolver: &'static str, status: u16 },
    #[error("{resolver} returned a malformed payload: {detail}")]
    Malformed {
        resolver: &'static str,
        detail: String,
    },
    #[error("{resolver} reported an error")]
    Rejected { resolver: &'static str },
    #[error("{resolver} timed out after {secs}s")]
    Timeout { resolver: &'static str, secs: u64 },
    #[error("media not found: {0}")]
    NotFound(String),
    #[error("access forbidden: {0}")]
    Forbidden(String),
    #[error("login required: {0}")]
    AuthRequired(String),
    #[error("unsupported URL: {0}")]
    Unsupported(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("no resolver accepted this URL")]
    NoSources,
}

/// A data source that turns a page URL into metadata plus stream candidates.
#[async_trait]
pub trait Resolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this source should be tried for `url` at all.
    fn applies(&self, _url: &str) -> bool {
        true
    }

    async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ResolveError>;
}

/// Tries resolvers in priority order and stops at the first success.
#[derive(Clone)]
pub struct ResolverChain {
    sources: Vec<Arc<dyn Resolver>>,
}

impl ResolverChain {
    pub fn new(sources: Vec<Arc<dyn Resolver>>) -> Self {
        Self { sources }
    }

    /// TikWM, then the aggregator, then yt-dlp.
    pub fn from_settings(settings: &Settings, http_client: reqwest::Client) -> Self {
        let sources: Vec<Arc<dyn Resolver>> = vec![
            Arc::new(TikWmResolver::new(settings, http_client.clone())),
            Arc::new(AggregatorResolver::new(settings, http_client)),
            Arc::new(YtDlpResolver::new(settings)),
        ];
        Self::new(sources)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Any failure moves on to the next source; once every applicable source
    /// has failed, the last error is returned.
    pub async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ResolveError> {
        let mut last_error = None;

        for source in &self.sources {
            if !source.applies(url) {
                debug!("Skipping {} for {}", source.name(), short(url));
                continue;
            }
            match source.resolve(url).await {
                Ok(media) => {
                    info!(
                        "Resolved {} via {} ({} candidates)",
                        short(url),
                        source.name(),
                        media.candidates.len()
                    );
                    return Ok(media);
                }
                Err(e) => {
                    warn!("{} failed for {}: {e}", source.name(), short(url));
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ResolveError::NoSources))
    }
}

/// Truncate URLs for log lines.
pub(crate) fn short(url: &str) -> &str {
    match url.char_indices().nth(80) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}
