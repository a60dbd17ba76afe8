use serde::Serialize;
use url::Url;

use crate::error::ApiError;

const MAX_INPUT_LEN: usize = 2048;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    TikTok,
    Instagram,
    Facebook,
    Snapchat,
    Pinterest,
    X,
    YouTube,
    Vimeo,
    Unknown,
}

impl Platform {
    /// Substring match on the page URL. TikTok is checked first so that
    /// share links embedding other hosts in the query still route to TikWM.
    pub fn detect(url: &str) -> Self {
        let u = url.to_lowercase();
        if u.contains("tiktok.com") {
            Platform::TikTok
        } else if u.contains("instagram.com") {
            Platform::Instagram
        } else if u.contains("facebook.com") || u.contains("fb.watch") {
            Platform::Facebook
        } else if u.contains("snapchat.com") {
            Platform::Snapchat
        } else if u.contains("pinterest") || u.contains("pin.it") {
            Platform::Pinterest
        } else if u.contains("x.com") || u.contains("twitter.com") {
            Platform::X
        } else if u.contains("youtube.com") || u.contains("youtu.be") {
            Platform::YouTube
        } else if u.contains("vimeo.com") {
            Platform::Vimeo
        } else {
            Platform::Unknown
        }
    }

    /// Hint shown when no direct stream could be picked.
    pub fn no_stream_hint(self) -> &'static str {
        match self {
            Platform::Instagram | Platform::Facebook | Platform::Snapchat => {
                "This post may be private or require login."
            }
            Platform::YouTube => {
                "This video may be HLS-only, age-restricted, or require sign-in."
            }
            Platform::X => "This post may be protected or only available as an HLS stream.",
            Platform::TikTok => "This video may be private or region-locked.",
            _ => "The media may require login or is only available as an HLS stream.",
        }
    }
}

/// Strip characters that have no business in a media URL and cap the length.
pub fn sanitize_input(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '\'' | '"'))
        .take(MAX_INPUT_LEN)
        .collect()
}

/// Accept only absolute http(s) URLs that name a host.
pub fn validate_url(input: &str) -> Result<Url, String> {
    let parsed = Url::parse(input).map_err(|e| format!("Invalid URL format: {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("Unsupported URL scheme: {}", parsed.scheme()));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err("URL has no host".into());
    }
    Ok(parsed)
}

/// Sanitize and validate the `url` query parameter shared by every route.
pub fn checked_url(raw: Option<&str>) -> Result<String, ApiError> {
    let url = sanitize_input(raw.unwrap_or_default());
    if url.is_empty() {
        return Err(ApiError::empty_url());
    }
    validate_url(&url).map_err(ApiError::invalid_url)?;
    Ok(url)
}
